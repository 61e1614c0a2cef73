//! Behavioural tests for stop requests delivered through the IPC flag store.

use std::cell::RefCell;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use warden_config::Config;
use warden_types::ProcessKind;

use crate::app_state::{AppState, LocalAppState};
use crate::lifecycle::NodeState;
use crate::process::ipc::AllProcessesCommands;
use crate::reloader::MockAppReloader;
use crate::runtime::request_stop;
use crate::watcher::{RequestWatcher, hard_stop_request_watcher, stop_request_watcher};

use super::support::{FakeProcess, NodeHarness, fast_config};

type StepResult = Result<(), String>;

struct OperationalNode {
    config: Config,
    harness: NodeHarness,
    processes: Vec<Arc<FakeProcess>>,
    watchers: Vec<RequestWatcher>,
}

impl Drop for OperationalNode {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.stop_watching();
        }
        self.harness.scheduler.hard_stop();
    }
}

#[derive(Default)]
struct StopWorld {
    node: Option<OperationalNode>,
}

impl StopWorld {
    fn node(&self) -> Result<&OperationalNode, String> {
        self.node
            .as_ref()
            .ok_or_else(|| "no node is running".to_owned())
    }
}

#[fixture]
fn world() -> RefCell<StopWorld> {
    RefCell::new(StopWorld::default())
}

fn start_node(stop_command: bool) -> Result<OperationalNode, String> {
    let dir = TempDir::new().map_err(|error| error.to_string())?;
    let config = Config {
        enable_stop_command: Some(stop_command),
        ..fast_config(&dir)
    };
    let paths = config.paths();
    fs::create_dir_all(paths.temp()).map_err(|error| error.to_string())?;
    let ipc = AllProcessesCommands::open(&paths.ipc_path())
        .map(Arc::new)
        .map_err(|error| error.to_string())?;
    let app_commands = ipc
        .create_after_clean(ProcessKind::App.ipc_index())
        .map_err(|error| error.to_string())?;

    let app_state: Arc<dyn AppState> = Arc::new(LocalAppState::new(config.node_host()));
    let harness = NodeHarness::build(
        dir,
        config.clone(),
        app_state,
        Arc::new(MockAppReloader::new()),
    );
    let watchers: Vec<RequestWatcher> = stop_request_watcher(
        &config,
        app_commands.clone(),
        harness.scheduler.clone(),
    )
    .into_iter()
    .chain([hard_stop_request_watcher(
        &config,
        app_commands,
        harness.scheduler.clone(),
    )])
    .collect();
    for watcher in &watchers {
        watcher.start_watching().map_err(|error| error.to_string())?;
    }

    harness
        .scheduler
        .schedule()
        .map_err(|error| error.to_string())?;
    let processes = harness.start_all(1);
    if !harness.wait_for_state(NodeState::Operational) {
        return Err("node did not become operational".to_owned());
    }
    Ok(OperationalNode {
        config,
        harness,
        processes,
        watchers,
    })
}

#[given("an operational node with the stop command enabled")]
fn given_stop_command_enabled(world: &RefCell<StopWorld>) -> StepResult {
    world.borrow_mut().node = Some(start_node(true)?);
    Ok(())
}

#[given("an operational node with the stop command disabled")]
fn given_stop_command_disabled(world: &RefCell<StopWorld>) -> StepResult {
    world.borrow_mut().node = Some(start_node(false)?);
    Ok(())
}

#[when("a graceful stop is requested through the flag store")]
fn when_graceful_request(world: &RefCell<StopWorld>) -> StepResult {
    let world = world.borrow();
    request_stop(&world.node()?.config, false).map_err(|error| error.to_string())
}

#[when("a hard stop is requested through the flag store")]
fn when_hard_request(world: &RefCell<StopWorld>) -> StepResult {
    let world = world.borrow();
    request_stop(&world.node()?.config, true).map_err(|error| error.to_string())
}

#[then("the node shuts down")]
fn then_node_terminates(world: &RefCell<StopWorld>) -> StepResult {
    let world = world.borrow();
    let harness = &world.node()?.harness;
    if harness.await_termination() && harness.scheduler.state() == NodeState::Stopped {
        Ok(())
    } else {
        Err(format!("node is {}", harness.scheduler.state()))
    }
}

#[then("the node is still operational")]
fn then_still_operational(world: &RefCell<StopWorld>) -> StepResult {
    thread::sleep(Duration::from_millis(200));
    let world = world.borrow();
    let state = world.node()?.harness.scheduler.state();
    if state == NodeState::Operational {
        Ok(())
    } else {
        Err(format!("node is {state}"))
    }
}

#[then("every process received a graceful stop request")]
fn then_graceful_requests(world: &RefCell<StopWorld>) -> StepResult {
    let world = world.borrow();
    for process in &world.node()?.processes {
        if process.stop_requests() != 1 || process.hard_stop_requests() != 0 {
            return Err(format!(
                "{} got {} stop and {} hard stop requests",
                process.kind(),
                process.stop_requests(),
                process.hard_stop_requests()
            ));
        }
    }
    Ok(())
}

#[then("every process received a hard stop request")]
fn then_hard_requests(world: &RefCell<StopWorld>) -> StepResult {
    let world = world.borrow();
    for process in &world.node()?.processes {
        if process.hard_stop_requests() != 1 || process.stop_requests() != 0 {
            return Err(format!(
                "{} got {} stop and {} hard stop requests",
                process.kind(),
                process.stop_requests(),
                process.hard_stop_requests()
            ));
        }
    }
    Ok(())
}

#[scenario(path = "tests/features/stop_requests.feature", index = 0)]
fn graceful_request_stops_the_node(world: RefCell<StopWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/stop_requests.feature", index = 1)]
fn hard_request_stops_the_node(world: RefCell<StopWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/stop_requests.feature", index = 2)]
fn graceful_request_needs_the_stop_command(world: RefCell<StopWorld>) {
    let _ = world;
}
