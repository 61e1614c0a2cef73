//! Test doubles shared by the unit and behavioural suites.

mod fake_process;
mod launcher;
mod node;
mod reporter;

pub use fake_process::{FakeProcess, RecordingProcessListener};
pub use launcher::{FakeLauncher, Launch};
pub use node::{NodeHarness, TERMINATION_TIMEOUT, fast_config};
pub use reporter::{HealthEvent, RecordingHealthReporter};
