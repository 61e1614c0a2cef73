use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use wardend::{ArgsConfigLoader, ConfigLoader, NodePlan, request_stop, run_node_with};

/// Supervisor of a warden node.
#[derive(Parser, Debug)]
#[command(name = "wardend", disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the node until it stops.
    Run(ConfigArgs),
    /// Asks the running node to stop gracefully.
    Stop(ConfigArgs),
    /// Asks the running node to stop immediately.
    HardStop(ConfigArgs),
}

#[derive(clap::Args, Debug, Default)]
struct ConfigArgs {
    /// Configuration flags, for example `--data-path /var/lib/warden`.
    #[arg(
        value_name = "CONFIG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    config: Vec<OsString>,
}

impl ConfigArgs {
    fn loader(self) -> ArgsConfigLoader {
        let program = std::env::args_os()
            .next()
            .unwrap_or_else(|| OsString::from("wardend"));
        ArgsConfigLoader::new(std::iter::once(program).chain(self.config).collect())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Run(ConfigArgs::default()));
    let result = match command {
        Command::Run(args) => run_node_with(NodePlan::new(Arc::new(args.loader()))),
        Command::Stop(args) => request(args, false),
        Command::HardStop(args) => request(args, true),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "wardend: {error}");
            ExitCode::FAILURE
        }
    }
}

fn request(args: ConfigArgs, hard: bool) -> Result<(), wardend::RuntimeError> {
    let config = args
        .loader()
        .load()
        .map_err(|source| wardend::RuntimeError::Config { source })?;
    request_stop(&config, hard)
}
