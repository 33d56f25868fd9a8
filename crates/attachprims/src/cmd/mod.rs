use clap::{Args, Subcommand};
use std::path::PathBuf;

use attachprims_session::DEFAULT_DETACH_KEYS;

use crate::exit::CliResult;

pub mod attach;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attach this terminal's stdio to a container's attach socket.
    Attach(AttachArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Attach(args) => attach::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Attach socket path prepared by the server.
    pub path: PathBuf,
    /// Container ID (used in logs). Defaults to the socket's parent directory name.
    #[arg(long)]
    pub id: Option<String>,
    /// Key sequence that detaches, e.g. "ctrl-p,ctrl-q". Empty disables detaching.
    #[arg(long, default_value = DEFAULT_DETACH_KEYS, env = "ATTACHPRIMS_DETACH_KEYS")]
    pub detach_keys: String,
    /// Do not forward stdin.
    #[arg(long, conflicts_with = "stop_after_stdin_eof")]
    pub no_stdin: bool,
    /// Exit as soon as stdin reaches EOF instead of waiting for output.
    #[arg(long)]
    pub stop_after_stdin_eof: bool,
    /// The attached process runs with a terminal: put the local terminal in
    /// raw mode and report its size changes.
    #[arg(long)]
    pub tty: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
