mod app;
mod cli;
mod domain;
mod infra;

use crate::cli::CliInvocation;
use std::io::{self, Write};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    Cli(#[from] crate::cli::CliRunError),
}

fn main() {
    init_tracing();
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Command(command) => {
            crate::cli::run(command)?;
            Ok(())
        }
    }
}

fn print_help() {
    let text = format!(
        "{name} — live summary of coding-agent sessions (Claude + Qoder)\n\nUSAGE:\n  {name}                                  Watch all sources (same as `watch`)\n  {name} watch [--policy P] [--window SECS] [--tick SECS]\n  {name} sessions [--source claude|qoder] [--active] [--size]\n  {name} pin <session-id> | unpin <session-id> | pinned\n  {name} rename <session-id> [new-name]   Omit new-name to clear\n  {name} --help | --version\n\nWATCH FLAGS:\n  --policy P     Liveness policy: mtime|events|process (default: mtime)\n  --window SECS  Activity window for mtime/events policies (default: 120)\n  --tick SECS    Liveness re-check interval (default: 2)\n\nWATCH STDIN COMMANDS:\n  rescan | reload | pin <id> | unpin <id> | rename <id> [name] | quit\n\nSESSIONS FLAGS:\n  --source NAME  Only list one source: claude|qoder\n  --active       Only list sessions currently considered active\n  --size         Append the log file size column\n\nOUTPUT:\n  sessions: last_activity<TAB>source<TAB>session_id<TAB>status<TAB>duration<TAB>messages<TAB>name<TAB>progress<TAB>last_message<TAB>log_path  (--size inserts the size column before log_path)\n\nENV:\n  CLAUDE_PROJECTS_DIR   Override Claude projects dir (default: ~/.claude/projects)\n  QODER_PROJECTS_DIR    Override Qoder projects dir (default: ~/.qoder/projects)\n  QODER_TODOS_DIR       Override Qoder todos dir (default: ~/.qoder/todos)\n  AGENTDASH_CONFIG_DIR  Override config dir (default: ~/.agentdash)\n",
        name = env!("CARGO_PKG_NAME")
    );
    let mut out = io::stdout().lock();
    let _ = write!(out, "{text}");
}
