use crate::app::{AppCommand, AppEvent, MonitorConfig, run_monitor};
use crate::domain::{
    DEFAULT_ACTIVE_WINDOW, LivenessPolicy, SourceKind, compute_dashboard_stats, latest_todo,
    progress_label,
};
use crate::infra::{
    MultiSourceMonitor, OverrideStore, ResolveConfigDirError, ResolveSourceRootsError,
    SaveOverridesError, resolve_config_dir,
};
use humansize::{BINARY, format_size};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command(CliCommand),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Sessions {
        source: Option<SourceKind>,
        active_only: bool,
        size: bool,
    },
    Pin {
        session_id: String,
    },
    Unpin {
        session_id: String,
    },
    Pinned,
    Rename {
        session_id: String,
        name: Option<String>,
    },
    Watch {
        policy: PolicyChoice,
        window: Duration,
        tick: Duration,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PolicyChoice {
    Mtime,
    Events,
    Process,
}

impl PolicyChoice {
    pub fn to_policy(self, window: Duration) -> LivenessPolicy {
        match self {
            Self::Mtime => LivenessPolicy::MtimeWindow { window },
            Self::Events => LivenessPolicy::EventWindow { window },
            Self::Process => LivenessPolicy::ProcessMatch,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args.iter().skip(1);
    let Some(subcommand) = iter.next() else {
        return Ok(CliInvocation::Command(default_watch_command()));
    };

    let rest: Vec<&String> = iter.collect();
    let command = match subcommand.as_str() {
        "sessions" => parse_sessions(&rest)?,
        "pin" => CliCommand::Pin {
            session_id: required_positional(&rest, "session-id")?,
        },
        "unpin" => CliCommand::Unpin {
            session_id: required_positional(&rest, "session-id")?,
        },
        "pinned" => {
            reject_extra_args(&rest)?;
            CliCommand::Pinned
        }
        "rename" => parse_rename(&rest)?,
        "watch" => parse_watch(&rest)?,
        other => return Err(CliParseError::UnknownSubcommand(other.to_string())),
    };

    Ok(CliInvocation::Command(command))
}

fn default_watch_command() -> CliCommand {
    CliCommand::Watch {
        policy: PolicyChoice::Mtime,
        window: DEFAULT_ACTIVE_WINDOW,
        tick: Duration::from_secs(2),
    }
}

fn parse_sessions(args: &[&String]) -> Result<CliCommand, CliParseError> {
    let mut source = None;
    let mut active_only = false;
    let mut size = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--source" | "-s" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--source".to_string()))?;
                source = Some(parse_source(value)?);
            }
            "--active" => active_only = true,
            "--size" => size = true,
            other if other.starts_with('-') => {
                return Err(CliParseError::UnknownFlag(other.to_string()));
            }
            other => return Err(CliParseError::UnexpectedArgument(other.to_string())),
        }
    }

    Ok(CliCommand::Sessions {
        source,
        active_only,
        size,
    })
}

fn parse_rename(args: &[&String]) -> Result<CliCommand, CliParseError> {
    let mut positionals = args.iter().filter(|arg| !arg.starts_with('-'));
    let session_id = positionals
        .next()
        .ok_or(CliParseError::MissingArgument("session-id"))?
        .to_string();
    let name = positionals.next().map(|name| name.to_string());
    if let Some(extra) = positionals.next() {
        return Err(CliParseError::UnexpectedArgument(extra.to_string()));
    }
    if let Some(flag) = args.iter().find(|arg| arg.starts_with('-')) {
        return Err(CliParseError::UnknownFlag(flag.to_string()));
    }
    Ok(CliCommand::Rename { session_id, name })
}

fn parse_watch(args: &[&String]) -> Result<CliCommand, CliParseError> {
    let mut policy = PolicyChoice::Mtime;
    let mut window = DEFAULT_ACTIVE_WINDOW;
    let mut tick = Duration::from_secs(2);

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--policy" | "-p" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--policy".to_string()))?;
                policy = match value.as_str() {
                    "mtime" => PolicyChoice::Mtime,
                    "events" => PolicyChoice::Events,
                    "process" => PolicyChoice::Process,
                    other => {
                        return Err(CliParseError::InvalidFlagValue {
                            flag: "--policy".to_string(),
                            value: other.to_string(),
                        });
                    }
                };
            }
            "--window" => {
                window = Duration::from_secs(parse_seconds(&mut iter, "--window")?);
            }
            "--tick" => {
                tick = Duration::from_secs(parse_seconds(&mut iter, "--tick")?);
            }
            other if other.starts_with('-') => {
                return Err(CliParseError::UnknownFlag(other.to_string()));
            }
            other => return Err(CliParseError::UnexpectedArgument(other.to_string())),
        }
    }

    Ok(CliCommand::Watch {
        policy,
        window,
        tick,
    })
}

fn parse_seconds<'a, 'b: 'a>(
    iter: &mut impl Iterator<Item = &'a &'b String>,
    flag: &str,
) -> Result<u64, CliParseError> {
    let value = iter
        .next()
        .ok_or_else(|| CliParseError::MissingFlagValue(flag.to_string()))?;
    value
        .parse::<u64>()
        .map_err(|_| CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        })
}

fn parse_source(value: &str) -> Result<SourceKind, CliParseError> {
    match value {
        "claude" => Ok(SourceKind::Claude),
        "qoder" => Ok(SourceKind::Qoder),
        other => Err(CliParseError::InvalidFlagValue {
            flag: "--source".to_string(),
            value: other.to_string(),
        }),
    }
}

fn required_positional(args: &[&String], what: &'static str) -> Result<String, CliParseError> {
    match args {
        [] => Err(CliParseError::MissingArgument(what)),
        [only] if !only.starts_with('-') => Ok(only.to_string()),
        [first, ..] if first.starts_with('-') => Err(CliParseError::UnknownFlag(first.to_string())),
        [_, extra, ..] => Err(CliParseError::UnexpectedArgument(extra.to_string())),
        _ => Err(CliParseError::MissingArgument(what)),
    }
}

fn reject_extra_args(args: &[&String]) -> Result<(), CliParseError> {
    match args.first() {
        None => Ok(()),
        Some(arg) if arg.starts_with('-') => Err(CliParseError::UnknownFlag(arg.to_string())),
        Some(arg) => Err(CliParseError::UnexpectedArgument(arg.to_string())),
    }
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    ResolveConfigDir(#[from] ResolveConfigDirError),

    #[error(transparent)]
    ResolveSourceRoots(#[from] ResolveSourceRootsError),

    #[error(transparent)]
    SaveOverrides(#[from] SaveOverridesError),

    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),
}

pub fn run(command: CliCommand) -> Result<(), CliRunError> {
    match command {
        CliCommand::Sessions {
            source,
            active_only,
            size,
        } => run_sessions(source, active_only, size),
        CliCommand::Pin { session_id } => run_set_pinned(&session_id, true),
        CliCommand::Unpin { session_id } => run_set_pinned(&session_id, false),
        CliCommand::Pinned => run_pinned(),
        CliCommand::Rename { session_id, name } => run_rename(&session_id, name.as_deref()),
        CliCommand::Watch {
            policy,
            window,
            tick,
        } => run_watch(policy, window, tick),
    }
}

fn open_store() -> Result<Arc<OverrideStore>, CliRunError> {
    let config_dir = resolve_config_dir()?;
    Ok(Arc::new(OverrideStore::open(config_dir)))
}

fn run_sessions(
    source: Option<SourceKind>,
    active_only: bool,
    size: bool,
) -> Result<(), CliRunError> {
    let overrides = open_store()?;
    let mut aggregator =
        MultiSourceMonitor::from_default_roots(LivenessPolicy::default(), overrides)?;
    let output = aggregator.rescan_all();

    let now = OffsetDateTime::now_utc();
    let mut out = io::stdout().lock();
    for session in output.sessions {
        if source.is_some_and(|wanted| session.source != wanted) {
            continue;
        }
        if active_only && !session.is_active {
            continue;
        }

        let last_activity = session
            .last_activity
            .format(&Rfc3339)
            .unwrap_or_else(|_| "-".to_string());
        let mut status = if session.is_active { "active" } else { "idle" }.to_string();
        if session.is_pinned {
            status.push('*');
        }
        let mut line = format!(
            "{last_activity}\t{}\t{}\t{status}\t{}\t{}\t{}\t{}\t{}",
            session.source.label(),
            session.session_id,
            session.duration_label(now),
            session.message_count,
            session.display_name(),
            progress_label(&session.todos),
            sanitize_column(&session.last_message),
        );
        if size {
            line.push('\t');
            line.push_str(&format_size(session.file_size_bytes, BINARY));
        }
        line.push('\t');
        line.push_str(&session.file_path.display().to_string());
        let _ = writeln!(out, "{line}");
    }

    let mut err = io::stderr().lock();
    if output.warnings.get() > 0 {
        let _ = writeln!(err, "warnings: {} file(s) skipped", output.warnings.get());
    }
    if let Some(notice) = output.notice {
        let _ = writeln!(err, "{notice}");
    }

    Ok(())
}

fn sanitize_column(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}

fn run_set_pinned(session_id: &str, pinned: bool) -> Result<(), CliRunError> {
    let overrides = open_store()?;
    overrides.set_pinned(session_id, pinned)?;
    let mut out = io::stdout().lock();
    let verb = if pinned { "pinned" } else { "unpinned" };
    let _ = writeln!(out, "{verb} {session_id}");
    Ok(())
}

fn run_pinned() -> Result<(), CliRunError> {
    let overrides = open_store()?;
    let mut out = io::stdout().lock();
    for session_id in overrides.pinned_sessions() {
        let _ = writeln!(out, "{session_id}");
    }
    Ok(())
}

fn run_rename(session_id: &str, name: Option<&str>) -> Result<(), CliRunError> {
    let overrides = open_store()?;
    overrides.set_custom_name(session_id, name.unwrap_or_default())?;
    let mut out = io::stdout().lock();
    match name {
        Some(name) if !name.trim().is_empty() => {
            let _ = writeln!(out, "renamed {session_id} to {name}");
        }
        _ => {
            let _ = writeln!(out, "cleared name for {session_id}");
        }
    }
    Ok(())
}

fn run_watch(policy: PolicyChoice, window: Duration, tick: Duration) -> Result<(), CliRunError> {
    let overrides = open_store()?;
    let aggregator =
        MultiSourceMonitor::from_default_roots(policy.to_policy(window), overrides)?;

    let (command_tx, command_rx) = channel::<AppCommand>();
    let (event_tx, event_rx) = channel::<AppEvent>();

    let interrupt_tx = command_tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(AppCommand::Shutdown);
    })?;
    spawn_stdin_commands(command_tx);

    let config = MonitorConfig {
        tick_interval: tick,
        ..MonitorConfig::default()
    };
    let worker = std::thread::spawn(move || {
        run_monitor(aggregator, command_rx, event_tx, config);
    });

    let mut out = io::stdout().lock();
    while let Ok(event) = event_rx.recv() {
        match event {
            AppEvent::SessionsUpdated(sessions) => {
                let stats = compute_dashboard_stats(&sessions);
                let now = OffsetDateTime::now_utc()
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| "-".to_string());
                let latest = latest_todo(&sessions)
                    .map(|todo| format!(" latest={:?}", todo.content))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "{now} sessions={} active={} with_todos={} completed={} in_progress={} pending={}{latest}",
                    stats.total_sessions,
                    stats.active_sessions,
                    stats.sessions_with_todos,
                    stats.completed_todos,
                    stats.in_progress_todos,
                    stats.pending_todos,
                );
            }
            AppEvent::CommandFailed { message } => {
                let mut err = io::stderr().lock();
                let _ = writeln!(err, "{message}");
            }
        }
    }

    let _ = worker.join();
    Ok(())
}

/// Line-oriented command driver so a running `watch` can be steered from a
/// pipe or an interactive terminal.
fn spawn_stdin_commands(command_tx: std::sync::mpsc::Sender<AppCommand>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_watch_command(trimmed) {
                Some(command) => {
                    if command_tx.send(command).is_err() {
                        break;
                    }
                }
                None => {
                    let mut err = io::stderr().lock();
                    let _ = writeln!(err, "unknown command: {trimmed}");
                }
            }
        }
    });
}

fn parse_watch_command(line: &str) -> Option<AppCommand> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "rescan" => Some(AppCommand::Rescan),
        "reload" => Some(AppCommand::ReloadOverrides),
        "pin" => parts.next().map(|id| AppCommand::TogglePin {
            session_id: id.to_string(),
            pinned: true,
        }),
        "unpin" => parts.next().map(|id| AppCommand::TogglePin {
            session_id: id.to_string(),
            pinned: false,
        }),
        "rename" => {
            let session_id = parts.next()?.to_string();
            let name = parts.collect::<Vec<_>>().join(" ");
            Some(AppCommand::Rename { session_id, name })
        }
        "quit" | "exit" => Some(AppCommand::Shutdown),
        _ => None,
    }
}
