#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, Level as TraceLevel, Subscriber};
use tracing_subscriber::FmtSubscriber;

use settings_editor::config::EditorConfig;
use settings_editor::persistence::{parse_cli_value, JsonFileRemote};
use settings_editor::sections::Section;
use settings_editor::{
    EditingSession, SaveError, SaveOutcome, SessionOptions, SettingChange, SettingId,
};

#[derive(Parser, Debug)]
#[command(name = "settings-editor", about = "Stage, review and commit admin settings")]
struct Cli {
    /// Settings store (JSON array of setting documents)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Editor configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List setting groups
    Groups,
    /// Print the sections and settings of a group
    Show { group: String },
    /// Stage edits to a group, then commit or discard them
    Edit(EditArgs),
}

#[derive(Args, Debug)]
struct EditArgs {
    group: String,

    /// New value for a setting; JSON, or plain text for strings
    #[arg(long = "set", value_name = "ID=JSON", value_parser = parse_assignment, required = true)]
    set: Vec<(String, Value)>,

    /// Save the staged edits
    #[arg(long, conflicts_with = "discard")]
    commit: bool,

    /// Reset the staged edits to the persisted values
    #[arg(long)]
    discard: bool,
}

fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    match raw.split_once('=') {
        Some((id, value)) if !id.is_empty() => Ok((id.to_string(), parse_cli_value(value))),
        _ => Err(format!("expected ID=VALUE, got '{raw}'")),
    }
}

fn parse_level(level: &str) -> TraceLevel {
    match level.to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

fn stderr_logger(level: TraceLevel) -> impl Subscriber + Send + Sync + 'static {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish()
}

/// Load the config while `logger` is the active subscriber, so messages
/// from loading (created defaults, clamped values) are not lost
fn read_config<S>(logger: S, path: Option<&Path>) -> Result<EditorConfig>
where
    S: Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::with_default(logger, || match path {
        Some(path) => EditorConfig::load_from(path),
        None => EditorConfig::load(),
    })
}

fn init_logging(config: &EditorConfig) -> Result<()> {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| config.log_level.clone());
    tracing::subscriber::set_global_default(stderr_logger(parse_level(&level)))
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn print_sections(sections: &[Section]) {
    for section in sections {
        let name = if section.name.is_empty() { "(default)" } else { section.name.as_str() };
        let marker = if section.changed { " *" } else { "" };
        println!("[{name}]{marker}");
        for setting in &section.settings {
            let value = setting.value.clone().unwrap_or(Value::Null);
            let mut flags = Vec::new();
            if setting.changed {
                flags.push("changed");
            }
            if setting.blocked {
                flags.push("blocked");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!("  ({})", flags.join(", "))
            };
            println!("  {} = {}{}", setting.id, value, flags);
        }
    }
}

fn open_session(
    remote: JsonFileRemote,
    group: &str,
    options: SessionOptions,
) -> Result<EditingSession<JsonFileRemote>> {
    let mirror = remote.mirror().clone();
    let session = EditingSession::open(&mirror, remote, group, options);
    if session.group().is_none() && session.sections().is_empty() {
        bail!("Unknown group '{group}'");
    }
    Ok(session)
}

async fn edit(remote: JsonFileRemote, args: EditArgs, options: SessionOptions) -> Result<()> {
    let session = open_session(remote, &args.group, options)?;

    for (id, value) in args.set {
        let view = session
            .setting(&SettingId::from(id.as_str()))
            .with_context(|| format!("Cannot edit '{id}'"))?;
        if view.disabled() {
            bail!("Setting '{id}' is disabled");
        }
        view.on_change(SettingChange::value(value))?;
    }
    session.flush();
    print_sections(&session.sections());

    if args.commit {
        match session.save_group().await {
            Ok(SaveOutcome::NothingToSave) => println!("Nothing to save"),
            Ok(SaveOutcome::Saved(ids)) => println!("Saved {} setting(s)", ids.len()),
            Err(SaveError::Rejected(err)) => {
                for id in &err.setting_ids {
                    eprintln!("not saved: {id}");
                }
                return Err(err).context("Some settings were not saved");
            }
            Err(err) => return Err(err.into()),
        }
    } else if args.discard {
        let count = session.reset_group()?;
        println!("Discarded {count} change(s)");
    } else {
        println!("Staged changes were not committed (use --commit or --discard)");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let startup_level = std::env::var("LOG_LEVEL")
        .map(|level| parse_level(&level))
        .unwrap_or(TraceLevel::INFO);
    let config = read_config(stderr_logger(startup_level), cli.config.as_deref())?;
    init_logging(&config)?;

    let store = cli.store.clone().unwrap_or_else(|| config.store_path_or_default());
    let remote = JsonFileRemote::open(&store)?;
    info!(store = ?store, "Using settings store");

    let options = SessionOptions {
        debounce: config.debounce(),
    };

    match cli.command {
        Command::Groups => {
            for group in remote.groups() {
                match &group.label {
                    Some(label) => println!("{}\t{}", group.id, label),
                    None => println!("{}", group.id),
                }
            }
        }
        Command::Show { group } => {
            let session = open_session(remote, &group, options)?;
            if let Some(view) = session.group() {
                println!("{}", view.label.as_deref().unwrap_or(view.id.as_str()));
            }
            print_sections(&session.sections());
        }
        Command::Edit(args) => edit(remote, args, options).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_warnings_are_logged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"debounce_ms": 60000}"#).unwrap();

        let captured = Captured::default();
        let sink = captured.clone();
        let logger = FmtSubscriber::builder()
            .with_max_level(TraceLevel::INFO)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();

        let config = read_config(logger, Some(&path)).unwrap();
        assert_eq!(config.debounce_ms, 5_000);
        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(output.contains("debounce_ms exceeds maximum"));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), TraceLevel::DEBUG);
        assert_eq!(parse_level("warn"), TraceLevel::WARN);
        assert_eq!(parse_level("verbose"), TraceLevel::INFO);
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("Site_Name=Rocket").unwrap(),
            ("Site_Name".to_string(), Value::String("Rocket".to_string()))
        );
        assert!(parse_assignment("=1").is_err());
        assert!(parse_assignment("novalue").is_err());
    }
}
