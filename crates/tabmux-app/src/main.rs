//! tabmux: headless terminal tabs driven from the command line.

mod config;
mod frontend;
mod report;
mod script;

use std::io::Read as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::Parser as _;
use tabmux_pty::{SessionSnapshot, SessionStatus};
use tracing_subscriber::EnvFilter;

use crate::config::{BackendChoice, Config};
use crate::frontend::{wait_for_quiet, Frontend};
use crate::report::TabReport;

/// How long a new tab may take to start its shell.
const SPAWN_LIMIT: Duration = Duration::from_secs(5);

#[derive(clap::Parser)]
#[command(name = "tabmux", version, about = "Headless terminal tab multiplexer")]
struct Args {
    /// Config file (default: ~/.config/tabmux/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured backend.
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendChoice>,

    /// Print reports as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run one command in a fresh tab and print the screen.
    Exec {
        /// Give up waiting for output after this many milliseconds.
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
        /// Screen must be unchanged this long to count as finished.
        #[arg(long, default_value_t = 300)]
        quiet_ms: u64,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Run a tab script from a file, or stdin when omitted or `-`.
    Script { path: Option<PathBuf> },
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, config_path) = config::load(args.config.as_deref())?;
    init_logging(&config, args.verbose);
    let choice = args.backend.unwrap_or(config.backend);

    match args.command {
        Command::Config => {
            match &config_path {
                Some(path) => println!("# loaded from {}", path.display()),
                None => println!("# defaults ({} not found)", config::default_path().display()),
            }
            print!("{}", toml::to_string(&config).context("failed to serialize config")?);
        }
        Command::Exec {
            timeout_ms,
            quiet_ms,
            command,
        } => {
            let snapshot = exec(
                &config,
                choice,
                &command.join(" "),
                Duration::from_millis(quiet_ms),
                Duration::from_millis(timeout_ms),
            )
            .await?;
            print_reports(vec![snapshot], args.json)?;
        }
        Command::Script { path } => {
            let source = read_script(path)?;
            let steps = script::parse(&source)?;
            let frontend = start_checked(&config, choice).await?;
            let outcome = script::run(&frontend.handle, &steps).await;
            frontend.stop().await?;
            for dump in outcome? {
                print_reports(dump, args.json)?;
            }
        }
    }
    Ok(())
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Start the multiplexer with its first tab open and ready.
async fn start_checked(config: &Config, choice: BackendChoice) -> anyhow::Result<Frontend> {
    let frontend = Frontend::start(config, choice);
    let first = frontend.open_ready(SPAWN_LIMIT).await?;
    if choice == BackendChoice::Native && first.status != SessionStatus::Live {
        frontend.stop().await?;
        bail!("native backend could not start a shell (tab is {})", first.status);
    }
    Ok(frontend)
}

async fn exec(
    config: &Config,
    choice: BackendChoice,
    command: &str,
    quiet: Duration,
    limit: Duration,
) -> anyhow::Result<SessionSnapshot> {
    let frontend = start_checked(config, choice).await?;
    let outcome = async {
        let tabs = frontend.handle.tabs().await?;
        let id = tabs.first().map(|tab| tab.id).context("no tab open")?;
        frontend.handle.run_command(command).await?;
        Ok::<_, anyhow::Error>(wait_for_quiet(&frontend.handle, id, quiet, limit).await?)
    }
    .await;
    frontend.stop().await?;
    outcome
}

fn read_script(path: Option<PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read script {}", path.display())),
        _ => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("failed to read script from stdin")?;
            Ok(source)
        }
    }
}

fn print_reports(snapshots: Vec<SessionSnapshot>, json: bool) -> anyhow::Result<()> {
    let reports: Vec<TabReport> = snapshots.into_iter().map(TabReport::from).collect();
    if json {
        println!("{}", report::render_json(&reports)?);
    } else {
        print!("{}", report::render_text(&reports));
    }
    Ok(())
}
