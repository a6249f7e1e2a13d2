//! Halldyll engine CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll-engine command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use halldyll_engine::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use halldyll_engine::config::{find_config_file, ConfigParser, ConfigValidator, EngineConfig};
use halldyll_engine::deploy::{PlanFile, PrecomputedSourceFactory, StaticPluginHost};
use halldyll_engine::engine::{
    event_channel, update, CancellationSource, Context, EventReceiver, Target, UpdateInfo,
};
use halldyll_engine::error::{EngineError, Result};
use halldyll_engine::snapshot::{generate_holder_id, LocalSnapshotStore};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `HALLDYLL_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("HALLDYLL_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Apply { plan, parallel, yes } => {
            cmd_update(cli.config.as_ref(), &plan, parallel, yes, false, formatter).await
        }
        Commands::Preview { plan } => {
            cmd_update(cli.config.as_ref(), &plan, None, true, true, formatter).await
        }
        Commands::State { stack, command } => {
            cmd_state(cli.config.as_ref(), &stack, command, formatter).await
        }
    }
}

/// Runs or previews a plan file.
async fn cmd_update(
    config_path: Option<&PathBuf>,
    plan_path: &Path,
    parallel: Option<usize>,
    auto_approve: bool,
    dry_run: bool,
    formatter: OutputFormatter,
) -> Result<()> {
    let plan = PlanFile::load(plan_path)?;
    let base_dir = parent_dir(plan_path);
    let config = load_config(config_path, &base_dir)?;

    let mut options = config.update_options();
    if let Some(parallel) = parallel {
        options = options.with_parallel(parallel);
    }
    if formatter.format() == OutputFormat::Json {
        options = options.with_color(false);
    }
    if !options.use_color {
        colored::control::set_override(false);
    }

    let store = LocalSnapshotStore::open_at(config.snapshot_path(&base_dir), &plan.stack).await?;
    let current = store.snapshot().await.resources;
    let steps = plan.steps(&current)?;

    if steps.is_empty() {
        eprintln!("The plan has no steps.");
    }

    let question = format!("Run {} step(s) against stack '{}'?", steps.len(), plan.stack);
    if !auto_approve && !confirm(&question)? {
        eprintln!("Apply cancelled.");
        return Ok(());
    }

    let lock = if dry_run {
        None
    } else {
        Some(store.acquire_lock(&generate_holder_id()).await?)
    };

    let (sender, receiver) = event_channel();
    let renderer = tokio::spawn(render_events(receiver, formatter));

    let cancel = CancellationSource::new();
    let token = cancel.token();
    let interrupts = tokio::spawn(watch_interrupts(cancel));

    let info = UpdateInfo::new(
        plan.project.clone(),
        base_dir.clone(),
        Target {
            name: plan.stack.clone(),
            config: plan.config.clone(),
        },
    )
    .with_program(plan.program_info(&base_dir).program);

    let ctx = Context::new(
        Arc::new(store.clone()),
        sender,
        Arc::new(StaticPluginHost::new(plan.plugins.clone())),
        Arc::new(PrecomputedSourceFactory::from_steps(steps)),
        Arc::new(plan.applier()),
    )
    .with_cancellation(token);

    let result = update(&info, &ctx, &options, dry_run).await;

    // Closing the last sender ends the renderer.
    drop(ctx);
    interrupts.abort();
    if let Err(e) = renderer.await {
        warn!("Event renderer stopped unexpectedly: {e}");
    }

    if let Some(lock) = lock {
        store.release_lock(&lock.lock_id).await?;
    }

    match result {
        Ok(changes) => {
            debug!("Update finished with {} change(s)", changes.total());
            Ok(())
        }
        Err(e) => {
            if let Some(changes) = &e.changes {
                if changes.has_changes() {
                    eprintln!("{} change(s) were applied before the failure.", changes.total());
                }
            }
            Err(e.error)
        }
    }
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    stack: &str,
    command: StateCommands,
    formatter: OutputFormatter,
) -> Result<()> {
    let base_dir = std::env::current_dir()?;
    let config = load_config(config_path, &base_dir)?;
    let store = LocalSnapshotStore::open_at(config.snapshot_path(&base_dir), stack).await?;

    match command {
        StateCommands::Show => {
            if store.exists() {
                let snapshot = store.snapshot().await;
                let output = formatter.format_snapshot(&snapshot);
                eprintln!("{output}");
            } else {
                eprintln!("No snapshot found at {}.", store.state_path().display());
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match store.force_unlock().await? {
                    Some(lock) => eprintln!("Lock held by {} forcefully removed.", lock.holder),
                    None => eprintln!("Snapshot is not locked."),
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("Snapshot unlocked.");
            } else {
                eprintln!("Please provide a lock ID or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Forwards engine events to stdout until the channel closes.
async fn render_events(mut receiver: EventReceiver, formatter: OutputFormatter) {
    let mut stdout = std::io::stdout();
    while let Some(event) = receiver.recv().await {
        if let Some(line) = formatter.format_event(&event) {
            if writeln!(stdout, "{line}").is_err() {
                break;
            }
        }
    }
}

/// Cancels on the first Ctrl-C and terminates on the second.
async fn watch_interrupts(cancel: CancellationSource) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("Interrupted; finishing in-flight steps (press Ctrl-C again to stop now)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Terminating; in-flight steps will not be recorded");
        cancel.terminate();
    }
}

/// Loads, overrides and validates the engine configuration.
///
/// A missing configuration file is not an error; defaults apply.
fn load_config(config_path: Option<&PathBuf>, base_dir: &Path) -> Result<EngineConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.clone()),
        None => find_config_file(base_dir).ok(),
    };

    let env_dir = config_file
        .as_deref()
        .map_or_else(|| base_dir.to_path_buf(), parent_dir);
    let parser = ConfigParser::new().with_base_path(env_dir);
    parser.load_dotenv()?;

    match &config_file {
        Some(path) => debug!("Loading configuration from: {}", path.display()),
        None => info!("No configuration file found; using defaults"),
    }
    let config = parser.load_with_env(config_file.as_deref())?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Returns the directory containing a file, or `.` for a bare file name.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Asks a yes/no question on stderr.
fn confirm(question: &str) -> Result<bool> {
    eprint!("{question} [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(EngineError::Io)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
