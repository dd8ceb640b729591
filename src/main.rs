use anyhow::Context;
use clap::{Parser, Subcommand};
use dropwatch::config::{Config, SourceKind};
use dropwatch::handlers::create_handler;
use dropwatch::source::{EventSource, NotifySource, PollingSource};
use dropwatch::{logging, metrics, HandlerRegistry, LoadError, Watcher};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "dropwatch")]
#[command(about = "Watch a drop directory and route incoming files to handlers")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./dropwatch.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the drop directory until interrupted
    Run {
        /// Override watch.dir
        #[arg(long)]
        watch_dir: Option<PathBuf>,
        /// Override handlers.dir
        #[arg(long)]
        handlers_dir: Option<PathBuf>,
        /// List the directory every cycle instead of using change notifications
        #[arg(long)]
        poll: bool,
        /// Run a single cycle, print its report as JSON and exit
        #[arg(long)]
        once: bool,
    },
    /// List registered handlers in dispatch order
    Handlers {
        #[arg(long)]
        handlers_dir: Option<PathBuf>,
    },
    /// Show which handler would take a file name
    Check {
        file_name: String,
        #[arg(long)]
        handlers_dir: Option<PathBuf>,
    },
}

/// Discover handlers; an empty registry is fatal.
fn load_registry(config: &Config) -> Result<HandlerRegistry, LoadError> {
    let archive_root = config.archive_root();
    let (registry, errors) =
        HandlerRegistry::discover(&config.handlers.dir, |def| create_handler(def, &archive_root))?;
    metrics::record_registry(registry.len(), errors.len());
    if !errors.is_empty() {
        warn!("{} handler definition(s) skipped", errors.len());
    }
    registry.ensure_not_empty()?;
    registry.describe();
    Ok(registry)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received, finishing current file"),
        _ = terminate => info!("termination requested, finishing current file"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables (RUST_LOG, DROPWATCH_METRICS_ADDR)
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            watch_dir,
            handlers_dir,
            poll,
            once,
        } => {
            if let Some(dir) = watch_dir {
                config.watch.dir = dir;
            }
            if let Some(dir) = handlers_dir {
                config.handlers.dir = dir;
            }
            if poll {
                config.watch.source = SourceKind::Poll;
            }

            let _guard = logging::init_logging(&config.logging);
            metrics::init_metrics(config.metrics.listen.as_deref());

            let registry = match load_registry(&config) {
                Ok(registry) => registry,
                Err(e) => {
                    error!("{}", e);
                    return Err(e.into());
                }
            };

            std::fs::create_dir_all(&config.watch.dir)
                .with_context(|| format!("creating watch directory {}", config.watch.dir.display()))?;
            let source: Box<dyn EventSource> = match config.watch.source {
                SourceKind::Notify => Box::new(NotifySource::start(&config.watch.dir, config.dedupe_window())?),
                SourceKind::Poll => Box::new(PollingSource::new(&config.watch.dir)),
            };
            let mut watcher = Watcher::from_config(&config, source, registry)?;

            if once {
                let report = watcher.run_cycle(&|| false);
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = tx.send(true);
            });

            watcher.run(rx).await;
        }
        Commands::Handlers { handlers_dir } => {
            if let Some(dir) = handlers_dir {
                config.handlers.dir = dir;
            }
            let _guard = logging::init_logging(&config.logging);
            let registry = load_registry(&config)?;

            println!("📋 {} handler(s), in dispatch order:", registry.len());
            for (i, handler) in registry.iter().enumerate() {
                println!("   {}. {}: {}", i + 1, handler.name(), handler.describe_match_criteria());
            }
        }
        Commands::Check {
            file_name,
            handlers_dir,
        } => {
            if let Some(dir) = handlers_dir {
                config.handlers.dir = dir;
            }
            let _guard = logging::init_logging(&config.logging);
            let registry = load_registry(&config)?;

            match registry.first_match(&file_name) {
                Some(handler) => println!("✅ {} → {}", file_name, handler.name()),
                None => println!("⚠️  {} → no handler matches", file_name),
            }
        }
    }

    Ok(())
}
