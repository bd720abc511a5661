//! tailhub - follow append-only log files and patterns from the terminal.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tailhub::config::{ConfigLoader, EngineConfig, LogFormat};
use tailhub::hub::{IngestHub, Subscriber};
use tailhub::tailer::{FileTailer, PatternTailer, ReadMode, TailError, WatchRegistry};

#[derive(Parser)]
#[command(
    name = "tailhub",
    about = "Follow append-only log files and patterns",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow one or more files or glob patterns until interrupted.
    Follow {
        /// Files or glob patterns to follow.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Emit only the last N lines of existing content instead of the
        /// full history.
        #[arg(long, value_name = "N")]
        tail: Option<usize>,

        /// Path to a config file.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    // Diagnostics go to stderr; stdout carries the tailed content.
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Writes tailed content to stdout and lifecycle notices to stderr.
struct StdoutSubscriber;

impl StdoutSubscriber {
    fn notice(text: &str) -> String {
        format!("[{}] -- {text}", chrono::Local::now().format("%H:%M:%S"))
    }
}

impl Subscriber for StdoutSubscriber {
    fn on_content(&self, _key: &str, chunk: &str) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(chunk.as_bytes());
        let _ = stdout.flush();
    }

    fn on_cleared(&self, key: &str) {
        eprintln!("{}", Self::notice(&format!("{key}: buffer cleared")).blue());
    }

    fn on_interrupted(&self, key: &str, reason: &str) {
        eprintln!(
            "{}",
            Self::notice(&format!("{key}: stream interrupted: {reason}")).yellow()
        );
    }

    fn on_resumed(&self, key: &str) {
        eprintln!("{}", Self::notice(&format!("{key}: stream resumed")).green());
    }
}

enum AnyTailer {
    File(FileTailer),
    Pattern(PatternTailer),
}

impl AnyTailer {
    async fn start(&mut self) -> Result<(), TailError> {
        match self {
            Self::File(t) => t.start().await,
            Self::Pattern(t) => t.start().await,
        }
    }

    async fn stop(&mut self) {
        match self {
            Self::File(t) => t.stop().await,
            Self::Pattern(t) => t.stop().await,
        }
    }
}

async fn run_follow(
    sources: Vec<String>,
    tail: Option<usize>,
    engine: &EngineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let hub = Arc::new(IngestHub::new());
    let watches = Arc::new(WatchRegistry::new());

    let mode = if tail.is_some() {
        ReadMode::TailOnly
    } else {
        ReadMode::FullHistory
    };
    let mut tail_config = engine.tail_config(mode);
    if let Some(limit) = tail {
        tail_config.tail_line_limit = limit;
    }

    let subscriber: Arc<dyn Subscriber> = Arc::new(StdoutSubscriber);
    let mut tailers = Vec::new();

    for source in sources {
        hub.register(&source, engine.max_buffer_lines);
        hub.subscribe(&source, Arc::clone(&subscriber));

        let mut tailer = if source.contains(['*', '?']) {
            AnyTailer::Pattern(PatternTailer::new(
                &source,
                &source,
                Arc::clone(&hub),
                Arc::clone(&watches),
                tail_config.clone(),
            )?)
        } else {
            AnyTailer::File(FileTailer::new(
                &source,
                &source,
                Arc::clone(&hub),
                Arc::clone(&watches),
                tail_config.clone(),
            )?)
        };
        tailer.start().await?;
        tailers.push(tailer);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    for tailer in &mut tailers {
        tailer.stop().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Follow {
            sources,
            tail,
            config,
        } => {
            let loader = config.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
            let engine = match loader.load() {
                Ok(engine) => engine,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            };
            init_tracing(cli.verbose, engine.log_format);

            if let Err(e) = run_follow(sources, tail, &engine).await {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }
}
