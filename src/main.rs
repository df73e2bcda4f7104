use std::process::ExitCode;
use std::time::Instant;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use console::style;
use kumitate::config::ENV_TINIFY_KEY;
use kumitate::io::as_overhead;
use kumitate::logging::init_logging;
use kumitate::pipeline::{build_graph, dev_graph};
use kumitate::{Config, KumitateError, Mode};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Command {
    /// Build once, serve the output and rebuild on change.
    Dev,
    /// Production build with image compression.
    Build,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "dev")]
    mode: Command,

    /// Project root containing the source tree and `kumitate.toml`.
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Config file, defaults to `<root>/kumitate.toml` when present.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Tinify API key for image compression.
    #[arg(long, env = ENV_TINIFY_KEY, hide_env_values = true)]
    tinify_key: Option<String>,

    /// Port of the development HTTP server.
    #[arg(long)]
    port: Option<u16>,

    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

impl From<Command> for Mode {
    fn from(command: Command) -> Self {
        match command {
            Command::Dev => Mode::Dev,
            Command::Build => Mode::Build,
        }
    }
}

async fn run(mode: Mode, config: Config) -> Result<(), KumitateError> {
    let s = Instant::now();

    match mode {
        Mode::Build => {
            let graph = build_graph(&config);
            tracing::debug!("running {graph}");

            let report = graph.run().await?;
            tracing::debug!("\n{report}");
            tracing::info!("build complete {}", as_overhead(s));
        }
        Mode::Dev => {
            let pipeline = dev_graph(&config)?;
            tracing::debug!("running {}", pipeline.graph);

            pipeline.graph.run().await?;
        }
    }

    Ok(())
}

fn start(args: Args) -> Result<(), KumitateError> {
    let mut config = Config::load(&args.root, args.config.as_deref())?;
    config.set_compress_key(args.tinify_key);
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(KumitateError::RuntimeBuild)?
        .block_on(run(args.mode.into(), config))
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.log_level.map(Into::into)) {
        eprintln!("{e:#}");
    }

    match start(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
