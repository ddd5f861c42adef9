use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use kumade::{Config, DevServer, KumadeError, Website};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    /// Build, then serve the output and rebuild on changes.
    Watch,
    /// Build once and exit.
    Build,
    /// Print the task tree as a Mermaid diagram.
    Graph,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "watch")]
    mode: Mode,

    /// Project root containing the source directory.
    #[clap(long, default_value = ".")]
    root: Utf8PathBuf,

    /// HTTP port of the dev server.
    #[clap(long)]
    port: Option<u16>,
}

fn init_logging() {
    let indicatif_layer = IndicatifLayer::new();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .with(filter)
        .try_init()
        .ok();
}

async fn run(mode: Mode, config: Config) -> Result<(), KumadeError> {
    match mode {
        Mode::Build => Website::new(config).build().await?,
        Mode::Graph => println!("{}", Website::new(config).tree()?.mermaid()),
        Mode::Watch => {
            let server = Arc::new(DevServer::start(config.dist_dir(), &config.server).await?);
            let site = Website::new(config).notify(Some(server));
            site.tree()?.run().await?;
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let mut config = Config::with_root(args.root);
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(KumadeError::RuntimeBuild)?
        .block_on(run(args.mode, config))?;

    Ok(())
}
