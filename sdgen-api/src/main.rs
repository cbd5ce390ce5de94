use sdgen_api::config::Config;
use sdgen_api::{gen, server, InnerAppState, Result};

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{field::MakeExt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(version = "0.1.0", about = "Stable Diffusion image generation server")]
pub struct Opts {
    #[arg(short, long, default_value = "./config.yaml")]
    /// Path to the configuration file
    pub config: PathBuf,
    #[command(subcommand)]
    /// Subcommand to run
    pub command: Command,
}

#[derive(Debug, Parser)]
pub enum Command {
    Serve,
}

async fn inner() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdgen_api=debug,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .map_fmt_fields(|f| f.display_messages())
                .event_format(tracing_subscriber::fmt::format::Format::default()),
        )
        .init();

    let opts = Opts::parse();

    let config = Config::read(&opts.config)?;

    match opts.command {
        Command::Serve => {
            let pipelines = gen::load_pipelines(&config)?;
            server::serve(InnerAppState::new(config, pipelines).into()).await
        }
    }
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start the runtime - {e}");
            std::process::exit(1);
        }
    };
    runtime.block_on(async move {
        if let Err(e) = inner().await {
            eprintln!("Execution failed - {}", e);
            std::process::exit(1);
        }
    })
}
