use std::path::PathBuf;

use clap::Parser;

use crate::logger::LoggerConfig;

mod application;
mod config;
mod domain;
mod logger;
mod server;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Sets a port to start the portal server
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,
    /// Sets the public URL the portal is reached at
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let app_config = config::load_config(args)?;

    logger::init_logger(LoggerConfig { format: app_config.log_format });

    let application = application::init(&app_config)?;

    server::run(application, (&app_config).into()).await?;
    Ok(())
}
