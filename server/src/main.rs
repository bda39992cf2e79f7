use anyhow::Context;
use clap::Parser;

use h264_relay::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    h264_relay::init_logging();

    let config = Cli::parse().into_config().context("Invalid configuration")?;
    h264_relay::run(config).await
}
