use anyhow::Context;
use clap::Parser;
use log::info;

use relayproxy::config::{CliArgs, ProxyConfig};
use relayproxy::listener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = ProxyConfig::from_args(&args).context("invalid configuration")?;

    env_logger::Builder::new()
        .filter_level(config.log_level)
        .init();

    tokio::select! {
        result = listener::run(config) => result.context("proxy accept loop failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}
