use anyhow::Result;
use clap::Parser;

use osb_daemon::{config::Config, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let config = Config::parse();
    osb_daemon::run(config).await
}
