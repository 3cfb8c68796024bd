mod app;
mod cli;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::app::App;
use crate::cli::Args;
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_telemetry(&args)?;

    info!(version = env!("CARGO_PKG_VERSION"), mode = %args.mode, "Starting docpipe");

    let result = run_application(args).await;
    if let Err(ref e) = result {
        error!("Application error: {:#}", e);
    }

    info!("docpipe shutdown complete");
    result
}

async fn run_application(args: Args) -> Result<()> {
    let app = App::build(args).await?;
    app.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert()
    }
}
