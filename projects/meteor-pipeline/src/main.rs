mod app;
mod cli;
mod config;
mod pipeline;
mod run_context;
mod video;

use anyhow::Result;
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    app::run(args).await?;

    Ok(())
}
