use anyhow::Result;
use tracing_subscriber::EnvFilter;

use stk_ppo::config::Args;
use stk_ppo::ppo::train;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::load()?;
    train::run(args)
}
