//! Command line entry point for publishing an action package.

use clap::Parser as _;
use eyre::WrapErr as _;
use publisher::{logging, Args};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    logging::init_tracing(args.log_json, args.debug);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, abandoning registry retries");
                cancel.cancel();
            }
        }
    });

    let config = args.into_config()?;
    publisher::run(config, cancel)
        .await
        .wrap_err("Failed to publish action package")?;
    Ok(())
}
