//! Ctrl-C handling

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Token that fires on the first Ctrl-C; a second one exits immediately
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            return;
        }
        info!("Interrupt received, finishing in-flight batches (Ctrl-C again to exit)");
        trigger.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, exiting without waiting");
            std::process::exit(130);
        }
    });
    token
}
