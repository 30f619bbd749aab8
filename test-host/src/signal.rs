use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Resolves on the first SIGINT or SIGTERM.
pub async fn shutdown() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler");
            None
        }
    };

    let term = async {
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    let int = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = int => info!("received SIGINT"),
        _ = term => info!("received SIGTERM"),
    }
}
