//! Running the daemon until it is told to stop.

use log::{error, info, warn};
use crate::commons::error::CrlIoError;
use crate::commons::CrlResult;
use crate::config::Config;
use super::manager::CrlManager;

/// Starts all configured issuing points and runs until a signal arrives.
///
/// The issuing points run on their own threads. The async runtime is only
/// used to wait for `SIGINT` or `SIGTERM`, after which all points are shut
/// down cleanly.
pub fn start(config: &Config) -> CrlResult<()> {
    let manager = CrlManager::build(config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            CrlIoError::new("cannot create async runtime".to_string(), e)
        })?;
    runtime.block_on(wait_for_signal());

    info!("Shutting down {} issuing points", manager.issuing_points().len());
    manager.shutdown()
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for SIGINT: {e}");
    }
}
