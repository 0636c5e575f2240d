//! Repeats sync cycles until shutdown is requested.

use super::CycleReport;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How [`run_loop`] ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The single requested cycle completed.
    Finished,
    /// Shutdown was requested, during a cycle or during the pause.
    Cancelled,
}

/// Run `cycle` every `interval` until `shutdown` is cancelled or a cycle
/// fails. With `once` set, returns after the first successful cycle.
///
/// A cycle interrupted by shutdown is dropped where it stands. Nothing is
/// persisted before a cycle succeeds, so the next run starts from the last
/// stored watermark.
pub async fn run_loop<F, Fut>(
    interval: Duration,
    once: bool,
    shutdown: CancellationToken,
    mut cycle: F,
) -> anyhow::Result<LoopExit>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<CycleReport>>,
{
    loop {
        let result = tokio::select! {
            result = cycle() => result,
            _ = shutdown.cancelled() => {
                info!("Interrupted during a sync cycle, shutting down");
                return Ok(LoopExit::Cancelled);
            }
        };

        match result {
            Ok(report) => log_report(&report),
            Err(e) => {
                error!("Sync cycle failed: {:#}", e);
                return Err(e);
            }
        }

        if once {
            return Ok(LoopExit::Finished);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                info!("Interrupted, shutting down");
                return Ok(LoopExit::Cancelled);
            }
        }
    }
}

fn log_report(report: &CycleReport) {
    let watermark = report
        .persisted
        .as_ref()
        .map(|w| w.to_string())
        .unwrap_or_else(|| "unset".to_string());
    info!(
        "Cycle finished: {} sync, {} documents in {} pages ({} rejected), watermark {}{}",
        report.mode,
        report.documents,
        report.pages,
        report.rejected,
        watermark,
        if report.advanced() { "" } else { " (unchanged)" }
    );
}
