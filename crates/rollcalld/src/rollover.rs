use crate::engine::EngineHandle;
use chrono::NaiveDate;
use rollcall_core::rollover::RolloverOutcome;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodically hand the current date to the engine so the attendance cache
/// is cleared when the day changes. Stops once `shutdown` is signalled.
pub fn spawn_rollover<C>(
    engine: EngineHandle,
    period: Duration,
    today: C,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    C: Fn() -> NaiveDate + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already reconciled.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match engine.roll_over(today()).await {
                        Ok(RolloverOutcome::Unchanged) => {}
                        Ok(outcome) => tracing::info!(%outcome, "rollover"),
                        Err(e) => tracing::warn!(error = %e, "rollover failed; will retry next tick"),
                    }
                }
                // Any change, or the sender going away, means stop.
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("rollover task stopped");
    })
}
