#![expect(
    clippy::module_name_repetitions,
    reason = "The monitor is named after the heartbeat it emits"
)]

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::codec::encode_heartbeat;

/// Shortest accepted heartbeat period; smaller values, including zero, are raised to it.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Emits heartbeat frames on a fixed interval while a connection is open.
///
/// The only capability it needs is a sender for outgoing text frames. The first heartbeat goes
/// out one full interval after [`HeartbeatMonitor::start`]. A missing `heartbeat_ack` is not
/// treated as a failure; liveness is left to the transport's own close and error signals.
///
/// Dropping the monitor stops it.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    token: CancellationToken,
}

impl HeartbeatMonitor {
    /// Spawn the heartbeat task. `period` is clamped to [`MIN_HEARTBEAT_INTERVAL`].
    #[must_use]
    pub fn start(outgoing: mpsc::UnboundedSender<String>, period: Duration) -> Self {
        let period = period.max(MIN_HEARTBEAT_INTERVAL);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token_clone.cancelled() => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Heartbeat cancellation requested, terminating...");
                        break;
                    }
                    _ = ticker.tick() => {
                        let frame = match encode_heartbeat(Utc::now().timestamp_millis()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                #[cfg(feature = "tracing")]
                                tracing::error!("Unable to encode heartbeat: {e:?}");
                                #[cfg(not(feature = "tracing"))]
                                let _ = &e;
                                continue;
                            }
                        };

                        if outgoing.send(frame).is_err() {
                            // Socket loop has terminated
                            break;
                        }

                        #[cfg(feature = "tracing")]
                        tracing::debug!("Heartbeat sent");
                    }
                }
            }
        });

        Self { token }
    }

    /// Stop sending heartbeats. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
