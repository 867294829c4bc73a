//! Scoped heartbeat timer for the outbound stream.

use std::time::Duration;

use tokio_util::task::AbortOnDropHandle;

use querypilot_agent::{AgentEvent, EventSink};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Emits a heartbeat on a fixed interval for as long as the guard lives.
///
/// The guard is acquired when a run starts and dropped on every exit path
/// (success, error, cap exhaustion), which aborts the timer task. Send
/// failures are swallowed: a closed transport already ends the run through
/// the loop's own emit checks.
pub struct HeartbeatGuard {
    _handle: AbortOnDropHandle<()>,
}

impl HeartbeatGuard {
    pub fn start(sink: EventSink) -> Self {
        Self::with_interval(sink, HEARTBEAT_INTERVAL)
    }

    fn with_interval(sink: EventSink, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; the stream already has
            // real events at that point.
            interval.tick().await;
            loop {
                interval.tick().await;
                let _ = sink.emit(AgentEvent::Heartbeat {});
            }
        });
        Self {
            _handle: AbortOnDropHandle::new(handle),
        }
    }
}
