//! Mailbox poll loop.
//!
//! Each cycle fetches unseen messages, scores each one independently,
//! appends the event to the sink, then acknowledges the message. A message
//! whose event could not be written stays unacknowledged and is picked up
//! again on the next cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::MailboxError;
use crate::mailbox::Mailbox;
use crate::pipeline::orchestrator::ScoringOrchestrator;
use crate::pipeline::sink::EventSink;

/// Wait after a failed mailbox fetch before polling again.
pub const MAILBOX_COOLDOWN: Duration = Duration::from_secs(30);

/// Spawn a background task that polls `mailbox` every `interval`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_poller(
    mailbox: Arc<dyn Mailbox>,
    orchestrator: Arc<ScoringOrchestrator>,
    sink: Arc<dyn EventSink>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            mailbox = mailbox.name(),
            interval_secs = interval.as_secs(),
            mode = %orchestrator.mode(),
            "Poller started"
        );

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poller shutting down");
                return;
            }

            if let Err(e) = run_once(mailbox.as_ref(), &orchestrator, sink.as_ref()).await {
                error!(
                    mailbox = mailbox.name(),
                    error = %e,
                    cooldown_secs = MAILBOX_COOLDOWN.as_secs(),
                    "Mailbox poll failed"
                );
                tokio::time::sleep(MAILBOX_COOLDOWN).await;
            }
        }
    });

    (handle, shutdown_flag)
}

/// Run a single cycle: fetch unseen → score → append → acknowledge.
///
/// Returns the number of events written. Only a failed fetch is an error;
/// per-message sink and acknowledgement failures are logged.
pub async fn run_once(
    mailbox: &dyn Mailbox,
    orchestrator: &ScoringOrchestrator,
    sink: &dyn EventSink,
) -> Result<usize, MailboxError> {
    let messages = mailbox.fetch_unseen().await?;
    if messages.is_empty() {
        return Ok(0);
    }
    debug!(count = messages.len(), mailbox = mailbox.name(), "Processing unseen messages");

    let mut written = 0;
    for message in &messages {
        let event = orchestrator.process(message).await;

        if let Err(e) = sink.append(&event).await {
            error!(id = %message.id, error = %e, "Failed to write event");
            continue;
        }
        written += 1;

        debug!(id = %message.id, risk = %event.risk_level, "Event written");

        if let Err(e) = mailbox.acknowledge(&message.id).await {
            warn!(id = %message.id, error = %e, "Failed to acknowledge message");
        }
    }

    Ok(written)
}
