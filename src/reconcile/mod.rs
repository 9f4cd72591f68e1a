use crate::callrecord::{self, CallRecordSink};
use crate::config::Config;
use crate::event::{CallStatus, StatusEvent};
use crate::provider::TelephonyProvider;
use tracing::{debug, info};

pub mod classify;
pub mod discovery;
pub mod recording;
pub mod terminate;
#[cfg(test)]
mod tests;

/// Drive one status event through the full pipeline: leg discovery,
/// recording continuity, termination cascade, and downstream publication.
///
/// This runs once per webhook delivery with no shared state and no locks.
/// Deliveries may be duplicated, reordered, or concurrent for the same
/// call; every step re-reads provider state before acting and is safe to
/// repeat, so redundant invocations converge instead of conflicting.
/// Nothing in here is allowed to fail the webhook acknowledgment.
pub async fn process_event(
    provider: &dyn TelephonyProvider,
    sink: &dyn CallRecordSink,
    config: &Config,
    base_url: &str,
    event: &StatusEvent,
) {
    let Some(status) = event.status else {
        debug!("status event without a recognized status, ignoring");
        return;
    };
    if event.call_sid.is_empty() {
        debug!("status event without a call sid, ignoring");
        return;
    }
    if !status.is_recordable() {
        // Early lifecycle noise (queued/ringing) and failure terminals
        // need no reconciliation and no record.
        return;
    }

    let related = discovery::discover(provider, event, config.twilio.related_legs_limit).await;
    let candidates = classify::prioritize(related.candidates());

    // Recording status callbacks land on the same ingress route; they carry
    // no CallStatus and fall out at the guard above.
    let status_callback = format!("{}/api/twilio/status", base_url.trim_end_matches('/'));
    let outcome = recording::ensure_dual_recording(provider, &candidates, &status_callback).await;
    info!(
        call_sid = event.call_sid.as_str(),
        status = ?status,
        outcome = ?outcome,
        "recording reconciliation finished"
    );

    if status == CallStatus::Completed {
        terminate::cascade_teardown(provider, &event.call_sid, &related).await;
        callrecord::publish_completed(provider, sink, config, base_url, event, &related).await;
    }
}
