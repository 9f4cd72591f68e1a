use crate::config::Config;
use crate::event::StatusEvent;
use crate::provider::{Recording, TelephonyProvider};
use crate::reconcile::classify;
use crate::reconcile::discovery::RelatedLegs;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RECORDING_EXTENSION: &str = ".mp3";

/// Normalized call summary posted to the system-of-record. Created once per
/// completed call, updated at most once more when a recording URL turns up
/// through the fallback lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_sid: String,
    pub to: String,
    pub from: String,
    pub duration_secs: u64,
    /// The customer side of the call.
    pub target_phone: String,
    /// The business-owned side of the call.
    pub business_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub status: String,
    pub completed_at: DateTime<Utc>,
}

pub fn build_summary(event: &StatusEvent, business_numbers: &[String]) -> CallSummary {
    // Whichever endpoint matches a configured business number is ours; the
    // other is the customer. An inbound call flips which field holds which.
    let (business_phone, target_phone) =
        if classify::is_business_number(&event.to, business_numbers) {
            (event.to.clone(), event.from.clone())
        } else {
            (event.from.clone(), event.to.clone())
        };

    CallSummary {
        call_sid: event.call_sid.clone(),
        to: event.to.clone(),
        from: event.from.clone(),
        duration_secs: event.duration_secs.unwrap_or(0),
        target_phone,
        business_phone,
        recording_url: event.recording_url.as_deref().map(with_recording_extension),
        contact_id: event.contact_id.clone(),
        account_id: event.account_id.clone(),
        status: "completed".to_string(),
        completed_at: Utc::now(),
    }
}

/// Provider recording URLs come without a file extension; the
/// system-of-record expects a direct media link.
pub fn with_recording_extension(url: &str) -> String {
    if url.ends_with(RECORDING_EXTENSION) || url.ends_with(".wav") {
        url.to_string()
    } else {
        format!("{}{}", url, RECORDING_EXTENSION)
    }
}

/// Where finalized call records go. Behind a trait so tests can count
/// upserts without an HTTP server.
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    /// Idempotent upsert keyed by call sid.
    async fn upsert_call(&self, base_url: &str, summary: &CallSummary) -> Result<()>;

    /// Kick off transcription for a finished recording. Best-effort.
    async fn trigger_transcription(
        &self,
        base_url: &str,
        call_sid: &str,
        recording_url: &str,
    ) -> Result<()>;
}

pub type SinkRef = Arc<dyn CallRecordSink>;

/// HTTP sink posting to the CRM's internal ingestion endpoints.
pub struct HttpCallRecordSink {
    client: reqwest::Client,
}

impl HttpCallRecordSink {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallRecordSink for HttpCallRecordSink {
    async fn upsert_call(&self, base_url: &str, summary: &CallSummary) -> Result<()> {
        let url = format!("{}/api/calls", base_url.trim_end_matches('/'));
        let resp = self.client.post(&url).json(summary).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!(
                "call upsert rejected: {} {}",
                resp.status(),
                resp.text().await.unwrap_or_default()
            );
        }
        Ok(())
    }

    async fn trigger_transcription(
        &self,
        base_url: &str,
        call_sid: &str,
        recording_url: &str,
    ) -> Result<()> {
        let url = format!("{}/api/process-call", base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "callSid": call_sid,
                "recordingUrl": recording_url,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("transcription trigger rejected: {}", resp.status());
        }
        Ok(())
    }
}

/// Persist the completed call to the system-of-record.
///
/// Upserts once with whatever the event carried. When the event had no
/// recording URL, looks one up from the provider (parent call first, then
/// the triggering call and each discovered child, preferring dual-channel)
/// and upserts a
/// second time if found. Fires the transcription trigger whenever a URL is
/// known. Every failure is logged and swallowed; the webhook response never
/// depends on this.
pub async fn publish_completed(
    provider: &dyn TelephonyProvider,
    sink: &dyn CallRecordSink,
    config: &Config,
    base_url: &str,
    event: &StatusEvent,
    related: &RelatedLegs,
) {
    let mut summary = build_summary(event, &config.business_numbers);

    if let Err(e) = sink.upsert_call(base_url, &summary).await {
        error!(call_sid = event.call_sid.as_str(), "call upsert failed: {}", e);
    }

    if summary.recording_url.is_none() {
        if let Some(url) = lookup_recording_url(provider, event, related).await {
            summary.recording_url = Some(with_recording_extension(&url));
            info!(
                call_sid = event.call_sid.as_str(),
                "recording url recovered via fallback lookup"
            );
            if let Err(e) = sink.upsert_call(base_url, &summary).await {
                error!(
                    call_sid = event.call_sid.as_str(),
                    "call upsert with recovered recording failed: {}",
                    e
                );
            }
        }
    }

    if let Some(url) = &summary.recording_url {
        if let Err(e) = sink
            .trigger_transcription(base_url, &event.call_sid, url)
            .await
        {
            warn!(call_sid = event.call_sid.as_str(), "transcription trigger failed: {}", e);
        }
    }
}

/// Best-effort search for a recording of this call: parent call sid first,
/// then the reporting call and each child leg, preferring a dual-channel
/// recording at each stop.
async fn lookup_recording_url(
    provider: &dyn TelephonyProvider,
    event: &StatusEvent,
    related: &RelatedLegs,
) -> Option<String> {
    // The parent call holds the recording when a bridged child reports
    // completion, so it is checked ahead of the reporting leg.
    let parent = related.parent_sid().filter(|p| *p != event.call_sid);
    let mut sids: Vec<&str> = Vec::new();
    sids.extend(parent);
    sids.push(event.call_sid.as_str());
    for leg in &related.children {
        let sid = leg.sid.as_str();
        if sid != event.call_sid && Some(sid) != parent {
            sids.push(sid);
        }
    }

    for sid in sids {
        match provider.list_recordings(sid).await {
            Ok(recordings) => {
                if let Some(url) = pick_recording(&recordings) {
                    return Some(url);
                }
            }
            Err(e) => {
                debug!(call_sid = sid, "fallback recording lookup failed: {}", e);
            }
        }
    }
    None
}

fn pick_recording(recordings: &[Recording]) -> Option<String> {
    recordings
        .iter()
        .find(|r| r.is_dual())
        .or_else(|| recordings.first())
        .and_then(|r| r.media_url.clone())
}
