use super::{
    ApiError, Direction, Leg, Recording, RecordingSource, RecordingStatus, TelephonyProvider,
};
use crate::config::TwilioConfig;
use crate::event::CallStatus;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const API_VERSION: &str = "2010-04-01";

/// Twilio REST implementation of [`TelephonyProvider`].
pub struct TwilioProvider {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    parent_call_sid: Option<String>,
    direction: Option<String>,
    from: Option<String>,
    to: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallPage {
    calls: Vec<CallResource>,
}

#[derive(Debug, Deserialize)]
struct RecordingResource {
    sid: String,
    call_sid: String,
    channels: Option<u8>,
    source: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordingPage {
    recordings: Vec<RecordingResource>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u32>,
    message: Option<String>,
}

impl TwilioProvider {
    pub fn new(config: &TwilioConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn account_url(&self) -> String {
        format!("{}/{}/Accounts/{}", self.api_base, API_VERSION, self.account_sid)
    }

    /// Turns non-2xx responses into an [`ApiError`] carrying the provider's
    /// own error code when the body has one.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or(ErrorBody {
            code: None,
            message: None,
        });
        Err(ApiError {
            status,
            code: parsed.code,
            message: parsed.message.unwrap_or(body),
        }
        .into())
    }

    fn to_leg(call: CallResource) -> Leg {
        Leg {
            sid: call.sid,
            parent_sid: call.parent_call_sid.filter(|p| !p.is_empty()),
            direction: call
                .direction
                .as_deref()
                .map(Direction::parse)
                .unwrap_or(Direction::Other),
            from: call.from.unwrap_or_default(),
            to: call.to.unwrap_or_default(),
            status: call.status.as_deref().and_then(CallStatus::parse),
        }
    }

    fn to_recording(&self, rec: RecordingResource) -> Recording {
        let media_url = Some(format!(
            "{}/Recordings/{}",
            self.account_url(),
            rec.sid
        ));
        Recording {
            call_sid: rec.call_sid,
            channels: rec.channels.unwrap_or(1),
            source: rec
                .source
                .as_deref()
                .map(RecordingSource::parse)
                .unwrap_or(RecordingSource::Other),
            status: rec
                .status
                .as_deref()
                .map(RecordingStatus::parse)
                .unwrap_or(RecordingStatus::Other),
            sid: rec.sid,
            media_url,
        }
    }
}

#[async_trait]
impl TelephonyProvider for TwilioProvider {
    async fn fetch_call(&self, sid: &str) -> Result<Leg> {
        let url = format!("{}/Calls/{}.json", self.account_url(), sid);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let call: CallResource = Self::check(resp).await?.json().await?;
        Ok(Self::to_leg(call))
    }

    async fn list_child_calls(&self, parent_sid: &str, limit: usize) -> Result<Vec<Leg>> {
        let url = format!("{}/Calls.json", self.account_url());
        let page_size = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("ParentCallSid", parent_sid),
                ("PageSize", page_size.as_str()),
            ])
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let page: CallPage = Self::check(resp).await?.json().await?;
        Ok(page.calls.into_iter().map(Self::to_leg).collect())
    }

    async fn terminate_call(&self, sid: &str) -> Result<()> {
        let url = format!("{}/Calls/{}.json", self.account_url(), sid);
        let resp = self
            .client
            .post(&url)
            .form(&[("Status", "completed")])
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn list_recordings(&self, call_sid: &str) -> Result<Vec<Recording>> {
        let url = format!("{}/Calls/{}/Recordings.json", self.account_url(), call_sid);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let page: RecordingPage = Self::check(resp).await?.json().await?;
        Ok(page
            .recordings
            .into_iter()
            .map(|r| self.to_recording(r))
            .collect())
    }

    async fn start_dual_recording(
        &self,
        call_sid: &str,
        status_callback: &str,
    ) -> Result<Recording> {
        let url = format!("{}/Calls/{}/Recordings.json", self.account_url(), call_sid);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("RecordingChannels", "dual"),
                ("RecordingTrack", "both"),
                ("RecordingStatusCallback", status_callback),
                ("RecordingStatusCallbackMethod", "POST"),
            ])
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        let rec: RecordingResource = Self::check(resp).await?.json().await?;
        Ok(self.to_recording(rec))
    }

    async fn stop_recording(&self, call_sid: &str, recording_sid: &str) -> Result<()> {
        let url = format!(
            "{}/Calls/{}/Recordings/{}.json",
            self.account_url(),
            call_sid,
            recording_sid
        );
        let resp = self
            .client
            .post(&url)
            .form(&[("Status", "stopped")])
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}
