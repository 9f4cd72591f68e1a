use crate::app::AppState;
use crate::event::{self, StatusEvent};
use crate::reconcile;
use axum::{
    extract::{RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{error, info};

/// CRM linking identifiers threaded through from call origination as query
/// parameters on the callback URL.
#[derive(Debug, Default)]
pub struct CallLinkParams {
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
}

impl CallLinkParams {
    /// Parsed by hand rather than through a typed extractor: the provider
    /// echoes back whatever was on the callback URL, and an odd query
    /// string must not reject the webhook before the handler runs. First
    /// occurrence wins, unknown keys are ignored.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            match key.as_ref() {
                "contactId" if params.contact_id.is_none() => {
                    params.contact_id = Some(value.into_owned())
                }
                "accountId" if params.account_id.is_none() => {
                    params.account_id = Some(value.into_owned())
                }
                _ => {}
            }
        }
        params
    }
}

/// The provider probes the callback URL with GET; answer plainly.
pub async fn liveness() -> &'static str {
    "OK"
}

/// Call status webhook ingress.
///
/// Always acknowledges with 200 regardless of what processing does: the
/// provider retries or marks the webhook unhealthy on failure responses,
/// which costs more than dropping one reconciliation pass. Future events
/// for the same call rerun the idempotent pipeline anyway. A non-200 is
/// reserved for failures outside every guarded path.
pub async fn status_webhook(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params = CallLinkParams::from_query(query.as_deref());
    match process(&state, params, &headers, &body).await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            error!("unexpected failure in status webhook: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "error").into_response()
        }
    }
}

async fn process(
    state: &AppState,
    params: CallLinkParams,
    headers: &HeaderMap,
    body: &Bytes,
) -> anyhow::Result<()> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let fields = event::parse_body(content_type, body);
    let mut event = StatusEvent::from_fields(&fields);
    event.contact_id = params.contact_id;
    event.account_id = params.account_id;

    info!(
        call_sid = event.call_sid.as_str(),
        status = ?event.status,
        direction = event.direction.as_deref().unwrap_or(""),
        "status callback received"
    );

    let base_url = resolve_base_url(state, headers);
    reconcile::process_event(
        state.provider.as_ref(),
        state.sink.as_ref(),
        &state.config,
        &base_url,
        &event,
    )
    .await;
    Ok(())
}

/// Base URL for callbacks and internal endpoints: explicit config wins,
/// then proxy-forwarded headers, then the plain Host header.
pub fn resolve_base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.config.public_base_url {
        return base.trim_end_matches('/').to_string();
    }
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok());
    match host {
        Some(host) => format!("{}://{}", proto, host),
        None => format!("http://{}", state.config.http_addr),
    }
}
