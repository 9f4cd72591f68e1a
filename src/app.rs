use crate::callrecord::{HttpCallRecordSink, SinkRef};
use crate::config::Config;
use crate::provider::{ProviderRef, TwilioProvider};
use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub provider: ProviderRef,
    pub sink: SinkRef,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub provider: Option<ProviderRef>,
    pub sink: Option<SinkRef>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            provider: None,
            sink: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn provider(mut self, provider: ProviderRef) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn sink(mut self, sink: SinkRef) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(TwilioProvider::new(&config.twilio)?),
        };
        let sink = match self.sink {
            Some(sink) => sink,
            None => Arc::new(HttpCallRecordSink::new(config.twilio.http_timeout_secs)?),
        };
        Ok(Arc::new(AppStateInner {
            config,
            provider,
            sink,
            token: CancellationToken::new(),
        }))
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };

    let http_task = axum::serve(listener, app.into_make_service());
    select! {
        http_result = http_task => {
            match http_result {
                Ok(_) => info!("Server shut down gracefully"),
                Err(e) => {
                    tracing::error!("Server error: {}", e);
                    return Err(anyhow::anyhow!("Server error: {}", e));
                }
            }
        }
        _ = token.cancelled() => {
            info!("Shutting down due to cancellation");
        }
    }
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    crate::handler::router().with_state(state).layer(cors)
}
