//! HTTP API server for the call bridge

pub mod calls;
pub mod health;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use url::Url;

use crate::Result;
use crate::conversation::SessionStore;
use crate::llm::{ReplyGenerator, ReplyPipeline};
use crate::voice::{AUDIO_ROUTE, AudioStore, SpeechRenderer, SpeechSynthesizer};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionStore>,
    pub pipeline: ReplyPipeline,
    pub renderer: SpeechRenderer,
    /// Base URL for artifact links; derived per request when unset
    pub public_url: Option<Url>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    audio: AudioStore,
    port: u16,
    sessions: Option<Arc<SessionStore>>,
    system_prompt: Option<String>,
    public_url: Option<Url>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        audio: AudioStore,
        port: u16,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            audio,
            port,
            sessions: None,
            system_prompt: None,
            public_url: None,
        }
    }

    /// Share a session store with other tasks (e.g. the retention sweeper)
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Override the system instruction sent with every prompt
    #[must_use]
    pub fn system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Set the externally reachable base URL
    #[must_use]
    pub fn public_url(mut self, url: Option<Url>) -> Self {
        self.public_url = url;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let mut pipeline = ReplyPipeline::new(self.generator);
        if let Some(prompt) = self.system_prompt {
            pipeline = pipeline.with_system_prompt(prompt);
        }

        let state = Arc::new(ApiState {
            sessions: self.sessions.unwrap_or_default(),
            pipeline,
            renderer: SpeechRenderer::new(self.synthesizer, self.audio),
            public_url: self.public_url,
        });

        ApiServer {
            state,
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        self.state.clone()
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let audio_dir = self.state.renderer.store().dir().to_path_buf();

        Router::new()
            .merge(calls::router(self.state.clone()))
            .merge(health::router(self.state.clone()))
            .nest_service(&format!("/{AUDIO_ROUTE}"), ServeDir::new(audio_dir))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until ctrl-c
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}
