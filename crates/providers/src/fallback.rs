//! Provider fallback: a primary provider decorated with a secondary one.
//!
//! The primary is always tried first. The fallback is only consulted when
//! the primary fails to open its stream (error or timeout); once a stream
//! has started, its chunks are final.

use async_trait::async_trait;
use chatloom_core::error::ProviderError;
use chatloom_core::message::TranscriptMessage;
use chatloom_core::provider::{ChunkStream, Provider};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::DEFAULT_CONNECT_TIMEOUT;

pub struct FallbackProvider {
    name: String,
    primary: Box<dyn Provider>,
    fallback: Box<dyn Provider>,
    connect_timeout: Duration,
}

impl FallbackProvider {
    pub fn new(primary: Box<dyn Provider>, fallback: Box<dyn Provider>) -> Self {
        Self {
            name: format!("{}+{}", primary.name(), fallback.name()),
            primary,
            fallback,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound how long each provider may take to start streaming.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn try_open(
        &self,
        provider: &dyn Provider,
        transcript: &[TranscriptMessage],
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        match tokio::time::timeout(
            self.connect_timeout,
            provider.stream_turn(transcript, cancel.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "Provider '{}' did not start streaming within {}s",
                provider.name(),
                self.connect_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn describe_tools(&self) -> &serde_json::Value {
        self.primary.describe_tools()
    }

    async fn stream_turn(
        &self,
        transcript: &[TranscriptMessage],
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkStream, ProviderError> {
        let primary_err = match self.try_open(self.primary.as_ref(), transcript, &cancel).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        if cancel.is_cancelled() {
            return Err(primary_err);
        }

        warn!(
            provider = %self.primary.name(),
            error = %primary_err,
            "Fallback: primary provider failed, trying fallback"
        );
        info!(provider = %self.fallback.name(), "Fallback: trying provider (streaming)");

        self.try_open(self.fallback.as_ref(), transcript, &cancel)
            .await
            .inspect_err(|e| {
                warn!(provider = %self.fallback.name(), error = %e, "Fallback: provider failed");
            })
    }
}
