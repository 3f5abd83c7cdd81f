//! Bounded concurrency for outbound provider calls.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::gateway::{GatewayError, GenerationGateway, GenerationRequest};
use crate::models::SourceImage;

/// Counting gate with a FIFO wait queue (tokio's semaphore is fair).
#[derive(Clone)]
pub struct RequestLimiter {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl RequestLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self { permits: Arc::new(Semaphore::new(limit)), limit }
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Runs `fut` once a slot is free, holding the slot until it completes.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        let permit = match self.permits.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!("Request limiter closed, running unbounded: {}", e);
                None
            }
        };
        debug!("Limiter slot taken ({}/{} in flight)", self.in_flight(), self.limit);
        let output = fut.await;
        drop(permit);
        output
    }
}

/// Gateway decorator: image generation shares one limiter, text calls another.
pub struct LimitedGateway<G> {
    inner: G,
    generation: RequestLimiter,
    text: RequestLimiter,
}

impl<G> LimitedGateway<G> {
    pub fn new(inner: G, generation_limit: usize, text_limit: usize) -> Self {
        Self {
            inner,
            generation: RequestLimiter::new(generation_limit),
            text: RequestLimiter::new(text_limit),
        }
    }
}

#[async_trait]
impl<G: GenerationGateway> GenerationGateway for LimitedGateway<G> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        self.generation.run(self.inner.generate(request)).await
    }

    async fn caption(&self, prompt: &str) -> Result<String, GatewayError> {
        self.text.run(self.inner.caption(prompt)).await
    }

    async fn describe_image(&self, image: &SourceImage) -> Result<String, GatewayError> {
        self.text.run(self.inner.describe_image(image)).await
    }
}
