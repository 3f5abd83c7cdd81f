//! Exponential-backoff retry envelope around gateway calls.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::gateway::{GatewayError, GenerationGateway, GenerationRequest};
use crate::models::SourceImage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(1000), multiplier: 2 }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (zero-based): `base * multiplier^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(self.multiplier.saturating_pow(attempt))
    }
}

/// Runs `call` until it succeeds, fails permanently or the attempts run out.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut call: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_permanent() || attempt + 1 >= attempts => {
                error!("❌ {} failed after {} attempt(s): {}", label, attempt + 1, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!("Attempt {} failed for {}: {} (retrying in {:?})", attempt + 1, label, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Applies a [`RetryPolicy`] to every call of the wrapped gateway.
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<G: GenerationGateway> GenerationGateway for RetryingGateway<G> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
        let label = format!("model {}", request.model);
        retry(self.policy, &label, || self.inner.generate(request)).await
    }

    async fn caption(&self, prompt: &str) -> Result<String, GatewayError> {
        retry(self.policy, "caption generation", || self.inner.caption(prompt)).await
    }

    async fn describe_image(&self, image: &SourceImage) -> Result<String, GatewayError> {
        retry(self.policy, "image analysis", || self.inner.describe_image(image)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn delays_double_from_the_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts_with_backoff() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result: Result<(), _> = retry(RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Status { status: 503, body: "busy".into() }) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(GatewayError::Status { status: 503, .. })));
        // Sleeps after attempts 1 and 2 only.
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_once_the_transient_error_clears() {
        let calls = AtomicU32::new(0);
        let result = retry(RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GatewayError::Http("connection reset".into()))
                } else {
                    Ok("data:image/jpeg;base64,AA==")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("data:image/jpeg;base64,AA=="));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::InvalidInput("bad data url".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Flaky {
        failures_left: AtomicU32,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationGateway for Flaky {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GatewayError> {
            self.prompts.lock().push(request.prompt.clone());
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::MissingContent("image"));
            }
            Ok("data:image/png;base64,AA==".into())
        }

        async fn caption(&self, _prompt: &str) -> Result<String, GatewayError> {
            Err(GatewayError::Http("timeout".into()))
        }

        async fn describe_image(&self, _image: &SourceImage) -> Result<String, GatewayError> {
            Ok("described".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn decorator_hides_intermediate_failures() {
        let gateway = RetryingGateway::new(
            Flaky { failures_left: AtomicU32::new(2), prompts: Mutex::default() },
            RetryPolicy::default(),
        );
        let request = GenerationRequest { model: "m".into(), prompt: "A red car".into(), image: None };

        assert_eq!(gateway.generate(&request).await.unwrap(), "data:image/png;base64,AA==");
        assert_eq!(gateway.inner.prompts.lock().len(), 3);
        assert_eq!(gateway.caption("A red car").await, Err(GatewayError::Http("timeout".into())));
    }
}
