//! Classification client: cache → rate limiter → service call → validation,
//! with bounded retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classify::cache::{CacheEntry, CacheStats, ResponseCache};
use crate::classify::fingerprint::Fingerprint;
use crate::classify::prompt::{build_request, parse_verdict};
use crate::classify::rate_limit::RateLimiter;
use crate::classify::types::{ClassificationResult, ResultSource};
use crate::error::{ConfigError, Error, LlmError};
use crate::llm::{LlmConfig, LlmProvider, create_provider};

/// Delays between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First backoff delay; doubles on each further attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fixed wait after the provider reports a rate limit.
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    fn delay_after(&self, attempt: u32, error: &LlmError) -> Duration {
        match error {
            LlmError::RateLimited { .. } => self.rate_limit_cooldown,
            _ => self.backoff(attempt),
        }
    }
}

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Total attempts per classification (at least one).
    pub max_retries: u32,
    pub max_requests: usize,
    pub window: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_requests: 60,
            window: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    service_calls: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Read-only snapshot of client activity.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    pub model: String,
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub service_calls: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub cache_hit_rate: f64,
    pub cache_enabled: bool,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window_secs: u64,
    pub rate_window_in_use: usize,
    pub cache: Option<CacheStats>,
}

/// Wraps the external classification service.
///
/// Constructed once at startup and shared (`Arc`) by every caller; the rate
/// window and cache are the shared state.
pub struct ClassificationClient {
    provider: Arc<dyn LlmProvider>,
    cache: Option<Arc<dyn ResponseCache>>,
    limiter: RateLimiter,
    max_retries: u32,
    retry: RetryPolicy,
    counters: Counters,
}

impl ClassificationClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        cache: Option<Arc<dyn ResponseCache>>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter: RateLimiter::new(settings.max_requests, settings.window),
            max_retries: settings.max_retries.max(1),
            retry: settings.retry,
            counters: Counters::default(),
        }
    }

    /// Build the client and its provider from configuration.
    ///
    /// Missing credentials are a startup error: there is no classify mode
    /// without them.
    pub fn from_config(
        llm: Option<&LlmConfig>,
        cache: Option<Arc<dyn ResponseCache>>,
        settings: ClientSettings,
    ) -> Result<Self, Error> {
        let llm = llm
            .filter(|c| !c.api_key.expose_secret().trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "LLM_API_KEY".to_string(),
                hint: "Set LLM_API_KEY or run with MODE=degraded".to_string(),
            })?;

        let provider = create_provider(llm)?;
        info!(
            backend = llm.backend.as_str(),
            model = %llm.model,
            max_retries = settings.max_retries,
            "Classification client ready"
        );
        Ok(Self::new(provider, cache, settings))
    }

    pub fn model(&self) -> &str {
        self.provider.model_name()
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&Arc<dyn ResponseCache>> {
        self.cache.as_ref()
    }

    /// Classify one email; `None` when the service stays unavailable after
    /// all attempts. Inputs must already be redacted.
    pub async fn classify(
        &self,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> Option<ClassificationResult> {
        self.try_classify(sender, subject, body).await.ok()
    }

    /// Like [`classify`](Self::classify), but reports the last failure.
    pub async fn try_classify(
        &self,
        sender: &str,
        subject: &str,
        body: &str,
    ) -> Result<ClassificationResult, LlmError> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let key = Fingerprint::compute(sender, subject, body);

        if let Some(hit) = self.lookup(&key).await {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = key.short(), label = %hit.label, "Classification served from cache");
            return Ok(hit);
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let request = build_request(sender, subject, body);
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if let Err(e) = self.limiter.acquire().await {
                warn!(error = %e, "Rate limiter gave up");
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }

            self.counters.service_calls.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            let outcome = match self.provider.complete(request.clone()).await {
                Ok(response) => parse_verdict(&response.content, self.provider.model_name())
                    .map(|verdict| (verdict, response)),
                Err(e) => Err(e),
            };

            match outcome {
                Ok((verdict, response)) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.counters.successes.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .total_latency_ms
                        .fetch_add(latency_ms, Ordering::Relaxed);

                    let result = ClassificationResult {
                        label: verdict.label,
                        confidence: verdict.confidence,
                        explanation: verdict.explanation,
                        source: ResultSource::Service,
                        model: self.provider.model_name().to_string(),
                        latency_ms: Some(latency_ms),
                        tokens_used: Some(response.total_tokens()),
                    };
                    info!(
                        key = key.short(),
                        label = %result.label,
                        confidence = result.confidence,
                        latency_ms,
                        attempt,
                        "Classification complete"
                    );
                    self.store(&key, &result).await;
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        key = key.short(),
                        attempt,
                        max_attempts = self.max_retries,
                        error = %e,
                        "Classification attempt failed"
                    );
                    if !e.is_retryable() {
                        last_error = Some(e);
                        break;
                    }
                    let delay = self.retry.delay_after(attempt, &e);
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        debug!(delay_ms = delay.as_millis() as u64, "Retrying classification");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        Err(last_error.unwrap_or_else(|| LlmError::RequestFailed {
            provider: self.provider.model_name().to_string(),
            reason: "no attempts made".to_string(),
        }))
    }

    async fn lookup(&self, key: &Fingerprint) -> Option<ClassificationResult> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(entry)) => Some(ClassificationResult {
                label: entry.label,
                confidence: entry.confidence,
                explanation: entry.explanation,
                source: ResultSource::Cache,
                model: self.provider.model_name().to_string(),
                latency_ms: None,
                tokens_used: None,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(key = key.short(), error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &Fingerprint, result: &ClassificationResult) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let entry = CacheEntry::new(result.label, result.confidence, result.explanation.clone());
        if let Err(e) = cache.set(key, &entry).await {
            warn!(key = key.short(), error = %e, "Cache write failed");
        }
    }

    /// Snapshot of counters plus the cache backend's own stats.
    pub async fn stats(&self) -> ClientStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let hits = load(&self.counters.cache_hits);
        let misses = load(&self.counters.cache_misses);
        let successes = load(&self.counters.successes);

        let cache = match &self.cache {
            Some(cache) => match cache.stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(error = %e, "Cache stats unavailable");
                    None
                }
            },
            None => None,
        };

        ClientStats {
            model: self.provider.model_name().to_string(),
            total_requests: load(&self.counters.requests),
            cache_hits: hits,
            cache_misses: misses,
            service_calls: load(&self.counters.service_calls),
            errors: load(&self.counters.errors),
            avg_latency_ms: if successes == 0 {
                0.0
            } else {
                load(&self.counters.total_latency_ms) as f64 / successes as f64
            },
            cache_hit_rate: if hits + misses == 0 {
                0.0
            } else {
                hits as f64 / (hits + misses) as f64
            },
            cache_enabled: self.cache.is_some(),
            rate_limit_max_requests: self.limiter.max_requests(),
            rate_limit_window_secs: self.limiter.window().as_secs(),
            rate_window_in_use: self.limiter.current_len(),
            cache,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use super::*;
    use crate::classify::cache::FileCache;
    use crate::classify::types::Label;
    use crate::llm::provider::{CompletionRequest, CompletionResponse};

    /// One scripted provider reply.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Text(String),
        RateLimited,
        Timeout,
        Unauthorized,
    }

    /// Provider that plays back a script, repeating the last reply.
    pub(crate) struct ScriptedLlm {
        replies: Mutex<VecDeque<Reply>>,
        last: Mutex<Option<Reply>>,
        calls: AtomicU32,
    }

    impl ScriptedLlm {
        pub(crate) fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
            }
        }

        pub(crate) fn always(reply: Reply) -> Self {
            Self::new(vec![reply])
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = {
                let mut replies = self.replies.lock().unwrap();
                let mut last = self.last.lock().unwrap();
                match replies.pop_front() {
                    Some(r) => {
                        *last = Some(r.clone());
                        r
                    }
                    None => last.clone().unwrap_or(Reply::Timeout),
                }
            };
            match reply {
                Reply::Text(content) => Ok(CompletionResponse {
                    content,
                    input_tokens: 120,
                    output_tokens: 30,
                }),
                Reply::RateLimited => Err(LlmError::RateLimited {
                    provider: "scripted".into(),
                }),
                Reply::Timeout => Err(LlmError::Timeout {
                    provider: "scripted".into(),
                    timeout: Duration::from_secs(30),
                }),
                Reply::Unauthorized => Err(LlmError::AuthFailed {
                    provider: "scripted".into(),
                }),
            }
        }
    }

    pub(crate) fn phishing_reply() -> Reply {
        Reply::Text(
            r#"{"label": "phishing", "confidence": 0.91, "explanation": "credential harvesting"}"#
                .into(),
        )
    }

    fn settings(max_retries: u32) -> ClientSettings {
        ClientSettings {
            max_retries,
            ..ClientSettings::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
        let limited = LlmError::RateLimited {
            provider: "x".into(),
        };
        assert_eq!(policy.delay_after(1, &limited), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn success_returns_service_result() {
        let llm = Arc::new(ScriptedLlm::always(phishing_reply()));
        let client = ClassificationClient::new(llm.clone(), None, settings(3));

        let result = client.classify("a@b.com", "Verify", "Click here").await.unwrap();
        assert_eq!(result.label, Label::Phishing);
        assert_eq!(result.source, ResultSource::Service);
        assert_eq!(result.model, "scripted");
        assert_eq!(result.tokens_used, Some(150));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_output_is_attempted_exactly_max_retries_times() {
        let llm = Arc::new(ScriptedLlm::always(Reply::Text("not json at all".into())));
        let client = ClassificationClient::new(llm.clone(), None, settings(3));

        let start = Instant::now();
        assert!(client.classify("a@b.com", "s", "b").await.is_none());
        assert_eq!(llm.calls(), 3);
        // 1s + 2s of backoff, no sleep after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let stats = client.stats().await;
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.service_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success() {
        let llm = Arc::new(ScriptedLlm::new(vec![Reply::Timeout, phishing_reply()]));
        let client = ClassificationClient::new(llm.clone(), None, settings(3));

        assert!(client.classify("a@b.com", "s", "b").await.is_some());
        assert_eq!(llm.calls(), 2);
        assert_eq!(client.stats().await.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_rate_limit_waits_cooldown() {
        let llm = Arc::new(ScriptedLlm::new(vec![Reply::RateLimited, phishing_reply()]));
        let client = ClassificationClient::new(llm.clone(), None, settings(3));

        let start = Instant::now();
        assert!(client.classify("a@b.com", "s", "b").await.is_some());
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_cooldowns_count_against_budget() {
        let llm = Arc::new(ScriptedLlm::always(Reply::RateLimited));
        let client = ClassificationClient::new(llm.clone(), None, settings(2));

        let err = client.try_classify("a@b.com", "s", "b").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_not_retried() {
        let llm = Arc::new(ScriptedLlm::always(Reply::Unauthorized));
        let client = ClassificationClient::new(llm.clone(), None, settings(5));

        let err = client.try_classify("a@b.com", "s", "b").await.unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed { .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_service() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Arc<dyn ResponseCache> = Arc::new(
            FileCache::open(dir.path(), Duration::from_secs(3600))
                .await
                .unwrap(),
        );
        let llm = Arc::new(ScriptedLlm::always(phishing_reply()));
        let client = ClassificationClient::new(llm.clone(), Some(cache), settings(3));

        let first = client.classify("A@B.com", "Verify", "Click").await.unwrap();
        assert_eq!(first.source, ResultSource::Service);

        // Same inputs after normalization.
        let second = client.classify("a@b.com", "VERIFY", "click").await.unwrap();
        assert_eq!(second.source, ResultSource::Cache);
        assert_eq!(second.label, first.label);
        assert_eq!(second.model, "scripted");
        assert_eq!(llm.calls(), 1);

        let stats = client.stats().await;
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert!((stats.cache_hit_rate - 0.5).abs() < 1e-9);
        assert!(stats.cache_enabled);
        assert_eq!(stats.cache.unwrap().total_entries, 1);
        // Cache hits do not consume rate-limit slots.
        assert_eq!(stats.rate_window_in_use, 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache: Arc<dyn ResponseCache> = Arc::new(
            FileCache::open(dir.path(), Duration::from_secs(3600))
                .await
                .unwrap(),
        );
        let llm = Arc::new(ScriptedLlm::always(Reply::Unauthorized));
        let client = ClassificationClient::new(llm, Some(cache.clone()), settings(1));

        assert!(client.classify("a@b.com", "s", "b").await.is_none());
        assert_eq!(cache.stats().await.unwrap().total_entries, 0);
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let err = ClassificationClient::from_config(None, None, ClientSettings::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingRequired { .. })
        ));

        let blank = LlmConfig {
            backend: crate::llm::LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("  "),
            model: "claude-3-5-haiku-latest".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(
            ClassificationClient::from_config(Some(&blank), None, ClientSettings::default())
                .is_err()
        );
    }
}
