//! Filename classification: send extracted content to the vision model and
//! sanitise the answer into a usable base filename.
//!
//! This module is the only pipeline stage with network I/O. All prompt text
//! lives in [`crate::prompts`] so it can change without touching the retry
//! or error-handling logic here.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx / timeout faults are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`)
//! avoids thundering-herd: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s. Authentication failures are returned immediately —
//! retrying a bad API key only burns time. An answer that arrives but cannot
//! be sanitised gets exactly one stricter-prompt retry before it is given up
//! as [`TaskError::ClassificationInvalid`].

use crate::config::RenameConfig;
use crate::error::{RenameError, TaskError};
use crate::pipeline::extract::ExtractedContent;
use crate::prompts::{FILENAME_PROMPT, STRICT_RETRY_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Hard cap on the proposed base filename, matching what fits comfortably
/// in a directory listing.
pub const MAX_FILENAME_LEN: usize = 70;

/// How much first-page text is forwarded alongside the images.
const MAX_TEXT_CHARS: usize = 4000;

/// Boundary the worker calls to turn content into a proposed base filename
/// (no extension).
///
/// Production uses [`LlmClassifier`]; tests inject stubs that answer
/// without a network.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, content: &ExtractedContent) -> Result<String, TaskError>;
}

/// Classifier backed by an `edgequake_llm` vision provider.
pub struct LlmClassifier {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout: Duration,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &RenameConfig) -> Self {
        Self {
            provider,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve a provider, from most-specific to least-specific.
    ///
    /// 1. **Named provider** (`config.provider_name`) + optional model —
    ///    the factory reads the matching API key from the environment.
    /// 2. **OpenAI key present** — users with several provider keys default
    ///    to OpenAI unless they name another provider.
    /// 3. **Full auto-detection** — the factory scans all known key
    ///    variables and picks the first configured provider.
    pub fn from_env(config: &RenameConfig) -> Result<Self, RenameError> {
        let default_model = "gpt-4.1-nano";

        if let Some(ref name) = config.provider_name {
            let model = config.model.as_deref().unwrap_or(default_model);
            let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
                RenameError::ClassifierUnavailable {
                    hint: format!("provider '{name}': {e}"),
                }
            })?;
            return Ok(Self::new(provider, config));
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                let model = config.model.as_deref().unwrap_or(default_model);
                let provider =
                    ProviderFactory::create_llm_provider("openai", model).map_err(|e| {
                        RenameError::ClassifierUnavailable {
                            hint: format!("provider 'openai': {e}"),
                        }
                    })?;
                return Ok(Self::new(provider, config));
            }
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| RenameError::ClassifierUnavailable {
                hint: format!("auto-detection failed: {e}"),
            })?;
        Ok(Self::new(provider, config))
    }

    /// One request/response round-trip, without sanitisation.
    async fn request_once(
        &self,
        content: &ExtractedContent,
        strict: bool,
    ) -> Result<String, TaskError> {
        let mut messages = vec![ChatMessage::system(FILENAME_PROMPT)];
        if strict {
            messages.push(ChatMessage::system(STRICT_RETRY_PROMPT));
        }

        let text: String = content
            .first_page_text()
            .map(|t| t.chars().take(MAX_TEXT_CHARS).collect())
            .unwrap_or_default();

        let images: Vec<ImageData> = content
            .page_images
            .iter()
            .map(|p| ImageData::new(p.base64.clone(), p.mime_type).with_detail("high"))
            .collect();

        messages.push(ChatMessage::user_with_images(text.as_str(), images));

        let options = CompletionOptions {
            // Deterministic output: the same document should propose the
            // same name on every run.
            temperature: Some(0.0),
            max_tokens: Some(100),
            ..Default::default()
        };

        let response = timeout(self.api_timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| TaskError::ClassificationUnavailable {
                attempts: 1,
                detail: format!("timed out after {}s", self.api_timeout.as_secs()),
                auth: false,
            })?
            .map_err(|e| {
                let detail = e.to_string();
                TaskError::ClassificationUnavailable {
                    attempts: 1,
                    auth: is_auth_error(&detail),
                    detail,
                }
            })?;

        debug!(
            "Classifier proposed {:?} for {} ({} in / {} out tokens)",
            response.content,
            content.source.display(),
            response.prompt_tokens,
            response.completion_tokens
        );

        Ok(response.content)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, content: &ExtractedContent) -> Result<String, TaskError> {
        let raw = retry_transient(self.max_retries, self.retry_backoff_ms, |_attempt| {
            self.request_once(content, false)
        })
        .await?;

        match sanitize_filename(&raw) {
            Ok(name) => Ok(name),
            Err(first_err) => {
                // One stricter-prompt retry, then give up on this document.
                warn!(
                    "Unusable classifier response for {} ({first_err}); retrying with strict prompt",
                    content.source.display()
                );
                let raw = retry_transient(self.max_retries, self.retry_backoff_ms, |_attempt| {
                    self.request_once(content, true)
                })
                .await?;
                sanitize_filename(&raw)
            }
        }
    }
}

/// Run `op` up to `1 + max_retries` times, backing off exponentially
/// between attempts. Only transient errors are retried; anything else is
/// returned as-is.
pub(crate) async fn retry_transient<F, Fut>(
    max_retries: u32,
    backoff_ms: u64,
    mut op: F,
) -> Result<String, TaskError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<String, TaskError>>,
{
    let mut last: Option<TaskError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_ms * 2u64.pow(attempt - 1);
            warn!("Classifier retry {attempt}/{max_retries} after {backoff}ms");
            sleep(Duration::from_millis(backoff)).await;
        }

        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => last = Some(e),
            Err(e) => return Err(e),
        }
    }

    // All attempts exhausted; report the true attempt count.
    Err(match last {
        Some(TaskError::ClassificationUnavailable { detail, auth, .. }) => {
            TaskError::ClassificationUnavailable {
                attempts: max_retries + 1,
                detail,
                auth,
            }
        }
        Some(e) => e,
        None => TaskError::ClassificationUnavailable {
            attempts: max_retries + 1,
            detail: "unknown error".into(),
            auth: false,
        },
    })
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_ILLEGAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-]").unwrap());

/// Sanitise a raw model response into a base filename (no extension).
///
/// Rules, in order: trim; reject empty and multi-line answers; inner
/// whitespace becomes `_`; everything outside `[\w-]` (path separators,
/// quotes, control characters, dots) is stripped; the result is truncated
/// to [`MAX_FILENAME_LEN`] characters and must be non-empty.
pub fn sanitize_filename(raw: &str) -> Result<String, TaskError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TaskError::ClassificationInvalid {
            detail: "empty response".into(),
        });
    }
    if trimmed.contains('\n') {
        return Err(TaskError::ClassificationInvalid {
            detail: format!("multi-line response: {trimmed:?}"),
        });
    }

    let name = RE_WHITESPACE.replace_all(trimmed, "_");
    let name = RE_ILLEGAL.replace_all(&name, "");
    let name: String = name.chars().take(MAX_FILENAME_LEN).collect();

    if name.is_empty() {
        return Err(TaskError::ClassificationInvalid {
            detail: format!("nothing left after sanitising {trimmed:?}"),
        });
    }

    Ok(name)
}

/// Heuristic split between auth failures and everything else.
///
/// Provider error types differ per backend, but 401/403-class failures all
/// surface these markers in their display form.
fn is_auth_error(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("authentication")
        || lower.contains("invalid api key")
        || lower.contains("incorrect api key")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn sanitize_plain_name_passes_through() {
        assert_eq!(
            sanitize_filename("2024-05-01_AcmeCorp_Invoice_998").unwrap(),
            "2024-05-01_AcmeCorp_Invoice_998"
        );
    }

    #[test]
    fn sanitize_replaces_whitespace_and_strips_illegal() {
        assert_eq!(
            sanitize_filename("  2024-05-01 Acme Corp/Invoice #998  ").unwrap(),
            "2024-05-01_Acme_CorpInvoice_998"
        );
    }

    #[test]
    fn sanitize_strips_quotes_and_extension_dots() {
        assert_eq!(
            sanitize_filename("\"2024-05-01_Acme_Invoice.pdf\"").unwrap(),
            "2024-05-01_Acme_Invoicepdf"
        );
    }

    #[test]
    fn sanitize_rejects_empty() {
        assert!(matches!(
            sanitize_filename("   "),
            Err(TaskError::ClassificationInvalid { .. })
        ));
    }

    #[test]
    fn sanitize_rejects_multiline() {
        assert!(matches!(
            sanitize_filename("Sure! Here is the name:\n2024_Acme"),
            Err(TaskError::ClassificationInvalid { .. })
        ));
    }

    #[test]
    fn sanitize_rejects_only_illegal_chars() {
        assert!(sanitize_filename("@#$%^&*!").is_err());
    }

    #[test]
    fn sanitize_truncates_to_limit() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_filename(&long).unwrap().len(), MAX_FILENAME_LEN);
    }

    #[test]
    fn auth_error_detection() {
        assert!(is_auth_error("HTTP 401 Unauthorized"));
        assert!(is_auth_error("Incorrect API key provided"));
        assert!(!is_auth_error("connection reset by peer"));
        assert!(!is_auth_error("HTTP 503 Service Unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_bound_on_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(3, 10, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TaskError::ClassificationUnavailable {
                    attempts: 1,
                    detail: "503".into(),
                    auth: false,
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(TaskError::ClassificationUnavailable { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected ClassificationUnavailable, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_does_not_repeat_auth_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(3, 10, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TaskError::ClassificationUnavailable {
                    attempts: 1,
                    detail: "401 unauthorized".into(),
                    auth: true,
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(3, 10, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(TaskError::ClassificationUnavailable {
                        attempts: 1,
                        detail: "timeout".into(),
                        auth: false,
                    })
                } else {
                    Ok("2024_Acme_Invoice".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "2024_Acme_Invoice");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
