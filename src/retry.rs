//! Bounded, fixed-delay retry around a [`ChatClient`].

use crate::client::{ChatClient, ChatRequest};
use crate::config::{Config, LlmConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How many times to call and how long to wait between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Fixed wait after a failed attempt
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Sends single-turn prompts through a [`ChatClient`], retrying every failure
/// the same way.
///
/// Each attempt resends the full prompt. There is no backoff and no jitter;
/// after the last failed attempt the caller gets `None` immediately.
#[derive(Clone)]
pub struct RetryingCaller {
    client: Arc<dyn ChatClient>,
    llm: LlmConfig,
    policy: RetryPolicy,
}

impl RetryingCaller {
    /// Creates a caller using the configured model settings and retry policy.
    #[must_use]
    pub fn new(client: Arc<dyn ChatClient>, config: &Config) -> Self {
        Self {
            client,
            llm: config.llm.clone(),
            policy: config.retry,
        }
    }

    /// Sends `prompt` and returns the trimmed completion, or `None` once every
    /// attempt has failed.
    pub fn call(&self, prompt: &str) -> Option<String> {
        self.send(ChatRequest::single_turn(&self.llm, prompt))
    }

    /// Like [`call`](Self::call), with a constrained `response_format`.
    pub fn call_with_format(&self, prompt: &str, format: serde_json::Value) -> Option<String> {
        self.send(ChatRequest::single_turn(&self.llm, prompt).with_response_format(format))
    }

    fn send(&self, request: ChatRequest) -> Option<String> {
        let max = self.policy.max_attempts;

        for attempt in 1..=max {
            info!("Calling API... Attempt {}/{}", attempt, max);

            match self.client.complete(&request) {
                Ok(text) => {
                    info!("API call successful.");
                    return Some(text.trim().to_string());
                }
                Err(e) => {
                    warn!(
                        kind = e.kind(),
                        "Error during API call: {}. Attempt {}/{} failed",
                        e,
                        attempt,
                        max
                    );
                    if attempt < max && !self.policy.delay.is_zero() {
                        thread::sleep(self.policy.delay);
                    }
                }
            }
        }

        error!("Failed to process content after {} attempts.", max);
        None
    }
}
