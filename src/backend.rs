//! Model backends: "send a conversation transcript, get back a block of
//! text".
//!
//! The engines only ever see the [`ChatBackend`] capability; each provider is
//! one implementation selected by configuration lookup. Transport failures
//! (network, auth, quota) propagate to the caller — a failed model call is
//! fatal to the step that made it, never silently retried past the bounded
//! rate-limit backoff below.

use crate::history::Entry;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const REQUEST_TIMEOUT_SECS: u64 = 90;
const MAX_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const BACKOFF_MULTIPLIER: u64 = 2;

/// The capability the patch engine and agent loop consume.
pub trait ChatBackend {
    fn send(&self, transcript: &[Entry]) -> impl Future<Output = Result<LlmReply>>;
}

/// Response from a model call, with usage stats when the provider reports
/// them.
#[derive(Debug)]
pub struct LlmReply {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Token accounting from the provider.
#[derive(Deserialize, Clone, Copy, Debug, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    /// Actual cost in USD where the provider reports one (OpenRouter's
    /// `total_cost`).
    #[serde(default, alias = "total_cost")]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    OpenRouter,
}

/// One configured provider + model, speaking the chat-completions wire
/// format.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    provider: Provider,
    model: String,
}

/// Backend-name lookup. Short names are the aliases the original shell
/// understood; `openrouter/<model-id>` selects any OpenRouter model.
pub fn backend_from_name(name: &str) -> Result<HttpBackend> {
    let (provider, model) = match name {
        "gpt-4-turbo" => (Provider::OpenAi, "gpt-4-1106-preview"),
        "gpt-4" => (Provider::OpenAi, "gpt-4"),
        "gpt-3.5-turbo" => (Provider::OpenAi, "gpt-3.5-turbo-1106"),
        other => match other.strip_prefix("openrouter/") {
            Some(model) if !model.is_empty() => (Provider::OpenRouter, model),
            _ => anyhow::bail!(
                "backend '{}' is not supported (try gpt-4-turbo, gpt-4, gpt-3.5-turbo, or openrouter/<model>)",
                other
            ),
        },
    };
    Ok(HttpBackend {
        provider,
        model: model.to_string(),
    })
}

impl HttpBackend {
    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> &'static str {
        match self.provider {
            Provider::OpenAi => OPENAI_URL,
            Provider::OpenRouter => OPENROUTER_URL,
        }
    }

    fn api_key(&self) -> Result<String> {
        match self.provider {
            Provider::OpenAi => std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("CHATGPT_API_KEY"))
                .map_err(|_| {
                    anyhow::anyhow!(
                        "no OpenAI key configured; set OPENAI_API_KEY (or CHATGPT_API_KEY)"
                    )
                }),
            Provider::OpenRouter => std::env::var("OPENROUTER_API_KEY")
                .map_err(|_| anyhow::anyhow!("no OpenRouter key configured; set OPENROUTER_API_KEY")),
        }
    }

    /// USD cost of one call: the provider-reported figure when present,
    /// otherwise the static per-1k-token price table.
    pub fn estimate_cost(&self, usage: &Usage) -> Option<f64> {
        if let Some(cost) = usage.cost {
            return Some(cost);
        }
        let (input, output) = model_price_per_1k(&self.model)?;
        Some(
            f64::from(usage.prompt_tokens) * input / 1000.0
                + f64::from(usage.completion_tokens) * output / 1000.0,
        )
    }
}

/// (input, output) USD per 1k tokens for the models the short aliases map to.
fn model_price_per_1k(model: &str) -> Option<(f64, f64)> {
    match model {
        "gpt-4-1106-preview" => Some((0.01, 0.03)),
        "gpt-4" => Some((0.03, 0.06)),
        "gpt-3.5-turbo-1106" => Some((0.001, 0.002)),
        _ => None,
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

impl ChatBackend for HttpBackend {
    async fn send(&self, transcript: &[Entry]) -> Result<LlmReply> {
        let api_key = self.api_key()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: transcript
                .iter()
                .map(|entry| WireMessage {
                    role: entry.role.as_str(),
                    content: entry.content.clone(),
                })
                .collect(),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let mut retry_count = 0;
        loop {
            let response = client
                .post(self.url())
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!("failed to parse model response: {}\n{}", e, truncate_str(&text, 400))
                })?;
                let content = parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.trim().to_string())
                    .unwrap_or_default();
                return Ok(LlmReply {
                    content,
                    usage: parsed.usage,
                });
            }

            // Rate limits get a bounded exponential backoff; everything else
            // is surfaced immediately.
            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = parse_retry_after(&text).unwrap_or_else(|| {
                    INITIAL_BACKOFF_SECS * BACKOFF_MULTIPLIER.pow(retry_count - 1)
                });
                eprintln!(
                    "  rate limited, retrying in {}s (attempt {}/{})",
                    wait, retry_count, MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let message = match status.as_u16() {
                401 => "invalid API key".to_string(),
                429 => format!("rate limited after {} retries", retry_count),
                500..=599 => format!("provider server error ({})", status),
                _ => format!("API error {}: {}", status, truncate_str(&text, 200)),
            };
            anyhow::bail!("{}", message);
        }
    }
}

/// Look for a "retry after N seconds" hint in a rate-limit response body.
fn parse_retry_after(text: &str) -> Option<u64> {
    let lower = text.to_lowercase();
    let pos = lower.find("retry")?;
    for word in lower[pos..].split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word.trim_matches(|c: char| !c.is_numeric()).parse::<u64>() {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}

/// Truncate a string for error display (Unicode-safe).
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;

    #[test]
    fn test_backend_lookup_aliases() {
        let backend = backend_from_name("gpt-4-turbo").unwrap();
        assert_eq!(backend.provider, Provider::OpenAi);
        assert_eq!(backend.model(), "gpt-4-1106-preview");

        let backend = backend_from_name("openrouter/anthropic/claude-sonnet-4.5").unwrap();
        assert_eq!(backend.provider, Provider::OpenRouter);
        assert_eq!(backend.model(), "anthropic/claude-sonnet-4.5");
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let err = backend_from_name("mystery-model").unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![WireMessage {
                role: Role::User.as_str(),
                content: "hello".to_string(),
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"max_tokens\":1000"));
    }

    #[test]
    fn test_cost_estimate_from_price_table() {
        let backend = backend_from_name("gpt-4").unwrap();
        let usage = Usage {
            prompt_tokens: 1000,
            completion_tokens: 1000,
            total_tokens: 2000,
            cost: None,
        };
        let cost = backend.estimate_cost(&usage).unwrap();
        assert!((cost - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_provider_reported_cost_wins() {
        let backend = backend_from_name("openrouter/some/model").unwrap();
        let usage = Usage {
            cost: Some(0.42),
            ..Usage::default()
        };
        assert_eq!(backend.estimate_cost(&usage), Some(0.42));
        // No price table entry without a reported cost.
        assert_eq!(backend.estimate_cost(&Usage::default()), None);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("please retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("try again later"), None);
    }
}
