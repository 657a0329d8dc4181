//! Quiz question generator client.
//!
//! Asks an OpenAI-compatible chat-completions endpoint for one
//! multiple-choice question about a topic. The service is treated as
//! opaque and unreliable: any failure becomes `CcError::Generation` and the
//! caller adds no topic.

use crate::errors::CcError;
use crate::observability::metrics;
use crate::presenter::quiz::TopicDraft;

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

/// Default timeout for generator requests in seconds.
const GENERATOR_REQUEST_TIMEOUT_SECS: u64 = 30;

const GENERATOR_TEMPERATURE: f32 = 0.5;

/// Produces a topic draft for a subject.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, topic: &str) -> Result<TopicDraft, CcError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Shape the model is asked to return.
#[derive(Debug, Deserialize)]
struct GeneratedQuestion {
    question: String,
    #[serde(default)]
    options: Vec<String>,
    answer: String,
    #[serde(default)]
    explanation: Option<String>,
}

/// HTTP generator backed by a chat-completions API.
#[derive(Clone)]
pub struct HttpQuestionGenerator {
    client: Client,
    url: String,
    api_key: SecretString,
    model: String,
}

impl std::fmt::Debug for HttpQuestionGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpQuestionGenerator")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl HttpQuestionGenerator {
    /// # Errors
    ///
    /// Returns `CcError::Internal` if the HTTP client cannot be built.
    pub fn new(url: String, api_key: SecretString, model: String) -> Result<Self, CcError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GENERATOR_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "cc.generator", error = %e, "Failed to build HTTP client");
                CcError::Internal("failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            url,
            api_key,
            model,
        })
    }

    async fn request(&self, topic: &str) -> Result<TopicDraft, CcError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt(topic),
            }],
            temperature: GENERATOR_TEMPERATURE,
        };

        let response = self
            .client
            .post(&self.url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "cc.generator", error = %e, "Generator request failed");
                CcError::Generation("generator is unavailable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "cc.generator", status = %status, "Generator returned error status");
            return Err(CcError::Generation(format!(
                "generator returned {status}"
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            warn!(target: "cc.generator", error = %e, "Generator response was not valid JSON");
            CcError::Generation("unreadable generator response".to_string())
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CcError::Generation("generator returned no choices".to_string()))?;

        parse_generated(topic, &content)
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    #[instrument(skip_all, name = "cc.generator.generate")]
    async fn generate(&self, topic: &str) -> Result<TopicDraft, CcError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(CcError::MissingParameter("topic is required".to_string()));
        }

        let start = Instant::now();
        let result = self.request(topic).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_generator_request(status, start.elapsed());
        result
    }
}

fn prompt(topic: &str) -> String {
    format!(
        "Generate a single multiple-choice question about \"{topic}\" for a classroom quiz. \
         Return strictly valid JSON with no markdown formatting. \
         Format: {{\"question\": \"...\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \
         \"answer\": \"the correct option text\", \"explanation\": \"...\"}}"
    )
}

/// Parse model output into a draft named after `topic`.
///
/// Tolerates a surrounding markdown code fence.
///
/// # Errors
///
/// Returns `CcError::Generation` if the content is not the expected JSON or
/// the question or answer is blank.
pub fn parse_generated(topic: &str, content: &str) -> Result<TopicDraft, CcError> {
    let json = strip_code_fence(content);
    let generated: GeneratedQuestion = serde_json::from_str(json)
        .map_err(|e| CcError::Generation(format!("unparseable question: {e}")))?;

    let draft = TopicDraft {
        name: topic.trim().to_string(),
        question: generated.question,
        answer: generated.answer,
        options: generated.options,
        explanation: generated.explanation.filter(|e| !e.trim().is_empty()),
    };
    draft
        .validate()
        .map_err(|e| CcError::Generation(e.to_string()))?;
    Ok(draft)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Canned generators for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed draft, or fails every call.
    #[derive(Debug, Default)]
    pub struct StaticQuestionGenerator {
        fail: bool,
        call_count: AtomicUsize,
    }

    impl StaticQuestionGenerator {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QuestionGenerator for StaticQuestionGenerator {
        async fn generate(&self, topic: &str) -> Result<TopicDraft, CcError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CcError::Generation("mock generator failure".to_string()));
            }
            Ok(TopicDraft {
                name: topic.to_string(),
                question: format!("What is {topic}?"),
                answer: "Promise".to_string(),
                options: vec![
                    "Promise".to_string(),
                    "Callback".to_string(),
                    "Event".to_string(),
                    "Thread".to_string(),
                ],
                explanation: None,
            })
        }
    }
}
