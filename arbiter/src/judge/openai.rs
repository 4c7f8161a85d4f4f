//! OpenAI-compatible semantic judge.
//!
//! Works with any OpenAI-compatible chat-completions API including:
//! - vLLM
//! - Ollama
//! - OpenAI API
//! - Azure OpenAI
//! - LocalAI

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use rulebook::RuleContent;

use super::traits::*;

/// OpenAI-compatible judge.
pub struct OpenAiJudge {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiJudge {
    /// Create a new OpenAI-compatible judge.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    /// Create a judge pointing to a local vLLM server.
    pub fn vllm(port: u16, model: &str) -> Self {
        Self::new(format!("http://localhost:{}/v1", port), model, None)
    }

    /// Create a judge pointing to Ollama.
    pub fn ollama(model: &str) -> Self {
        Self::new("http://localhost:11434/v1", model, None)
    }

    /// Create a judge for the OpenAI API.
    pub fn openai(model: &str, api_key: impl Into<String>) -> Self {
        Self::new("https://api.openai.com/v1", model, Some(api_key.into()))
    }

    /// Build the request URL.
    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build authorization header if API key is set.
    fn auth_header(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("Bearer {}", k))
    }

    /// Send one deterministic JSON-mode chat request and return the content.
    async fn chat(&self, system: &str, user: String) -> Result<String, JudgeError> {
        let chat_request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormatRequest {
                format_type: "json_object".to_string(),
            },
            stream: false,
        };

        let mut http_request = self.client.post(self.chat_completions_url());

        if let Some(auth) = self.auth_header() {
            http_request = http_request.header(header::AUTHORIZATION, auth);
        }

        let response = http_request
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| JudgeError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_after_ms = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000);
                return Err(JudgeError::RateLimited { retry_after_ms });
            }

            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(JudgeError::Unavailable(format!("HTTP {}: {}", status, body)));
            }
            return Err(JudgeError::RequestFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| JudgeError::ParseError(e.to_string()))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| JudgeError::ParseError("No choices in response".to_string()))?;

        choice
            .message
            .content
            .ok_or_else(|| JudgeError::ParseError("No content in response".to_string()))
    }
}

/// OpenAI chat completion request body.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormatRequest,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormatRequest {
    #[serde(rename = "type")]
    format_type: String,
}

/// OpenAI chat completion response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// Content envelope for coherence judgments.
#[derive(Debug, Deserialize)]
struct CoherenceReply {
    verdicts: Vec<CoherenceVerdict>,
}

/// Content envelope for entailment judgments.
#[derive(Debug, Deserialize)]
struct ConnectionReply {
    connections: Vec<ConnectionVerdict>,
}

const COHERENCE_SYSTEM_PROMPT: &str = "You review behavioral rules for an AI agent. \
Judge the candidate rule against every numbered comparison rule. For each pair report how \
semantically related the two rules are (relatedness_severity, 1-10) and how strongly they \
conflict (contradiction_severity, 1-10), with a one-sentence rationale. Respond with JSON: \
{\"verdicts\": [{\"comparison_index\": <number from the list>, \"relatedness_severity\": n, \
\"contradiction_severity\": n, \"rationale\": \"...\"}]} containing exactly one verdict per \
comparison rule.";

const CONNECTION_SYSTEM_PROMPT: &str = "You review behavioral rules for an AI agent. \
All rules share one numbering across both lists. Find directed entailments: pairs where \
satisfying the source rule's condition implies the target rule's context applies. Respond \
with JSON: {\"connections\": [{\"source_index\": n, \"target_index\": n, \"score\": <1-10>}]} \
listing only connected pairs. Never connect a rule to itself.";

#[async_trait]
impl SemanticJudge for OpenAiJudge {
    fn id(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);

        if let Some(auth) = self.auth_header() {
            request = request.header(header::AUTHORIZATION, auth);
        }

        request
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn classify_coherence(
        &self,
        candidate: &RuleContent,
        comparisons: &[RuleContent],
    ) -> Result<Vec<CoherenceVerdict>, JudgeError> {
        let mut user = format!("Candidate rule:\n{}\n\nComparison rules:\n", candidate);
        for (index, comparison) in comparisons.iter().enumerate() {
            let _ = writeln!(user, "{}. {}", index, comparison);
        }

        let content = self.chat(COHERENCE_SYSTEM_PROMPT, user).await?;
        let reply: CoherenceReply = serde_json::from_str(&content)
            .map_err(|e| JudgeError::ParseError(format!("coherence verdicts: {e}")))?;
        Ok(reply.verdicts)
    }

    async fn classify_connection(
        &self,
        candidates: &[RuleContent],
        comparisons: &[RuleContent],
    ) -> Result<Vec<ConnectionVerdict>, JudgeError> {
        let mut user = String::from("Candidate rules:\n");
        for (index, candidate) in candidates.iter().enumerate() {
            let _ = writeln!(user, "{}. {}", index, candidate);
        }
        user.push_str("\nComparison rules:\n");
        for (offset, comparison) in comparisons.iter().enumerate() {
            let _ = writeln!(user, "{}. {}", candidates.len() + offset, comparison);
        }

        let content = self.chat(CONNECTION_SYSTEM_PROMPT, user).await?;
        let reply: ConnectionReply = serde_json::from_str(&content)
            .map_err(|e| JudgeError::ParseError(format!("connection verdicts: {e}")))?;
        Ok(reply.connections)
    }
}
