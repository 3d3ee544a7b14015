//! HTTP `LlmClient` implementation against a chat-completions-shaped
//! endpoint (spec.md §6 "LLM contract"). The provider behind the endpoint is
//! out of scope (spec.md Non-goals); this client only needs the request/
//! response shape any OpenAI-compatible gateway already speaks.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use watchdog_core::{CaseBuildResponse, Error, LlmClient, Result, TriageResponse};

/// Euro price per 1000 tokens, input and output priced separately. Kept
/// small and explicit rather than looked up from a provider's pricing API,
/// since budget enforcement (spec.md §4.D) only needs a reasonable estimate.
#[derive(Debug, Clone, Copy)]
pub struct PricePerThousandTokens {
    pub input_eur: f64,
    pub output_eur: f64,
}

impl Default for PricePerThousandTokens {
    fn default() -> Self {
        Self { input_eur: 0.00015, output_eur: 0.0006 }
    }
}

#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    price: PricePerThousandTokens,
}

impl HttpLlmClient {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>, model: String) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(Error::NotConfigured("missing LLM_BASE_URL".to_string()));
        }
        if model.trim().is_empty() {
            return Err(Error::NotConfigured("missing LLM_MODEL".to_string()));
        }
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            timeout: Duration::from_secs(60),
            price: PricePerThousandTokens::default(),
        })
    }

    pub fn with_price(mut self, price: PricePerThousandTokens) -> Self {
        self.price = price;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn estimated_cost(&self, tokens_in: u32, tokens_out: u32) -> BigDecimal {
        let cost = (tokens_in as f64 / 1000.0) * self.price.input_eur + (tokens_out as f64 / 1000.0) * self.price.output_eur;
        BigDecimal::from_str(&format!("{cost:.6}")).unwrap_or_else(|_| BigDecimal::from(0))
    }

    async fn call_json(&self, system: &str, user: &str) -> Result<(String, u32, u32)> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage { role: "system".to_string(), content: system.to_string() }, ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            }],
            response_format: ResponseFormat { kind: "json_object".to_string() },
            temperature: 0.0,
        };

        let mut rb = self
            .client
            .post(self.endpoint())
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let resp = rb.json(&req).send().await.map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("llm chat.completions HTTP {status}")));
        }
        let parsed: ChatCompletionsResponse = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        let content = parsed.choices.first().map(|c| c.message.content.clone()).unwrap_or_default();
        let tokens_in = parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0);
        let tokens_out = parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0);
        Ok((content, tokens_in, tokens_out))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn triage(&self, prompt: &str) -> Result<(TriageResponse, u32, u32, BigDecimal)> {
        let (content, tokens_in, tokens_out) = self
            .call_json(
                "You triage Finnish municipal planning documents. Respond with strict JSON matching the requested schema only.",
                prompt,
            )
            .await?;
        let parsed: TriageResponse = serde_json::from_str(&content).map_err(|e| Error::ParseFailure(format!("triage response: {e}")))?;
        let cost = self.estimated_cost(tokens_in, tokens_out);
        Ok((parsed, tokens_in, tokens_out, cost))
    }

    async fn case_build(&self, prompt: &str) -> Result<(CaseBuildResponse, u32, u32, BigDecimal)> {
        let (content, tokens_in, tokens_out) = self
            .call_json(
                "You summarize a Finnish municipal environmental matter into the requested strict JSON schema only.",
                prompt,
            )
            .await?;
        let parsed: CaseBuildResponse = serde_json::from_str(&content).map_err(|e| Error::ParseFailure(format!("case_build response: {e}")))?;
        let cost = self.estimated_cost(tokens_in, tokens_out);
        Ok((parsed, tokens_in, tokens_out, cost))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
