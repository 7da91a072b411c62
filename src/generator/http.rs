use super::prompts::render;
use super::{ContentGenerator, GenerationContext};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// OpenAI-compatible `/chat/completions` client.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl HttpGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for generator")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            temperature,
        })
    }

    fn request_body(&self, ctx: &GenerationContext) -> serde_json::Value {
        let prompt = render(ctx);
        serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        })
    }
}

/// First non-empty message content of a chat completion.
fn parse_content(body: &str) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).context("Failed to parse chat completion response")?;
    parsed
        .choices
        .into_iter()
        .filter_map(|c| c.message.and_then(|m| m.content))
        .find(|c| !c.trim().is_empty())
        .context("Chat completion response contained no content")
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    async fn generate(&self, ctx: &GenerationContext) -> Result<String> {
        tracing::debug!(endpoint = %self.endpoint, model = %self.model, mode = ctx.mode.as_str(), "Calling chat completions");
        let mut request = self.client.post(&self.endpoint).json(&self.request_body(ctx));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach generator endpoint {}", self.endpoint))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read generator response body")?;
        if !status.is_success() {
            bail!(
                "Generator endpoint returned {}: {}",
                status,
                crate::util::truncate_chars(body.trim(), 500)
            );
        }
        parse_content(&body)
    }
}
