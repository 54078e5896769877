//! Chat-completion client used for transcript analysis.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use voice_tutor_core::{ChatMessage, RealtimeConfig, SummarizationError, Summarizer};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Sampling parameters forwarded with every request when set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// [`Summarizer`] over a chat-completion-compatible HTTP endpoint.
///
/// Usually pointed at the relay's `/analyze` route, which adds the provider
/// key server-side. A key may still be given for direct use.
#[derive(Debug, Clone)]
pub struct HttpSummarizer {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    sampling: SamplingOptions,
}

impl HttpSummarizer {
    #[must_use]
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            model: model.into(),
            api_key: None,
            sampling: SamplingOptions::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(&config.analysis_url, &config.analysis_model)
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Send `key` as a bearer token.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(
        &self,
        instructions: &str,
        messages: &[ChatMessage],
    ) -> Result<String, SummarizationError> {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(ChatMessage::new("system", instructions));
        all.extend_from_slice(messages);

        let body = CompletionRequest {
            model: &self.model,
            messages: all,
            max_tokens: self.sampling.max_tokens,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SummarizationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SummarizationError::Status(status.as_u16()));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| SummarizationError::Request(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(SummarizationError::MissingContent)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_posts_system_then_messages() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/analyze")
                    .json_body(json!({
                        "model": "gpt-4o-mini",
                        "messages": [
                            {"role": "system", "content": "Summarize."},
                            {"role": "user", "content": "hi"},
                        ],
                    }));
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "A greeting."}}],
                }));
            })
            .await;

        let summarizer = HttpSummarizer::new(server.url("/analyze"), "gpt-4o-mini");
        let summary = summarizer
            .summarize("Summarize.", &[ChatMessage::new("user", "hi")])
            .await
            .unwrap();

        assert_eq!(summary, "A greeting.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sampling_and_key_are_sent() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"max_tokens": 200}"#);
                then.status(200)
                    .json_body(json!({"choices": [{"message": {"content": "ok"}}]}));
            })
            .await;

        let summarizer = HttpSummarizer::new(server.url("/v1/chat/completions"), "gpt-4o")
            .with_api_key("sk-test")
            .with_sampling(SamplingOptions {
                max_tokens: Some(200),
                ..SamplingOptions::default()
            });

        assert_eq!(summarizer.summarize("x", &[]).await.unwrap(), "ok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(500).body("upstream down");
            })
            .await;

        let summarizer = HttpSummarizer::new(server.url("/analyze"), "gpt-4o-mini");
        let err = summarizer.summarize("x", &[]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Status(500)));
    }

    #[tokio::test]
    async fn test_missing_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let summarizer = HttpSummarizer::new(server.url("/analyze"), "gpt-4o-mini");
        let err = summarizer.summarize("x", &[]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::MissingContent));
    }
}
