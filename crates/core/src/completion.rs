use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::error::BackendError;
use crate::traits::CompletionBackend;

/// Client for an OpenAI/OpenRouter-compatible `/chat/completions`
/// endpoint. Gateways differ in response shape, so parsing tolerates both
/// the `choices` form and a bare `response` field.
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

impl ChatCompletionClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self, BackendError> {
        Url::parse(base_url)?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            max_tokens,
        })
    }

    fn extract_content(body: &Value) -> Option<String> {
        if let Some(content) = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            return Some(content.trim().to_string());
        }

        body.pointer("/response")
            .and_then(Value::as_str)
            .map(|content| content.trim().to_string())
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: 0.7,
        };

        let mut call = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "completions".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        Self::extract_content(&body).ok_or_else(|| BackendError::BackendResponse {
            backend: "completions".to_string(),
            details: "no completion content in response body".to_string(),
        })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut call = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::NotReady(format!(
                "completion api answered {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ChatCompletionClient;
    use serde_json::json;

    #[test]
    fn chat_completions_shape_is_parsed() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "  $5,000 total.  "}}]
        });
        assert_eq!(
            ChatCompletionClient::extract_content(&body).as_deref(),
            Some("$5,000 total.")
        );
    }

    #[test]
    fn bare_response_shape_is_parsed() {
        let body = json!({"response": "done"});
        assert_eq!(
            ChatCompletionClient::extract_content(&body).as_deref(),
            Some("done")
        );
    }

    #[test]
    fn unexpected_shape_yields_none() {
        let body = json!({"outputs": []});
        assert_eq!(ChatCompletionClient::extract_content(&body), None);
    }

    #[test]
    fn bad_endpoint_is_rejected() {
        assert!(ChatCompletionClient::new("nope", None, "llama", 256).is_err());
    }
}
