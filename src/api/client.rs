//! Generic invoker for OpenAI-compatible chat endpoints

use super::{
    ChatRequest, ChatResponse, InvokeError, ProviderInvoker, Role, TokenUsage,
};
use crate::routing::ProviderConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Calls `{base_url}/chat/completions` with bearer auth.
///
/// Works for any provider in the registry that exposes the OpenAI chat
/// format. Vision is left to the trait default (`NotImplemented`).
pub struct OpenAiCompatInvoker {
    client: Client,
}

impl OpenAiCompatInvoker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn api_key(provider: &ProviderConfig) -> Result<Option<String>, InvokeError> {
        match &provider.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                InvokeError::Auth(format!("{} is not set for provider '{}'", var, provider.id))
            }),
        }
    }

    fn build_request(provider: &ProviderConfig, request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                json!({
                    "role": role,
                    "content": msg.content
                })
            })
            .collect();

        let mut body = json!({
            "model": provider.model_name(),
            "messages": messages,
        });

        if let Some(max_tokens) = request.options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if let Some(temp) = request.options.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    fn parse_response(provider: &ProviderConfig, response: Value) -> Result<ChatResponse, InvokeError> {
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InvokeError::Provider("response has no message content".into()))?
            .to_string();

        let count = |field: &str| {
            let raw = response["usage"][field].as_u64().unwrap_or(0);
            u32::try_from(raw).unwrap_or(u32::MAX)
        };
        let usage = TokenUsage::new(count("prompt_tokens"), count("completion_tokens"));

        Ok(ChatResponse {
            content,
            usage,
            model: response["model"]
                .as_str()
                .unwrap_or(provider.model_name())
                .to_string(),
        })
    }
}

impl Default for OpenAiCompatInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderInvoker for OpenAiCompatInvoker {
    async fn chat(
        &self,
        provider: &ProviderConfig,
        request: &ChatRequest,
    ) -> Result<ChatResponse, InvokeError> {
        let base_url = provider.base_url.as_deref().ok_or_else(|| {
            InvokeError::Provider(format!("provider '{}' has no base_url", provider.id))
        })?;
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let body = Self::build_request(provider, request);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = Self::api_key(provider)? {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            let json: Value = response.json().await?;
            return Self::parse_response(provider, json);
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(InvokeError::Auth(format!("{} rejected credentials", provider.id)))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(InvokeError::RateLimited { retry_after_secs })
            }
            _ => {
                let error_text = response.text().await.unwrap_or_default();
                Err(InvokeError::Provider(format!("{}: {}", status, error_text)))
            }
        }
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatOptions, Message};
    use crate::routing::Capability;

    fn provider() -> ProviderConfig {
        ProviderConfig::new("deepseek-chat", "DeepSeek", Capability::Chat).with_endpoint(
            "https://api.deepseek.com/v1",
            "deepseek-chat",
            "TASK_ROUTER_TEST_UNSET_KEY",
        )
    }

    #[test]
    fn test_build_request() {
        let request = ChatRequest {
            task_type: "general_chat".into(),
            messages: vec![Message::system("be brief"), Message::user("hi")],
            options: ChatOptions {
                temperature: Some(0.2),
                max_tokens: Some(256),
            },
        };
        let body = OpenAiCompatInvoker::build_request(&provider(), &request);
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn test_parse_response() {
        let raw = json!({
            "model": "deepseek-chat",
            "choices": [{"message": {"role": "assistant", "content": "ok"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let parsed = OpenAiCompatInvoker::parse_response(&provider(), raw).unwrap();
        assert_eq!(parsed.content, "ok");
        assert_eq!(parsed.usage.total_tokens, 15);
    }

    #[test]
    fn test_oversized_token_counts_saturate() {
        let raw = json!({
            "choices": [{"message": {"role": "assistant", "content": "ok"}}],
            "usage": {"prompt_tokens": 5_000_000_000u64, "completion_tokens": 7}
        });
        let parsed = OpenAiCompatInvoker::parse_response(&provider(), raw).unwrap();
        assert_eq!(parsed.usage.prompt_tokens, u32::MAX);
        assert_eq!(parsed.usage.completion_tokens, 7);
        assert_eq!(parsed.usage.total_tokens, u32::MAX);
    }

    #[test]
    fn test_parse_response_without_content_fails() {
        let raw = json!({"choices": []});
        assert!(OpenAiCompatInvoker::parse_response(&provider(), raw).is_err());
    }

    #[test]
    fn test_missing_key_env_is_auth_error() {
        assert!(matches!(
            OpenAiCompatInvoker::api_key(&provider()),
            Err(InvokeError::Auth(_))
        ));
    }
}
