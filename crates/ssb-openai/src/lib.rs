//! OpenAI-style chat-completion adapter.
//!
//! One pooled `reqwest` client per process, built once with a hard request
//! timeout; a timed-out or failed request resolves as `Error::Upstream`, never
//! as a hung session.

use std::time::Duration;

use async_trait::async_trait;

use ssb_core::{errors::Error, ports::CompletionClient, Result};

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build http client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            http,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn ask(&self, question: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": question}],
            "max_tokens": max_tokens,
        });

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("completion request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "completion returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("completion body is not json: {e}")))?;

        parse_completion(&v)
    }
}

/// `choices[0].message.content`, non-empty. Anything else is a malformed
/// response and carries no partial answer.
fn parse_completion(v: &serde_json::Value) -> Result<String> {
    let content = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("");

    if content.trim().is_empty() {
        return Err(Error::Upstream(
            "completion response has no answer text".to_string(),
        ));
    }

    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_choice_content() {
        let v = json!({
          "choices": [
            {"message": {"role": "assistant", "content": "Годовая процентная ставка."}}
          ]
        });
        assert_eq!(parse_completion(&v).unwrap(), "Годовая процентная ставка.");
    }

    #[test]
    fn missing_choices_is_upstream_error() {
        let v = json!({"error": {"message": "model overloaded"}});
        assert!(matches!(
            parse_completion(&v),
            Err(Error::Upstream(_))
        ));
    }

    #[test]
    fn empty_content_is_upstream_error() {
        let v = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(parse_completion(&v).is_err());
    }
}
