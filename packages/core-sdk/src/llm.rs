use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::errors::DispatchError;
use crate::models::{Endpoint, Message, ProviderKind};
use crate::sanitize::sanitize_name;

/** \brief Upper bound for one chat-completion call. */
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_REFERER: &str = "http://localhost:5173";
const DEFAULT_TITLE: &str = "MultiChat";

/**
 * \brief Anything able to answer a conversation on behalf of one endpoint.
 * \details The dispatcher only talks to this trait, so rounds can be driven
 * against real providers or against an in-process fake.
 */
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        endpoint: &Endpoint,
        history: &[Message],
        context: Option<&str>,
    ) -> Result<String, DispatchError>;
}

/**
 * \brief reqwest-backed client for OpenAI-compatible `/chat/completions`.
 */
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    timeout: Duration,
    referer: String,
    title: String,
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HttpBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: REQUEST_TIMEOUT,
            referer: DEFAULT_REFERER.to_string(),
            title: DEFAULT_TITLE.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /**
     * \brief Attribution sent to OpenRouter as `HTTP-Referer` / `X-Title`.
     */
    pub fn with_attribution(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }

    fn headers(&self, endpoint: &Endpoint) -> Result<HeaderMap, DispatchError> {
        let invalid = |reason: String| DispatchError::InvalidResponse {
            endpoint: endpoint.name.clone(),
            reason,
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", endpoint.api_key.trim()))
                .map_err(|e| invalid(format!("bad api key: {}", e)))?,
        );
        if endpoint.provider_kind() == ProviderKind::OpenRouter {
            headers.insert(
                "HTTP-Referer",
                HeaderValue::from_str(&self.referer)
                    .map_err(|e| invalid(format!("bad referer: {}", e)))?,
            );
            headers.insert(
                "X-Title",
                HeaderValue::from_str(&self.title)
                    .map_err(|e| invalid(format!("bad title: {}", e)))?,
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn complete(
        &self,
        endpoint: &Endpoint,
        history: &[Message],
        context: Option<&str>,
    ) -> Result<String, DispatchError> {
        match tokio::time::timeout(self.timeout, chat_once(self, endpoint, history, context)).await
        {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                endpoint: endpoint.name.clone(),
            }),
        }
    }
}

/**
 * \brief Non-streaming call, returns the trimmed reply text.
 */
async fn chat_once(
    backend: &HttpBackend,
    endpoint: &Endpoint,
    history: &[Message],
    context: Option<&str>,
) -> Result<String, DispatchError> {
    let url = completions_url(&endpoint.base_url);
    let body = json!({
        "model": endpoint.model_id,
        "messages": format_messages(endpoint.provider_kind(), history, context),
        "stream": false
    });
    let transport = |source: reqwest::Error| DispatchError::Transport {
        endpoint: endpoint.name.clone(),
        source,
    };

    let resp = backend
        .client
        .post(url)
        .headers(backend.headers(endpoint)?)
        .json(&body)
        .send()
        .await
        .map_err(transport)?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(DispatchError::Http {
            endpoint: endpoint.name.clone(),
            status,
            body: text,
        });
    }
    let v: Value = resp.json().await.map_err(transport)?;
    extract_openai_content(&v)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| DispatchError::InvalidResponse {
            endpoint: endpoint.name.clone(),
            reason: "response carried no choices[0].message.content".to_string(),
        })
}

/**
 * \brief `{base}/chat/completions`; the base already carries the version segment.
 */
pub fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/**
 * \brief Render history in the provider's wire shape.
 * \details A non-empty relay context becomes a leading system message. Names
 * are sanitized per provider kind and dropped when absent or empty.
 */
pub fn format_messages(kind: ProviderKind, history: &[Message], context: Option<&str>) -> Vec<Value> {
    let mut out = Vec::with_capacity(history.len() + 1);
    if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
        out.push(json!({
            "role": "system",
            "content": format!(
                "Context from other models:\n{}\n\nConsider this context in your response. \
                 If you see a question or topic that needs further discussion, provide your \
                 perspective and ask a relevant follow-up question.",
                ctx
            )
        }));
    }
    for msg in history {
        let mut item = json!({
            "role": msg.role,
            "content": msg.content,
        });
        if let Some(name) = msg.name.as_deref().filter(|n| !n.is_empty()) {
            item["name"] = json!(sanitize_name(name, kind));
        }
        out.push(item);
    }
    out
}

fn extract_openai_content(v: &Value) -> Option<&str> {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
}
