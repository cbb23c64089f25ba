use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;

use crate::models::{
    ChatRequest, ChatResponse, CodeExecutionRequest, CodeExecutionResponse, HealthReport,
};

/**
 * \brief Talks to a running multichat server over HTTP.
 */
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    /**
     * \param base_url Server root, e.g. "http://127.0.0.1:8000".
     */
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let resp = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(request)
            .send()
            .await?;
        read_json(resp, "chat").await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        read_json(resp, "health").await
    }

    pub async fn execute_code(&self, request: &CodeExecutionRequest) -> Result<CodeExecutionResponse> {
        let resp = self
            .client
            .post(format!("{}/execute-code", self.base_url))
            .json(request)
            .send()
            .await?;
        read_json(resp, "execute-code").await
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("{} request failed: {} -> {}", what, status, text));
    }
    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Settings;
    use crate::dispatch::testing::{endpoint, EchoRunner, FakeBackend};
    use crate::dispatch::Dispatcher;
    use crate::models::Message;
    use crate::server::{router, AppState};

    async fn spawn_server(backend: Arc<FakeBackend>) -> BackendClient {
        let state = AppState {
            settings: Arc::new(Settings::from_lookup(|_| None).expect("settings")),
            dispatcher: Arc::new(Dispatcher::new(backend)),
            runner: Arc::new(EchoRunner),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.expect("serve");
        });
        BackendClient::new(&format!("http://{}/", addr))
    }

    #[tokio::test]
    async fn test_round_trip_against_server() {
        let client = spawn_server(Arc::new(FakeBackend::default().reply("A", "pong"))).await;
        let resp = client
            .chat(&ChatRequest {
                messages: vec![Message::user("ping")],
                endpoints: vec![endpoint("A", "k")],
                auto_continue: false,
                max_turns: 1,
            })
            .await
            .expect("chat");
        assert_eq!(resp.responses, vec![Message::assistant("A", "pong")]);

        let health = client.health().await.expect("health");
        assert_eq!(health.status, "warning");

        let err = client
            .execute_code(&CodeExecutionRequest {
                code: "print(1)".into(),
                timeout: 1,
            })
            .await
            .expect_err("disabled");
        assert!(err.to_string().contains("403"));
    }
}
