use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::{health_report, Settings};
use crate::dispatch::{Dispatcher, Strategy};
use crate::executor::{CodeRunner, PythonRunner};
use crate::llm::HttpBackend;
use crate::models::{
    ChatRequest, ChatResponse, CodeExecutionRequest, CodeExecutionResponse, HealthReport,
    DEFAULT_EXEC_TIMEOUT_SECS,
};
use crate::telemetry;
use crate::turn::orchestrate;

/**
 * \brief Shared handler state. Immutable after startup, so no locking.
 */
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dispatcher: Arc<Dispatcher>,
    pub runner: Arc<dyn CodeRunner>,
}

impl AppState {
    /**
     * \brief Wire the real HTTP backend and Python runner according to `settings`.
     */
    pub fn from_settings(settings: Settings) -> Self {
        let runner: Arc<dyn CodeRunner> = Arc::new(PythonRunner::new(settings.python.clone()));
        let referer = settings
            .allowed_origins
            .iter()
            .find(|o| o.as_str() != "*")
            .cloned()
            .unwrap_or_else(|| crate::config::DEFAULT_ALLOWED_ORIGIN.to_string());
        let backend = HttpBackend::default().with_attribution(referer, "MultiChat");
        let mut dispatcher = Dispatcher::new(Arc::new(backend));
        if settings.relay {
            dispatcher = dispatcher.with_strategy(Strategy::relay());
        }
        if settings.code_execution {
            dispatcher = dispatcher.with_code_runner(
                runner.clone(),
                Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            );
        }
        Self {
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
            runner,
        }
    }
}

/**
 * \brief Routes plus CORS, without binding a socket.
 */
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(&state.settings.allowed_origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/chat", post(chat))
        .route("/execute-code", post(execute_code))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

/**
 * \brief A `*` entry allows every origin. Credentials stay enabled, so the
 *        request origin is echoed back instead of a literal wildcard.
 */
fn allow_origin(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|o| o == "*") {
        return AllowOrigin::mirror_request();
    }
    AllowOrigin::list(
        origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect::<Vec<_>>(),
    )
}

/**
 * \brief Start the HTTP service.
 * \param addr Listen address such as "0.0.0.0:8000".
 */
pub async fn run(addr: &str, settings: Settings) -> Result<()> {
    telemetry::set_enabled(settings.telemetry);
    if let Some(dir) = &settings.log_dir {
        telemetry::set_log_dir(dir);
    }
    let app = router(AppState::from_settings(settings));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Starting Multi-Model Chat Backend on http://{}", addr);
    telemetry::log_event("server", &format!("listening addr={}", addr));
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief Fan the conversation out to the endpoints, possibly over several rounds.
 */
async fn chat(
    State(state): State<AppState>,
    Json(mut req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if req.messages.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "messages must not be empty".to_string()));
    }
    if req.endpoints.is_empty() {
        req.endpoints = state.settings.default_endpoints.clone();
    }
    telemetry::log_event(
        "server.chat",
        &format!(
            "messages={} endpoints={} auto_continue={} max_turns={}",
            req.messages.len(),
            req.endpoints.len(),
            req.auto_continue,
            req.max_turns
        ),
    );

    let responses = orchestrate(&state.dispatcher, &req).await;
    if responses.is_empty() {
        telemetry::log_error("server.chat", "no responses produced");
        return Err(internal_err("All endpoints failed to respond"));
    }
    Ok(Json(ChatResponse { responses }))
}

async fn execute_code(
    State(state): State<AppState>,
    Json(req): Json<CodeExecutionRequest>,
) -> Result<Json<CodeExecutionResponse>, (StatusCode, String)> {
    if !state.settings.code_execution {
        return Err((
            StatusCode::FORBIDDEN,
            "code execution is disabled; set MULTICHAT_CODE_EXECUTION=1".to_string(),
        ));
    }
    let output = state
        .runner
        .run(&req.code, Duration::from_secs(req.timeout))
        .await;
    Ok(Json(CodeExecutionResponse { output }))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(health_report(&state.settings))
}

fn internal_err<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{endpoint, EchoRunner, FakeBackend};
    use crate::models::{Message, Role};
    use axum::body::{to_bytes, Body};
    use axum::http::{
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN,
        },
        Request,
    };
    use tower::ServiceExt;

    fn settings(code_execution: bool) -> Settings {
        let mut s = Settings::from_lookup(|_| None).expect("settings");
        s.code_execution = code_execution;
        s
    }

    fn state(backend: Arc<FakeBackend>, code_execution: bool) -> AppState {
        AppState {
            settings: Arc::new(settings(code_execution)),
            dispatcher: Arc::new(Dispatcher::new(backend)),
            runner: Arc::new(EchoRunner),
        }
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.oneshot(req).await.expect("oneshot");
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        (status, body.to_vec())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn test_chat_returns_replies_in_endpoint_order() {
        let backend = Arc::new(FakeBackend::default().reply("A", "one").reply("B", "two"));
        let app = router(state(backend.clone(), false));
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            endpoints: vec![endpoint("A", "k"), endpoint("B", "k")],
            auto_continue: false,
            max_turns: 5,
        };
        let (status, body) = send(
            app,
            post_json("/chat", serde_json::to_value(&req).expect("to json")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resp: ChatResponse = serde_json::from_slice(&body).expect("parse response");
        assert_eq!(resp.responses.len(), 2);
        assert_eq!(resp.responses[0].content, "one");
        assert_eq!(resp.responses[1].name.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_chat_falls_back_to_default_endpoints_without_keys() {
        let backend = Arc::new(FakeBackend::default());
        let app = router(state(backend.clone(), false));
        let body = serde_json::json!({"messages": [{"role": "user", "content": "hi"}]});
        let (status, body) = send(app, post_json("/chat", body)).await;
        assert_eq!(status, StatusCode::OK);
        let resp: ChatResponse = serde_json::from_slice(&body).expect("parse response");
        assert_eq!(resp.responses.len(), 1);
        assert_eq!(resp.responses[0].role, Role::System);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_messages() {
        let app = router(state(Arc::new(FakeBackend::default()), false));
        let (status, _) = send(app, post_json("/chat", serde_json::json!({"messages": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_execute_code_respects_switch() {
        let body = serde_json::json!({"code": "print(1)"});
        let app = router(state(Arc::new(FakeBackend::default()), false));
        let (status, _) = send(app, post_json("/execute-code", body.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let app = router(state(Arc::new(FakeBackend::default()), true));
        let (status, body) = send(app, post_json("/execute-code", body)).await;
        assert_eq!(status, StatusCode::OK);
        let resp: CodeExecutionResponse = serde_json::from_slice(&body).expect("parse");
        assert_eq!(resp.output, "ran print(1)");
    }

    #[tokio::test]
    async fn test_health_reports_missing_vars() {
        let app = router(state(Arc::new(FakeBackend::default()), false));
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        let report: HealthReport = serde_json::from_slice(&body).expect("parse");
        assert_eq!(report.status, "warning");
        assert_eq!(report.missing_env_vars.len(), 4);
        assert_eq!(report.default_endpoints[0].name, "Model A");
        assert_eq!(report.default_endpoints[0].model, "gpt-3.5-turbo");
    }

    fn health_with_origin(origin: &str) -> Request<Body> {
        Request::builder()
            .uri("/health")
            .header(ORIGIN, origin)
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn test_wildcard_origin_mirrors_request_origin() {
        let mut s = Settings::from_lookup(|key| (key == "ALLOWED_ORIGINS").then(|| "*".to_string()))
            .expect("settings");
        s.code_execution = false;
        let app = router(AppState {
            settings: Arc::new(s),
            dispatcher: Arc::new(Dispatcher::new(Arc::new(FakeBackend::default()))),
            runner: Arc::new(EchoRunner),
        });
        let resp = app
            .oneshot(health_with_origin("http://ui.example.test"))
            .await
            .expect("oneshot");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("http://ui.example.test")
        );
        assert_eq!(
            resp.headers()
                .get(ACCESS_CONTROL_ALLOW_CREDENTIALS)
                .and_then(|v| v.to_str().ok()),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_listed_origins_only_allow_matches() {
        let app = router(state(Arc::new(FakeBackend::default()), false));
        let resp = app
            .clone()
            .oneshot(health_with_origin("http://localhost:5173"))
            .await
            .expect("oneshot");
        assert_eq!(
            resp.headers()
                .get(ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost:5173")
        );
        let resp = app
            .oneshot(health_with_origin("http://evil.test"))
            .await
            .expect("oneshot");
        assert!(resp.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }
}
