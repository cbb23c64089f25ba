use serde::{Deserialize, Deserializer, Serialize};

/**
 * \brief Chat role, serialized in lowercase to match the OpenAI chat format.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /** \brief Notices produced by the orchestrator itself (missing keys, relay context). */
    System,
}

/**
 * \brief One transcript entry. Messages are never edited after creation, only appended.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /** \brief Speaker label; for assistant replies this is the endpoint name. */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: Some(name.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/**
 * \brief Wire flavour of a provider, derived from its base URL.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /** \brief api.openai.com: `name` must match `^[a-zA-Z0-9_-]{1,64}$`. */
    OpenAi,
    /** \brief openrouter.ai: permissive names, attribution headers. */
    OpenRouter,
    /** \brief Any other OpenAI-compatible server. */
    Compatible,
}

impl ProviderKind {
    pub fn from_base_url(base_url: &str) -> Self {
        let lower = base_url.to_ascii_lowercase();
        if lower.contains("openai.com") {
            ProviderKind::OpenAi
        } else if lower.contains("openrouter.ai") {
            ProviderKind::OpenRouter
        } else {
            ProviderKind::Compatible
        }
    }

    /**
     * \brief Whether the provider rejects names outside the strict character set.
     */
    pub fn is_strict(self) -> bool {
        matches!(self, ProviderKind::OpenAi)
    }
}

/**
 * \brief One configured model target. Field names follow the web UI's camelCase payloads.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model_id: String,
}

impl Endpoint {
    /** \brief An endpoint takes part in a round only once it has a key. */
    pub fn is_active(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::from_base_url(&self.base_url)
    }
}

pub const DEFAULT_MAX_TURNS: u32 = 5;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}

fn default_exec_timeout() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}

/** \brief Explicit `null` behaves like an absent field. */
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default_max_turns<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u32>::deserialize(deserializer)?.unwrap_or(DEFAULT_MAX_TURNS))
}

fn null_as_default_exec_timeout<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS))
}

/**
 * \brief Body of `POST /chat`.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub endpoints: Vec<Endpoint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub auto_continue: bool,
    #[serde(
        default = "default_max_turns",
        deserialize_with = "null_as_default_max_turns"
    )]
    pub max_turns: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub responses: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutionRequest {
    pub code: String,
    /** \brief Seconds before the child process is killed. */
    #[serde(
        default = "default_exec_timeout",
        deserialize_with = "null_as_default_exec_timeout"
    )]
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExecutionResponse {
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub name: String,
    pub model: String,
}

/**
 * \brief Body of `GET /health`.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /** \brief "healthy" when every default-endpoint variable is set, "warning" otherwise. */
    pub status: String,
    pub missing_env_vars: Vec<String>,
    pub default_endpoints: Vec<EndpointSummary>,
}
