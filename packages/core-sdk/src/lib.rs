pub mod client;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod executor;
pub mod extract;
pub mod llm;
pub mod models;
pub mod sanitize;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod transcript;
pub mod turn;

/**
 * \brief Commonly used modules, re-exported for the apps.
 */
pub mod prelude {
    pub use crate::client;
    pub use crate::config;
    pub use crate::dispatch;
    pub use crate::llm;
    pub use crate::models;
    pub use crate::server;
    pub use crate::session;
    pub use crate::telemetry;
    pub use crate::transcript;
    pub use crate::turn;
}
