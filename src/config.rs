//! Client configuration from environment variables.

/// Connection settings for the pipeline server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the pipeline server. `:2024` is the dev server;
    /// production typically listens on `:8123`.
    pub api_url: String,
    /// Graph to run on the server.
    pub assistant_id: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let api_url = std::env::var("SPOROS_API_URL")
            .unwrap_or_else(|_| "http://localhost:2024".to_string());
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            assistant_id: std::env::var("SPOROS_ASSISTANT_ID")
                .unwrap_or_else(|_| "agent".to_string()),
        }
    }
}
