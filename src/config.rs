//! Layered configuration: explicit builder values → environment variables → defaults.
//!
//! Every field is optional on the builder, `from_env()` fills unset fields
//! from `std::env`, and `build()` applies the documented defaults last.

/// Default bind address for the HTTP server.
const DEFAULT_BIND: &str = "127.0.0.1:8089";
/// Default path for the sqlite-backed input-item + vector store.
const DEFAULT_STORE_PATH: &str = "./orchestrator.db";
/// Default max tool-calling loop iterations per request (§6, §4.9).
const DEFAULT_MAX_TOOL_CALLS: usize = 10;
/// Default hybrid search fusion weight (§4.5).
const DEFAULT_HYBRID_ALPHA: f32 = 0.5;
/// Default vector search score threshold (§4.3).
const DEFAULT_SCORE_THRESHOLD: f32 = 0.07;
/// Default agentic search iteration cap (§4.7).
const DEFAULT_MAX_AGENTIC_ITERATIONS: usize = 6;
/// Default upstream model identifier.
const DEFAULT_MODEL: &str = "gpt-5.2-2025-12-11";

/// Process-wide configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind: String,
    /// Path to the sqlite database backing the input-item and vector stores.
    pub store_path: String,
    /// Upstream LLM API key.
    pub api_key: String,
    /// Optional upstream base URL override (proxies, Azure, local-compatible servers).
    pub base_url: Option<String>,
    /// Default model identifier used when a request does not specify one.
    pub default_model: String,
    /// Hard cap on native-tool-call loop iterations per request (§4.9, §5).
    pub max_tool_calls: usize,
    /// Default hybrid search fusion weight α ∈ [0, 1] (§4.5).
    pub hybrid_alpha: f32,
    /// Default vector search score threshold (§4.3).
    pub score_threshold: f32,
    /// Default agentic search max iterations (§4.7).
    pub max_agentic_iterations: usize,
}

impl Config {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Resolves configuration from environment variables with documented defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::OrchestratorError::InvalidArgument`] if no upstream
    /// API key is available.
    pub fn from_env() -> Result<Self, crate::error::OrchestratorError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    bind: Option<String>,
    store_path: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    default_model: Option<String>,
    max_tool_calls: Option<usize>,
    hybrid_alpha: Option<f32>,
    score_threshold: Option<f32>,
    max_agentic_iterations: Option<usize>,
}

impl ConfigBuilder {
    /// Populates unset fields from environment variables (§6).
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.bind.is_none() {
            self.bind = std::env::var("OPEN_RESPONSES_BIND").ok();
        }
        if self.store_path.is_none() {
            self.store_path = std::env::var("OPEN_RESPONSES_STORE_PATH").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL").ok();
        }
        if self.max_tool_calls.is_none() {
            self.max_tool_calls = std::env::var("OPEN_RESPONSES_MAX_TOOL_CALLS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.hybrid_alpha.is_none() {
            self.hybrid_alpha = std::env::var("OPEN_RESPONSES_HYBRID_ALPHA")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        self
    }

    /// Sets the HTTP bind address.
    #[must_use]
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// Sets the sqlite store path.
    #[must_use]
    pub fn store_path(mut self, path: impl Into<String>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Sets the upstream API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the upstream base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the default model identifier.
    #[must_use]
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Sets the max tool-calling loop iterations.
    #[must_use]
    pub const fn max_tool_calls(mut self, n: usize) -> Self {
        self.max_tool_calls = Some(n);
        self
    }

    /// Sets the default hybrid search α.
    #[must_use]
    pub const fn hybrid_alpha(mut self, alpha: f32) -> Self {
        self.hybrid_alpha = Some(alpha);
        self
    }

    /// Sets the default vector search score threshold.
    #[must_use]
    pub const fn score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    /// Sets the default agentic search max iterations.
    #[must_use]
    pub const fn max_agentic_iterations(mut self, n: usize) -> Self {
        self.max_agentic_iterations = Some(n);
        self
    }

    /// Builds the [`Config`], applying defaults for any unset field.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::OrchestratorError::InvalidArgument`] if no API key was set.
    pub fn build(self) -> Result<Config, crate::error::OrchestratorError> {
        let api_key = self.api_key.ok_or_else(|| {
            crate::error::OrchestratorError::InvalidArgument(
                "missing upstream API key (set OPENAI_API_KEY)".to_string(),
            )
        })?;

        Ok(Config {
            bind: self.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            store_path: self.store_path.unwrap_or_else(|| DEFAULT_STORE_PATH.to_string()),
            api_key,
            base_url: self.base_url,
            default_model: self.default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tool_calls: self.max_tool_calls.unwrap_or(DEFAULT_MAX_TOOL_CALLS),
            hybrid_alpha: self.hybrid_alpha.unwrap_or(DEFAULT_HYBRID_ALPHA),
            score_threshold: self.score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
            max_agentic_iterations: self
                .max_agentic_iterations
                .unwrap_or(DEFAULT_MAX_AGENTIC_ITERATIONS),
        })
    }
}
