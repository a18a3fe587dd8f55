//! Configuration management

use std::{collections::BTreeMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::routing::{SEARCH_TOOL, SUMMARIZE_TOOL};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Gateway HTTP server
    pub server: ServerConfig,
    /// Tool identifier -> backend endpoint. Read-only after startup.
    pub tools: BTreeMap<String, ToolEndpointConfig>,
    /// Backend tool service
    pub tool_server: ToolServerConfig,
    /// arXiv search backend
    pub search: SearchConfig,
    /// Summarization pipeline constants
    pub pipeline: PipelineConfig,
    /// Text-completion provider
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: vec![".env".to_string()],
            server: ServerConfig::default(),
            tools: default_tool_endpoints(),
            tool_server: ToolServerConfig::default(),
            search: SearchConfig::default(),
            pipeline: PipelineConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

fn default_tool_endpoints() -> BTreeMap<String, ToolEndpointConfig> {
    BTreeMap::from([
        (
            SEARCH_TOOL.to_string(),
            ToolEndpointConfig {
                url: "http://127.0.0.1:4200/mcp/".to_string(),
                timeout: Duration::from_secs(60),
            },
        ),
        (
            SUMMARIZE_TOOL.to_string(),
            ToolEndpointConfig {
                url: "http://127.0.0.1:4201/mcp/".to_string(),
                timeout: Duration::from_secs(600),
            },
        ),
    ])
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (SCHOLAR_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("SCHOLAR_GATEWAY_").split("__"));

        Self::from_figment(&figment)
    }

    /// Extract, post-process and validate a configuration from a figment
    ///
    /// # Errors
    ///
    /// Returns an error if extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();
        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in endpoint URLs
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        for endpoint in self.tools.values_mut() {
            endpoint.url = Self::expand_string(&re, &endpoint.url);
        }
        self.search.base_url = Self::expand_string(&re, &self.search.base_url);
        if let Some(base_url) = self.llm.base_url.as_mut() {
            *base_url = Self::expand_string(&re, base_url);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Reject configurations the pipeline or gateway cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        for (tool, endpoint) in &self.tools {
            url::Url::parse(&endpoint.url)
                .map_err(|e| Error::Config(format!("tools.{tool}.url: {e}")))?;
            if endpoint.timeout.is_zero() {
                return Err(Error::Config(format!("tools.{tool}.timeout must be > 0")));
            }
        }

        let p = &self.pipeline;
        if p.chunk_size == 0 {
            return Err(Error::Config("pipeline.chunk_size must be > 0".into()));
        }
        if p.chunk_overlap >= p.chunk_size {
            return Err(Error::Config(format!(
                "pipeline.chunk_overlap ({}) must be smaller than chunk_size ({})",
                p.chunk_overlap, p.chunk_size
            )));
        }
        if p.map_concurrency == 0 {
            return Err(Error::Config("pipeline.map_concurrency must be >= 1".into()));
        }
        for (name, band) in [("map_words", p.map_words), ("reduce_words", p.reduce_words)] {
            if band.min == 0 || band.min > band.max {
                return Err(Error::Config(format!(
                    "pipeline.{name}: invalid word band {band}"
                )));
            }
        }
        if p.fetch_timeout.is_zero() || self.llm.timeout.is_zero() || self.search.timeout.is_zero()
        {
            return Err(Error::Config("network timeouts must be > 0".into()));
        }

        Ok(())
    }
}

/// Gateway HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// SSE keep-alive comment interval; `0s` disables keep-alive frames
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_body_size: 64 * 1024,
            keep_alive_interval: Duration::ZERO,
        }
    }
}

/// One entry of the tool endpoint table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEndpointConfig {
    /// Streamable HTTP endpoint of the backend serving this tool
    pub url: String,
    /// Deadline for a whole invocation (connect + call)
    #[serde(with = "humantime_serde", default = "default_tool_timeout")]
    pub timeout: Duration,
}

fn default_tool_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Backend tool service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Server name reported in `initialize`
    pub name: String,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4200,
            name: "scholar-tools".to_string(),
        }
    }
}

/// arXiv search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// arXiv API query endpoint
    pub base_url: String,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://export.arxiv.org/api/query".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Inclusive target length band for a generated summary, in words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBand {
    /// Lower bound
    pub min: u32,
    /// Upper bound
    pub max: u32,
}

impl WordBand {
    /// Create a band
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

impl std::fmt::Display for WordBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Summarization pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Maximum overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
    /// Document download timeout
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// Largest document accepted for download
    pub max_document_bytes: u64,
    /// Word band requested for each chunk summary
    pub map_words: WordBand,
    /// Word band requested for the final summary
    pub reduce_words: WordBand,
    /// Concurrent completion calls during the map stage
    pub map_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            fetch_timeout: Duration::from_secs(10),
            max_document_bytes: 50 * 1024 * 1024,
            map_words: WordBand::new(50, 75),
            reduce_words: WordBand::new(100, 150),
            map_concurrency: 4,
        }
    }
}

/// Supported text-completion providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Groq (OpenAI-compatible API)
    Groq,
    /// OpenAI
    OpenAi,
    /// Anthropic Messages API
    Anthropic,
}

impl LlmProvider {
    /// Provider name as used in config and environment variable names
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Default API base URL
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

/// Text-completion provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider
    pub provider: LlmProvider,
    /// Model name
    pub model: String,
    /// API key: literal value or `env:VAR_NAME`. Falls back to `<PROVIDER>_API_KEY`.
    pub api_key: Option<String>,
    /// Override the provider's API base URL
    pub base_url: Option<String>,
    /// Per-call request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion token limit
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Groq,
            model: "llama3-8b-8192".to_string(),
            api_key: None,
            base_url: None,
            timeout: Duration::from_secs(120),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key (expand `env:` references, fall back to `<PROVIDER>_API_KEY`)
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        match &self.api_key {
            Some(key) => match key.strip_prefix("env:") {
                Some(var_name) => env::var(var_name).ok(),
                None => Some(key.clone()),
            },
            None => env::var(format!("{}_API_KEY", self.provider.as_str().to_uppercase())).ok(),
        }
        .filter(|k| !k.is_empty())
    }

    /// Effective API base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms" or a bare number of seconds
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
