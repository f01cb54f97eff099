use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the watch concierge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub groq: GroqConfig,
    pub openai: OpenAIConfig,
    pub encoder: EncoderConfig,
    pub router: RouterConfig,
    pub catalog: CatalogConfig,
    pub prediction: PredictionConfig,
    pub redis: RedisConfig,
    pub retry: RetryConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroqConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub embedding_model: String,
    pub api_key_env: Option<String>,
}

impl OpenAIConfig {
    pub fn api_key(&self) -> anyhow::Result<String> {
        std::env::var("OPENAI_API_KEY").or_else(|_| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY not set"))
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncoderProvider {
    Openai,
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub provider: EncoderProvider,
    /// Only used by the hashing encoder
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Fixed score of the general route's wildcard exemplar (0.0-1.0)
    pub baseline_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub database: u8,
    pub pool: PoolConfig,
    pub embedding_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_size: usize,
    pub timeout_seconds: u64,
    pub create_timeout_seconds: u64,
    pub recycle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_base: f64,
    pub jitter_factor: f64,
}

/// Limits on live chat sessions held by the HTTP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions untouched for this long are dropped
    pub idle_ttl_seconds: u64,
    /// Least recently used sessions are evicted beyond this count
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl_seconds: 3600,
            max_sessions: 1000,
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_seconds)
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides.
    /// Never fails: problems are logged and defaults are used.
    pub fn load() -> Self {
        let mut env_loaded = false;
        for path in ["../.env", ".env"] {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::warn!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("WATCH_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = Self::from_path(Path::new(&config_path));

        config.apply_env_overrides();

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    fn from_path(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!("Config file not found at {} - using defaults", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = env::var("WATCH_HTTP_BIND") {
            self.server.bind = bind;
        }
        if let Ok(token) = env::var("WATCH_BEARER_TOKEN") {
            self.server.bearer_token = Some(token);
        }

        if let Ok(api_key) = env::var("GROQ_API_KEY") {
            self.groq.api_key = api_key;
        }
        if let Ok(model) = env::var("GROQ_MODEL") {
            self.groq.model = model;
        }

        if let Ok(model) = env::var("OPENAI_EMBEDDING_MODEL") {
            self.openai.embedding_model = model;
        }
        if let Ok(provider) = env::var("WATCH_ENCODER") {
            match provider.to_lowercase().as_str() {
                "openai" => self.encoder.provider = EncoderProvider::Openai,
                "hashing" => self.encoder.provider = EncoderProvider::Hashing,
                other => tracing::warn!("Unknown WATCH_ENCODER '{}', keeping configured", other),
            }
        }

        if let Ok(baseline) = env::var("WATCH_ROUTER_BASELINE") {
            if let Ok(v) = baseline.parse() {
                self.router.baseline_score = v;
            }
        }

        if let Ok(path) = env::var("WATCH_CATALOG_PATH") {
            self.catalog.path = path;
        }
        if let Ok(url) = env::var("PREDICTION_URL") {
            self.prediction.base_url = url;
        }

        if let Ok(enabled) = env::var("REDIS_ENABLED") {
            if let Ok(v) = enabled.parse() {
                self.redis.enabled = v;
            }
        }
        if let Ok(host) = env::var("REDIS_HOST") {
            self.redis.host = host;
        }
        if let Ok(port) = env::var("REDIS_PORT") {
            if let Ok(port_num) = port.parse() {
                self.redis.port = port_num;
            }
        }
        if let Ok(db) = env::var("REDIS_DB") {
            if let Ok(db_num) = db.parse() {
                self.redis.database = db_num;
            }
        }

        if let Ok(ttl) = env::var("WATCH_SESSION_IDLE_TTL") {
            if let Ok(v) = ttl.parse() {
                self.sessions.idle_ttl_seconds = v;
            }
        }
        if let Ok(max) = env::var("WATCH_MAX_SESSIONS") {
            if let Ok(v) = max.parse() {
                self.sessions.max_sessions = v;
            }
        }

        if let Ok(jitter) = env::var("WATCH_RETRY_JITTER_FACTOR") {
            if let Ok(jitter_val) = jitter.parse() {
                self.retry.jitter_factor = jitter_val;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(0.0..=1.0).contains(&self.router.baseline_score) {
            return Err("Router baseline score must be between 0.0 and 1.0".into());
        }

        if self.retry.jitter_factor < 0.0 || self.retry.jitter_factor > 1.0 {
            return Err("Retry jitter factor must be between 0.0 and 1.0".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("Retry max_attempts cannot be 0".into());
        }

        if self.sessions.max_sessions == 0 {
            return Err("Session max_sessions cannot be 0".into());
        }

        if self.redis.enabled && self.redis.port == 0 {
            return Err("Redis port cannot be 0".into());
        }

        if self.encoder.provider == EncoderProvider::Hashing && self.encoder.dimensions == 0 {
            return Err("Hashing encoder dimensions cannot be 0".into());
        }

        if self.groq.api_key == "PLACEHOLDER_GROQ_API_KEY" || self.groq.api_key.is_empty() {
            return Err("GROQ_API_KEY environment variable must be set".into());
        }

        Ok(())
    }

    /// Get Redis URL with password from environment
    pub fn get_redis_url(&self) -> String {
        let password = env::var("REDIS_PASSWORD").unwrap_or_default();

        if password.is_empty() {
            format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.database
            )
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.database
            )
        }
    }

    pub fn get_pool_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.pool.timeout_seconds)
    }

    pub fn get_pool_create_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.pool.create_timeout_seconds)
    }

    pub fn get_pool_recycle_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.pool.recycle_timeout_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:5000".to_string(),
                bearer_token: None,
            },
            groq: GroqConfig {
                api_key: env::var("GROQ_API_KEY").unwrap_or_else(|_| {
                    tracing::warn!("GROQ_API_KEY not set, using placeholder");
                    "PLACEHOLDER_GROQ_API_KEY".to_string()
                }),
                model: "llama3-8b-8192".to_string(),
                temperature: 0.2,
                max_tokens: 1024,
            },
            openai: OpenAIConfig {
                embedding_model: "text-embedding-3-small".to_string(),
                api_key_env: None,
            },
            encoder: EncoderConfig {
                provider: EncoderProvider::Openai,
                dimensions: 512,
            },
            router: RouterConfig {
                baseline_score: 0.35,
            },
            catalog: CatalogConfig {
                path: "watches.db".to_string(),
            },
            prediction: PredictionConfig {
                base_url: "http://localhost:5001".to_string(),
            },
            redis: RedisConfig {
                enabled: false,
                host: "localhost".to_string(),
                port: 6379,
                database: 0,
                pool: PoolConfig {
                    max_size: 16,
                    timeout_seconds: 5,
                    create_timeout_seconds: 5,
                    recycle_timeout_seconds: 5,
                },
                embedding_ttl_seconds: 86400 * 7,
            },
            retry: RetryConfig {
                max_attempts: 5,
                initial_delay_ms: 200,
                max_delay_ms: 30_000,
                backoff_base: 2.0,
                jitter_factor: 0.2,
            },
            sessions: SessionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Config {
        let mut cfg = Config::default();
        cfg.groq.api_key = "test-key".to_string();
        cfg
    }

    #[test]
    fn test_default_config_validates_with_key() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_placeholder_key_is_rejected() {
        let mut cfg = valid();
        cfg.groq.api_key = "PLACEHOLDER_GROQ_API_KEY".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_baseline_out_of_range_is_rejected() {
        let mut cfg = valid();
        cfg.router.baseline_score = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_path_reads_yaml() {
        let mut yaml = serde_yaml::to_string(&valid()).unwrap();
        yaml = yaml.replace("baseline_score: 0.35", "baseline_score: 0.5");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let cfg = Config::from_path(file.path());
        assert!((cfg.router.baseline_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_from_path_falls_back_on_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"server: [not, a, map").unwrap();

        let cfg = Config::from_path(file.path());
        assert!((cfg.router.baseline_score - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_sessions_section_is_optional() {
        let mut value = serde_yaml::to_value(valid()).unwrap();
        value.as_mapping_mut().unwrap().remove("sessions");
        let cfg: Config = serde_yaml::from_value(value).unwrap();
        assert_eq!(cfg.sessions.max_sessions, 1000);
        assert_eq!(cfg.sessions.idle_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_redis_url_without_password() {
        let cfg = valid();
        if env::var("REDIS_PASSWORD").is_err() {
            assert_eq!(cfg.get_redis_url(), "redis://localhost:6379/0");
        }
    }
}
