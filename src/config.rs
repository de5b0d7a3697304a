use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub mission: MissionConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub gemini_api_key: String,
    pub default_provider: String,
    pub default_model: String,
    pub api_base: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Optional pacing toward the provider, in requests per second
    pub requests_per_second: Option<u32>,
}

/// Engine tuning. Defaults follow the deep research profile.
#[derive(Debug, Clone, Deserialize)]
pub struct MissionConfig {
    pub default_quality_threshold: f64,
    pub default_target_count: usize,
    pub max_duration_secs: u64,
    pub checkpoint_interval_secs: u64,
    pub max_in_flight_per_mission: usize,
    pub global_max_in_flight: Option<usize>,
    pub correction_max_iterations: u32,
    pub discovery_queries: usize,
    pub comparison_pairs: usize,
    pub validation_sample: usize,
    pub heartbeat_interval_secs: u64,
    pub retention_hours: u64,
    pub default_export_formats: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub export_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: Option<PathBuf>,
    pub default_filter: String,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            default_quality_threshold: 0.7,
            default_target_count: 15,
            max_duration_secs: 60 * 60,
            checkpoint_interval_secs: 15 * 60,
            max_in_flight_per_mission: 4,
            global_max_in_flight: None,
            correction_max_iterations: 3,
            discovery_queries: 5,
            comparison_pairs: 10,
            validation_sample: 10,
            heartbeat_interval_secs: 15,
            retention_hours: 24,
            default_export_formats: vec!["json".to_string(), "md".to_string()],
        }
    }
}

impl MissionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            default_provider: "google".to_string(),
            default_model: "gemini-2.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 500,
            requests_per_second: None,
        }
    }
}

fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chronicle")
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => Ok(Some(raw.trim().parse()?)),
        _ => Ok(None),
    }
}

fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mission_defaults = MissionConfig::default();
        let llm_defaults = LLMConfig::default();
        let data_root = default_data_root();

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join("missions"));
        let export_dir = env::var("EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join("exports"));

        Ok(Self {
            server: ServerConfig {
                port: var_or("PORT", "8000").parse()?,
                host: var_or("HOST", "0.0.0.0"),
                cors_allowed_origins: list(&var_or(
                    "ALLOWED_ORIGINS",
                    "http://localhost:3000,http://localhost:5173",
                )),
            },
            llm: LLMConfig {
                gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
                default_provider: var_or("LLM_PROVIDER", &llm_defaults.default_provider),
                default_model: var_or("LLM_MODEL", &llm_defaults.default_model),
                api_base: var_or("GEMINI_API_BASE", &llm_defaults.api_base),
                request_timeout_secs: var_or("LLM_TIMEOUT_SECS", "60").parse()?,
                max_retries: var_or("LLM_MAX_RETRIES", "3").parse()?,
                retry_base_delay_ms: var_or("LLM_RETRY_BASE_DELAY_MS", "500").parse()?,
                requests_per_second: optional_parse("LLM_REQUESTS_PER_SECOND")?,
            },
            mission: MissionConfig {
                default_quality_threshold: var_or("QUALITY_THRESHOLD", "0.7").parse()?,
                default_target_count: var_or("TARGET_ENTITIES", "15").parse()?,
                max_duration_secs: var_or("MAX_MISSION_DURATION_SECS", "3600").parse()?,
                checkpoint_interval_secs: var_or("CHECKPOINT_INTERVAL_SECS", "900").parse()?,
                max_in_flight_per_mission: var_or("MAX_IN_FLIGHT_PER_MISSION", "4").parse()?,
                global_max_in_flight: optional_parse("GLOBAL_MAX_IN_FLIGHT")?,
                correction_max_iterations: var_or("MAX_CORRECTION_ITERATIONS", "3").parse()?,
                discovery_queries: var_or("DISCOVERY_QUERIES", "5").parse()?,
                comparison_pairs: var_or("COMPARISON_PAIRS", "10").parse()?,
                validation_sample: var_or("VALIDATION_SAMPLE", "10").parse()?,
                heartbeat_interval_secs: var_or("HEARTBEAT_INTERVAL_SECS", "15").parse()?,
                retention_hours: var_or("MISSION_RETENTION_HOURS", "24").parse()?,
                default_export_formats: env::var("EXPORT_FORMATS")
                    .map(|raw| list(&raw))
                    .unwrap_or(mission_defaults.default_export_formats),
            },
            storage: StorageConfig { data_dir, export_dir },
            logging: LoggingConfig {
                log_dir: env::var("LOG_DIR").ok().map(PathBuf::from),
                default_filter: var_or(
                    "LOG_FILTER",
                    "chronicle=debug,tower_http=debug,axum=debug",
                ),
            },
        })
    }
}
