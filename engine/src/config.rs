//! Engine configuration management
//!
//! All runtime configuration is environment-driven. The engine refuses to
//! bind anything but a loopback address.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Error raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("Refusing to bind non-loopback host {host}")]
    NonLoopbackHost { host: String },
}

/// Engine operating mode.
///
/// Production mode refuses mock STT backends and verifies that the STT and
/// LLM backends are actually loadable at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    Prod,
    Dev,
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::Prod
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMode::Prod => write!(f, "prod"),
            EngineMode::Dev => write!(f, "dev"),
        }
    }
}

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Network settings
    pub server: ServerConfig,

    /// Session pipeline tunables
    pub session: SessionTunables,

    /// Local LLM runtime settings
    pub llm: LlmConfig,

    /// STT backend model locations
    pub stt: SttConfig,

    /// Low-content guard thresholds
    pub guard: GuardConfig,

    /// Output naming options
    pub output: OutputConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host; must resolve to a loopback address
    pub host: IpAddr,

    /// Bind port
    pub port: u16,

    /// Operating mode
    pub mode: EngineMode,

    /// Shared auth token; empty disables authentication
    pub auth_token: String,

    /// Log level filter (debug|info|warn|error)
    pub log_level: String,
}

/// Per-session pipeline tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTunables {
    /// Transcript span that seals a chunk for MAP
    pub chunk_duration_seconds: f64,

    /// Pending segments + unmapped chunks beyond which pushes report 429
    pub max_queue_depth: usize,

    /// Soft deadline for decode + STT inside one /audio_chunk call
    pub push_deadline: Duration,

    /// How long /stop_session waits for the MAP worker to drain
    pub stop_drain_timeout: Duration,

    /// Maximum concurrently active sessions
    pub max_concurrent_sessions: usize,
}

/// Local LLM runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,

    /// Concurrent LLM calls across all sessions
    pub max_concurrent_calls: usize,

    /// Per-request timeout
    pub request_timeout: Duration,
}

/// STT model artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Path to the ggml whisper model file
    pub whisper_model_path: String,

    /// Path to the parakeet model directory
    pub parakeet_model_dir: String,
}

/// Low-content guard thresholds (heuristic, overridable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Transcripts below this word count are candidates for the guard
    pub min_words: usize,

    /// Fraction of words that must be filler for the guard to trip
    pub filler_dominance: f64,
}

/// Output naming options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Write per-meeting folders named from extracted company/contact
    pub meeting_folders: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 8756,
                mode: EngineMode::Prod,
                auth_token: String::new(),
                log_level: "info".to_string(),
            },
            session: SessionTunables {
                chunk_duration_seconds: 60.0,
                max_queue_depth: 64,
                push_deadline: Duration::from_secs(5),
                stop_drain_timeout: Duration::from_secs(120),
                max_concurrent_sessions: 1,
            },
            llm: LlmConfig {
                base_url: "http://127.0.0.1:11434".to_string(),
                max_concurrent_calls: 2,
                request_timeout: Duration::from_secs(180),
            },
            stt: SttConfig {
                whisper_model_path: "models/ggml-base.en.bin".to_string(),
                parakeet_model_dir: "models/parakeet".to_string(),
            },
            guard: GuardConfig {
                min_words: 30,
                filler_dominance: 0.8,
            },
            output: OutputConfig {
                meeting_folders: false,
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = read_var("ENGINE_HOST") {
            config.server.host = host.parse::<IpAddr>().map_err(|e| ConfigError::InvalidValue {
                var: "ENGINE_HOST".to_string(),
                message: e.to_string(),
            })?;
        }
        if let Some(port) = read_var("ENGINE_PORT") {
            config.server.port = port.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                var: "ENGINE_PORT".to_string(),
                message: e.to_string(),
            })?;
        }
        if let Some(level) = read_var("ENGINE_LOG_LEVEL") {
            match level.as_str() {
                "debug" | "info" | "warn" | "error" => config.server.log_level = level,
                other => {
                    return Err(ConfigError::InvalidValue {
                        var: "ENGINE_LOG_LEVEL".to_string(),
                        message: format!("unknown level {other:?}"),
                    })
                }
            }
        }
        if let Some(mode) = read_var("ENGINE_MODE") {
            config.server.mode = match mode.as_str() {
                "prod" => EngineMode::Prod,
                "dev" => EngineMode::Dev,
                other => {
                    return Err(ConfigError::InvalidValue {
                        var: "ENGINE_MODE".to_string(),
                        message: format!("expected prod or dev, got {other:?}"),
                    })
                }
            };
        }
        if let Some(token) = read_var("ENGINE_AUTH_TOKEN") {
            config.server.auth_token = token;
        }

        if let Some(secs) = parse_var::<f64>("ENGINE_CHUNK_SECONDS")? {
            if secs <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    var: "ENGINE_CHUNK_SECONDS".to_string(),
                    message: "must be positive".to_string(),
                });
            }
            config.session.chunk_duration_seconds = secs;
        }
        if let Some(depth) = parse_var::<usize>("ENGINE_MAX_QUEUE_DEPTH")? {
            config.session.max_queue_depth = depth.max(1);
        }
        if let Some(secs) = parse_var::<u64>("ENGINE_STOP_DRAIN_TIMEOUT_SECS")? {
            config.session.stop_drain_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = parse_var::<usize>("ENGINE_MAX_SESSIONS")? {
            config.session.max_concurrent_sessions = n.max(1);
        }

        if let Some(url) = read_var("ENGINE_OLLAMA_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(n) = parse_var::<usize>("ENGINE_MAX_CONCURRENT_LLM_CALLS")? {
            config.llm.max_concurrent_calls = n.max(1);
        }

        if let Some(path) = read_var("ENGINE_WHISPER_MODEL") {
            config.stt.whisper_model_path = path;
        }
        if let Some(path) = read_var("ENGINE_PARAKEET_MODEL") {
            config.stt.parakeet_model_dir = path;
        }

        if let Some(words) = parse_var::<usize>("ENGINE_GUARD_MIN_WORDS")? {
            config.guard.min_words = words;
        }
        if let Some(frac) = parse_var::<f64>("ENGINE_GUARD_FILLER_DOMINANCE")? {
            config.guard.filler_dominance = frac.clamp(0.0, 1.0);
        }

        if let Some(flag) = read_var("ENGINE_MEETING_FOLDERS") {
            config.output.meeting_folders = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that cannot be expressed in the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.host.is_loopback() {
            return Err(ConfigError::NonLoopbackHost {
                host: self.server.host.to_string(),
            });
        }
        Ok(())
    }

    /// Whether the engine requires the `X-Engine-Token` header.
    pub fn auth_enabled(&self) -> bool {
        !self.server.auth_token.is_empty()
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match read_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                var: name.to_string(),
                message: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.server.port, 8756);
        assert_eq!(config.server.mode, EngineMode::Prod);
        assert_eq!(config.session.chunk_duration_seconds, 60.0);
        assert_eq!(config.session.max_queue_depth, 64);
        assert_eq!(config.session.max_concurrent_sessions, 1);
        assert_eq!(config.llm.max_concurrent_calls, 2);
        assert!(!config.auth_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_loopback_enforcement() {
        let mut config = EngineConfig::default();
        config.server.host = "0.0.0.0".parse().unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonLoopbackHost { .. })
        ));

        config.server.host = "127.0.0.1".parse().unwrap();
        assert!(config.validate().is_ok());

        config.server.host = "::1".parse().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_enabled_for_nonempty_token() {
        let mut config = EngineConfig::default();
        assert!(!config.auth_enabled());
        config.server.auth_token = "secret".to_string();
        assert!(config.auth_enabled());
    }
}
