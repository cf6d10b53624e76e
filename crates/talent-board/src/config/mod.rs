use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub board: BoardConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let show_targets = env::var("APP_LOG_TARGETS")
            .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                show_targets,
            },
            board: BoardConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub show_targets: bool,
}

/// Paging, automation, and fallback settings for the candidate board.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    /// Rows per bulk-load query. Must not exceed the store's per-query cap.
    pub active_page_size: usize,
    pub terminal_page_size: usize,
    pub settle_delay: Duration,
    pub score_threshold: f32,
    pub seed_csv: Option<PathBuf>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            active_page_size: 1000,
            terminal_page_size: 50,
            settle_delay: Duration::from_millis(1500),
            score_threshold: 6.5,
            seed_csv: None,
        }
    }
}

impl BoardConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let active_page_size =
            page_size_var("BOARD_ACTIVE_PAGE_SIZE", defaults.active_page_size)?;
        let terminal_page_size =
            page_size_var("BOARD_TERMINAL_PAGE_SIZE", defaults.terminal_page_size)?;

        let settle_delay = match env::var("BOARD_SETTLE_DELAY_MS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidSettleDelay)?,
            Err(_) => defaults.settle_delay,
        };

        let score_threshold = match env::var("BOARD_SCORE_THRESHOLD") {
            Ok(raw) => raw
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|value| (0.0..=10.0).contains(value))
                .ok_or(ConfigError::InvalidScoreThreshold)?,
            Err(_) => defaults.score_threshold,
        };

        let seed_csv = env::var("BOARD_SEED_CSV")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            active_page_size,
            terminal_page_size,
            settle_delay,
            score_threshold,
            seed_csv,
        })
    }
}

fn page_size_var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or(ConfigError::InvalidPageSize { variable: name }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidPageSize { variable: &'static str },
    InvalidSettleDelay,
    InvalidScoreThreshold,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidPageSize { variable } => {
                write!(f, "{variable} must be a positive integer")
            }
            ConfigError::InvalidSettleDelay => {
                write!(f, "BOARD_SETTLE_DELAY_MS must be a whole number of milliseconds")
            }
            ConfigError::InvalidScoreThreshold => {
                write!(f, "BOARD_SCORE_THRESHOLD must be a number between 0 and 10")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}
