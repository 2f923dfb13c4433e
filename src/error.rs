use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConclaveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Bus disconnected: {0}")]
    BusDisconnected(String),

    #[error("Bus authentication failed: {0}")]
    BusAuth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl ConclaveError {
    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BusDisconnected(_) | Self::Timeout(_) => true,
            Self::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }

    /// Distinct exit codes per failure category so operators can tell a bad
    /// config from a dead broker without reading logs.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Toml(_) => 2,
            Self::Bus(_) | Self::BusDisconnected(_) | Self::BusAuth(_) | Self::Redis(_) => 3,
            _ => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConclaveError>;
