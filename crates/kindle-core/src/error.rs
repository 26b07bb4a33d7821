use std::fmt;

/// Static configuration rejected at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    InvalidPattern {
        profile: String,
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange {
                field,
                value,
                expected,
            } => write!(f, "config {field} = {value} is out of range (expected {expected})"),
            ConfigError::InvalidPattern { profile, message } => {
                write!(f, "type profile '{profile}' has an invalid pattern: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    /// The graph store failed a read or write. The tick was not applied.
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "{e}"),
            EngineError::Store(e) => write!(f, "graph store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::Store(e) => Some(e.as_ref()),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
