//! ASP-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Failure of a single external command invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command exited with {}: {output}", exit_label(.code))]
    ExitNonZero { code: Option<i32>, output: String },

    #[error("command timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("command could not be started: {details}")]
    SpawnFailure { details: String },

    #[error("command executor busy")]
    Busy,
}

impl CommandError {
    /// Exit status 127 from the shell means the tool itself was not found.
    #[must_use]
    pub fn is_tool_missing(&self) -> bool {
        match self {
            Self::ExitNonZero { code, .. } => *code == Some(127),
            Self::SpawnFailure { .. } => true,
            Self::Timeout { .. } | Self::Busy => false,
        }
    }
}

#[allow(clippy::ref_option)]
fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("status {c}"))
}

/// Top-level error type for the panel.
#[derive(Debug, Error)]
pub enum PanelError {
    #[error("[ASP-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ASP-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ASP-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ASP-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[ASP-1201] hardware initialization failed for {device}: {details}")]
    Hardware {
        device: &'static str,
        details: String,
    },

    #[error("[ASP-2001] favorites source unavailable at {path}: {source}")]
    Favorites {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ASP-2101] external command failed: {0}")]
    Command(#[from] CommandError),

    #[error("[ASP-2102] status output not recognized: {details}")]
    StatusParse { details: String },

    #[error("[ASP-2103] refusing to substitute unsafe argument {value:?} into command")]
    UnsafeArgument { value: String },

    #[error("[ASP-2201] frame draw failed: {details}")]
    Render { details: String },

    #[error("[ASP-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ASP-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ASP-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[ASP-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl PanelError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ASP-1001",
            Self::MissingConfig { .. } => "ASP-1002",
            Self::ConfigParse { .. } => "ASP-1003",
            Self::UnsupportedPlatform { .. } => "ASP-1101",
            Self::Hardware { .. } => "ASP-1201",
            Self::Favorites { .. } => "ASP-2001",
            Self::Command(_) => "ASP-2101",
            Self::StatusParse { .. } => "ASP-2102",
            Self::UnsafeArgument { .. } => "ASP-2103",
            Self::Render { .. } => "ASP-2201",
            Self::Serialization { .. } => "ASP-3001",
            Self::Io { .. } => "ASP-3002",
            Self::ChannelClosed { .. } => "ASP-3003",
            Self::Runtime { .. } => "ASP-3900",
        }
    }

    /// Whether retrying on a later tick might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Command(_)
                | Self::StatusParse { .. }
                | Self::Render { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for PanelError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for PanelError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<PanelError> {
        vec![
            PanelError::InvalidConfig {
                details: String::new(),
            },
            PanelError::MissingConfig {
                path: PathBuf::new(),
            },
            PanelError::ConfigParse {
                context: "",
                details: String::new(),
            },
            PanelError::UnsupportedPlatform {
                details: String::new(),
            },
            PanelError::Hardware {
                device: "button_a",
                details: String::new(),
            },
            PanelError::Favorites {
                path: PathBuf::new(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "test"),
            },
            PanelError::Command(CommandError::Busy),
            PanelError::StatusParse {
                details: String::new(),
            },
            PanelError::UnsafeArgument {
                value: String::new(),
            },
            PanelError::Render {
                details: String::new(),
            },
            PanelError::Serialization {
                context: "",
                details: String::new(),
            },
            PanelError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            PanelError::ChannelClosed { component: "" },
            PanelError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(PanelError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code {}: {msg}",
                err.code()
            );
        }
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(PanelError::Command(CommandError::Timeout {
            after: Duration::from_secs(1)
        })
        .is_retryable());
        assert!(PanelError::Render {
            details: "spi".to_string()
        }
        .is_retryable());

        assert!(!PanelError::Hardware {
            device: "display",
            details: String::new()
        }
        .is_retryable());
        assert!(!PanelError::InvalidConfig {
            details: String::new()
        }
        .is_retryable());
        assert!(!PanelError::UnsafeArgument {
            value: "1; rm".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn command_error_converts_with_code() {
        let err: PanelError = CommandError::SpawnFailure {
            details: "no such file".to_string(),
        }
        .into();
        assert_eq!(err.code(), "ASP-2101");
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn exit_non_zero_display_names_status() {
        let err = CommandError::ExitNonZero {
            code: Some(3),
            output: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "command exited with status 3: boom");

        let killed = CommandError::ExitNonZero {
            code: None,
            output: String::new(),
        };
        assert!(killed.to_string().contains("signal"));
    }

    #[test]
    fn tool_missing_detection() {
        assert!(
            CommandError::ExitNonZero {
                code: Some(127),
                output: String::new()
            }
            .is_tool_missing()
        );
        assert!(
            CommandError::SpawnFailure {
                details: String::new()
            }
            .is_tool_missing()
        );
        assert!(
            !CommandError::ExitNonZero {
                code: Some(1),
                output: String::new()
            }
            .is_tool_missing()
        );
        assert!(!CommandError::Busy.is_tool_missing());
    }

    #[test]
    fn io_convenience_constructor() {
        let err = PanelError::io(
            "/tmp/frame.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "ASP-3002");
        assert!(err.to_string().contains("/tmp/frame.json"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: PanelError = json_err.into();
        assert_eq!(err.code(), "ASP-3001");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: PanelError = toml_err.into();
        assert_eq!(err.code(), "ASP-1003");
    }
}
