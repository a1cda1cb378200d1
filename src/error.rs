//! Error types for mailsift.

use std::path::PathBuf;

/// Top-level error type for a filtering run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule load error: {0}")]
    RuleLoad(#[from] RuleLoadError),

    #[error("Mail store error: {0}")]
    Store(#[from] StoreError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),
}

impl Error {
    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::RuleLoad(_) => 2,
            Self::Store(StoreError::Connectivity { .. } | StoreError::FolderSelect { .. }) => 3,
            Self::Store(_) | Self::Action(_) => 4,
        }
    }
}

/// Credentials and other configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read credentials file {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Could not parse credentials file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Could not find required credentials key '{0}'")]
    MissingKey(&'static str),

    #[error("Could not determine a home directory for the default configuration location")]
    NoHomeDirectory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed or missing rule collections. Always raised before any network activity.
#[derive(Debug, thiserror::Error)]
pub enum RuleLoadError {
    #[error("No rules file found. A default one has been written at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Could not parse rules file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Rules file has no 'rules' entry")]
    MissingRules,

    #[error("'rules' must be an array of rules")]
    RulesNotIterable,

    #[error("Rule {rule} {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Test for rule {rule} is not a valid test: {reason}")]
    InvalidTest { rule: String, reason: String },

    #[error("Action for rule {rule} is not a valid action: {reason}")]
    InvalidAction { rule: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the mail store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to connect to {host}: {reason}")]
    Connectivity { host: String, reason: String },

    #[error("Failed to select folder {folder}: {reason}")]
    FolderSelect { folder: String, reason: String },

    #[error("Server returned data inconsistent with message uid {uid}: {detail}")]
    ProtocolInconsistency { uid: u32, detail: String },

    #[error("Operation '{operation}' is not available to actions")]
    UnsupportedOperation { operation: String },

    #[error("No mailbox selected")]
    NoMailboxSelected,

    #[error("Mail store request failed: {0}")]
    Backend(String),
}

/// Failures raised while running a rule's actions.
///
/// These abort the remaining actions for the current message only.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Unable to create folder {folder}: {source}")]
    FolderCreate {
        folder: String,
        #[source]
        source: StoreError,
    },

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Result type alias for mailsift.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(Error::from(ConfigError::MissingKey("host")).exit_code(), 1);
        assert_eq!(Error::from(RuleLoadError::MissingRules).exit_code(), 2);
        assert_eq!(
            Error::from(StoreError::Connectivity {
                host: "imap.example.com".into(),
                reason: "refused".into(),
            })
            .exit_code(),
            3
        );
        assert_eq!(
            Error::from(StoreError::ProtocolInconsistency {
                uid: 7,
                detail: "empty".into(),
            })
            .exit_code(),
            4
        );
    }

    #[test]
    fn protocol_inconsistency_names_the_uid() {
        let err = StoreError::ProtocolInconsistency {
            uid: 4242,
            detail: "no data after 3 attempts".into(),
        };
        assert!(err.to_string().contains("4242"));
    }
}
