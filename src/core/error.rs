//! Error types and nft error translation

use crate::core::engine::Task;
use crate::elevation::ElevationError;
use std::fmt;
use thiserror::Error;

/// Failures reported by a kernel connection.
///
/// The engine treats these opaquely and wraps them in an [`Error`] that
/// names the table or set being worked on.
#[derive(Debug, Error)]
pub enum KernelError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// nftables command execution failed
    #[error("nftables error: {message}")]
    Nftables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Privilege escalation for the nft command failed
    #[error("Elevation error: {0}")]
    Elevation(#[from] ElevationError),

    /// The kernel model refused an operation (in-memory backend)
    #[error("{0}")]
    Rejected(String),
}

impl KernelError {
    /// Text to match against [`NftablesErrorPattern`].
    pub fn raw_message(&self) -> String {
        match self {
            KernelError::Nftables {
                message, stderr, ..
            } => stderr.clone().unwrap_or_else(|| message.clone()),
            other => other.to_string(),
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        NftablesErrorPattern::match_error(&self.raw_message()).transient
    }
}

/// Set-membership error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Text is not an IP literal
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// Parsed, but no address family could be determined
    #[error("unknown address family for '{0}'")]
    UnknownFamily(String),

    /// Configured table is absent from the ruleset
    #[error("table {table} does not exist")]
    TableNotFound { table: String },

    /// Listing tables or looking up the set failed
    #[error("could not look up set {set} in table {table}: {source}")]
    SetLookupFailed {
        set: String,
        table: String,
        #[source]
        source: KernelError,
    },

    /// The set was staged for creation but cannot be observed
    #[error("failed to create set {set}: {reason}")]
    SetCreateFailed { set: String, reason: String },

    /// Reading the committed element list failed
    #[error("failed to list elements of set {set}: {source}")]
    ElementListFailed {
        set: String,
        #[source]
        source: KernelError,
    },

    /// The operation could not be staged against the set
    #[error("cannot stage operation on set {set}: {reason}")]
    StageFailed { set: String, reason: String },

    /// The transaction was not applied
    #[error("failed to commit changes: {source}")]
    CommitFailed {
        #[source]
        source: KernelError,
    },

    /// Opening the kernel connection failed
    #[error("failed to connect to nftables: {source}")]
    ConnectFailed {
        #[source]
        source: KernelError,
    },

    #[error("unknown task '{0}'")]
    UnknownTask(String),
}

impl Error {
    /// The underlying kernel error, if any.
    pub fn kernel_error(&self) -> Option<&KernelError> {
        match self {
            Error::SetLookupFailed { source, .. }
            | Error::ElementListFailed { source, .. }
            | Error::CommitFailed { source }
            | Error::ConnectFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Errors caused by the request itself rather than the kernel or configuration.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidAddress(_) | Error::UnknownFamily(_) | Error::UnknownTask(_)
        )
    }
}

/// A failed reconciliation, with the task and set it was working on.
///
/// `label()` is the advisory outcome text; the presence of a `Failure` is
/// the only success/failure signal callers may rely on.
#[derive(Debug)]
pub struct Failure {
    pub task: Option<Task>,
    pub set: Option<String>,
    pub error: Error,
}

impl Failure {
    pub fn new(task: Option<Task>, set: Option<String>, error: Error) -> Self {
        Self { task, set, error }
    }

    /// Failure before any task or set is known (bad task, bad address).
    pub fn bare(error: Error) -> Self {
        Self::new(None, None, error)
    }

    /// Advisory outcome label.
    ///
    /// Failures at or after the idempotency check report `"error"`; anything
    /// that stopped earlier reports an empty label.
    pub fn label(&self) -> &'static str {
        match self.error {
            Error::ElementListFailed { .. }
            | Error::StageFailed { .. }
            | Error::CommitFailed { .. } => "error",
            _ => "",
        }
    }

    /// Whether the caller may retry the request unchanged.
    pub fn is_retryable(&self) -> bool {
        match &self.error {
            Error::SetCreateFailed { .. } => true,
            Error::TableNotFound { .. }
            | Error::InvalidAddress(_)
            | Error::UnknownFamily(_)
            | Error::UnknownTask(_)
            | Error::StageFailed { .. } => false,
            other => other.kernel_error().is_some_and(KernelError::is_transient),
        }
    }

    /// Operator hint for kernel-side failures.
    pub fn hint(&self) -> Option<ErrorTranslation> {
        self.error
            .kernel_error()
            .map(|e| NftablesErrorPattern::match_error(&e.raw_message()))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.task, &self.set) {
            (Some(task), Some(set)) => write!(f, "{task} on set {set}: {}", self.error),
            (Some(task), None) => write!(f, "{task}: {}", self.error),
            _ => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    /// Retrying later may succeed
    pub transient: bool,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            transient: false,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }
}

/// Database of nftables error patterns and their translations
pub struct NftablesErrorPattern;

impl NftablesErrorPattern {
    /// Matches an error message against known patterns and returns a translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify nftables sets")
                .with_suggestion("Run the service as root or grant it CAP_NET_ADMIN")
                .with_suggestion("Or configure an elevation method (sudo, run0)");
        }

        // Cache initialization failed (common with insufficient permissions)
        if lower.contains("cache initialization failed") {
            return ErrorTranslation::new(
                "Failed to initialize nftables cache - insufficient privileges",
            )
            .with_suggestion("The service needs CAP_NET_ADMIN to read the ruleset");
        }

        // Missing nftables; only the spawn and shell messages name the binary
        if lower.contains("command not found")
            || lower.contains("nft: not found")
            || lower.contains("failed to spawn nft")
        {
            return ErrorTranslation::new("nftables is not installed or not found in PATH")
                .with_suggestion("Install nftables: sudo apt install nftables  (Debian/Ubuntu)")
                .with_suggestion("Or set nft_command to the full path of the nft binary");
        }

        // Element type mismatch
        if lower.contains("datatype mismatch") {
            return ErrorTranslation::new("Address family does not match the set's element type")
                .with_suggestion("Check that '<prefix>4' sets hold ipv4_addr and '<prefix>6' sets hold ipv6_addr");
        }

        // Object vanished between read and commit
        if lower.contains("no such file or directory") || lower.contains("does not exist") {
            return ErrorTranslation::new("Set or element changed while the request was in flight")
                .with_suggestion("Another writer modified the set; retry the request")
                .transient();
        }

        // Resource busy
        if lower.contains("resource busy") || lower.contains("device or resource busy") {
            return ErrorTranslation::new("Firewall resource is busy")
                .with_suggestion("Another process may be modifying nftables")
                .with_suggestion("Wait a moment and try again")
                .transient();
        }

        // Conflicting concurrent writers
        if lower.contains("conflict") || lower.contains("file exists") {
            return ErrorTranslation::new("Conflicting concurrent change to the set")
                .with_suggestion("Another request committed the same element first")
                .transient();
        }

        // Timeout errors
        if lower.contains("timeout") || lower.contains("timed out") {
            return ErrorTranslation::new("Operation timed out")
                .with_suggestion("Check system load and try again")
                .transient();
        }

        // Netlink errors
        if lower.contains("netlink") {
            return ErrorTranslation::new("Communication error with kernel netlink interface")
                .with_suggestion("Check kernel modules: lsmod | grep nf_tables")
                .with_suggestion("Load nf_tables module: sudo modprobe nf_tables");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Verify nftables is working: sudo nft list ruleset")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_failure(stderr: &str) -> Failure {
        Failure::new(
            Some(Task::Add),
            Some("myset4".to_string()),
            Error::CommitFailed {
                source: KernelError::Nftables {
                    message: stderr.to_string(),
                    stderr: Some(stderr.to_string()),
                    exit_code: Some(1),
                },
            },
        )
    }

    #[test]
    fn test_permission_error_translation() {
        let translation = NftablesErrorPattern::match_error("Error: Operation not permitted");
        assert!(translation.user_message.contains("permissions"));
        assert!(!translation.transient);
    }

    #[test]
    fn test_missing_nft_binary() {
        let translation = NftablesErrorPattern::match_error("sh: nft: command not found");
        assert!(translation.user_message.contains("not installed"));
    }

    #[test]
    fn test_vanished_element_is_transient() {
        let translation = NftablesErrorPattern::match_error(
            "Error: Could not process rule: No such file or directory",
        );
        assert!(translation.transient);
    }

    #[test]
    fn test_spawn_failure_is_missing_binary() {
        let translation = NftablesErrorPattern::match_error(
            "Failed to spawn nft: No such file or directory (os error 2)",
        );
        assert!(translation.user_message.contains("not installed"));
        assert!(!translation.transient);
    }

    #[test]
    fn test_vanished_element_in_set_named_like_binary() {
        let stderr = "Error: Could not process rule: No such file or directory\n\
                      delete element inet filter nftban4 { 192.0.2.1 }\n\
                      ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^";
        let failure = Failure::new(
            Some(Task::Delete),
            Some("nftban4".to_string()),
            Error::CommitFailed {
                source: KernelError::Nftables {
                    message: "Could not process rule: No such file or directory".to_string(),
                    stderr: Some(stderr.to_string()),
                    exit_code: Some(1),
                },
            },
        );

        assert!(failure.is_retryable());
        let hint = failure.hint().unwrap();
        assert!(hint.user_message.contains("changed while the request was in flight"));
    }

    #[test]
    fn test_datatype_mismatch() {
        let translation = NftablesErrorPattern::match_error("Error: datatype mismatch, expected IPv4 address");
        assert!(translation.user_message.contains("element type"));
        assert!(!translation.transient);
    }

    #[test]
    fn test_netlink_error() {
        let translation = NftablesErrorPattern::match_error("netlink error occurred");
        assert!(translation.user_message.contains("netlink"));
        assert!(
            translation
                .suggestions
                .iter()
                .any(|s| s.contains("modprobe"))
        );
    }

    #[test]
    fn test_commit_failure_label_is_error() {
        let failure = commit_failure("Error: Device or resource busy");
        assert_eq!(failure.label(), "error");
        assert!(failure.is_retryable());
        assert!(failure.to_string().starts_with("add on set myset4"));
    }

    #[test]
    fn test_pre_kernel_failures_have_empty_label() {
        let failure = Failure::bare(Error::UnknownTask("bogus".into()));
        assert_eq!(failure.label(), "");
        assert!(!failure.is_retryable());
        assert!(failure.hint().is_none());
    }

    #[test]
    fn test_table_not_found_is_permanent() {
        let failure = Failure::new(
            Some(Task::Flush),
            Some("myset4".into()),
            Error::TableNotFound {
                table: "filter".into(),
            },
        );
        assert!(!failure.is_retryable());
        assert_eq!(failure.label(), "");
    }

    #[test]
    fn test_set_create_failed_is_retryable() {
        let failure = Failure::new(
            Some(Task::Add),
            Some("myset6".into()),
            Error::SetCreateFailed {
                set: "myset6".into(),
                reason: "not visible after commit".into(),
            },
        );
        assert!(failure.is_retryable());
    }
}
