//! Error types for harness operations.
//!
//! Every failure the harness can surface is a [`HarnessError`]. Variants are
//! grouped into an [`ErrorKind`] so test code can tell an infrastructure
//! problem apart from a protocol step that failed or a poll that timed out.

use std::path::PathBuf;
use std::time::Duration;

/// Numeric error codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HarnessErrorCode {
    /// Node or daemon binary could not be located
    BinaryNotFound = 1000,
    /// Spawning a process failed
    ProcessSpawn = 1001,
    /// Process exited before it became ready
    ProcessExited = 1002,
    /// Readiness marker never showed up in the log
    ReadinessTimeout = 1003,
    /// No usable port could be bound
    PortUnavailable = 1004,
    /// Persisted ledger config could not be parsed
    CorruptConfig = 1005,
    /// Persisted ledger config points at a dead process
    StaleLedger = 1006,
    /// Lock retries exhausted
    LockExhausted = 2000,
    /// Expected action never became available
    ActionNotFound = 3000,
    /// Expected event never reported by the daemon
    EventNotObserved = 3001,
    /// Generic bounded wait elapsed
    Timeout = 3002,
    /// Daemon answered with a non-success status
    Daemon = 4000,
    /// Wallet failed while executing a ledger action
    Wallet = 4001,
    /// On-chain transaction was mined but failed
    TransactionFailed = 4002,
    /// JSON-RPC error object returned by a node
    Rpc = 4003,
    /// Network/transport failure
    Transport = 4004,
    /// Connection could not be established
    ConnectionFailed = 4005,
    /// Balance assertion failed
    BalanceMismatch = 5000,
    /// Operation requires a swap but none is active
    NoActiveSwap = 6000,
    /// Invalid data or arguments
    InvalidData = 6001,
    /// Asset is not supported by a wallet
    UnsupportedAsset = 6002,
    /// Actor has no wallet for the ledger
    MissingWallet = 6003,
    /// No expected-event entry for a role/action/protocol combination
    NoEventMapping = 6004,
    /// Filesystem error
    Io = 7000,
    /// (De)serialization error
    Serialization = 7001,
    /// TOML (de)serialization error
    Toml = 7002,
}

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Binaries, processes, ports, persisted configs. Fatal for a suite.
    Infrastructure,
    /// Lock retries exhausted. Fatal for a suite.
    LockContention,
    /// The daemon or a ledger rejected a protocol step.
    ProtocolAction,
    /// An action or event never showed up in time.
    PollingTimeout,
    /// A balance did not evolve as expected.
    BalanceMismatch,
    /// The harness was used incorrectly.
    Usage,
}

/// Comprehensive error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Binary was not found on PATH and no override was set.
    #[error("{program} binary not found (set {env_var} to override)")]
    BinaryNotFound {
        /// Program name, e.g. "bitcoind"
        program: String,
        /// Environment variable that overrides the lookup
        env_var: String,
    },

    /// Spawning a process failed.
    #[error("failed to spawn {program}: {reason}")]
    ProcessSpawn {
        /// Program name
        program: String,
        /// Underlying error message
        reason: String,
    },

    /// Process exited before its readiness marker appeared.
    #[error("{program} exited with {status} before becoming ready; log tail:\n{log_tail}")]
    ProcessExited {
        /// Program name
        program: String,
        /// Exit status as reported by the OS
        status: String,
        /// Last lines of the process log
        log_tail: String,
    },

    /// Readiness marker did not appear within the timeout.
    #[error("{program} did not log '{marker}' within {timeout:?}")]
    ReadinessTimeout {
        /// Program name
        program: String,
        /// Marker string we waited for
        marker: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// No port could be bound.
    #[error("no port available: {0}")]
    PortUnavailable(String),

    /// Persisted ledger config exists but is unreadable.
    #[error("corrupt ledger config at {path}: {reason}")]
    CorruptConfig {
        /// Config file path
        path: PathBuf,
        /// Parse failure
        reason: String,
    },

    /// Persisted ledger config references a process that is gone.
    #[error("ledger config at {path} references pid {pid} which is not running")]
    StaleLedger {
        /// Config file path
        path: PathBuf,
        /// Recorded pid
        pid: u32,
    },

    /// Lock could not be acquired within the retry budget.
    #[error("failed to acquire lock {path} after {attempts} attempts")]
    LockExhausted {
        /// Lock file path
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
    },

    /// Expected action never became available.
    #[error("action '{action}' not found within {timeout:?}")]
    ActionNotFound {
        /// Action name
        action: String,
        /// Discovery timeout
        timeout: Duration,
    },

    /// Expected event never reported by the daemon.
    #[error("event '{event}' expected but never found within {timeout:?}")]
    EventNotObserved {
        /// Event name
        event: String,
        /// Acknowledgement timeout
        timeout: Duration,
    },

    /// A bounded wait elapsed.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What we were waiting for
        operation: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Daemon returned a non-success status.
    #[error("daemon request {request} failed ({status}): {body}")]
    Daemon {
        /// Method and path
        request: String,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Wallet failed while executing a ledger action.
    #[error("wallet failed to perform {attempted_action} with {params}: {source}")]
    Wallet {
        /// Ledger action or siren action name
        attempted_action: String,
        /// Parameters of the call, rendered as JSON
        params: String,
        /// Underlying error
        #[source]
        source: Box<HarnessError>,
    },

    /// Transaction was mined but reverted.
    #[error("transaction {tx_id} failed")]
    TransactionFailed {
        /// Transaction hash
        tx_id: String,
    },

    /// Node returned a JSON-RPC error object.
    #[error("rpc {method} failed ({code}): {message}")]
    Rpc {
        /// RPC method
        method: String,
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },

    /// Transport/network layer error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Connection could not be established.
    #[error("connection to {target} failed: {reason}")]
    ConnectionFailed {
        /// Target URL
        target: String,
        /// Underlying error message
        reason: String,
    },

    /// Balance did not match the expectation.
    #[error("{asset} balance expected to be {comparison} {expected} but was {actual}")]
    BalanceMismatch {
        /// Asset key
        asset: String,
        /// "at least" or "at most"
        comparison: &'static str,
        /// Expected bound
        expected: u128,
        /// Observed balance
        actual: u128,
    },

    /// Operation needs an active swap.
    #[error("cannot {operation}: no active swap")]
    NoActiveSwap {
        /// Operation that was attempted
        operation: String,
    },

    /// Invalid data provided or received.
    #[error("invalid {field}: {reason}")]
    InvalidData {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Asset cannot be handled by the wallet.
    #[error("{wallet} wallet cannot handle asset {asset}")]
    UnsupportedAsset {
        /// Wallet ledger
        wallet: String,
        /// Asset description
        asset: String,
    },

    /// Actor has no wallet for the ledger.
    #[error("no {0} wallet configured")]
    MissingWallet(String),

    /// No expected event defined for the combination.
    #[error("no expected event defined for {role} {action} on {alpha}/{beta}")]
    NoEventMapping {
        /// Role of the acting party
        role: String,
        /// Action kind
        action: String,
        /// Alpha protocol
        alpha: String,
        /// Beta protocol
        beta: String,
    },

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// TOML config could not be written or read.
    #[error("toml error: {0}")]
    Toml(String),
}

impl HarnessError {
    /// Get the numeric error code.
    pub fn code(&self) -> HarnessErrorCode {
        match self {
            Self::BinaryNotFound { .. } => HarnessErrorCode::BinaryNotFound,
            Self::ProcessSpawn { .. } => HarnessErrorCode::ProcessSpawn,
            Self::ProcessExited { .. } => HarnessErrorCode::ProcessExited,
            Self::ReadinessTimeout { .. } => HarnessErrorCode::ReadinessTimeout,
            Self::PortUnavailable(_) => HarnessErrorCode::PortUnavailable,
            Self::CorruptConfig { .. } => HarnessErrorCode::CorruptConfig,
            Self::StaleLedger { .. } => HarnessErrorCode::StaleLedger,
            Self::LockExhausted { .. } => HarnessErrorCode::LockExhausted,
            Self::ActionNotFound { .. } => HarnessErrorCode::ActionNotFound,
            Self::EventNotObserved { .. } => HarnessErrorCode::EventNotObserved,
            Self::Timeout { .. } => HarnessErrorCode::Timeout,
            Self::Daemon { .. } => HarnessErrorCode::Daemon,
            Self::Wallet { .. } => HarnessErrorCode::Wallet,
            Self::TransactionFailed { .. } => HarnessErrorCode::TransactionFailed,
            Self::Rpc { .. } => HarnessErrorCode::Rpc,
            Self::Transport(_) => HarnessErrorCode::Transport,
            Self::ConnectionFailed { .. } => HarnessErrorCode::ConnectionFailed,
            Self::BalanceMismatch { .. } => HarnessErrorCode::BalanceMismatch,
            Self::NoActiveSwap { .. } => HarnessErrorCode::NoActiveSwap,
            Self::InvalidData { .. } => HarnessErrorCode::InvalidData,
            Self::UnsupportedAsset { .. } => HarnessErrorCode::UnsupportedAsset,
            Self::MissingWallet(_) => HarnessErrorCode::MissingWallet,
            Self::NoEventMapping { .. } => HarnessErrorCode::NoEventMapping,
            Self::Io(_) => HarnessErrorCode::Io,
            Self::Serialization(_) => HarnessErrorCode::Serialization,
            Self::Toml(_) => HarnessErrorCode::Toml,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BinaryNotFound { .. }
            | Self::ProcessSpawn { .. }
            | Self::ProcessExited { .. }
            | Self::ReadinessTimeout { .. }
            | Self::PortUnavailable(_)
            | Self::CorruptConfig { .. }
            | Self::StaleLedger { .. }
            | Self::Toml(_)
            | Self::Io(_) => ErrorKind::Infrastructure,
            Self::LockExhausted { .. } => ErrorKind::LockContention,
            Self::ActionNotFound { .. } | Self::EventNotObserved { .. } | Self::Timeout { .. } => {
                ErrorKind::PollingTimeout
            }
            Self::Daemon { .. }
            | Self::Wallet { .. }
            | Self::TransactionFailed { .. }
            | Self::Rpc { .. }
            | Self::Transport(_)
            | Self::ConnectionFailed { .. }
            | Self::Serialization(_) => ErrorKind::ProtocolAction,
            Self::BalanceMismatch { .. } => ErrorKind::BalanceMismatch,
            Self::NoActiveSwap { .. }
            | Self::InvalidData { .. }
            | Self::UnsupportedAsset { .. }
            | Self::MissingWallet(_)
            | Self::NoEventMapping { .. } => ErrorKind::Usage,
        }
    }

    /// Returns true if the error is fatal for the whole suite.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Infrastructure | ErrorKind::LockContention
        )
    }

    /// Create a transport error from any error type.
    pub fn transport<E: std::error::Error>(err: E) -> Self {
        Self::Transport(err.to_string())
    }

    /// Create an invalid data error.
    pub fn invalid_data(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error raised while a wallet performed `attempted_action`.
    pub fn wallet(
        attempted_action: impl Into<String>,
        params: serde_json::Value,
        source: HarnessError,
    ) -> Self {
        Self::Wallet {
            attempted_action: attempted_action.into(),
            params: params.to_string(),
            source: Box::new(source),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for HarnessError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

impl From<toml::de::Error> for HarnessError {
    fn from(err: toml::de::Error) -> Self {
        Self::Toml(err.to_string())
    }
}

/// Convenience alias for harness results.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polling_errors_name_their_phase() {
        let action = HarnessError::ActionNotFound {
            action: "fund".to_string(),
            timeout: Duration::from_secs(20),
        };
        let event = HarnessError::EventNotObserved {
            event: "hbit_funded".to_string(),
            timeout: Duration::from_secs(30),
        };

        assert!(action.to_string().contains("action 'fund' not found"));
        assert!(event
            .to_string()
            .contains("event 'hbit_funded' expected but never found"));
        assert_ne!(action.code(), event.code());
        assert_eq!(action.kind(), ErrorKind::PollingTimeout);
        assert_eq!(event.kind(), ErrorKind::PollingTimeout);
    }

    #[test]
    fn test_lock_exhaustion_is_distinct_from_infrastructure() {
        let err = HarnessError::LockExhausted {
            path: PathBuf::from("/tmp/locks/bitcoind/.lock"),
            attempts: 11,
        };
        assert_eq!(err.kind(), ErrorKind::LockContention);
        assert!(err.is_fatal());

        let err = HarnessError::BinaryNotFound {
            program: "geth".to_string(),
            env_var: "GETH_BIN".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.to_string().contains("GETH_BIN"));
    }

    #[test]
    fn test_balance_mismatch_carries_both_values() {
        let err = HarnessError::BalanceMismatch {
            asset: "bitcoin:bitcoin".to_string(),
            comparison: "at least",
            expected: 99_900_000,
            actual: 42,
        };
        let message = err.to_string();
        assert!(message.contains("99900000"));
        assert!(message.contains("42"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_wallet_error_keeps_source() {
        let err = HarnessError::wallet(
            "bitcoin-send-amount-to-address",
            serde_json::json!({ "to": "bcrt1q...", "sats": 100 }),
            HarnessError::TransactionFailed {
                tx_id: "abc".to_string(),
            },
        );
        assert_eq!(err.code(), HarnessErrorCode::Wallet);
        assert!(err.to_string().contains("bitcoin-send-amount-to-address"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
