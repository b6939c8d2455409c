//! Error types for the capability test runner
//!
//! Every error belongs to one class of the run's error taxonomy (see
//! [`ErrorClass`]). The executor uses the class, not the variant, to decide
//! how a test outcome is recorded, so new variants only need a class.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the capability test runner
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid protocol descriptor: {0}")]
    Descriptor(String),

    #[error("Duplicate test '{0}'")]
    DuplicateTest(String),

    #[error("Unregistered test '{0}': no test implementation with this id")]
    UnregisteredTest(String),

    #[error("Test '{0}' does not list any compositors")]
    EmptyCompositors(String),

    // === Fixture Resolution Errors ===
    #[error("Unknown fixture {0}")]
    UnknownFixture(String),

    #[error("Fixture dependency cycle: {}", .0.join(" -> "))]
    FixtureCycle(Vec<String>),

    #[error("Fixture '{0}' is registered twice")]
    DuplicateFixture(String),

    #[error("Fixture '{name}' is not a {expected}")]
    FixtureMismatch { name: String, expected: &'static str },

    // === Wire Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Protocol error: message references unknown object {0}")]
    UnknownObject(u32),

    #[error("Protocol error: {interface} has no message with opcode {opcode}")]
    UnknownOpcode { interface: String, opcode: u16 },

    #[error("Compositor reported error on {interface}@{object} (code {code}): {message}")]
    CompositorError {
        object: u32,
        interface: String,
        code: u32,
        message: String,
    },

    #[error("Protocol session terminated earlier: {0}")]
    SessionClosed(String),

    // === Connection Errors ===
    #[error("Failed to connect to {endpoint}: {source}")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("DBus error: {0}")]
    Dbus(#[from] zbus::Error),

    // === Monitor Errors ===
    #[error("Monitor rejected '{command}': {reply}")]
    CommandRejected { command: String, reply: String },

    // === Test Errors ===
    #[error("{0}")]
    TestAssertion(String),

    #[error("Compositor does not advertise {0}")]
    GlobalMissing(String),

    #[error("Skipped: {0}")]
    Skipped(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy used to classify test outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or ambiguous registry/descriptor; aborts the run before execution
    Config,
    /// Unknown fixture name or dependency cycle; fatal for the affected test
    FixtureResolution,
    /// Malformed or out-of-sequence wire message; fatal for the owning session
    Protocol,
    /// Transport unreachable, closed or timed out
    Connection,
    /// The monitor answered with an error reply; the caller may retry
    CommandRejected,
    /// Test logic failure
    Assertion,
    /// The test declined to run
    Skip,
    /// Anything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_)
            | Error::ConfigParse(_)
            | Error::Descriptor(_)
            | Error::DuplicateTest(_)
            | Error::UnregisteredTest(_)
            | Error::EmptyCompositors(_)
            | Error::FileRead { .. } => ErrorClass::Config,

            Error::UnknownFixture(_)
            | Error::FixtureCycle(_)
            | Error::DuplicateFixture(_)
            | Error::FixtureMismatch { .. } => ErrorClass::FixtureResolution,

            Error::Protocol(_)
            | Error::UnknownObject(_)
            | Error::UnknownOpcode { .. }
            | Error::CompositorError { .. }
            | Error::SessionClosed(_) => ErrorClass::Protocol,

            Error::ConnectionFailed { .. }
            | Error::ConnectionClosed(_)
            | Error::Timeout { .. }
            | Error::Dbus(_)
            | Error::Io(_) => ErrorClass::Connection,

            Error::CommandRejected { .. } => ErrorClass::CommandRejected,

            Error::TestAssertion(_) | Error::GlobalMissing(_) => ErrorClass::Assertion,

            Error::Skipped(_) => ErrorClass::Skip,

            Error::Json(_) | Error::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a timeout error for an operation
    pub fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after_ms: after.as_millis() as u64,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(endpoint: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Create a fixture type mismatch error
    pub fn fixture_mismatch(name: &str, expected: &'static str) -> Self {
        Self::FixtureMismatch {
            name: name.to_string(),
            expected,
        }
    }

    /// Whether this error means the protocol session can no longer be used
    pub fn is_fatal_for_session(&self) -> bool {
        self.class() == ErrorClass::Protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classes() {
        assert_eq!(Error::DuplicateTest("a".into()).class(), ErrorClass::Config);
        assert_eq!(
            Error::UnknownFixture("x".into()).class(),
            ErrorClass::FixtureResolution
        );
        assert_eq!(Error::UnknownObject(7).class(), ErrorClass::Protocol);
        assert_eq!(
            Error::timeout("monitor command", Duration::from_secs(2)).class(),
            ErrorClass::Connection
        );
        assert_eq!(
            Error::GlobalMissing("zwlr_virtual_pointer_manager_v1".into()).class(),
            ErrorClass::Assertion
        );
    }

    #[test]
    fn test_cycle_message() {
        let err = Error::FixtureCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Fixture dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_unknown_fixture_message() {
        let err = Error::UnknownFixture("clipboard".into());
        assert_eq!(err.to_string(), "Unknown fixture clipboard");
    }
}
