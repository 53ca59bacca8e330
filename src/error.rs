//! Error types for mail-relay.
//!
//! Each collaborator gets its own error enum. Storage and mailer
//! failures are wrapped into `RelayError`, the only type that crosses
//! the handler boundary; `ConfigError` surfaces at startup, before the
//! pipeline exists. HTTP callers never see the detail — failures are
//! logged in full and surfaced as an opaque status.

/// Top-level pipeline error. Every stage failure is one of these.
///
/// An empty resolution result is deliberately *not* represented here:
/// "no forwarding rule matched" is a successful outcome
/// (`pipeline::Outcome::NoRecipients`), not a failure.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed or unsupported receipt notification. Carries the
    /// serialized payload for diagnostics.
    #[error("Invalid receipt event: {reason} (event: {event})")]
    InvalidEvent { reason: String, event: String },

    /// Dynamic key-prefix derivation needs exactly one recipient.
    #[error(
        "A dynamic storage key prefix must not be used with more than one \
         recipient (got {count})"
    )]
    AmbiguousPrefix { count: usize },

    /// Could not make a readable copy of the stored message.
    #[error("Could not make readable copy of message at {bucket}/{key}: {source}")]
    CopyFailed {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    /// Could not load the raw message body from storage.
    #[error("Failed to load message body from {bucket}/{key}: {source}")]
    FetchFailed {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    /// The outbound mail collaborator rejected the send.
    #[error("Message sending failed: {source}")]
    SendFailed {
        #[source]
        source: MailerError,
    },

    /// A stage ran before the stages that populate its inputs. Only
    /// reachable through a misordered substituted stage list.
    #[error("Pipeline context is missing {0}")]
    MissingContext(&'static str),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Object storage collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Bucket or key would resolve outside the store.
    #[error("Invalid object location: {bucket}/{key}")]
    InvalidKey { bucket: String, key: String },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("IO error on {bucket}/{key}: {source}")]
    Io {
        bucket: String,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outbound mail collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("Invalid envelope address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("SMTP transport error: {0}")]
    Smtp(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Mail API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Send task failed: {0}")]
    Task(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, RelayError>;
