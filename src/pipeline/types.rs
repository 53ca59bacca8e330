//! Shared types for the forwarding pipeline.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::ForwardingConfig;
use crate::error::RelayError;
use crate::event::MailMetadata;
use crate::mailer::Mailer;
use crate::storage::ObjectStore;

// ── Invocation context ──────────────────────────────────────────────

/// Mutable state threaded through the pipeline, one instance per
/// invocation. Stages only ever read what earlier stages wrote.
pub struct MessageContext {
    /// The trigger payload as received.
    pub event: serde_json::Value,
    /// Working copy of the forwarding configuration. Stages may adjust
    /// it for this invocation (dynamic key prefix) without touching the
    /// shared template.
    pub config: ForwardingConfig,
    /// Message metadata extracted from the event.
    pub email: Option<MailMetadata>,
    /// The working recipient list: envelope recipients until resolution
    /// replaces them with forwarding destinations.
    pub recipients: Vec<String>,
    /// Envelope recipients as received, kept for logging after
    /// `recipients` is replaced.
    pub original_recipients: Vec<String>,
    /// Last original recipient that matched a forwarding rule. Becomes
    /// the envelope sender and the From substitution fallback.
    pub original_recipient: Option<String>,
    /// Raw message text: fetched from storage, then rewritten in place.
    pub raw_message: Option<String>,
    /// Full storage key the message was fetched from.
    pub storage_key: Option<String>,
}

impl MessageContext {
    pub fn new(event: serde_json::Value, config: ForwardingConfig) -> Self {
        Self {
            event,
            config,
            email: None,
            recipients: Vec::new(),
            original_recipients: Vec::new(),
            original_recipient: None,
            raw_message: None,
            storage_key: None,
        }
    }
}

// ── Collaborators ───────────────────────────────────────────────────

/// External collaborators the stages call out to.
///
/// Both are injected so tests can substitute recording stubs.
pub struct RelayDeps {
    pub store: Arc<dyn ObjectStore>,
    pub mailer: Arc<dyn Mailer>,
}

// ── Stage plumbing ──────────────────────────────────────────────────

/// What a stage decided about the rest of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFlow {
    /// Proceed to the next stage.
    Continue,
    /// Stop here, successfully. Used when resolution produced no
    /// destinations: forwarding nothing is a clean outcome, and the
    /// remaining stages must not run.
    Done,
}

/// Future returned by a stage, borrowing the context and collaborators
/// for the duration of the stage.
pub type StageFuture<'a> = BoxFuture<'a, Result<StageFlow, RelayError>>;

/// A pipeline stage function.
pub type StageFn = for<'a> fn(&'a mut MessageContext, &'a RelayDeps) -> StageFuture<'a>;

/// A named pipeline stage. The name shows up in per-stage logs.
pub struct Stage {
    pub name: &'static str,
    pub run: StageFn,
}

impl Stage {
    pub fn new(name: &'static str, run: StageFn) -> Self {
        Self { name, run }
    }
}

// ── Terminal result ─────────────────────────────────────────────────

/// Terminal result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The message was rewritten and handed to the outbound mailer.
    Forwarded { destinations: Vec<String> },
    /// No forwarding rule matched any recipient. Nothing was fetched
    /// or sent; this is success, not an error.
    NoRecipients,
}
