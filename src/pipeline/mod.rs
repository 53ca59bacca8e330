//! Message forwarding pipeline.
//!
//! Every trigger payload flows through six ordered stages over one
//! mutable context:
//! 1. `parse_event` — validate the receipt notification
//! 2. `resolve_key_prefix` — optional per-message storage prefix
//! 3. `resolve_recipients` — rule-based destination resolution
//! 4. `fetch_message` — copy + read from object storage
//! 5. `rewrite_message` — header transforms for re-sending
//! 6. `send_message` — outbound dispatch
//!
//! Stages short-circuit: the first failure aborts the chain, and a
//! resolution with no destinations ends the run successfully without
//! touching storage or the mailer.

pub mod handler;
pub mod stages;
pub mod types;

pub use handler::RelayHandler;
pub use types::{MessageContext, Outcome, RelayDeps, Stage, StageFlow, StageFuture};
