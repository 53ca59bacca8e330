//! The six pipeline stages.
//!
//! Each stage is a plain function over the shared context so the
//! handler can run a substituted list in tests. Stages communicate
//! exclusively through the context; collaborator calls go through
//! `RelayDeps`.

use tracing::info;

use crate::error::RelayError;
use crate::event;
use crate::pipeline::types::{MessageContext, RelayDeps, Stage, StageFlow, StageFuture};
use crate::resolve;
use crate::rewrite;

/// The production stage order. Tests substitute their own list via
/// `RelayHandler::with_stages`.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new("parse_event", parse_event),
        Stage::new("resolve_key_prefix", resolve_key_prefix),
        Stage::new("resolve_recipients", resolve_recipients),
        Stage::new("fetch_message", fetch_message),
        Stage::new("rewrite_message", rewrite_message),
        Stage::new("send_message", send_message),
    ]
}

/// Validate the trigger payload and pull the message metadata plus the
/// envelope recipient list into the context.
pub fn parse_event<'a>(ctx: &'a mut MessageContext, _deps: &'a RelayDeps) -> StageFuture<'a> {
    Box::pin(async move {
        let (mail, recipients) = event::parse_receipt_event(&ctx.event)?;
        ctx.email = Some(mail);
        ctx.recipients = recipients;
        Ok(StageFlow::Continue)
    })
}

/// Derive the storage key prefix from the sole recipient's mailbox
/// name when `dynamic_key_prefix` is enabled. Only the working config
/// copy is overwritten; the shared template is never touched.
pub fn resolve_key_prefix<'a>(
    ctx: &'a mut MessageContext,
    _deps: &'a RelayDeps,
) -> StageFuture<'a> {
    Box::pin(async move {
        if !ctx.config.dynamic_key_prefix {
            return Ok(StageFlow::Continue);
        }
        if ctx.recipients.len() != 1 {
            return Err(RelayError::AmbiguousPrefix {
                count: ctx.recipients.len(),
            });
        }
        // Mailbox name before the final `@`; the whole address when it
        // has none.
        let recipient = &ctx.recipients[0];
        let mailbox = match recipient.rfind('@') {
            Some(pos) => &recipient[..pos],
            None => recipient.as_str(),
        };
        ctx.config.email_key_prefix = format!("{}/", mailbox.to_lowercase());
        info!(prefix = %ctx.config.email_key_prefix, "Derived storage key prefix from recipient");
        Ok(StageFlow::Continue)
    })
}

/// Resolve original recipients to forwarding destinations. An empty
/// result finishes the pipeline early with success.
pub fn resolve_recipients<'a>(
    ctx: &'a mut MessageContext,
    _deps: &'a RelayDeps,
) -> StageFuture<'a> {
    Box::pin(async move {
        let resolution = resolve::resolve_recipients(&ctx.recipients, &ctx.config);
        ctx.original_recipients = std::mem::take(&mut ctx.recipients);

        if resolution.destinations.is_empty() {
            info!(
                original_recipients = %ctx.original_recipients.join(", "),
                "Finishing process: no forwarding destinations for original recipients"
            );
            return Ok(StageFlow::Done);
        }

        ctx.original_recipient = resolution.original_recipient;
        ctx.recipients = resolution.destinations;
        Ok(StageFlow::Continue)
    })
}

/// Copy the stored message onto its own key (taking ownership with a
/// private ACL where the backend supports it), then fetch its content.
pub fn fetch_message<'a>(ctx: &'a mut MessageContext, deps: &'a RelayDeps) -> StageFuture<'a> {
    Box::pin(async move {
        let email = ctx
            .email
            .as_ref()
            .ok_or(RelayError::MissingContext("mail metadata"))?;
        let bucket = ctx.config.email_bucket.clone();
        let key = format!("{}{}", ctx.config.email_key_prefix, email.message_id);
        info!(bucket = %bucket, key = %key, "Fetching stored message");

        deps.store
            .copy(&bucket, &key, &key, true)
            .await
            .map_err(|source| RelayError::CopyFailed {
                bucket: bucket.clone(),
                key: key.clone(),
                source,
            })?;

        let bytes = deps
            .store
            .get(&bucket, &key)
            .await
            .map_err(|source| RelayError::FetchFailed {
                bucket: bucket.clone(),
                key: key.clone(),
                source,
            })?;

        ctx.raw_message = Some(String::from_utf8_lossy(&bytes).into_owned());
        ctx.storage_key = Some(key);
        Ok(StageFlow::Continue)
    })
}

/// Rewrite the header block so the message is re-sendable under an
/// authorized sender identity.
pub fn rewrite_message<'a>(ctx: &'a mut MessageContext, _deps: &'a RelayDeps) -> StageFuture<'a> {
    Box::pin(async move {
        let raw = ctx
            .raw_message
            .as_ref()
            .ok_or(RelayError::MissingContext("raw message"))?;
        let original_recipient = ctx
            .original_recipient
            .as_deref()
            .ok_or(RelayError::MissingContext("original recipient"))?;

        let rewritten = rewrite::rewrite_message(raw, &ctx.config, original_recipient);
        ctx.raw_message = Some(rewritten);
        Ok(StageFlow::Continue)
    })
}

/// Dispatch the rewritten message: resolved destinations as envelope
/// recipients, the matched original recipient as envelope sender.
pub fn send_message<'a>(ctx: &'a mut MessageContext, deps: &'a RelayDeps) -> StageFuture<'a> {
    Box::pin(async move {
        let raw = ctx
            .raw_message
            .as_ref()
            .ok_or(RelayError::MissingContext("raw message"))?;
        let source = ctx
            .original_recipient
            .as_deref()
            .ok_or(RelayError::MissingContext("original recipient"))?;

        info!(
            original_recipients = %ctx.original_recipients.join(", "),
            transformed_recipients = %ctx.recipients.join(", "),
            "Sending message via outbound mailer"
        );

        let result = deps
            .mailer
            .send_raw(&ctx.recipients, source, raw.as_bytes())
            .await
            .map_err(|e| RelayError::SendFailed { source: e })?;

        info!(
            original_count = ctx.original_recipients.len(),
            transformed_count = ctx.recipients.len(),
            provider_result = %result,
            "Outbound send successful"
        );
        Ok(StageFlow::Continue)
    })
}
