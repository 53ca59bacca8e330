//! Header rewriting.
//!
//! Prepares a received raw message for re-sending: the header block is
//! parsed into a line-oriented model, a fixed sequence of transforms is
//! applied, and the result is serialized back. The body is carried
//! through byte for byte, and untouched header lines keep their exact
//! original bytes, terminators and folding included.
//!
//! Transform order matters: Reply-To capture must see the From header
//! before From substitution rewrites it.

use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::config::ForwardingConfig;

/// Headers removed wholesale before re-sending. Their values become
/// stale or duplicate-triggering once the From address changes.
const STRIP_HEADERS: &[&str] = &["return-path", "sender", "message-id", "dkim-signature"];

/// First angle-bracket-delimited address on a single physical line.
static ANGLE_ADDR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<(.*)>").unwrap());

/// Rewrite the header block of `raw` for forwarding.
///
/// `original_recipient` is the matched inbound recipient; it becomes the
/// visible From address when no `from_email` is configured.
pub fn rewrite_message(raw: &str, config: &ForwardingConfig, original_recipient: &str) -> String {
    let mut block = HeaderBlock::parse(raw);

    ensure_reply_to(&mut block);
    substitute_from(&mut block, config.from_email.as_deref(), original_recipient);
    if !config.subject_prefix.is_empty() {
        prefix_subject(&mut block, &config.subject_prefix);
    }
    if let Some(override_to) = config.to_email_override.as_deref() {
        replace_to(&mut block, override_to);
    }
    strip_stale_headers(&mut block);

    block.serialize()
}

// ── Header model ────────────────────────────────────────────────────────

/// One header entry: a header line plus any folded continuation lines,
/// or a run of unrecognized text kept verbatim.
#[derive(Debug, Clone)]
struct HeaderEntry {
    /// Lowercased text before the first colon, `None` when the first
    /// line has no colon.
    name: Option<String>,
    /// The entry's physical lines, terminators included.
    raw: String,
}

impl HeaderEntry {
    fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    /// The value after `Name:` and at most one space or tab, spanning
    /// folded lines. Returned without the final line terminator, which
    /// comes back separately (empty when the entry is unterminated).
    fn value_and_terminator(&self) -> (&str, &str) {
        let (content, terminator) = split_terminator(&self.raw);
        (value_after_colon(content), terminator)
    }
}

/// A raw message split into header entries and a byte-preserved body.
#[derive(Debug)]
struct HeaderBlock {
    entries: Vec<HeaderEntry>,
    /// Everything from the first truly blank line on, untouched.
    body: String,
}

impl HeaderBlock {
    /// Split `raw` at the first blank line. A blank line is an empty
    /// line with either a bare or carriage-return-prefixed terminator;
    /// a line starting with whitespace folds into the entry before it.
    fn parse(raw: &str) -> Self {
        let mut entries: Vec<HeaderEntry> = Vec::new();
        let mut consumed = 0;

        for line in raw.split_inclusive('\n') {
            if line == "\n" || line == "\r\n" {
                break;
            }
            let is_fold = line.starts_with(' ') || line.starts_with('\t');
            match entries.last_mut() {
                Some(previous) if is_fold => previous.raw.push_str(line),
                _ => entries.push(HeaderEntry {
                    name: header_name(line),
                    raw: line.to_string(),
                }),
            }
            consumed += line.len();
        }

        Self {
            entries,
            body: raw[consumed..].to_string(),
        }
    }

    fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 512);
        for entry in &self.entries {
            out.push_str(&entry.raw);
        }
        out.push_str(&self.body);
        out
    }

    fn first_named(&self, name: &str) -> Option<&HeaderEntry> {
        self.entries.iter().find(|e| e.is_named(name))
    }

    fn has_named(&self, name: &str) -> bool {
        self.first_named(name).is_some()
    }
}

fn header_name(line: &str) -> Option<String> {
    let (content, _) = split_terminator(line);
    content.find(':').map(|pos| content[..pos].to_lowercase())
}

/// Split off a trailing `\r\n` or `\n`.
fn split_terminator(text: &str) -> (&str, &str) {
    if let Some(stripped) = text.strip_suffix("\r\n") {
        (stripped, "\r\n")
    } else if let Some(stripped) = text.strip_suffix('\n') {
        (stripped, "\n")
    } else {
        (text, "")
    }
}

/// Text after the first colon and at most one following space or tab.
fn value_after_colon(content: &str) -> &str {
    let after = match content.find(':') {
        Some(pos) => &content[pos + 1..],
        None => content,
    };
    match after.as_bytes().first() {
        Some(b' ' | b'\t') => &after[1..],
        _ => after,
    }
}

// ── Transforms ──────────────────────────────────────────────────────────

/// Append a Reply-To carrying the original From value, so replies reach
/// the author even though From is about to be rewritten. Skipped when
/// the message already has one.
fn ensure_reply_to(block: &mut HeaderBlock) {
    if block.has_named("reply-to") {
        return;
    }
    let Some(from) = block.first_named("from") else {
        info!("Reply-To not added: no From header present");
        return;
    };
    let (value, terminator) = from.value_and_terminator();
    if terminator.is_empty() {
        info!("Reply-To not added: From header is unterminated");
        return;
    }
    let raw = format!("Reply-To: {value}{terminator}");
    info!(reply_to = %value.trim(), "Added Reply-To with the original From value");
    block.entries.push(HeaderEntry {
        name: Some("reply-to".to_string()),
        raw,
    });
}

/// Rewrite every From header. The substitute address must belong to a
/// domain the outbound relay is authorized for; the original identity
/// survives as display text, de-addressed so it cannot be delivered to.
fn substitute_from(block: &mut HeaderBlock, from_email: Option<&str>, original_recipient: &str) {
    for entry in block.entries.iter_mut().filter(|e| e.is_named("from")) {
        let new_raw = {
            let (value, terminator) = entry.value_and_terminator();
            let line = match from_email {
                Some(substitute) if ANGLE_ADDR.is_match(value) => {
                    format!(
                        "From: {} <{substitute}>",
                        ANGLE_ADDR.replace(value, "").trim()
                    )
                }
                Some(substitute) => {
                    format!(
                        "From: {} <{substitute}>",
                        value.replacen('@', " at ", 1).trim()
                    )
                }
                None if ANGLE_ADDR.is_match(value) => {
                    format!(
                        "From: {} <{original_recipient}>",
                        value.replacen('<', "at ", 1).replacen('>', "", 1)
                    )
                }
                None => {
                    format!(
                        "From: {} <{original_recipient}>",
                        value.replacen('@', " at ", 1).trim()
                    )
                }
            };
            format!("{line}{terminator}")
        };
        entry.raw = new_raw;
    }
}

/// Insert the configured prefix right after `Subject: `. Applies to the
/// first physical line only; folded continuation lines ride along
/// unchanged. Running this over an already-prefixed subject prefixes it
/// again; the transform is not idempotent.
fn prefix_subject(block: &mut HeaderBlock, prefix: &str) {
    for entry in block.entries.iter_mut().filter(|e| e.is_named("subject")) {
        let new_raw = {
            let (first_line, continuation) = match entry.raw.find('\n') {
                Some(pos) => entry.raw.split_at(pos + 1),
                None => (entry.raw.as_str(), ""),
            };
            let (content, terminator) = split_terminator(first_line);
            let value = value_after_colon(content);
            format!("Subject: {prefix}{value}{terminator}{continuation}")
        };
        entry.raw = new_raw;
    }
}

/// Replace each To entry with the override: one line, folds dropped.
fn replace_to(block: &mut HeaderBlock, override_to: &str) {
    for entry in block.entries.iter_mut().filter(|e| e.is_named("to")) {
        let new_raw = {
            let (_, terminator) = entry.value_and_terminator();
            format!("To: {override_to}{terminator}")
        };
        entry.raw = new_raw;
    }
}

/// Drop stripped headers with their continuation lines.
fn strip_stale_headers(block: &mut HeaderBlock) {
    block.entries.retain(|entry| {
        !entry
            .name
            .as_deref()
            .is_some_and(|name| STRIP_HEADERS.contains(&name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ForwardingConfig {
        ForwardingConfig::default()
    }

    fn with_from_email(address: &str) -> ForwardingConfig {
        ForwardingConfig {
            from_email: Some(address.to_string()),
            ..base_config()
        }
    }

    // ── Header/body split ────────────────────────────────────────────

    #[test]
    fn body_is_never_rescanned_for_headers() {
        let raw = "X-One: a\n\nSubject: looks like a header\n";
        let config = ForwardingConfig {
            subject_prefix: "[FWD] ".to_string(),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "fwd@z.com");
        // The Subject line lives in the body and must stay untouched.
        assert!(out.ends_with("\n\nSubject: looks like a header\n"));
    }

    #[test]
    fn message_without_blank_line_is_all_header() {
        let raw = "Subject: hi\nX-Tail: y";
        let config = ForwardingConfig {
            subject_prefix: "[FWD] ".to_string(),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "fwd@z.com");
        assert_eq!(out, "Subject: [FWD] hi\nX-Tail: y");
    }

    #[test]
    fn leading_blank_line_means_empty_header() {
        let raw = "\nFrom: alice@x.com\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert_eq!(out, raw);
    }

    #[test]
    fn untouched_message_round_trips_exactly() {
        // No From, no Subject, nothing to strip: the rewriter is the
        // identity, garbage lines and CRLF terminators included.
        let raw = "X-Good: a\r\nnot a header line\r\nX-Other: b\r\n\r\nbody text\r\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert_eq!(out, raw);
    }

    #[test]
    fn body_bytes_are_preserved() {
        let raw = "From: a@x.com\r\n\r\nline one\r\n\r\nnot-a-header: still body\r\nno final newline";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert!(out.ends_with("\r\n\r\nline one\r\n\r\nnot-a-header: still body\r\nno final newline"));
    }

    // ── Reply-To insertion ───────────────────────────────────────────

    #[test]
    fn reply_to_added_from_first_from_header() {
        let raw = "From: Alice <alice@x.com>\nTo: info@example.com\n\nbody\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert_eq!(out.matches("Reply-To:").count(), 1);
        // Appended as the last header entry, carrying the original value.
        assert!(out.contains("To: info@example.com\nReply-To: Alice <alice@x.com>\n\nbody"));
    }

    #[test]
    fn reply_to_preserves_folded_from_value() {
        let raw = "From: Alice Example\r\n <alice@x.com>\r\n\r\nbody\r\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(out.contains("Reply-To: Alice Example\r\n <alice@x.com>\r\n"));
    }

    #[test]
    fn existing_reply_to_is_kept() {
        let raw = "Reply-To: keep@x.com\nFrom: Alice <alice@x.com>\n\nbody\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert_eq!(out.matches("Reply-To:").count(), 1);
        assert!(out.contains("Reply-To: keep@x.com\n"));
        // From is still rewritten.
        assert!(out.contains("From: Alice <noreply@y.com>\n"));
    }

    #[test]
    fn reply_to_skipped_without_from() {
        let raw = "To: info@example.com\n\nbody\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(!out.contains("Reply-To:"));
    }

    #[test]
    fn reply_to_skipped_for_unterminated_from() {
        // A From header with no trailing newline cannot be copied
        // verbatim; From substitution still applies.
        let raw = "From: alice@x.com";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(!out.contains("Reply-To:"));
        assert_eq!(out, "From: alice at x.com <fwd@z.com>");
    }

    // ── From substitution ────────────────────────────────────────────

    #[test]
    fn from_display_name_with_configured_sender() {
        let raw = "From: Alice <alice@x.com>\n\nbody\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert!(out.contains("From: Alice <noreply@y.com>\n"));
    }

    #[test]
    fn from_bare_address_with_configured_sender() {
        let raw = "From: alice@x.com\n\nbody\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert!(out.contains("From: alice at x.com <noreply@y.com>\n"));
    }

    #[test]
    fn from_fallback_keeps_display_text() {
        let raw = "From: Alice <alice@x.com>\n\nbody\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(out.contains("From: Alice at alice@x.com <fwd@z.com>\n"));
    }

    #[test]
    fn from_fallback_bare_address() {
        let raw = "From: alice@x.com\n\nbody\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(out.contains("From: alice at x.com <fwd@z.com>\n"));
    }

    #[test]
    fn from_strip_spans_first_to_last_bracket() {
        let raw = "From: A <x@x.com> B <y@y.com>\n\nbody\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert!(out.contains("From: A <noreply@y.com>\n"));
    }

    #[test]
    fn folded_from_collapses_when_trimmed() {
        let raw = "From: Alice\r\n <alice@x.com>\r\n\r\nbody\r\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert!(out.contains("From: Alice <noreply@y.com>\r\n"));
    }

    #[test]
    fn every_from_header_is_rewritten() {
        let raw = "From: one@x.com\nFrom: two@x.com\n\nbody\n";
        let out = rewrite_message(raw, &with_from_email("noreply@y.com"), "fwd@z.com");
        assert!(out.contains("From: one at x.com <noreply@y.com>\n"));
        assert!(out.contains("From: two at x.com <noreply@y.com>\n"));
    }

    // ── Subject prefix ───────────────────────────────────────────────

    #[test]
    fn subject_prefix_inserted_after_colon() {
        let raw = "Subject: Quarterly report\n\nbody\n";
        let config = ForwardingConfig {
            subject_prefix: "[FWD] ".to_string(),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "fwd@z.com");
        assert!(out.contains("Subject: [FWD] Quarterly report\n"));
    }

    #[test]
    fn subject_prefix_leaves_folded_lines_alone() {
        let raw = "Subject: part one\n part two\n\nbody\n";
        let config = ForwardingConfig {
            subject_prefix: "[FWD] ".to_string(),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "fwd@z.com");
        assert!(out.contains("Subject: [FWD] part one\n part two\n"));
    }

    #[test]
    fn subject_prefix_is_not_idempotent() {
        // A second pass prefixes again; this double-prefix behavior is
        // deliberate and pinned here.
        let config = ForwardingConfig {
            subject_prefix: "[FWD] ".to_string(),
            ..base_config()
        };
        let once = rewrite_message("Subject: hi\n\nbody\n", &config, "fwd@z.com");
        assert!(once.contains("Subject: [FWD] hi\n"));
        let twice = rewrite_message(&once, &config, "fwd@z.com");
        assert!(twice.contains("Subject: [FWD] [FWD] hi\n"));
    }

    #[test]
    fn subject_keeps_extra_spacing_past_the_first() {
        // Only one space or tab after the colon is absorbed.
        let raw = "Subject:   spaced\n\nbody\n";
        let config = ForwardingConfig {
            subject_prefix: "[FWD] ".to_string(),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "fwd@z.com");
        assert!(out.contains("Subject: [FWD]   spaced\n"));
    }

    #[test]
    fn empty_prefix_leaves_subject_untouched() {
        let raw = "Subject:tight\n\nbody\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(out.contains("Subject:tight\n"));
    }

    // ── To override ──────────────────────────────────────────────────

    #[test]
    fn to_override_replaces_value() {
        let raw = "To: a@x.com, b@y.com\n\nbody\n";
        let config = ForwardingConfig {
            to_email_override: Some("ops@z.com".to_string()),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "fwd@z.com");
        assert!(out.contains("To: ops@z.com\n"));
        assert!(!out.contains("a@x.com"));
    }

    #[test]
    fn to_override_flattens_folded_entry() {
        let raw = "To: a@x.com,\n b@y.com\n\nbody\n";
        let config = ForwardingConfig {
            to_email_override: Some("ops@z.com".to_string()),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "fwd@z.com");
        assert!(out.contains("To: ops@z.com\n\nbody"));
        assert!(!out.contains("b@y.com"));
    }

    #[test]
    fn to_kept_without_override() {
        let raw = "To: a@x.com\n\nbody\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(out.contains("To: a@x.com\n"));
    }

    // ── Header stripping ─────────────────────────────────────────────

    #[test]
    fn stale_headers_are_removed() {
        let raw = "Return-Path: <bounce@x.com>\n\
                   Sender: real@x.com\n\
                   Message-ID: <abc@x.com>\n\
                   DKIM-Signature: v=1; a=rsa-sha256;\n\
                   To: info@example.com\n\
                   \n\
                   body\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(!out.contains("Return-Path"));
        assert!(!out.contains("Sender:"));
        assert!(!out.contains("Message-ID"));
        assert!(!out.contains("DKIM-Signature"));
        assert!(out.contains("To: info@example.com\n"));
    }

    #[test]
    fn folded_dkim_signature_fully_removed() {
        let raw = "DKIM-Signature: v=1; a=rsa-sha256;\n\
                   \tb=abc123;\n\
                   \tbh=def456;\n\
                   To: info@example.com\n\
                   \n\
                   body\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(!out.contains("DKIM"));
        assert!(!out.contains("abc123"));
        assert!(!out.contains("def456"));
        assert!(out.starts_with("To: info@example.com\n"));
    }

    #[test]
    fn folded_return_path_fully_removed() {
        let raw = "Return-Path:\n <bounce@x.com>\nTo: info@example.com\n\nbody\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert!(!out.contains("bounce@x.com"));
    }

    #[test]
    fn all_dkim_signatures_removed() {
        let raw = "DKIM-Signature: v=1; d=one.example;\n\
                   DKIM-Signature: v=1; d=two.example;\n\
                   To: info@example.com\n\
                   \n\
                   body\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert_eq!(out.matches("DKIM-Signature").count(), 0);
    }

    #[test]
    fn stripping_is_case_insensitive() {
        let raw = "MESSAGE-ID: <abc@x.com>\nreturn-path: <b@x.com>\n\nbody\n";
        let out = rewrite_message(raw, &base_config(), "fwd@z.com");
        assert_eq!(out, "\nbody\n");
    }

    // ── End to end ───────────────────────────────────────────────────

    #[test]
    fn full_rewrite_fixture() {
        let raw = "Return-Path: <bounce@x.com>\r\n\
                   From: Alice Example <alice@x.com>\r\n\
                   To: info@example.com\r\n\
                   Subject: Quarterly report\r\n\
                   Message-ID: <abc@x.com>\r\n\
                   DKIM-Signature: v=1; a=rsa-sha256;\r\n\
                   \tb=abc123\r\n\
                   Content-Type: text/plain\r\n\
                   \r\n\
                   Hello from Alice.\r\n\
                   Bye.\r\n";
        let config = ForwardingConfig {
            from_email: Some("relay@forward.example".to_string()),
            subject_prefix: "[FWD] ".to_string(),
            ..base_config()
        };
        let out = rewrite_message(raw, &config, "info@example.com");

        assert_eq!(out.matches("Reply-To:").count(), 1);
        assert!(out.contains("Reply-To: Alice Example <alice@x.com>\r\n"));
        assert!(out.contains("From: Alice Example <relay@forward.example>\r\n"));
        assert!(out.contains("Subject: [FWD] Quarterly report\r\n"));
        assert!(out.contains("To: info@example.com\r\n"));
        assert!(out.contains("Content-Type: text/plain\r\n"));
        assert!(!out.contains("Return-Path"));
        assert!(!out.contains("Message-ID"));
        assert!(!out.contains("DKIM-Signature"));
        assert!(!out.contains("abc123"));
        assert!(out.ends_with("\r\n\r\nHello from Alice.\r\nBye.\r\n"));
    }
}
