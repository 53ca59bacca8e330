//! Recipient resolution.
//!
//! Maps the envelope recipients of a received message onto forwarding
//! destinations through layered rules, narrowest match first:
//!
//! 1. exact address (`info@example.com`)
//! 2. domain (`@example.com`)
//! 3. mailbox name (`info`)
//! 4. domain rewrite (`@old.example` -> `@new.example`, mailbox kept)
//! 5. catch-all (`@`)
//!
//! Each recipient is matched independently against the first tier that
//! has a rule for it; broader tiers never add to a narrower hit. A
//! recipient no tier covers contributes nothing.

use crate::config::ForwardingConfig;

/// Outcome of resolving an inbound recipient list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Forwarding destinations in rule order per recipient. Duplicates
    /// across recipients or rules are preserved.
    pub destinations: Vec<String>,
    /// The last original recipient (as received, un-normalized) that
    /// produced a match. Becomes the envelope sender and the From
    /// substitution fallback; when several recipients match, the latest
    /// one wins.
    pub original_recipient: Option<String>,
}

/// Resolve `recipients` against the configured rule maps.
pub fn resolve_recipients(recipients: &[String], config: &ForwardingConfig) -> Resolution {
    let mut resolution = Resolution::default();

    for original in recipients {
        let key = normalize_recipient(original, config.allow_plus_sign);

        if let Some(destinations) = config.forward_mapping.get(&key) {
            resolution.destinations.extend(destinations.iter().cloned());
            resolution.original_recipient = Some(original.clone());
            continue;
        }

        let (domain_part, user_part) = split_recipient(&key);

        if let Some(destinations) = domain_part.and_then(|d| config.forward_mapping.get(d)) {
            resolution.destinations.extend(destinations.iter().cloned());
            resolution.original_recipient = Some(original.clone());
        } else if !user_part.is_empty()
            && let Some(destinations) = config.forward_mapping.get(user_part)
        {
            resolution.destinations.extend(destinations.iter().cloned());
            resolution.original_recipient = Some(original.clone());
        } else if let Some(replacements) =
            domain_part.and_then(|d| config.forward_domain_mapping.get(d))
        {
            for replacement in replacements {
                resolution.destinations.push(format!("{user_part}{replacement}"));
            }
            resolution.original_recipient = Some(original.clone());
        } else if let Some(destinations) = config.forward_mapping.get("@") {
            resolution.destinations.extend(destinations.iter().cloned());
            resolution.original_recipient = Some(original.clone());
        }
        // No tier matched: the recipient is dropped silently.
    }

    resolution
}

/// Lowercase the address and, when enabled, strip a `+tag` suffix from
/// the mailbox name (removes the first `+` up to the next `@`, keeping
/// the `@`). An address with a `+` but no later `@` is left alone.
fn normalize_recipient(address: &str, allow_plus_sign: bool) -> String {
    let mut key = address.to_lowercase();
    if allow_plus_sign
        && let Some(plus) = key.find('+')
        && let Some(at) = key[plus..].find('@')
    {
        key.replace_range(plus..plus + at, "");
    }
    key
}

/// Split a normalized address at its final `@`. The domain part keeps
/// the leading `@`; an address without `@` is all mailbox name.
fn split_recipient(key: &str) -> (Option<&str>, &str) {
    match key.rfind('@') {
        Some(pos) => (Some(&key[pos..]), &key[..pos]),
        None => (None, key),
    }
}
