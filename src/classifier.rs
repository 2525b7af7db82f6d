//! Sender extraction from message headers

use crate::models::{MessageHeader, SenderIdentity};
use once_cell::sync::Lazy;
use regex::Regex;

/// Runs of whitespace inside a display name
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Derive the sender of a message from its headers.
///
/// Only the first header named exactly `From` is considered. The address is
/// the last `<...>` group of its value, or the whole value when there is no
/// bracket. The display name is whatever precedes that bracket; without a
/// bracket it falls back to the address. A message without a `From` header
/// yields [`SenderIdentity::unknown`].
pub fn classify(headers: &[MessageHeader]) -> SenderIdentity {
    let Some(from) = headers.iter().find(|h| h.name == "From") else {
        return SenderIdentity::unknown();
    };

    match split_from_header(&from.value) {
        Some((name, address)) => {
            let address = address.trim().to_lowercase();
            let display_name = clean_display_name(name);
            if display_name.is_empty() {
                SenderIdentity::new(address.clone(), address)
            } else {
                SenderIdentity::new(address, display_name)
            }
        }
        None => {
            let address = from.value.trim().to_lowercase();
            SenderIdentity::new(address.clone(), address)
        }
    }
}

/// Split `Name <addr>` into its parts. The last bracket wins so that a
/// display name which itself contains brackets does not shadow the address.
fn split_from_header(value: &str) -> Option<(&str, &str)> {
    let start = value.rfind('<')?;
    let rest = &value[start + 1..];
    let address = match rest.find('>') {
        Some(end) => &rest[..end],
        None => rest,
    };
    Some((&value[..start], address))
}

/// Strip quoting and stray angle brackets left over from header encoding
fn clean_display_name(raw: &str) -> String {
    let unescaped = raw.replace("\\\"", "\"");
    let stripped: String = unescaped
        .chars()
        .filter(|c| !matches!(c, '<' | '>'))
        .collect();
    let trimmed = stripped.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    WHITESPACE.replace_all(trimmed, " ").into_owned()
}
