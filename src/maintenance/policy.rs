//! Text policy: entity extraction, lock-aware redaction and fingerprints.
//!
//! Everything here is pure. The engine calls these on snapshot content and
//! never on live remote state.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// URL-like tokens, captured in group 1. A link must start the text or
/// follow a character that is neither a word character nor a dot, so
/// `awww.cute` is not a link. The match runs to the next whitespace;
/// trailing punctuation is trimmed off afterwards by [`trim_token`].
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^\w.])((?:https?://|www\.|t\.me/)\S+)").expect("link pattern is valid")
});

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(@[A-Za-z0-9_]+)").expect("username pattern is valid"));

/// Characters that never end a link token.
const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '>', '"', '\''];

fn trim_token(token: &str) -> &str {
    token.trim_end_matches(TRAILING)
}

/// Yield `(start, end)` byte ranges of the token captured by group 1 of `re`.
fn token_spans<'a>(re: &'a Regex, text: &'a str) -> impl Iterator<Item = (usize, usize)> + 'a {
    re.captures_iter(text).filter_map(|caps| {
        let m = caps.get(1)?;
        let token = trim_token(m.as_str());
        if token.is_empty() {
            None
        } else {
            Some((m.start(), m.start() + token.len()))
        }
    })
}

/// All links and `@usernames` present in `text`.
pub fn extract_entities(text: &str) -> BTreeSet<String> {
    let mut entities = BTreeSet::new();
    for re in [&*LINK_RE, &*USERNAME_RE] {
        for (start, end) in token_spans(re, text) {
            entities.insert(text[start..end].to_string());
        }
    }
    entities
}

/// Byte ranges of every removable token, ascending and non-overlapping.
///
/// A username inside a link belongs to that link: it stays when the link is
/// locked and goes when the link goes.
fn token_ranges(text: &str) -> Vec<(usize, usize)> {
    let links: Vec<(usize, usize)> = token_spans(&LINK_RE, text).collect();
    let mut ranges: Vec<(usize, usize)> = token_spans(&USERNAME_RE, text)
        .filter(|&(start, end)| {
            !links
                .iter()
                .any(|&(link_start, link_end)| start < link_end && end > link_start)
        })
        .collect();
    ranges.extend(links);
    ranges.sort_unstable();
    ranges
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn redact_once(text: &str, locks: &BTreeSet<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in token_ranges(text) {
        if locks.contains(&text[start..end]) {
            continue;
        }
        out.push_str(&text[cursor..start]);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    collapse_whitespace(&out)
}

/// Remove unlocked links and usernames, then normalize whitespace.
///
/// A lock exempts a token only on exact match. The pass repeats until the
/// output stops changing, so removing one token can never leave behind a
/// new one for the next run to find. Every repeat shortens the string, which
/// bounds the loop.
pub fn redact(text: &str, locks: &BTreeSet<String>) -> String {
    let mut current = redact_once(text, locks);
    loop {
        let next = redact_once(&current, locks);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Case- and whitespace-insensitive SHA-256 of `text`, as lowercase hex.
///
/// Returns `None` when nothing is left after normalization.
pub fn fingerprint(text: &str) -> Option<String> {
    let normalized: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    if normalized.is_empty() {
        return None;
    }
    Some(format!("{:x}", Sha256::digest(normalized.as_bytes())))
}
