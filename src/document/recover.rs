use std::borrow::Cow;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Best-effort decode of model output that should be one JSON object.
///
/// The whole string is tried first. Only if that fails is the span from the
/// first `{` to the last `}` decoded; there is no brace balancing, so with
/// several objects in the text the greedy span usually fails and the result
/// is `None`.
pub fn recover_json(raw: &str) -> Option<Value> {
    let raw = replace_lone_surrogates(raw);
    match decode(&raw) {
        Ok(value) => return Some(value),
        Err(e) => debug!(error = %e, len = raw.len(), "Direct decode failed, trying brace span"),
    }

    let span = outer_object_span(&raw)?;
    match decode(span) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, span_len = span.len(), "Brace span is not valid JSON");
            None
        }
    }
}

/// Strict decode of a whole string with no nesting limit. Deep input grows
/// the stack on the heap instead of failing.
fn decode(text: &str) -> serde_json::Result<Value> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = Value::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Rewrite `\uXXXX` escapes of unpaired UTF-16 surrogates as `\ufffd`, which
/// the decoder accepts. Proper surrogate pairs and escaped backslashes are
/// left alone.
fn replace_lone_surrogates(raw: &str) -> Cow<'_, str> {
    const HIGH: std::ops::Range<u16> = 0xD800..0xDC00;
    const LOW: std::ops::Range<u16> = 0xDC00..0xE000;

    if !raw.contains("\\u") {
        return Cow::Borrowed(raw);
    }

    let bytes = raw.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let Some(unit) = unicode_escape(raw, i) else {
            // `\\`, `\n`, ...: skip the escaped character too.
            i += 2;
            continue;
        };
        if HIGH.contains(&unit) && unicode_escape(raw, i + 6).is_some_and(|next| LOW.contains(&next)) {
            i += 12;
        } else if HIGH.contains(&unit) || LOW.contains(&unit) {
            out.push_str(&raw[copied..i]);
            out.push_str("\\ufffd");
            i += 6;
            copied = i;
        } else {
            i += 6;
        }
    }

    if copied == 0 {
        return Cow::Borrowed(raw);
    }
    out.push_str(&raw[copied..]);
    Cow::Owned(out)
}

/// Code unit of a `\uXXXX` escape starting at byte `at`.
fn unicode_escape(raw: &str, at: usize) -> Option<u16> {
    let digits = raw.get(at..at + 6)?.strip_prefix("\\u")?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// First `{` through last `}` inclusive, if they are in that order.
fn outer_object_span(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&s[start..=end])
}
