// SPDX-License-Identifier: MIT OR Apache-2.0

//! RFC 8785 (JCS) canonical JSON serialization.
//!
//! Node identity hashes are computed over this rendering, so it must be
//! byte-identical for semantically identical inputs across platforms:
//! object members sorted by the UTF-16 code units of their keys, no
//! insignificant whitespace, minimal string escapes, and numbers in
//! shortest round-trip form.
//!
//! Every string reachable from the input — object keys, text values,
//! nested tool arguments, opaque blocks — is NFC-normalized during
//! rendering, so two observers of the same content in different Unicode
//! normalization forms still agree on the hash.

use serde_json::Value;
use std::borrow::Cow;
use std::fmt::Write as _;
use unicode_normalization::{IsNormalized, UnicodeNormalization, is_nfc_quick};

/// Render a JSON value in RFC 8785 canonical form.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|a, b| utf16_key(a.0).cmp(&utf16_key(b.0)));
            out.push('{');
            for (i, (key, val)) in members.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, val);
            }
            out.push('}');
        }
    }
}

/// NFC-normalize a string, borrowing when it already is.
fn nfc(s: &str) -> Cow<'_, str> {
    match is_nfc_quick(s.chars()) {
        IsNormalized::Yes => Cow::Borrowed(s),
        IsNormalized::No | IsNormalized::Maybe => Cow::Owned(s.nfc().collect()),
    }
}

/// Sort key for object members: the UTF-16 code units of the normalized
/// property name.
fn utf16_key(s: &str) -> Vec<u16> {
    nfc(s).encode_utf16().collect()
}

fn write_string(out: &mut String, s: &str) {
    let s = nfc(s);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_number(out: &mut String, n: &serde_json::Number) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(f) = n.as_f64() {
        if f == 0.0 {
            // Covers negative zero as well.
            out.push('0');
        } else if f.fract() == 0.0 && f.abs() < 1e21 {
            // Integral doubles below 1e21 print without fraction or exponent.
            let _ = write!(out, "{}", f as i128);
        } else {
            let _ = write!(out, "{n}");
        }
    } else {
        out.push('0');
    }
}
