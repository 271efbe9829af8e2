//! Field sniffing over loosely typed detail blobs.
//!
//! Upstream payloads spell the same field several ways (`usdValue`,
//! `priceUsd`, `price.usd`, ...). Extractors take an ordered list of dotted
//! paths and return the first one that holds a usable value. Event shapes
//! are matched the same way: an ordered list of [`ShapeMatcher`]s, the first
//! one returning `Some` wins.

use crate::types::payload::EventDetails;
use serde_json::Value;

/// Resolves a dotted path; numeric segments index into arrays.
///
/// ```
/// use serde_json::json;
/// use solana_webhook_indexer::indexers::shapes::get_path;
///
/// let v = json!({"nfts": [{"mint": "M1"}]});
/// assert_eq!(get_path(&v, "nfts.0.mint"), Some(&json!("M1")));
/// ```
#[must_use]
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() { None } else { Some(current) }
}

/// First non-empty string among `paths`.
#[must_use]
pub fn first_str(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|path| {
        get_path(value, path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Reads a number from a JSON number or a numeric string.
#[must_use]
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// First numeric value among `paths`.
#[must_use]
pub fn first_f64(value: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .find_map(|path| get_path(value, path).and_then(as_f64))
}

/// Like [`first_f64`], but distinguishes "absent" from "present but not a
/// number": `Err(path)` names the first path whose value failed to parse.
pub fn first_f64_strict<'p>(value: &Value, paths: &[&'p str]) -> Result<Option<f64>, &'p str> {
    for path in paths {
        if let Some(raw) = get_path(value, path) {
            return match as_f64(raw) {
                Some(v) => Ok(Some(v)),
                None => Err(*path),
            };
        }
    }
    Ok(None)
}

/// One recognizable event layout.
///
/// `C` is the variant's matching context (its configured tokens, say) and
/// `T` what the matcher extracts.
pub struct ShapeMatcher<C: ?Sized, T> {
    pub name: &'static str,
    pub matcher: fn(&EventDetails, &C) -> Option<T>,
}

impl<C: ?Sized, T> ShapeMatcher<C, T> {
    pub const fn new(name: &'static str, matcher: fn(&EventDetails, &C) -> Option<T>) -> Self {
        Self { name, matcher }
    }
}

/// Applies `matchers` in order and returns the first hit with its name.
pub fn first_match<C: ?Sized, T>(
    matchers: &[ShapeMatcher<C, T>],
    details: &EventDetails,
    context: &C,
) -> Option<(&'static str, T)> {
    matchers
        .iter()
        .find_map(|m| (m.matcher)(details, context).map(|out| (m.name, out)))
}

/// Result of normalizing one sub-item of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized<T> {
    /// Write `item`, identified by `key` in reports.
    Apply { key: String, item: T },
    /// Recognized but unusable; nothing is written.
    Skip { key: String, reason: String },
}

impl<T> Normalized<T> {
    pub fn apply(key: impl Into<String>, item: T) -> Self {
        Self::Apply {
            key: key.into(),
            item,
        }
    }

    pub fn skip(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Skip {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn item(&self) -> Option<&T> {
        match self {
            Self::Apply { item, .. } => Some(item),
            Self::Skip { .. } => None,
        }
    }

    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip { .. })
    }
}

/// Case-insensitive membership in an optional allow-list. `None` allows all.
#[must_use]
pub fn allowed(allow_list: Option<&[String]>, value: &str) -> bool {
    match allow_list {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => list.iter().any(|a| a.eq_ignore_ascii_case(value)),
    }
}
