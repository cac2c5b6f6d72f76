//! Lossless round-trip of [`CacheValue`]s to and from the string model of
//! byte-string stores.
//!
//! Scalar strings and numbers are stored verbatim; everything else is tagged
//! with a disjoint sentinel prefix. The sentinels are UUID-shaped constants,
//! so an encoded domain string cannot collide with them in practice.
//!
//! JSON cannot express keyed maps, sets, non-finite numbers or error objects
//! natively, so structured bodies wrap those members in single-key objects
//! tagged with further UUID-shaped constants.
//!
//! # Scalar ambiguity
//!
//! Because scalars are stored verbatim, a *string* whose content is the
//! canonical rendering of a number (`"5"`, `"Infinity"`) decodes as that
//! number. This is byte-level parity with the stored format; callers that
//! need to keep such strings as strings should wrap them in a record.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as Json};
use thiserror::Error;

use cachette_core::{CacheValue, CacheableError};

/// Encoded form of `null`.
pub const NULL_SENTINEL: &str = "ddcc1cea-7c2b-4fa8-b383-f84c8f5b0b53";
/// Encoded form of `true`.
pub const TRUE_SENTINEL: &str = "7e1e6156-0b3f-41b0-9b27-9a4b5e3d84c4";
/// Encoded form of `false`.
pub const FALSE_SENTINEL: &str = "2af8a72e-6c7a-4a4f-9f4e-1d19c2a5d8b2";
/// Prefix of an encoded error object; the remainder is a JSON body.
pub const ERROR_PREFIX: &str = "46c44f31-8ee2-4979-9c9d-3b1e2c2a6d15";
/// Prefix of an encoded structured value; the remainder is a JSON body.
pub const JSON_PREFIX: &str = "b1e92f60-2d54-4e4a-8f4e-62a3c6a9a0df";

/// In-body tag wrapping a keyed map.
const MAP_TAG: &str = "9a17cc12-52fb-4ac0-b7b7-e3c84a0a5c6e";
/// In-body tag wrapping a set.
const SET_TAG: &str = "e0ce1f7a-9d3e-4f96-8a1d-5b7c2f6e4a90";
/// In-body tag wrapping a non-finite number token.
const NUMBER_TAG: &str = "50b2ab06-6f3a-4e2d-b7a4-8c1d9e5f2a73";
/// In-body tag wrapping a nested error object.
const ERROR_TAG: &str = "1fd6e0c4-3a8b-49d2-95e7-7b2a4c8d1e06";

/// Codec failure. Only serialization of a structured body can fail.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The JSON body could not be serialized.
    #[error("could not serialize cache value body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Encodes a value to the string form a byte-string store can hold.
pub fn encode(value: &CacheValue) -> Result<String, CodecError> {
    match value {
        CacheValue::Null => Ok(NULL_SENTINEL.to_owned()),
        CacheValue::Bool(true) => Ok(TRUE_SENTINEL.to_owned()),
        CacheValue::Bool(false) => Ok(FALSE_SENTINEL.to_owned()),
        CacheValue::String(s) => Ok(s.clone()),
        CacheValue::Number(n) => Ok(format_number(*n)),
        CacheValue::Error(error) => {
            let body = serde_json::to_string(&error_to_json(error))?;
            Ok(format!("{ERROR_PREFIX}{body}"))
        }
        structured => {
            let body = serde_json::to_string(&to_json(structured))?;
            Ok(format!("{JSON_PREFIX}{body}"))
        }
    }
}

/// Decodes a stored string back to a value.
///
/// `None` (the store's "no such key" reply) decodes to absence. A string
/// that matches no sentinel and is not a canonical number rendering decodes
/// as itself.
pub fn decode(raw: Option<&str>) -> Option<CacheValue> {
    let s = raw?;

    if s == NULL_SENTINEL {
        return Some(CacheValue::Null);
    }
    if s == TRUE_SENTINEL {
        return Some(CacheValue::Bool(true));
    }
    if s == FALSE_SENTINEL {
        return Some(CacheValue::Bool(false));
    }
    if let Some(body) = s.strip_prefix(ERROR_PREFIX) {
        return Some(match serde_json::from_str::<Json>(body) {
            Ok(json) => CacheValue::Error(error_from_json(&json)),
            Err(error) => {
                tracing::warn!(%error, "undecodable error body, returning raw string");
                CacheValue::String(s.to_owned())
            }
        });
    }
    if let Some(body) = s.strip_prefix(JSON_PREFIX) {
        return Some(match serde_json::from_str::<Json>(body) {
            Ok(json) => from_json(&json),
            Err(error) => {
                tracing::warn!(%error, "undecodable value body, returning raw string");
                CacheValue::String(s.to_owned())
            }
        });
    }
    if let Some(n) = parse_number(s) {
        return Some(CacheValue::Number(n));
    }
    Some(CacheValue::String(s.to_owned()))
}

/// Renders a number with round-trip precision.
///
/// Finite numbers use the shortest representation that parses back exactly;
/// non-finite numbers use the source platform's tokens.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n == f64::INFINITY {
        "Infinity".to_owned()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_owned()
    } else {
        n.to_string()
    }
}

/// Parses a scalar string as a number only if it is a *canonical* rendering,
/// so strings like `"007"` or `"nan"` stay strings.
fn parse_number(s: &str) -> Option<f64> {
    match s {
        "NaN" => return Some(f64::NAN),
        "Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    let n: f64 = s.parse().ok()?;
    (n.is_finite() && format_number(n) == s).then_some(n)
}

fn to_json(value: &CacheValue) -> Json {
    match value {
        CacheValue::Null => Json::Null,
        CacheValue::Bool(b) => Json::Bool(*b),
        CacheValue::Number(n) => match serde_json::Number::from_f64(*n) {
            Some(number) => Json::Number(number),
            None => tagged(NUMBER_TAG, Json::String(format_number(*n))),
        },
        CacheValue::String(s) => Json::String(s.clone()),
        CacheValue::Sequence(items) => Json::Array(items.iter().map(to_json).collect()),
        CacheValue::Record(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
        CacheValue::Map(entries) => tagged(
            MAP_TAG,
            Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), to_json(v)))
                    .collect(),
            ),
        ),
        CacheValue::Set(values) => {
            tagged(SET_TAG, Json::Array(values.iter().map(to_json).collect()))
        }
        CacheValue::Error(error) => tagged(ERROR_TAG, error_to_json(error)),
    }
}

fn from_json(json: &Json) -> CacheValue {
    match json {
        Json::Null => CacheValue::Null,
        Json::Bool(b) => CacheValue::Bool(*b),
        Json::Number(n) => CacheValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => CacheValue::String(s.clone()),
        Json::Array(items) => CacheValue::Sequence(items.iter().map(from_json).collect()),
        Json::Object(entries) => {
            if let Some((tag, inner)) = single_entry(entries) {
                match (tag, inner) {
                    (MAP_TAG, Json::Object(map)) => {
                        return CacheValue::Map(
                            map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect(),
                        );
                    }
                    (SET_TAG, Json::Array(items)) => {
                        return CacheValue::Set(items.iter().map(from_json).collect());
                    }
                    (NUMBER_TAG, Json::String(token)) => {
                        if let Some(n) = parse_number(token) {
                            return CacheValue::Number(n);
                        }
                    }
                    (ERROR_TAG, body @ Json::Object(_)) => {
                        return CacheValue::Error(error_from_json(body));
                    }
                    _ => {}
                }
            }
            CacheValue::Record(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), from_json(v)))
                    .collect(),
            )
        }
    }
}

fn single_entry(entries: &JsonMap<String, Json>) -> Option<(&str, &Json)> {
    if entries.len() != 1 {
        return None;
    }
    entries.iter().next().map(|(k, v)| (k.as_str(), v))
}

fn tagged(tag: &str, inner: Json) -> Json {
    let mut wrapper = JsonMap::with_capacity(1);
    wrapper.insert(tag.to_owned(), inner);
    Json::Object(wrapper)
}

/// Error body: `{"message": ..., "name"?: ..., ...extra properties}`.
fn error_to_json(error: &CacheableError) -> Json {
    let mut body = JsonMap::new();
    body.insert("message".to_owned(), Json::String(error.message().to_owned()));
    if let Some(name) = error.name() {
        body.insert("name".to_owned(), Json::String(name.to_owned()));
    }
    for (key, value) in error.properties() {
        body.insert(key.clone(), to_json(value));
    }
    Json::Object(body)
}

fn error_from_json(json: &Json) -> CacheableError {
    let Json::Object(body) = json else {
        return CacheableError::new(json.to_string());
    };

    let message = body
        .get("message")
        .and_then(Json::as_str)
        .unwrap_or_default();
    let mut error = CacheableError::new(message);
    if let Some(name) = body.get("name").and_then(Json::as_str) {
        error = error.with_name(name);
    }

    let properties: BTreeMap<String, CacheValue> = body
        .iter()
        .filter(|(key, _)| key.as_str() != "message" && key.as_str() != "name")
        .map(|(key, value)| (key.clone(), from_json(value)))
        .collect();
    for (key, value) in properties {
        error = error.with_property(key, value);
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_strings_are_stored_verbatim() {
        let encoded = encode(&CacheValue::from("hello world")).unwrap();
        assert_eq!(encoded, "hello world");
    }

    #[test]
    fn sentinels_are_disjoint() {
        let sentinels = [
            NULL_SENTINEL,
            TRUE_SENTINEL,
            FALSE_SENTINEL,
            ERROR_PREFIX,
            JSON_PREFIX,
        ];
        for (i, a) in sentinels.iter().enumerate() {
            for b in sentinels.iter().skip(i + 1) {
                assert_ne!(a, b);
                assert!(!a.starts_with(b) && !b.starts_with(a));
            }
        }
    }

    #[test]
    fn non_canonical_numeric_strings_stay_strings() {
        assert_eq!(decode(Some("007")), Some(CacheValue::from("007")));
        assert_eq!(decode(Some("nan")), Some(CacheValue::from("nan")));
        assert_eq!(decode(Some("1e3")), Some(CacheValue::from("1e3")));
    }

    #[test]
    fn missing_key_decodes_to_absence() {
        assert_eq!(decode(None), None);
    }
}
