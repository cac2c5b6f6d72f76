//! Deterministic cache-key construction.
//!
//! A key is built from a computation name and an ordered argument list.
//! Construction is deterministic and order-insensitive for record-shaped and
//! set-shaped arguments: record entries are sorted by property name and
//! sequence elements are sorted after rendering, so permuting either does not
//! change the key.
//!
//! Arguments are [`serde_json::Value`]s, which restricts them to plain data:
//! class instances are unrepresentable and the owned tree cannot contain
//! cycles, so those two failure modes cannot occur at runtime. `null`
//! arguments are preserved as the literal token `null`.
//!
//! # Example
//!
//! ```
//! use cachette_core::build_key_with_limit;
//! use serde_json::json;
//!
//! let key = build_key_with_limit("getUser", &[json!(42), json!("active")], 1000).unwrap();
//! assert_eq!(key, "getUser-42-active");
//!
//! // Record arguments are order-insensitive.
//! let a = build_key_with_limit("f", &[json!({"x": 1, "y": 2})], 1000).unwrap();
//! let b = build_key_with_limit("f", &[json!({"y": 2, "x": 1})], 1000).unwrap();
//! assert_eq!(a, b);
//! ```

use serde_json::Value;
use thiserror::Error;

/// Separator between the name and each rendered argument.
const SEPARATOR: &str = "-";

/// Default maximum key length in bytes.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 1000;

/// Environment variable overriding the maximum key length.
pub const MAX_KEY_LENGTH_ENV: &str = "UNITO_CACHE_MAX_KEY_LENGTH";

/// Key construction failure.
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    /// The rendered key exceeds the configured length cap.
    #[error("cache key is {length} bytes, above the {max} byte limit: {truncated}...")]
    TooLong {
        /// Rendered key length in bytes.
        length: usize,
        /// The configured cap.
        max: usize,
        /// The first few bytes of the offending key, for diagnostics.
        truncated: String,
    },
}

/// Reads the key-length cap from the environment, falling back to
/// [`DEFAULT_MAX_KEY_LENGTH`] when unset or invalid.
pub fn max_key_length_from_env() -> usize {
    match std::env::var(MAX_KEY_LENGTH_ENV) {
        Ok(raw) => match raw.parse::<usize>() {
            Ok(value) if value > 0 => value,
            _ => {
                tracing::warn!(
                    value = %raw,
                    "invalid {MAX_KEY_LENGTH_ENV}, using default of {DEFAULT_MAX_KEY_LENGTH}"
                );
                DEFAULT_MAX_KEY_LENGTH
            }
        },
        Err(_) => DEFAULT_MAX_KEY_LENGTH,
    }
}

/// Builds a cache key from a name and arguments, capped at the
/// environment-configured length.
pub fn build_key(name: &str, args: &[Value]) -> Result<String, KeyError> {
    build_key_with_limit(name, args, max_key_length_from_env())
}

/// Builds a cache key from a name and arguments with an explicit length cap.
pub fn build_key_with_limit(name: &str, args: &[Value], max: usize) -> Result<String, KeyError> {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(name.to_owned());
    parts.extend(args.iter().map(render));
    let key = parts.join(SEPARATOR);

    if key.len() > max {
        return Err(KeyError::TooLong {
            length: key.len(),
            max,
            truncated: key.chars().take(40).collect(),
        });
    }
    Ok(key)
}

/// Renders one argument.
///
/// Record entries sort by property name; sequence elements sort after
/// rendering, which makes sequence arguments behave like sets for key
/// equality purposes.
fn render(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut rendered: Vec<String> = items.iter().map(render).collect();
            rendered.sort();
            rendered.join(SEPARATOR)
        }
        Value::Object(entries) => {
            let mut rendered: Vec<(&str, String)> = entries
                .iter()
                .map(|(k, v)| (k.as_str(), render(v)))
                .collect();
            rendered.sort();
            rendered
                .into_iter()
                .map(|(k, v)| format!("{k}{SEPARATOR}{v}"))
                .collect::<Vec<_>>()
                .join(SEPARATOR)
        }
    }
}
