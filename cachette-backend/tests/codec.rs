//! Round-trip tests for the value codec.

use cachette_backend::codec::{JSON_PREFIX, decode, encode};
use cachette_core::{CacheValue, CacheableError};

fn round_trip(value: CacheValue) -> CacheValue {
    let encoded = encode(&value).unwrap();
    decode(Some(&encoded)).expect("encoded value must decode to presence")
}

#[test]
fn scalars_round_trip() {
    for value in [
        CacheValue::Null,
        CacheValue::Bool(true),
        CacheValue::Bool(false),
        CacheValue::from("string"),
        CacheValue::from(""),
        CacheValue::Number(0.0),
        CacheValue::Number(-42.5),
    ] {
        assert_eq!(round_trip(value.clone()), value);
    }
}

#[test]
fn ieee_754_artifacts_round_trip() {
    let sum = 0.1 + 0.2;
    assert_eq!(round_trip(CacheValue::Number(sum)), CacheValue::Number(sum));

    // f64::MAX_SAFE_INTEGER on the source platform.
    let max_safe = 9_007_199_254_740_991_f64;
    assert_eq!(
        round_trip(CacheValue::Number(max_safe)),
        CacheValue::Number(max_safe)
    );

    assert_eq!(
        round_trip(CacheValue::Number(f64::INFINITY)),
        CacheValue::Number(f64::INFINITY)
    );
    assert_eq!(
        round_trip(CacheValue::Number(f64::NEG_INFINITY)),
        CacheValue::Number(f64::NEG_INFINITY)
    );
    assert_eq!(
        round_trip(CacheValue::Number(f64::NAN)),
        CacheValue::Number(f64::NAN)
    );
}

#[test]
fn nested_records_round_trip() {
    let value = CacheValue::record([(
        "level1",
        CacheValue::record([("level2", CacheValue::record([("level3", true)]))]),
    )]);
    assert_eq!(round_trip(value.clone()), value);
}

#[test]
fn maps_and_sets_survive_by_type() {
    let value = CacheValue::record([
        ("plain", CacheValue::from(1i64)),
        ("map", CacheValue::map([("a", 1i64), ("b", 2i64)])),
        ("set", CacheValue::set(["x", "y"])),
    ]);
    let decoded = round_trip(value.clone());
    assert_eq!(decoded, value);

    // The round trip must not degrade a map into a record.
    let CacheValue::Record(entries) = decoded else {
        panic!("expected a record");
    };
    assert!(matches!(entries.get("map"), Some(CacheValue::Map(_))));
    assert!(matches!(entries.get("set"), Some(CacheValue::Set(_))));
}

#[test]
fn sequences_preserve_order() {
    let value = CacheValue::sequence([3i64, 1, 2]);
    assert_eq!(round_trip(value.clone()), value);
}

#[test]
fn non_finite_numbers_round_trip_inside_bodies() {
    let value = CacheValue::record([("limit", CacheValue::Number(f64::INFINITY))]);
    assert_eq!(round_trip(value.clone()), value);
}

#[test]
fn error_objects_keep_custom_properties() {
    let error = CacheableError::new("nope 1")
        .with_name("UpstreamError")
        .with_property("retryable", true)
        .with_property("myStringProperty", "blah");

    let decoded = round_trip(CacheValue::Error(error.clone()));
    let CacheValue::Error(decoded) = decoded else {
        panic!("expected an error object");
    };
    assert_eq!(decoded.message(), "nope 1");
    assert_eq!(decoded.name(), Some("UpstreamError"));
    assert_eq!(decoded.property("retryable"), Some(&CacheValue::Bool(true)));
    assert_eq!(
        decoded.property("myStringProperty"),
        Some(&CacheValue::from("blah"))
    );
    assert_eq!(decoded, error);
}

#[test]
fn errors_nested_in_records_round_trip() {
    let value = CacheValue::record([(
        "failure",
        CacheValue::Error(CacheableError::new("inner").with_property("code", 7i64)),
    )]);
    assert_eq!(round_trip(value.clone()), value);
}

#[test]
fn structured_values_carry_the_json_prefix() {
    let encoded = encode(&CacheValue::sequence([1i64])).unwrap();
    assert!(encoded.starts_with(JSON_PREFIX));
}

#[test]
fn unknown_strings_decode_as_themselves() {
    assert_eq!(
        decode(Some("plain old value")),
        Some(CacheValue::from("plain old value"))
    );
}

#[test]
fn canonical_numeric_strings_decode_as_numbers() {
    // Byte-level parity with the stored format: "5" and the number 5 share
    // an encoding, so the decode side picks the number.
    assert_eq!(decode(Some("5")), Some(CacheValue::Number(5.0)));
    assert_eq!(
        decode(Some("0.30000000000000004")),
        Some(CacheValue::Number(0.1 + 0.2))
    );
}
