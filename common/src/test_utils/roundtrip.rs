use std::fmt::{Debug, Display, LowerHex};
use std::str::FromStr;

use proptest::arbitrary::{any, Arbitrary};
use proptest::strategy::Strategy;
use proptest::test_runner::Config;
use proptest::{prop_assert_eq, proptest};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Quickly create a [`serde_json::Value`] canonical roundtrip proptest. This
/// test is useful for dictionary-like types that serialize to/from a JSON
/// object.
///
/// This proptest verifies that `T` semi-canonically roundtrips to/from json,
/// though it uses [`serde_json::Value`] as the serialized representation,
/// rather than the standard json string. We use `Value` since the serialized
/// json string doesn't guarantee that order is preserved when ser/de'ing,
/// whereas the `Value` representation will still compare successfully.
pub fn json_value_canonical_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    json_value_custom(any::<T>(), Config::default());
}

/// Create a [`serde_json::Value`] canonical roundtrip proptest using a custom
/// strategy and custom proptest [`Config`]. Useful for testing foreign types
/// for which we cannot implement [`Arbitrary`].
pub fn json_value_custom<S, T>(strategy: S, config: Config)
where
    S: Strategy<Value = T>,
    T: PartialEq + Serialize + DeserializeOwned + Debug,
{
    proptest!(config, |(value1 in strategy)| {
        let json_value1 = serde_json::to_value(&value1).unwrap();
        let value2 = serde_json::from_value(json_value1.clone()).unwrap();
        let json_value2 = serde_json::to_value(&value2).unwrap();

        prop_assert_eq!(&value1, &value2);
        prop_assert_eq!(&json_value1, &json_value2);
    });
}

/// Quickly create a JSON string roundtrip proptest. This test is useful for
/// simple data types that map to/from a single base JSON type (string, int, ..)
pub fn json_string_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    json_string_custom(any::<T>(), Config::default());
}

/// Create a JSON string roundtrip proptest using a custom strategy and custom
/// proptest [`Config`].
pub fn json_string_custom<S, T>(strategy: S, config: Config)
where
    S: Strategy<Value = T>,
    T: PartialEq + Serialize + DeserializeOwned + Debug,
{
    proptest!(config, |(value1 in strategy)| {
        let json_value1 = serde_json::to_string(&value1).unwrap();
        let value2 = serde_json::from_str::<T>(&json_value1).unwrap();
        prop_assert_eq!(&value1, &value2);
    });
}

/// Quickly create a roundtrip proptest for a [`FromStr`] / [`Display`] impl.
pub fn fromstr_display_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + FromStr + Display,
    <T as FromStr>::Err: Debug,
{
    fromstr_display_custom(any::<T>(), Config::default());
}

/// Create a roundtrip proptest for a [`FromStr`] / [`Display`] impl using a
/// custom strategy and custom proptest [`Config`].
pub fn fromstr_display_custom<S, T>(strategy: S, config: Config)
where
    S: Strategy<Value = T>,
    T: PartialEq + FromStr + Display + Debug,
    <T as FromStr>::Err: Debug,
{
    proptest!(config, |(value1 in strategy)| {
        let value2 = T::from_str(&value1.to_string()).unwrap();
        prop_assert_eq!(value1, value2)
    });
}

/// Quickly create a roundtrip proptest for a [`FromStr`] / [`LowerHex`] impl.
pub fn fromstr_lowerhex_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + FromStr + LowerHex,
    <T as FromStr>::Err: Debug,
{
    fromstr_lowerhex_custom(any::<T>(), Config::default());
}

/// Create a roundtrip proptest for a [`FromStr`] / [`LowerHex`] impl using a
/// custom strategy and custom proptest [`Config`].
pub fn fromstr_lowerhex_custom<S, T>(strategy: S, config: Config)
where
    S: Strategy<Value = T>,
    T: PartialEq + FromStr + LowerHex + Debug,
    <T as FromStr>::Err: Debug,
{
    proptest!(config, |(value1 in strategy)| {
        let hex = format!("{value1:x}");
        let value2 = T::from_str(hex.as_str()).unwrap();
        prop_assert_eq!(value1, value2)
    });
}

/// Verify that `T`'s JSON representation is exactly its `Display`'d string
/// (quoted), and that `FromStr` and `Deserialize` agree on the parsed value.
/// Useful for types using `#[derive(SerializeDisplay, DeserializeFromStr)]`.
pub fn fromstr_json_string_equiv<T>()
where
    T: Arbitrary + PartialEq + Debug + FromStr + Display + Serialize + DeserializeOwned,
    <T as FromStr>::Err: Debug,
{
    proptest!(|(value: T)| {
        let json_string = serde_json::to_string(&value).unwrap();
        let display_string = format!("\"{value}\"");
        prop_assert_eq!(&json_string, &display_string);

        let from_json: T = serde_json::from_str(&json_string).unwrap();
        let from_str = T::from_str(&value.to_string()).unwrap();
        prop_assert_eq!(from_json, from_str);
    });
}

/// Assert that each `(value, expected_json)` pair serializes to exactly
/// `expected_json` and that `expected_json` deserializes back to `value`.
/// Intended for fieldless enums whose JSON wire format must stay stable
/// across releases: the `expected_json` literals are effectively a snapshot
/// that must never silently change.
pub fn json_unit_enum_backwards_compat<T>(cases: &[(T, &str)])
where
    T: PartialEq + Debug + Serialize + DeserializeOwned,
{
    for (value, expected_json) in cases {
        let actual_json = serde_json::to_string(value).unwrap();
        assert_eq!(&actual_json, expected_json);

        let roundtripped: T = serde_json::from_str(expected_json).unwrap();
        assert_eq!(&roundtripped, value);
    }
}
