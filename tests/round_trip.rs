//! Property tests: values written by the protocol 2 encoder convert back to the same JSON.

use pickleframe::api::{Converter, DecodedValue, buffer_to_json, encode_frame, pickle, to_json};
use proptest::{
    collection::{btree_map, vec},
    prelude::{Strategy, any, prop_oneof},
    prop_assert_eq, proptest,
};
use serde_json::{Map, Value};

fn leaf() -> impl Strategy<Value = DecodedValue> {
    prop_oneof![
        proptest::strategy::Just(DecodedValue::Null),
        any::<bool>().prop_map(DecodedValue::Bool),
        any::<i64>().prop_map(|n| DecodedValue::Int(n.into())),
        any::<u64>().prop_map(|n| DecodedValue::Int(n.into())),
        (-1.0e12f64..1.0e12).prop_map(DecodedValue::Float),
        "[a-z0-9 \u{e9}\u{4e2d}]{0,12}".prop_map(DecodedValue::Str),
        "[ -~]{0,12}".prop_map(|s| DecodedValue::Bytes(s.into_bytes())),
    ]
}

fn tree() -> impl Strategy<Value = DecodedValue> {
    leaf().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..6).prop_map(DecodedValue::List),
            vec(inner.clone(), 0..6).prop_map(DecodedValue::Tuple),
            btree_map("[a-z]{1,6}", inner, 0..6).prop_map(|map| {
                DecodedValue::Dict(
                    map.into_iter()
                        .map(|(key, value)| (DecodedValue::Str(key), value))
                        .collect(),
                )
            }),
        ]
    })
}

fn expected_json(value: &DecodedValue) -> Value {
    match value {
        DecodedValue::Null => Value::Null,
        DecodedValue::Bool(flag) => Value::Bool(*flag),
        DecodedValue::Int(n) => match i64::try_from(*n) {
            Ok(signed) => Value::from(signed),
            Err(_) => Value::from(u64::try_from(*n).expect("generated ints fit u64")),
        },
        DecodedValue::Float(n) => Value::from(*n),
        DecodedValue::Str(text) => Value::String(text.clone()),
        DecodedValue::Bytes(bytes) => {
            Value::String(String::from_utf8(bytes.clone()).expect("generated bytes are ascii"))
        }
        DecodedValue::List(items) | DecodedValue::Tuple(items) => {
            Value::Array(items.iter().map(expected_json).collect())
        }
        DecodedValue::Dict(pairs) => {
            let mut map = Map::new();
            for (key, value) in pairs {
                let key = key.as_str().expect("generated keys are strings");
                map.insert(key.to_string(), expected_json(value));
            }
            Value::Object(map)
        }
        other => panic!("generator produced {}", other.type_name()),
    }
}

proptest! {
    #[test]
    fn encoded_values_convert_to_matching_json(value in tree()) {
        let payload = pickle::encode(&value).unwrap();
        let expected = serde_json::to_string(&expected_json(&value)).unwrap();
        prop_assert_eq!(to_json(&payload).unwrap(), expected);
    }

    #[test]
    fn decode_inverts_encode(value in tree()) {
        let payload = pickle::encode(&value).unwrap();
        prop_assert_eq!(pickle::decode(&payload).unwrap(), value);
    }

    #[test]
    fn framed_records_ignore_trailing_bytes(
        value in tree(),
        trailing in vec(any::<u8>(), 0..16),
    ) {
        let mut buf = encode_frame(&pickle::encode(&value).unwrap()).unwrap();
        let expected = buffer_to_json(&buf, &Converter::new()).unwrap();
        buf.extend_from_slice(&trailing);
        prop_assert_eq!(buffer_to_json(&buf, &Converter::new()).unwrap(), expected);
    }
}
