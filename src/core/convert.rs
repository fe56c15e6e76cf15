//! Purpose: Convert decoded pickle payloads into JSON text.
//! Exports: `Converter`, `ConversionRule`, `sets_as_arrays`, `to_json`, `to_json_pretty`.
//! Role: Boundary between the pickle value tree and `serde_json`.
//! Invariants: No silent coercion; anything without a JSON mapping fails as `UnsupportedType`
//! unless a rule was registered for its class name.
//! Invariants: Object keys keep mapping iteration order (`serde_json` `preserve_order`).
use std::collections::HashMap;
use std::fmt;

use bstr::ByteSlice;
use serde_json::{Map, Number, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::pickle::{self, DecodeLimits};
use crate::core::value::DecodedValue;

pub type ConversionRule = Box<dyn Fn(&Converter, &DecodedValue) -> Result<Value, Error> + Send + Sync>;

pub const SET_CLASSES: &[&str] = &[
    "builtins.set",
    "builtins.frozenset",
    "__builtin__.set",
    "__builtin__.frozenset",
];

#[derive(Default)]
pub struct Converter {
    rules: HashMap<String, ConversionRule>,
    limits: DecodeLimits,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        classes.sort_unstable();
        f.debug_struct("Converter")
            .field("rules", &classes)
            .field("limits", &self.limits)
            .finish()
    }
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an explicit conversion for values whose class name is `class`.
    pub fn with_rule<F>(mut self, class: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&Converter, &DecodedValue) -> Result<Value, Error> + Send + Sync + 'static,
    {
        self.rules.insert(class.into(), Box::new(rule));
        self
    }

    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> DecodeLimits {
        self.limits
    }

    pub fn has_rule(&self, class: &str) -> bool {
        self.rules.contains_key(class)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<DecodedValue, Error> {
        pickle::decode_with_limits(payload, self.limits)
    }

    pub fn to_json(&self, payload: &[u8]) -> Result<String, Error> {
        let value = self.to_json_value(&self.decode(payload)?)?;
        serde_json::to_string(&value).map_err(encode_error)
    }

    pub fn to_json_pretty(&self, payload: &[u8]) -> Result<String, Error> {
        let value = self.to_json_value(&self.decode(payload)?)?;
        serde_json::to_string_pretty(&value).map_err(encode_error)
    }

    pub fn to_json_value(&self, value: &DecodedValue) -> Result<Value, Error> {
        if let Some(rule) = value.class_name().and_then(|class| self.rules.get(class)) {
            return rule(self, value);
        }
        match value {
            DecodedValue::Null => Ok(Value::Null),
            DecodedValue::Bool(flag) => Ok(Value::Bool(*flag)),
            DecodedValue::Int(value) => int_number(*value).map(Value::Number),
            DecodedValue::BigInt(digits) => Err(unsupported(format!(
                "integer {digits} is outside the 64-bit JSON number range"
            ))),
            DecodedValue::Float(value) => Number::from_f64(*value)
                .map(Value::Number)
                .ok_or_else(|| unsupported(format!("float {value} has no JSON representation"))),
            DecodedValue::Str(text) => Ok(Value::String(text.clone())),
            DecodedValue::Bytes(bytes) => bytes_text(bytes).map(Value::String),
            DecodedValue::List(items) | DecodedValue::Tuple(items) => items
                .iter()
                .map(|item| self.to_json_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            DecodedValue::Dict(pairs) => {
                let mut map = Map::with_capacity(pairs.len());
                for (key, value) in pairs {
                    map.insert(json_key(key)?, self.to_json_value(value)?);
                }
                Ok(Value::Object(map))
            }
            DecodedValue::Set { .. } | DecodedValue::Object { .. } => {
                let class = value.class_name().unwrap_or("object");
                Err(unsupported(format!("no conversion rule for {class}")).with_hint(format!(
                    "Register a rule for `{class}` to convert it explicitly."
                )))
            }
        }
    }
}

/// Rule rendering sets (native or rebuilt through `set([...])`) as JSON arrays.
pub fn sets_as_arrays() -> impl Fn(&Converter, &DecodedValue) -> Result<Value, Error> + Send + Sync + Clone
{
    |converter: &Converter, value: &DecodedValue| -> Result<Value, Error> {
        let items = match value {
            DecodedValue::Set { items, .. } => items.as_slice(),
            DecodedValue::Object { args, .. } => match args.as_slice() {
                [] => &[][..],
                [seq] => seq
                    .as_sequence()
                    .ok_or_else(|| unsupported("set constructor argument is not a sequence"))?,
                _ => return Err(unsupported("set constructor takes a single sequence")),
            },
            other => {
                return Err(unsupported(format!(
                    "set rule applied to {}",
                    other.type_name()
                )));
            }
        };
        items
            .iter()
            .map(|item| converter.to_json_value(item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

impl Converter {
    pub fn with_sets_as_arrays(self) -> Self {
        let rule = sets_as_arrays();
        SET_CLASSES
            .iter()
            .fold(self, |converter, class| converter.with_rule(*class, rule.clone()))
    }
}

pub fn to_json(payload: &[u8]) -> Result<String, Error> {
    Converter::new().to_json(payload)
}

pub fn to_json_pretty(payload: &[u8]) -> Result<String, Error> {
    Converter::new().to_json_pretty(payload)
}

fn int_number(value: i128) -> Result<Number, Error> {
    if let Ok(signed) = i64::try_from(value) {
        return Ok(Number::from(signed));
    }
    if let Ok(unsigned) = u64::try_from(value) {
        return Ok(Number::from(unsigned));
    }
    Err(unsupported(format!(
        "integer {value} is outside the 64-bit JSON number range"
    )))
}

fn bytes_text(bytes: &[u8]) -> Result<String, Error> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|err| {
            unsupported(format!("byte string {:?} is not valid utf-8", bytes.as_bstr()))
                .with_source(err)
        })
}

fn json_key(key: &DecodedValue) -> Result<String, Error> {
    match key {
        DecodedValue::Str(text) => Ok(text.clone()),
        DecodedValue::Bytes(bytes) => bytes_text(bytes),
        other => Err(unsupported(format!(
            "mapping key of type {} is not a string",
            other.type_name()
        ))),
    }
}

fn unsupported(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::UnsupportedType).with_message(message)
}

fn encode_error(err: serde_json::Error) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("json encode failed")
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{Converter, to_json};
    use crate::core::error::ErrorKind;
    use crate::core::pickle::{DecodeLimits, encode};
    use crate::core::value::DecodedValue;
    use serde_json::{Value, json};

    fn text(value: &str) -> DecodedValue {
        DecodedValue::Str(value.to_string())
    }

    fn decimal_payload() -> Vec<u8> {
        let mut payload = vec![0x80, 0x02, b'c'];
        payload.extend_from_slice(b"decimal\nDecimal\n");
        payload.extend_from_slice(&[b'X', 3, 0, 0, 0]);
        payload.extend_from_slice(b"1.5");
        payload.extend_from_slice(&[0x85, b'R', b'.']);
        payload
    }

    #[test]
    fn protocol0_int_renders_as_number() {
        assert_eq!(to_json(b"I42\n.").unwrap(), "42");
    }

    #[test]
    fn empty_payload_is_malformed() {
        let err = to_json(b"").expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
    }

    #[test]
    fn keys_keep_insertion_order() {
        let value = DecodedValue::Dict(vec![
            (text("zeta"), DecodedValue::Int(1)),
            (text("alpha"), DecodedValue::Int(2)),
            (DecodedValue::Bytes(b"mid".to_vec()), DecodedValue::Null),
        ]);
        let payload = encode(&value).unwrap();
        assert_eq!(to_json(&payload).unwrap(), r#"{"zeta":1,"alpha":2,"mid":null}"#);
    }

    #[test]
    fn duplicate_keys_keep_first_slot_and_last_value() {
        let value = DecodedValue::Dict(vec![
            (text("a"), DecodedValue::Int(1)),
            (text("b"), DecodedValue::Int(2)),
            (text("a"), DecodedValue::Int(3)),
        ]);
        let json = Converter::new().to_json_value(&value).unwrap();
        assert_eq!(serde_json::to_string(&json).unwrap(), r#"{"a":3,"b":2}"#);
    }

    #[test]
    fn integer_key_is_unsupported() {
        let value = DecodedValue::Dict(vec![(DecodedValue::Int(1), text("one"))]);
        let payload = encode(&value).unwrap();
        let err = to_json(&payload).expect_err("int key");
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert!(err.message().unwrap().contains("int"));
    }

    #[test]
    fn tuples_become_arrays() {
        let value = DecodedValue::Tuple(vec![
            text("a.b"),
            DecodedValue::Tuple(vec![DecodedValue::Int(1_467_301_200), DecodedValue::Float(2.5)]),
        ]);
        let json = Converter::new().to_json_value(&value).unwrap();
        assert_eq!(json, json!(["a.b", [1_467_301_200, 2.5]]));
    }

    #[test]
    fn unrepresentable_scalars_are_rejected() {
        let converter = Converter::new();
        let cases = [
            DecodedValue::Float(f64::NAN),
            DecodedValue::Float(f64::INFINITY),
            DecodedValue::Int(i128::from(u64::MAX) + 1),
            DecodedValue::BigInt("1".repeat(45)),
            DecodedValue::Bytes(vec![0xff, 0xfe]),
        ];
        for value in cases {
            let err = converter.to_json_value(&value).expect_err("unsupported");
            assert_eq!(err.kind(), ErrorKind::UnsupportedType, "{value:?}");
        }
        assert_eq!(
            converter.to_json_value(&DecodedValue::Int(u64::MAX.into())).unwrap(),
            json!(u64::MAX)
        );
    }

    #[test]
    fn object_without_rule_is_unsupported() {
        let err = to_json(&decimal_payload()).expect_err("object");
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        assert!(err.message().unwrap().contains("decimal.Decimal"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn registered_rule_converts_object() {
        let converter = Converter::new().with_rule("decimal.Decimal", |_, value| match value {
            DecodedValue::Object { args, .. } => Ok(args
                .first()
                .and_then(DecodedValue::as_str)
                .map(|digits| Value::String(digits.to_string()))
                .unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        });
        assert!(converter.has_rule("decimal.Decimal"));
        assert_eq!(converter.to_json(&decimal_payload()).unwrap(), r#""1.5""#);
    }

    #[test]
    fn sets_need_the_set_rule() {
        // pickle.dumps({1, 2}, protocol=4) without the FRAME header
        let native = [0x80, 0x04, 0x8f, 0x94, b'(', b'K', 1, b'K', 2, 0x90, b'.'];
        // pickle.dumps(set([3]), protocol=2) from Python 2
        let mut reduced = vec![0x80, 0x02, b'c'];
        reduced.extend_from_slice(b"__builtin__\nset\n");
        reduced.extend_from_slice(&[b']', b'K', 3, b'a', 0x85, b'R', b'.']);

        for payload in [native.as_slice(), reduced.as_slice()] {
            let err = to_json(payload).expect_err("set");
            assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        }

        let converter = Converter::new().with_sets_as_arrays();
        assert_eq!(converter.to_json(&native).unwrap(), "[1,2]");
        assert_eq!(converter.to_json(&reduced).unwrap(), "[3]");
    }

    #[test]
    fn limits_flow_into_decoding() {
        let converter = Converter::new().with_limits(DecodeLimits {
            max_depth: 1,
            ..DecodeLimits::default()
        });
        let err = converter.to_json(b"]]]aa.").expect_err("depth");
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert_eq!(converter.limits().max_depth, 1);
    }

    #[test]
    fn pretty_output_is_multiline() {
        let value = DecodedValue::List(vec![DecodedValue::Int(1)]);
        let pretty = super::to_json_pretty(&encode(&value).unwrap()).unwrap();
        assert_eq!(pretty, "[\n  1\n]");
    }
}
