//! Purpose: Owned tree produced by the pickle decoder.
//! Exports: `DecodedValue`.
//! Role: Neutral representation between pickle opcodes and JSON text.
//! Invariants: Trees are acyclic; shared references were expanded into copies.
//! Invariants: Dict keys may be any value here; key validation happens at JSON conversion.

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedValue {
    Null,
    Bool(bool),
    Int(i128),
    /// Decimal text of an integer wider than `i128`.
    BigInt(String),
    Float(f64),
    /// Python 2 `str` or Python 3 `bytes`.
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<DecodedValue>),
    Tuple(Vec<DecodedValue>),
    Dict(Vec<(DecodedValue, DecodedValue)>),
    Set {
        frozen: bool,
        items: Vec<DecodedValue>,
    },
    /// A native object rebuilt by REDUCE/NEWOBJ/INST/OBJ, kept uninterpreted.
    Object {
        class: String,
        args: Vec<DecodedValue>,
        state: Option<Box<DecodedValue>>,
    },
}

impl DecodedValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DecodedValue::Null => "None",
            DecodedValue::Bool(_) => "bool",
            DecodedValue::Int(_) | DecodedValue::BigInt(_) => "int",
            DecodedValue::Float(_) => "float",
            DecodedValue::Bytes(_) => "bytes",
            DecodedValue::Str(_) => "str",
            DecodedValue::List(_) => "list",
            DecodedValue::Tuple(_) => "tuple",
            DecodedValue::Dict(_) => "dict",
            DecodedValue::Set { frozen: false, .. } => "set",
            DecodedValue::Set { frozen: true, .. } => "frozenset",
            DecodedValue::Object { .. } => "object",
        }
    }

    /// Dotted class name used to look up conversion rules.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            DecodedValue::Object { class, .. } => Some(class),
            DecodedValue::Set { frozen: false, .. } => Some("builtins.set"),
            DecodedValue::Set { frozen: true, .. } => Some("builtins.frozenset"),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DecodedValue::Str(text) => Some(text),
            DecodedValue::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// Items of a list or tuple.
    pub fn as_sequence(&self) -> Option<&[DecodedValue]> {
        match self {
            DecodedValue::List(items) | DecodedValue::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DecodedValue;

    #[test]
    fn py2_str_reads_as_text_when_utf8() {
        let value = DecodedValue::Bytes(b"stats.count".to_vec());
        assert_eq!(value.as_str(), Some("stats.count"));
        assert_eq!(DecodedValue::Bytes(vec![0xff]).as_str(), None);
    }

    #[test]
    fn sets_report_builtin_class_names() {
        let set = DecodedValue::Set {
            frozen: true,
            items: vec![],
        };
        assert_eq!(set.class_name(), Some("builtins.frozenset"));
        assert_eq!(set.type_name(), "frozenset");
        assert_eq!(DecodedValue::Int(1).class_name(), None);
    }
}
