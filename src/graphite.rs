//! Purpose: Graphite metric batches carried inside pickle frames.
//! Exports: `Metric`, `Batch`, `metrics_from_value`.
//! Role: Writer for the protocol 0 batch body graphite's pickle receiver expects, and the
//! reader that turns a decoded batch back into metrics.
//! Invariants: Batch bodies are `[(path, (timestamp, value)), ...]` terminated by STOP.
//! Invariants: Text output is one `path value timestamp` line per metric plus a trailing newline.
use std::fmt::Write as _;

use crate::core::error::{Error, ErrorKind};
use crate::core::frame::encode_frame;
use crate::core::pickle::opcode as op;
use crate::core::value::DecodedValue;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Metric {
    pub path: String,
    pub value: String,
    pub timestamp: i64,
}

impl Metric {
    pub fn new(path: impl Into<String>, value: impl ToString, timestamp: i64) -> Self {
        Self {
            path: path.into(),
            value: value.to_string(),
            timestamp,
        }
    }

    pub fn to_text(&self) -> String {
        format!("{} {} {}", self.path, self.value, self.timestamp)
    }

    fn write_pickle(&self, out: &mut Vec<u8>) {
        out.push(op::MARK);
        write_string(&self.path, out);
        out.push(op::MARK);
        out.push(op::LONG);
        out.extend_from_slice(format!("{}L\n", self.timestamp).as_bytes());
        write_string(&self.value, out);
        out.extend_from_slice(&[op::TUPLE, op::TUPLE, op::APPEND]);
    }
}

#[derive(Clone, Debug, Default)]
pub struct Batch {
    metrics: Vec<Metric>,
    timestamp: i64,
    global_suffix: Option<String>,
}

impl Batch {
    pub fn new(timestamp: i64) -> Self {
        Self {
            metrics: Vec::new(),
            timestamp,
            global_suffix: None,
        }
    }

    pub fn with_global_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.global_suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }

    pub fn add(&mut self, key: &[&str], value: impl ToString) {
        self.add_at(key, value, self.timestamp);
    }

    pub fn add_at(&mut self, key: &[&str], value: impl ToString, timestamp: i64) {
        let mut path = key.join(".");
        if let Some(suffix) = &self.global_suffix {
            path.push('.');
            path.push_str(suffix);
        }
        self.metrics.push(Metric::new(path, value, timestamp));
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn to_text(&self) -> String {
        let mut out = self
            .metrics
            .iter()
            .map(Metric::to_text)
            .collect::<Vec<_>>()
            .join("\n");
        out.push('\n');
        out
    }

    pub fn to_pickle(&self) -> Vec<u8> {
        let mut out = vec![op::MARK, op::LIST];
        for metric in &self.metrics {
            metric.write_pickle(&mut out);
        }
        out.push(op::STOP);
        out
    }

    pub fn to_pickle_frame(&self) -> Result<Vec<u8>, Error> {
        encode_frame(&self.to_pickle())
    }
}

impl FromIterator<Metric> for Batch {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        Self {
            metrics: iter.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// STRING opcode with a single-quoted, escaped literal.
fn write_string(text: &str, out: &mut Vec<u8>) {
    let mut literal = String::with_capacity(text.len() + 2);
    literal.push('\'');
    for byte in text.bytes() {
        match byte {
            b'\\' => literal.push_str("\\\\"),
            b'\'' => literal.push_str("\\'"),
            0x20..=0x7e => literal.push(byte as char),
            _ => {
                let _ = write!(literal, "\\x{byte:02x}");
            }
        }
    }
    literal.push('\'');
    out.push(op::STRING);
    out.extend_from_slice(literal.as_bytes());
    out.push(b'\n');
}

pub fn metrics_from_value(value: &DecodedValue) -> Result<Vec<Metric>, Error> {
    let DecodedValue::List(entries) = value else {
        return Err(shape_error(format!(
            "graphite batch must be a list, found {}",
            value.type_name()
        )));
    };
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            metric_from_entry(entry).map_err(|msg| shape_error(format!("entry {idx}: {msg}")))
        })
        .collect()
}

fn metric_from_entry(entry: &DecodedValue) -> Result<Metric, String> {
    let [path, datapoint] = entry.as_sequence().ok_or("expected (path, (timestamp, value))")? else {
        return Err("expected (path, (timestamp, value))".to_string());
    };
    let path = path.as_str().ok_or("path is not a string")?;
    let [timestamp, value] = datapoint.as_sequence().ok_or("datapoint is not a pair")? else {
        return Err("datapoint is not a pair".to_string());
    };
    let timestamp = match timestamp {
        DecodedValue::Int(ts) => i64::try_from(*ts).map_err(|_| "timestamp out of range".to_string())?,
        DecodedValue::Float(ts) if ts.is_finite() => ts.round() as i64,
        other => return Err(format!("timestamp is a {}", other.type_name())),
    };
    let value = match value {
        DecodedValue::Int(number) => number.to_string(),
        DecodedValue::Float(number) => number.to_string(),
        other => other
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("value is a {}", other.type_name()))?,
    };
    Ok(Metric::new(path, value, timestamp))
}

fn shape_error(message: String) -> Error {
    Error::new(ErrorKind::UnsupportedType).with_message(message)
}
