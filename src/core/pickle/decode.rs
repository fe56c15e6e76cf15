//! Purpose: Decode a pickle opcode stream into an owned `DecodedValue` tree.
//! Exports: `DecodeLimits`, `decode`, `decode_with_limits`.
//! Role: Tagged-variant machine; one handler per opcode, no dynamic dispatch on types.
//! Invariants: Unknown or out-of-band opcodes fail as `MalformedPayload` with the opcode offset.
//! Invariants: Containers live in an arena so memo sharing keeps identity until expansion.
//! Invariants: Expansion deep-copies shared references and rejects cycles as `UnsupportedType`.
use std::collections::HashMap;
use std::rc::Rc;

use crate::core::error::{Error, ErrorKind};
use crate::core::pickle::opcode as op;
use crate::core::pickle::text::{self, TextInt};
use crate::core::value::DecodedValue;

pub const DEFAULT_MAX_DEPTH: usize = 512;
pub const DEFAULT_MAX_NODES: usize = 1 << 20;
pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;
const MAX_LONG_BYTES: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodeLimits {
    /// Deepest container nesting accepted in the expanded tree.
    pub max_depth: usize,
    /// Total values produced while expanding shared references.
    pub max_nodes: usize,
    /// Total string and bytes content produced while expanding shared references.
    pub max_bytes: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

pub fn decode(payload: &[u8]) -> Result<DecodedValue, Error> {
    decode_with_limits(payload, DecodeLimits::default())
}

pub fn decode_with_limits(payload: &[u8], limits: DecodeLimits) -> Result<DecodedValue, Error> {
    if payload.is_empty() {
        return Err(Error::new(ErrorKind::MalformedPayload)
            .with_message("empty payload")
            .with_offset(0));
    }
    let mut machine = Machine::new(payload, limits);
    let root = machine.run()?;
    tracing::debug!(
        ops = machine.ops,
        containers = machine.arena.len(),
        memo = machine.memo.len(),
        protocol = machine.protocol,
        "decoded pickle stream"
    );
    if machine.pos < payload.len() {
        tracing::debug!(trailing = payload.len() - machine.pos, "ignoring bytes after STOP");
    }
    let mut expander = Expander::new(&machine.arena, limits);
    expander.expand(&root, 0)
}

type NodeId = usize;

#[derive(Clone, Debug)]
enum Item {
    Null,
    Bool(bool),
    Int(i128),
    BigInt(Rc<str>),
    Float(f64),
    Bytes(Rc<[u8]>),
    Str(Rc<str>),
    Global(Rc<str>),
    Node(NodeId),
}

#[derive(Debug)]
enum Node {
    List(Vec<Item>),
    Tuple(Vec<Item>),
    Dict(Vec<(Item, Item)>),
    Set {
        frozen: bool,
        items: Vec<Item>,
    },
    Object {
        class: Rc<str>,
        args: Vec<Item>,
        state: Option<Item>,
    },
}

struct Machine<'a> {
    data: &'a [u8],
    pos: usize,
    op_start: usize,
    stack: Vec<Item>,
    marks: Vec<usize>,
    memo: HashMap<u64, Item>,
    arena: Vec<Node>,
    protocol: u8,
    ops: usize,
    limits: DecodeLimits,
    /// Argument values copied out of tuples by REDUCE/NEWOBJ/NEWOBJ_EX.
    copied: usize,
}

impl<'a> Machine<'a> {
    fn new(data: &'a [u8], limits: DecodeLimits) -> Self {
        Self {
            data,
            pos: 0,
            op_start: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            arena: Vec::new(),
            protocol: 0,
            ops: 0,
            limits,
            copied: 0,
        }
    }

    fn run(&mut self) -> Result<Item, Error> {
        loop {
            self.op_start = self.pos;
            let code = self.read_u8()?;
            self.ops += 1;
            if code == op::STOP {
                return self.pop();
            }
            self.step(code)?;
        }
    }

    fn step(&mut self, code: u8) -> Result<(), Error> {
        match code {
            op::PROTO => {
                let version = self.read_u8()?;
                if version > op::HIGHEST_PROTOCOL {
                    return Err(self.malformed(format!("unsupported pickle protocol {version}")));
                }
                self.protocol = version;
            }
            op::FRAME => {
                self.read_u64_le()?;
            }

            op::MARK => self.marks.push(self.stack.len()),
            op::POP => {
                if self.stack.len() > self.mark_base() {
                    self.stack.pop();
                } else {
                    self.pop_mark()?;
                }
            }
            op::POP_MARK => {
                self.pop_mark()?;
            }
            op::DUP => {
                let top = self.top()?.clone();
                self.stack.push(top);
            }

            op::NONE => self.stack.push(Item::Null),
            op::NEWTRUE => self.stack.push(Item::Bool(true)),
            op::NEWFALSE => self.stack.push(Item::Bool(false)),
            op::INT => {
                let line = self.read_line()?;
                let value = text::parse_int(line).map_err(|msg| self.malformed(msg))?;
                self.stack.push(text_int(value));
            }
            op::LONG => {
                let line = self.read_line()?;
                let value = text::parse_long(line).map_err(|msg| self.malformed(msg))?;
                self.stack.push(text_int(value));
            }
            op::BININT => {
                let bytes = self.read_array::<4>()?;
                self.stack.push(Item::Int(i32::from_le_bytes(bytes).into()));
            }
            op::BININT1 => {
                let value = self.read_u8()?;
                self.stack.push(Item::Int(value.into()));
            }
            op::BININT2 => {
                let bytes = self.read_array::<2>()?;
                self.stack.push(Item::Int(u16::from_le_bytes(bytes).into()));
            }
            op::LONG1 => {
                let len = usize::from(self.read_u8()?);
                let bytes = self.take(len)?;
                self.stack.push(decode_long(bytes));
            }
            op::LONG4 => {
                let len = self.read_signed_len()?;
                if len > MAX_LONG_BYTES {
                    return Err(self.malformed(format!(
                        "LONG4 of {len} bytes exceeds {MAX_LONG_BYTES} byte limit"
                    )));
                }
                let bytes = self.take(len)?;
                self.stack.push(decode_long(bytes));
            }
            op::FLOAT => {
                let line = self.read_line()?;
                let value = text::parse_float(line).map_err(|msg| self.malformed(msg))?;
                self.stack.push(Item::Float(value));
            }
            op::BINFLOAT => {
                let bytes = self.read_array::<8>()?;
                self.stack.push(Item::Float(f64::from_be_bytes(bytes)));
            }

            op::STRING => {
                let line = self.read_line()?;
                let bytes = text::unquote_string(line).map_err(|msg| self.malformed(msg))?;
                self.stack.push(Item::Bytes(bytes.into()));
            }
            op::BINSTRING => {
                let len = self.read_signed_len()?;
                self.push_bytes(len)?;
            }
            op::SHORT_BINSTRING | op::SHORT_BINBYTES => {
                let len = usize::from(self.read_u8()?);
                self.push_bytes(len)?;
            }
            op::BINBYTES => {
                let len = self.read_u32_len()?;
                self.push_bytes(len)?;
            }
            op::BINBYTES8 | op::BYTEARRAY8 => {
                let len = self.read_u64_len()?;
                self.push_bytes(len)?;
            }
            op::UNICODE => {
                let line = self.read_line()?;
                let value =
                    text::decode_raw_unicode_escape(line).map_err(|msg| self.malformed(msg))?;
                self.stack.push(Item::Str(value.into()));
            }
            op::SHORT_BINUNICODE => {
                let len = usize::from(self.read_u8()?);
                self.push_utf8(len)?;
            }
            op::BINUNICODE => {
                let len = self.read_u32_len()?;
                self.push_utf8(len)?;
            }
            op::BINUNICODE8 => {
                let len = self.read_u64_len()?;
                self.push_utf8(len)?;
            }

            op::EMPTY_LIST => self.push_node(Node::List(Vec::new())),
            op::LIST => {
                let items = self.pop_mark()?;
                self.push_node(Node::List(items));
            }
            op::APPEND => {
                let value = self.pop()?;
                self.extend_list(vec![value])?;
            }
            op::APPENDS => {
                let items = self.pop_mark()?;
                self.extend_list(items)?;
            }

            op::EMPTY_TUPLE => self.push_node(Node::Tuple(Vec::new())),
            op::TUPLE => {
                let items = self.pop_mark()?;
                self.push_node(Node::Tuple(items));
            }
            op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                let arity = usize::from(code - op::TUPLE1) + 1;
                if self.stack.len() < self.mark_base() + arity {
                    return Err(self.malformed("stack underflow"));
                }
                let items = self.stack.split_off(self.stack.len() - arity);
                self.push_node(Node::Tuple(items));
            }

            op::EMPTY_DICT => self.push_node(Node::Dict(Vec::new())),
            op::DICT => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                self.push_node(Node::Dict(pairs));
            }
            op::SETITEM => {
                let value = self.pop()?;
                let key = self.pop()?;
                self.extend_dict(vec![(key, value)])?;
            }
            op::SETITEMS => {
                let items = self.pop_mark()?;
                let pairs = self.pairs(items)?;
                self.extend_dict(pairs)?;
            }

            op::EMPTY_SET => self.push_node(Node::Set {
                frozen: false,
                items: Vec::new(),
            }),
            op::ADDITEMS => {
                let items = self.pop_mark()?;
                let id = self.top_node()?;
                match &mut self.arena[id] {
                    Node::Set {
                        frozen: false,
                        items: set,
                    } => set.extend(items),
                    _ => return Err(self.malformed("ADDITEMS target is not a set")),
                }
            }
            op::FROZENSET => {
                let items = self.pop_mark()?;
                self.push_node(Node::Set {
                    frozen: true,
                    items,
                });
            }

            op::PUT => {
                let line = self.read_line()?;
                let key = self.memo_key(line)?;
                self.memoize(key)?;
            }
            op::BINPUT => {
                let key = u64::from(self.read_u8()?);
                self.memoize(key)?;
            }
            op::LONG_BINPUT => {
                let key = u64::from(u32::from_le_bytes(self.read_array::<4>()?));
                self.memoize(key)?;
            }
            op::MEMOIZE => {
                let key = self.memo.len() as u64;
                self.memoize(key)?;
            }
            op::GET => {
                let line = self.read_line()?;
                let key = self.memo_key(line)?;
                self.recall(key)?;
            }
            op::BINGET => {
                let key = u64::from(self.read_u8()?);
                self.recall(key)?;
            }
            op::LONG_BINGET => {
                let key = u64::from(u32::from_le_bytes(self.read_array::<4>()?));
                self.recall(key)?;
            }

            op::GLOBAL => {
                let module = self.read_line()?;
                let name = self.read_line()?;
                let class = self.qualified_name(module, name)?;
                self.stack.push(Item::Global(class.into()));
            }
            op::STACK_GLOBAL => {
                let name = self.pop()?;
                let module = self.pop()?;
                match (module, name) {
                    (Item::Str(module), Item::Str(name)) => {
                        self.stack.push(Item::Global(format!("{module}.{name}").into()));
                    }
                    _ => return Err(self.malformed("STACK_GLOBAL requires two str operands")),
                }
            }
            op::REDUCE => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let class = self.global_name(callable, "REDUCE")?;
                let args = self.tuple_items(args, "REDUCE")?;
                self.push_object(class, args);
            }
            op::NEWOBJ => {
                let args = self.pop()?;
                let cls = self.pop()?;
                let class = self.global_name(cls, "NEWOBJ")?;
                let args = self.tuple_items(args, "NEWOBJ")?;
                self.push_object(class, args);
            }
            op::NEWOBJ_EX => {
                let kwargs = self.pop()?;
                let args = self.pop()?;
                let cls = self.pop()?;
                let class = self.global_name(cls, "NEWOBJ_EX")?;
                let mut args = self.tuple_items(args, "NEWOBJ_EX")?;
                let has_kwargs = match &kwargs {
                    Item::Node(id) => match &self.arena[*id] {
                        Node::Dict(pairs) => !pairs.is_empty(),
                        _ => return Err(self.malformed("NEWOBJ_EX kwargs is not a dict")),
                    },
                    _ => return Err(self.malformed("NEWOBJ_EX kwargs is not a dict")),
                };
                if has_kwargs {
                    args.push(kwargs);
                }
                self.push_object(class, args);
            }
            op::INST => {
                let module = self.read_line()?;
                let name = self.read_line()?;
                let class = self.qualified_name(module, name)?;
                let args = self.pop_mark()?;
                self.push_object(class.into(), args);
            }
            op::OBJ => {
                let mut items = self.pop_mark()?;
                if items.is_empty() {
                    return Err(self.malformed("OBJ without a class operand"));
                }
                let cls = items.remove(0);
                let class = self.global_name(cls, "OBJ")?;
                self.push_object(class, items);
            }
            op::BUILD => {
                let state = self.pop()?;
                let id = self.top_node()?;
                match &mut self.arena[id] {
                    Node::Object { state: slot, .. } => *slot = Some(state),
                    _ => return Err(self.malformed("BUILD target is not an object")),
                }
            }

            op::PERSID
            | op::BINPERSID
            | op::EXT1
            | op::EXT2
            | op::EXT4
            | op::NEXT_BUFFER
            | op::READONLY_BUFFER => {
                let name = op::name(code).unwrap_or("?");
                return Err(self.malformed(format!("unsupported opcode {name}")));
            }
            other => {
                return Err(self.malformed(format!("unknown opcode {other:#04x}")));
            }
        }
        Ok(())
    }

    fn malformed(&self, message: impl Into<String>) -> Error {
        Error::new(ErrorKind::MalformedPayload)
            .with_message(message)
            .with_offset(self.op_start as u64)
    }

    fn mark_base(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    fn pop(&mut self) -> Result<Item, Error> {
        if self.stack.len() <= self.mark_base() {
            return Err(self.malformed("stack underflow"));
        }
        self.stack.pop().ok_or_else(|| self.malformed("stack underflow"))
    }

    fn top(&self) -> Result<&Item, Error> {
        if self.stack.len() <= self.mark_base() {
            return Err(self.malformed("stack underflow"));
        }
        self.stack.last().ok_or_else(|| self.malformed("stack underflow"))
    }

    fn top_node(&self) -> Result<NodeId, Error> {
        match self.top()? {
            Item::Node(id) => Ok(*id),
            _ => Err(self.malformed("expected a container on top of the stack")),
        }
    }

    fn pop_mark(&mut self) -> Result<Vec<Item>, Error> {
        let mark = self.marks.pop().ok_or_else(|| self.malformed("MARK not found"))?;
        Ok(self.stack.split_off(mark))
    }

    fn push_node(&mut self, node: Node) {
        self.arena.push(node);
        self.stack.push(Item::Node(self.arena.len() - 1));
    }

    fn push_object(&mut self, class: Rc<str>, args: Vec<Item>) {
        self.push_node(Node::Object {
            class,
            args,
            state: None,
        });
    }

    fn push_bytes(&mut self, len: usize) -> Result<(), Error> {
        let bytes = self.take(len)?;
        self.stack.push(Item::Bytes(bytes.into()));
        Ok(())
    }

    fn push_utf8(&mut self, len: usize) -> Result<(), Error> {
        let bytes = self.take(len)?;
        let text = std::str::from_utf8(bytes).map_err(|err| {
            self.malformed("string payload is not valid utf-8")
                .with_source(err)
        })?;
        self.stack.push(Item::Str(text.into()));
        Ok(())
    }

    fn extend_list(&mut self, items: Vec<Item>) -> Result<(), Error> {
        let id = self.top_node()?;
        match &mut self.arena[id] {
            Node::List(list) => {
                list.extend(items);
                Ok(())
            }
            _ => Err(self.malformed("APPEND target is not a list")),
        }
    }

    fn extend_dict(&mut self, pairs: Vec<(Item, Item)>) -> Result<(), Error> {
        let id = self.top_node()?;
        match &mut self.arena[id] {
            Node::Dict(dict) => {
                dict.extend(pairs);
                Ok(())
            }
            _ => Err(self.malformed("SETITEM target is not a dict")),
        }
    }

    fn pairs(&self, items: Vec<Item>) -> Result<Vec<(Item, Item)>, Error> {
        if items.len() % 2 != 0 {
            return Err(self.malformed("odd number of items for dict"));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    fn memoize(&mut self, key: u64) -> Result<(), Error> {
        let top = self.top()?.clone();
        self.memo.insert(key, top);
        Ok(())
    }

    fn recall(&mut self, key: u64) -> Result<(), Error> {
        let item = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| self.malformed(format!("memo key {key} not found")))?;
        self.stack.push(item);
        Ok(())
    }

    fn memo_key(&self, line: &[u8]) -> Result<u64, Error> {
        std::str::from_utf8(line)
            .ok()
            .and_then(|text| text.trim().parse::<u64>().ok())
            .ok_or_else(|| self.malformed("invalid memo key"))
    }

    fn qualified_name(&self, module: &[u8], name: &[u8]) -> Result<String, Error> {
        match (std::str::from_utf8(module), std::str::from_utf8(name)) {
            (Ok(module), Ok(name)) => Ok(format!("{module}.{name}")),
            _ => Err(self.malformed("global name is not valid utf-8")),
        }
    }

    fn global_name(&self, item: Item, opname: &str) -> Result<Rc<str>, Error> {
        match item {
            Item::Global(class) => Ok(class),
            _ => Err(self.malformed(format!("{opname} callable is not a global"))),
        }
    }

    fn tuple_items(&mut self, item: Item, opname: &str) -> Result<Vec<Item>, Error> {
        let Item::Node(id) = item else {
            return Err(self.malformed(format!("{opname} arguments are not a tuple")));
        };
        let Node::Tuple(items) = &self.arena[id] else {
            return Err(self.malformed(format!("{opname} arguments are not a tuple")));
        };
        let copied = self.copied.saturating_add(items.len());
        if copied > self.limits.max_nodes {
            return Err(self.malformed(format!(
                "constructor arguments exceed max nodes {}",
                self.limits.max_nodes
            )));
        }
        let items = items.clone();
        self.copied = copied;
        Ok(items)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let data = self.data;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| self.malformed("pickle data was truncated"))?;
        let out = &data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u64_le(&mut self) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_signed_len(&mut self) -> Result<usize, Error> {
        let len = i32::from_le_bytes(self.read_array::<4>()?);
        usize::try_from(len).map_err(|_| self.malformed(format!("negative length {len}")))
    }

    fn read_u32_len(&mut self) -> Result<usize, Error> {
        let len = u32::from_le_bytes(self.read_array::<4>()?);
        usize::try_from(len).map_err(|_| self.malformed("length exceeds address space"))
    }

    fn read_u64_len(&mut self) -> Result<usize, Error> {
        let len = self.read_u64_le()?;
        usize::try_from(len).map_err(|_| self.malformed("length exceeds address space"))
    }

    fn read_line(&mut self) -> Result<&'a [u8], Error> {
        let data = self.data;
        let rest = &data[self.pos..];
        let newline = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| self.malformed("pickle data was truncated"))?;
        self.pos += newline + 1;
        Ok(&rest[..newline])
    }
}

fn text_int(value: TextInt) -> Item {
    match value {
        TextInt::Bool(flag) => Item::Bool(flag),
        TextInt::Int(value) => Item::Int(value),
        TextInt::Big(digits) => Item::BigInt(digits.into()),
    }
}

/// LONG1/LONG4 body: little-endian two's complement.
fn decode_long(bytes: &[u8]) -> Item {
    let Some(&last) = bytes.last() else {
        return Item::Int(0);
    };
    let negative = last & 0x80 != 0;
    let fill = if negative { 0xff } else { 0x00 };
    let mut len = bytes.len();
    while len > 1 && bytes[len - 1] == fill && ((bytes[len - 2] & 0x80 != 0) == negative) {
        len -= 1;
    }
    let bytes = &bytes[..len];
    if len <= 16 {
        let mut buf = [fill; 16];
        buf[..len].copy_from_slice(bytes);
        return Item::Int(i128::from_le_bytes(buf));
    }
    Item::BigInt(big_decimal(bytes, negative).into())
}

fn big_decimal(bytes: &[u8], negative: bool) -> String {
    let mut magnitude = bytes.to_vec();
    if negative {
        let mut carry = true;
        for byte in magnitude.iter_mut() {
            *byte = !*byte;
            if carry {
                let (sum, overflow) = byte.overflowing_add(1);
                *byte = sum;
                carry = overflow;
            }
        }
    }
    let mut limbs: Vec<u32> = magnitude
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect();

    const CHUNK: u64 = 1_000_000_000;
    let mut chunks = Vec::new();
    while limbs.iter().any(|&limb| limb != 0) {
        let mut rem: u64 = 0;
        for limb in limbs.iter_mut().rev() {
            let cur = (rem << 32) | u64::from(*limb);
            *limb = (cur / CHUNK) as u32;
            rem = cur % CHUNK;
        }
        chunks.push(rem as u32);
        while limbs.last() == Some(&0) {
            limbs.pop();
        }
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    let mut iter = chunks.iter().rev();
    if let Some(first) = iter.next() {
        out.push_str(&first.to_string());
    }
    for chunk in iter {
        out.push_str(&format!("{chunk:09}"));
    }
    out
}

struct Expander<'m> {
    arena: &'m [Node],
    limits: DecodeLimits,
    nodes: usize,
    bytes: usize,
    active: Vec<bool>,
}

impl<'m> Expander<'m> {
    fn new(arena: &'m [Node], limits: DecodeLimits) -> Self {
        Self {
            arena,
            limits,
            nodes: 0,
            bytes: 0,
            active: vec![false; arena.len()],
        }
    }

    fn expand(&mut self, item: &Item, depth: usize) -> Result<DecodedValue, Error> {
        if depth > self.limits.max_depth {
            return Err(Error::new(ErrorKind::MalformedPayload).with_message(format!(
                "nesting exceeds max depth {}",
                self.limits.max_depth
            )));
        }
        self.nodes += 1;
        if self.nodes > self.limits.max_nodes {
            return Err(Error::new(ErrorKind::MalformedPayload).with_message(format!(
                "expanded value exceeds {} nodes",
                self.limits.max_nodes
            )));
        }

        let value = match item {
            Item::Null => DecodedValue::Null,
            Item::Bool(flag) => DecodedValue::Bool(*flag),
            Item::Int(value) => DecodedValue::Int(*value),
            Item::BigInt(digits) => DecodedValue::BigInt(digits.to_string()),
            Item::Float(value) => DecodedValue::Float(*value),
            Item::Bytes(bytes) => {
                self.charge_bytes(bytes.len())?;
                DecodedValue::Bytes(bytes.to_vec())
            }
            Item::Str(text) => {
                self.charge_bytes(text.len())?;
                DecodedValue::Str(text.to_string())
            }
            Item::Global(class) => {
                return Err(Error::new(ErrorKind::UnsupportedType)
                    .with_message(format!("bare reference to global {class}")));
            }
            Item::Node(id) => self.expand_node(*id, depth)?,
        };
        Ok(value)
    }

    fn expand_node(&mut self, id: NodeId, depth: usize) -> Result<DecodedValue, Error> {
        let arena = self.arena;
        let node = &arena[id];
        if self.active[id] {
            return Err(Error::new(ErrorKind::UnsupportedType).with_message(format!(
                "reference cycle through {}",
                node_type_name(node)
            )));
        }
        self.active[id] = true;
        let value = match node {
            Node::List(items) => DecodedValue::List(self.expand_all(items, depth)?),
            Node::Tuple(items) => DecodedValue::Tuple(self.expand_all(items, depth)?),
            Node::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.expand(key, depth + 1)?;
                    let value = self.expand(value, depth + 1)?;
                    out.push((key, value));
                }
                DecodedValue::Dict(out)
            }
            Node::Set { frozen, items } => DecodedValue::Set {
                frozen: *frozen,
                items: self.expand_all(items, depth)?,
            },
            Node::Object { class, args, state } => {
                let (class, args) = object_parts(class, args);
                let args = self.expand_all(args, depth)?;
                let state = match state {
                    Some(state) => Some(Box::new(self.expand(state, depth + 1)?)),
                    None => None,
                };
                DecodedValue::Object {
                    class: class.to_string(),
                    args,
                    state,
                }
            }
        };
        self.active[id] = false;
        Ok(value)
    }

    fn expand_all(&mut self, items: &[Item], depth: usize) -> Result<Vec<DecodedValue>, Error> {
        items
            .iter()
            .map(|item| self.expand(item, depth + 1))
            .collect()
    }

    fn charge_bytes(&mut self, len: usize) -> Result<(), Error> {
        self.bytes = self.bytes.saturating_add(len);
        if self.bytes > self.limits.max_bytes {
            return Err(Error::new(ErrorKind::MalformedPayload).with_message(format!(
                "expanded value exceeds {} bytes of text",
                self.limits.max_bytes
            )));
        }
        Ok(())
    }
}

const RECONSTRUCTORS: &[&str] = &["copy_reg._reconstructor", "copyreg._reconstructor"];

/// Protocol 0/1 new-style instances are `_reconstructor(cls, base, state)`; report `cls`.
fn object_parts<'i>(class: &'i str, args: &'i [Item]) -> (&'i str, &'i [Item]) {
    if RECONSTRUCTORS.contains(&class) {
        if let [Item::Global(inner), Item::Global(_), rest @ ..] = args {
            let rest = match rest {
                [Item::Null] => &[][..],
                rest => rest,
            };
            return (&**inner, rest);
        }
    }
    (class, args)
}

fn node_type_name(node: &Node) -> &'static str {
    match node {
        Node::List(_) => "list",
        Node::Tuple(_) => "tuple",
        Node::Dict(_) => "dict",
        Node::Set { .. } => "set",
        Node::Object { .. } => "object",
    }
}
