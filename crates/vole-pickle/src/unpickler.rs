use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use vole_core::{PickleError, Result};

use crate::class::{Class, ClassResolver};
use crate::opcode::{Opcode, HIGHEST_PROTOCOL};
use crate::persistent::PersistentLoader;
use crate::reader::FrameReader;
use crate::value::{Dict, Value};

// Pickle virtual machine
//
// State:
//
//   stack      operands of the object being built
//   metastack  stacks saved by MARK; the matching pop_mark restores one and
//              hands back everything pushed since the mark
//   memo       integer id -> value, written by PUT/MEMOIZE, read by GET
//
// Opcodes run strictly in stream order and the machine stops at the first
// error. STOP pops the root value.
//
// Hooks set up by the builder methods:
//
//   persistent loader   PERSID/BINPERSID payloads, where checkpoint storages
//                       come from. Without one, both opcodes fail.
//   class resolver      consulted for (module, name) pairs the built-in table
//                       does not know, before falling back to Generic.
//   strict              unknown pairs fail with UnresolvedClass instead.
//   extensions          code -> (module, name) table for EXT1/EXT2/EXT4.
//   buffers             out-of-band buffers for NEXT_BUFFER.

/// Decoder for one pickle stream.
pub struct Unpickler<'a, R> {
    reader: FrameReader<R>,
    stack: Vec<Value>,
    metastack: Vec<Vec<Value>>,
    memo: HashMap<u64, Value>,
    persistent: Option<Box<dyn PersistentLoader + 'a>>,
    resolver: Option<Box<dyn ClassResolver + 'a>>,
    strict: bool,
    extensions: HashMap<i32, (String, String)>,
    buffers: VecDeque<Vec<u8>>,
    proto: u8,
}

impl<'a, R: Read> Unpickler<'a, R> {
    pub fn new(reader: R) -> Self {
        Unpickler {
            reader: FrameReader::new(reader),
            stack: Vec::new(),
            metastack: Vec::new(),
            memo: HashMap::new(),
            persistent: None,
            resolver: None,
            strict: false,
            extensions: HashMap::new(),
            buffers: VecDeque::new(),
            proto: 0,
        }
    }

    pub fn with_persistent_loader(mut self, loader: impl PersistentLoader + 'a) -> Self {
        self.persistent = Some(Box::new(loader));
        self
    }

    pub fn with_class_resolver(mut self, resolver: impl ClassResolver + 'a) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Fail on classes neither the built-in table nor the resolver knows.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Register an extension code for EXT1/EXT2/EXT4.
    pub fn with_extension(mut self, code: i32, module: &str, name: &str) -> Self {
        self.extensions
            .insert(code, (module.to_string(), name.to_string()));
        self
    }

    /// Out-of-band buffers consumed in order by NEXT_BUFFER.
    pub fn with_buffers(mut self, buffers: Vec<Vec<u8>>) -> Self {
        self.buffers = buffers.into();
        self
    }

    /// Protocol announced by the last PROTO opcode, 0 if none.
    pub fn protocol(&self) -> u8 {
        self.proto
    }

    /// Run the machine until STOP and return the root value.
    ///
    /// The memo persists across calls; the stacks do not.
    pub fn load(&mut self) -> Result<Value> {
        self.stack.clear();
        self.metastack.clear();
        loop {
            let byte = self.reader.read_u8()?;
            let op = Opcode::from_byte(byte).ok_or(PickleError::UnknownOpcode(byte))?;
            log::trace!("pickle opcode {}", op.name());
            if op == Opcode::Stop {
                return self.pop();
            }
            self.dispatch(op)?;
        }
    }

    // Stack helpers

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| PickleError::StackUnderflow.into())
    }

    fn top(&mut self) -> Result<&mut Value> {
        self.stack
            .last_mut()
            .ok_or_else(|| PickleError::StackUnderflow.into())
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        let prev = self.metastack.pop().ok_or(PickleError::StackUnderflow)?;
        Ok(std::mem::replace(&mut self.stack, prev))
    }

    fn memo_get(&self, id: u64) -> Result<Value> {
        self.memo
            .get(&id)
            .cloned()
            .ok_or_else(|| PickleError::MemoMiss(id).into())
    }

    fn memo_put(&mut self, id: u64) -> Result<()> {
        let v = self.stack.last().ok_or(PickleError::StackUnderflow)?.clone();
        self.memo.insert(id, v);
        Ok(())
    }

    fn resolve_class(&self, module: &str, name: &str) -> Result<Value> {
        let class = Class::builtin(module, name)
            .or_else(|| self.resolver.as_ref().and_then(|r| r.resolve(module, name)));
        match class {
            Some(c) => Ok(Value::Class(Rc::new(c))),
            None if self.strict => Err(PickleError::UnresolvedClass {
                module: module.to_string(),
                name: name.to_string(),
            }
            .into()),
            None => Ok(Value::Class(Rc::new(Class::generic(module, name)))),
        }
    }

    fn persistent_load(&mut self, pid: Value) -> Result<Value> {
        match self.persistent.as_mut() {
            Some(loader) => loader.load(pid),
            None => Err(PickleError::UnsupportedPersistentId(format!(
                "no persistent loader for {}",
                pid.key_string()
            ))
            .into()),
        }
    }

    // Operand readers

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.reader.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.reader.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.reader.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.reader.read_array()?))
    }

    fn read_len(&mut self, width: usize) -> Result<usize> {
        let n = match width {
            1 => self.reader.read_u8()? as u64,
            4 => self.read_u32()? as u64,
            _ => self.read_u64()?,
        };
        usize::try_from(n).map_err(|_| malformed(format!("length {n} does not fit in memory")))
    }

    fn read_utf8(&mut self, width: usize) -> Result<Value> {
        let n = self.read_len(width)?;
        let bytes = self.reader.read_bytes(n)?;
        String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|_| malformed("string is not valid UTF-8".to_string()))
    }

    fn read_bytes_value(&mut self, width: usize) -> Result<Value> {
        let n = self.read_len(width)?;
        Ok(Value::Bytes(self.reader.read_bytes(n)?))
    }

    // Legacy byte strings decode to text when they are valid UTF-8.
    fn legacy_string(bytes: Vec<u8>) -> Value {
        match String::from_utf8(bytes) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }

    fn read_decimal_line(&mut self) -> Result<u64> {
        let line = self.reader.read_str_line()?;
        line.trim()
            .parse::<u64>()
            .map_err(|_| malformed(format!("invalid memo id {line:?}")))
    }

    fn dispatch(&mut self, op: Opcode) -> Result<()> {
        match op {
            Opcode::Stop => unreachable!("STOP is handled by load"),

            // Control
            Opcode::Proto => {
                let proto = self.reader.read_u8()?;
                if proto > HIGHEST_PROTOCOL {
                    return Err(PickleError::UnsupportedProtocol(proto).into());
                }
                self.proto = proto;
            }
            Opcode::Frame => {
                let len = self.read_u64()?;
                self.reader.load_frame(len)?;
            }
            Opcode::Mark => {
                let stack = std::mem::take(&mut self.stack);
                self.metastack.push(stack);
            }
            Opcode::Pop => {
                if self.stack.pop().is_none() {
                    self.pop_mark()?;
                }
            }
            Opcode::PopMark => {
                self.pop_mark()?;
            }
            Opcode::Dup => {
                let v = self.top()?.clone();
                self.push(v);
            }

            // Primitives
            Opcode::None => self.push(Value::None),
            Opcode::NewTrue => self.push(Value::Bool(true)),
            Opcode::NewFalse => self.push(Value::Bool(false)),
            Opcode::Int => {
                let line = self.reader.read_str_line()?;
                let v = match line.trim() {
                    "00" => Value::Bool(false),
                    "01" => Value::Bool(true),
                    s => parse_decimal_int(s)?,
                };
                self.push(v);
            }
            Opcode::BinInt => {
                let v = self.read_i32()?;
                self.push(Value::Int(v as i64));
            }
            Opcode::BinInt1 => {
                let v = self.reader.read_u8()?;
                self.push(Value::Int(v as i64));
            }
            Opcode::BinInt2 => {
                let v = self.read_u16()?;
                self.push(Value::Int(v as i64));
            }
            Opcode::Long => {
                let line = self.reader.read_str_line()?;
                let s = line.trim();
                let v = parse_decimal_int(s.strip_suffix('L').unwrap_or(s))?;
                self.push(v);
            }
            Opcode::Long1 => {
                let n = self.reader.read_u8()? as usize;
                let bytes = self.reader.read_bytes(n)?;
                self.push(int_from_le_signed(&bytes));
            }
            Opcode::Long4 => {
                let n = self.read_i32()?;
                if n < 0 {
                    return Err(malformed("LONG4 with negative byte count".to_string()));
                }
                let bytes = self.reader.read_bytes(n as usize)?;
                self.push(int_from_le_signed(&bytes));
            }
            Opcode::Float => {
                let line = self.reader.read_str_line()?;
                let v = line
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| malformed(format!("invalid float {line:?}")))?;
                self.push(Value::Float(v));
            }
            Opcode::BinFloat => {
                let v = f64::from_be_bytes(self.reader.read_array()?);
                self.push(Value::Float(v));
            }

            // Strings and bytes
            Opcode::String => {
                let line = self.reader.read_str_line()?;
                let bytes = unquote_legacy_string(&line)?;
                self.push(Self::legacy_string(bytes));
            }
            Opcode::BinString => {
                let n = self.read_i32()?;
                if n < 0 {
                    return Err(malformed("BINSTRING with negative length".to_string()));
                }
                let bytes = self.reader.read_bytes(n as usize)?;
                self.push(Self::legacy_string(bytes));
            }
            Opcode::ShortBinString => {
                let n = self.reader.read_u8()? as usize;
                let bytes = self.reader.read_bytes(n)?;
                self.push(Self::legacy_string(bytes));
            }
            Opcode::Unicode => {
                let line = self.reader.read_str_line()?;
                self.push(Value::String(decode_raw_unicode_escape(&line)?));
            }
            Opcode::ShortBinUnicode => {
                let v = self.read_utf8(1)?;
                self.push(v);
            }
            Opcode::BinUnicode => {
                let v = self.read_utf8(4)?;
                self.push(v);
            }
            Opcode::BinUnicode8 => {
                let v = self.read_utf8(8)?;
                self.push(v);
            }
            Opcode::ShortBinBytes => {
                let v = self.read_bytes_value(1)?;
                self.push(v);
            }
            Opcode::BinBytes => {
                let v = self.read_bytes_value(4)?;
                self.push(v);
            }
            Opcode::BinBytes8 | Opcode::ByteArray8 => {
                let v = self.read_bytes_value(8)?;
                self.push(v);
            }
            Opcode::NextBuffer => {
                let buf = self.buffers.pop_front().ok_or(PickleError::MissingBuffer)?;
                self.push(Value::Bytes(buf));
            }
            Opcode::ReadOnlyBuffer => {
                self.top()?;
            }

            // Tuples
            Opcode::EmptyTuple => self.push(Value::Tuple(Vec::new())),
            Opcode::Tuple => {
                let items = self.pop_mark()?;
                self.push(Value::Tuple(items));
            }
            Opcode::Tuple1 | Opcode::Tuple2 | Opcode::Tuple3 => {
                let n = match op {
                    Opcode::Tuple1 => 1,
                    Opcode::Tuple2 => 2,
                    _ => 3,
                };
                if self.stack.len() < n {
                    return Err(PickleError::StackUnderflow.into());
                }
                let items = self.stack.split_off(self.stack.len() - n);
                self.push(Value::Tuple(items));
            }

            // Lists
            Opcode::EmptyList => self.push(Value::new_list(Vec::new())),
            Opcode::List => {
                let items = self.pop_mark()?;
                self.push(Value::new_list(items));
            }
            Opcode::Append => {
                let v = self.pop()?;
                extend_list(op, self.top()?, vec![v])?;
            }
            Opcode::Appends => {
                let items = self.pop_mark()?;
                extend_list(op, self.top()?, items)?;
            }

            // Dicts
            Opcode::EmptyDict => self.push(Value::new_dict(Dict::new(false))),
            Opcode::Dict => {
                let items = self.pop_mark()?;
                let mut dict = Dict::new(false);
                set_items(op, &mut dict, items)?;
                self.push(Value::new_dict(dict));
            }
            Opcode::SetItem => {
                let v = self.pop()?;
                let k = self.pop()?;
                with_dict(op, self.top()?, |d| d.insert(k, v))?;
            }
            Opcode::SetItems => {
                let items = self.pop_mark()?;
                let target = self.top()?;
                match target {
                    Value::Dict(d) => set_items(op, &mut d.borrow_mut(), items)?,
                    _ => return Err(bad_type(op, "a dict")),
                }
            }

            // Sets
            Opcode::EmptySet => self.push(Value::Set(Rc::default())),
            Opcode::AddItems => {
                let items = self.pop_mark()?;
                match self.top()? {
                    Value::Set(s) => {
                        let mut s = s.borrow_mut();
                        for item in items {
                            if !s.contains(&item) {
                                s.push(item);
                            }
                        }
                    }
                    _ => return Err(bad_type(op, "a set")),
                }
            }
            Opcode::FrozenSet => {
                let items = self.pop_mark()?;
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                self.push(Value::FrozenSet(unique));
            }

            // Memo
            Opcode::Get => {
                let id = self.read_decimal_line()?;
                let v = self.memo_get(id)?;
                self.push(v);
            }
            Opcode::BinGet => {
                let id = self.reader.read_u8()? as u64;
                let v = self.memo_get(id)?;
                self.push(v);
            }
            Opcode::LongBinGet => {
                let id = self.read_u32()? as u64;
                let v = self.memo_get(id)?;
                self.push(v);
            }
            Opcode::Put => {
                let id = self.read_decimal_line()?;
                self.memo_put(id)?;
            }
            Opcode::BinPut => {
                let id = self.reader.read_u8()? as u64;
                self.memo_put(id)?;
            }
            Opcode::LongBinPut => {
                let id = self.read_u32()? as u64;
                self.memo_put(id)?;
            }
            Opcode::Memoize => {
                let id = self.memo.len() as u64;
                self.memo_put(id)?;
            }

            // Classes and objects
            Opcode::Global => {
                let module = self.reader.read_str_line()?;
                let name = self.reader.read_str_line()?;
                let class = self.resolve_class(&module, &name)?;
                self.push(class);
            }
            Opcode::StackGlobal => {
                let name = self.pop()?;
                let module = self.pop()?;
                match (module.as_str(), name.as_str()) {
                    (Some(m), Some(n)) => {
                        let class = self.resolve_class(m, n)?;
                        self.push(class);
                    }
                    _ => return Err(bad_type(op, "module and name strings")),
                }
            }
            Opcode::Ext1 | Opcode::Ext2 | Opcode::Ext4 => {
                let code = match op {
                    Opcode::Ext1 => self.reader.read_u8()? as i32,
                    Opcode::Ext2 => self.read_u16()? as i32,
                    _ => self.read_i32()?,
                };
                if code <= 0 {
                    return Err(malformed(format!("extension code {code} is not positive")));
                }
                let (module, name) = self
                    .extensions
                    .get(&code)
                    .cloned()
                    .ok_or(PickleError::UnknownExtension(code))?;
                let class = self.resolve_class(&module, &name)?;
                self.push(class);
            }
            Opcode::Reduce => {
                let args = self.pop()?;
                let callable = self.pop()?;
                let args = args.sequence().ok_or_else(|| bad_type(op, "an argument tuple"))?;
                let v = as_class(op, &callable)?.call(args)?;
                self.push(v);
            }
            Opcode::NewObj => {
                let args = self.pop()?;
                let cls = self.pop()?;
                let args = args.sequence().ok_or_else(|| bad_type(op, "an argument tuple"))?;
                let v = as_class(op, &cls)?.instantiate(args)?;
                self.push(v);
            }
            Opcode::NewObjEx => {
                let kwargs = self.pop()?;
                let args = self.pop()?;
                let cls = self.pop()?;
                let args = args.sequence().ok_or_else(|| bad_type(op, "an argument tuple"))?;
                let v = as_class(op, &cls)?.instantiate(args)?;
                if let (Value::Object(o), Value::Dict(kw)) = (&v, &kwargs) {
                    let mut o = o.borrow_mut();
                    for (k, val) in kw.borrow().iter() {
                        o.set_attr(k.key_string(), val.clone());
                    }
                }
                self.push(v);
            }
            Opcode::Inst => {
                let module = self.reader.read_str_line()?;
                let name = self.reader.read_str_line()?;
                let args = self.pop_mark()?;
                let class = self.resolve_class(&module, &name)?;
                let v = as_class(op, &class)?.call(args)?;
                self.push(v);
            }
            Opcode::Obj => {
                let mut args = self.pop_mark()?;
                if args.is_empty() {
                    return Err(PickleError::StackUnderflow.into());
                }
                let cls = args.remove(0);
                let v = as_class(op, &cls)?.instantiate(args)?;
                self.push(v);
            }
            Opcode::Build => {
                let state = self.pop()?;
                build(self.top()?, state)?;
            }

            // Persistence
            Opcode::PersId => {
                let pid = self.reader.read_str_line()?;
                let v = self.persistent_load(Value::String(pid))?;
                self.push(v);
            }
            Opcode::BinPersId => {
                let pid = self.pop()?;
                let v = self.persistent_load(pid)?;
                self.push(v);
            }
        }
        Ok(())
    }
}

fn malformed(msg: String) -> vole_core::Error {
    PickleError::Malformed(msg).into()
}

fn bad_type(op: Opcode, expected: &'static str) -> vole_core::Error {
    PickleError::BadTypeForOpcode {
        opcode: op.name(),
        expected,
    }
    .into()
}

fn as_class(op: Opcode, v: &Value) -> Result<Rc<Class>> {
    match v {
        Value::Class(c) => Ok(c.clone()),
        _ => Err(bad_type(op, "a class or callable")),
    }
}

fn extend_list(op: Opcode, target: &mut Value, items: Vec<Value>) -> Result<()> {
    match target {
        Value::List(l) => {
            l.borrow_mut().extend(items);
            Ok(())
        }
        _ => Err(bad_type(op, "a list")),
    }
}

fn with_dict(op: Opcode, target: &mut Value, f: impl FnOnce(&mut Dict)) -> Result<()> {
    match target {
        Value::Dict(d) => {
            f(&mut d.borrow_mut());
            Ok(())
        }
        _ => Err(bad_type(op, "a dict")),
    }
}

fn set_items(op: Opcode, dict: &mut Dict, items: Vec<Value>) -> Result<()> {
    if items.len() % 2 != 0 {
        return Err(bad_type(op, "an even number of keys and values"));
    }
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        dict.insert(k, v);
    }
    Ok(())
}

// BUILD: a dict state updates a dict target or becomes the attributes of an
// object; a (state, slotstate) pair applies both halves; anything else is
// kept as opaque state. Tensors take no state.
fn build(target: &mut Value, state: Value) -> Result<()> {
    match target {
        Value::Dict(d) => match state {
            Value::Dict(s) => {
                let entries: Vec<_> = s.borrow().iter().cloned().collect();
                let mut d = d.borrow_mut();
                for (k, v) in entries {
                    d.insert(k, v);
                }
                Ok(())
            }
            Value::None => Ok(()),
            _ => Err(bad_type(Opcode::Build, "a dict state for a dict")),
        },
        Value::Object(o) => {
            let mut o = o.borrow_mut();
            let (state, slots) = match state {
                Value::Tuple(mut pair) if pair.len() == 2 => {
                    let slots = pair.pop();
                    (pair.pop().unwrap_or(Value::None), slots)
                }
                other => (other, None),
            };
            for part in [Some(state), slots].into_iter().flatten() {
                match part {
                    Value::Dict(d) => {
                        for (k, v) in d.borrow().iter() {
                            o.set_attr(k.key_string(), v.clone());
                        }
                    }
                    Value::None => {}
                    other => o.state = Some(other),
                }
            }
            Ok(())
        }
        Value::StorageTensor(_) => {
            log::debug!("ignoring BUILD state on a tensor");
            Ok(())
        }
        _ => Err(bad_type(Opcode::Build, "a dict or an object")),
    }
}

fn parse_decimal_int(s: &str) -> Result<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    s.parse::<BigInt>()
        .map(Value::BigInt)
        .map_err(|_| malformed(format!("invalid integer {s:?}")))
}

/// Two's-complement little-endian integer, as written by LONG1 and LONG4.
fn int_from_le_signed(bytes: &[u8]) -> Value {
    let v = BigInt::from_signed_bytes_le(bytes);
    match v.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::BigInt(v),
    }
}

// STRING operands are quoted reprs: 'abc' or "abc" with backslash escapes.
fn unquote_legacy_string(line: &str) -> Result<Vec<u8>> {
    let b = line.as_bytes();
    let quoted = b.len() >= 2 && (b[0] == b'\'' || b[0] == b'"') && b[b.len() - 1] == b[0];
    if !quoted {
        return Err(malformed("the STRING opcode argument must be quoted".to_string()));
    }
    let inner = &b[1..b.len() - 1];
    let mut out = Vec::with_capacity(inner.len());
    let mut i = 0;
    while i < inner.len() {
        if inner[i] != b'\\' || i + 1 == inner.len() {
            out.push(inner[i]);
            i += 1;
            continue;
        }
        let esc = inner[i + 1];
        i += 2;
        match esc {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'0' => out.push(0),
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'x' if i + 2 <= inner.len() => {
                let hex = std::str::from_utf8(&inner[i..i + 2]).unwrap_or("");
                let v = u8::from_str_radix(hex, 16)
                    .map_err(|_| malformed(format!("invalid \\x escape in {line:?}")))?;
                out.push(v);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

// UNICODE operands use raw-unicode-escape: only \uXXXX and \UXXXXXXXX are
// escapes.
fn decode_raw_unicode_escape(line: &str) -> Result<String> {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        let width = match (c, chars.peek()) {
            ('\\', Some('u')) => 4,
            ('\\', Some('U')) => 8,
            _ => {
                out.push(c);
                continue;
            }
        };
        chars.next();
        let hex: String = chars.by_ref().take(width).collect();
        let ch = u32::from_str_radix(&hex, 16)
            .ok()
            .filter(|_| hex.len() == width)
            .and_then(char::from_u32)
            .ok_or_else(|| malformed(format!("invalid unicode escape \\{hex}")))?;
        out.push(ch);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::Error;

    fn load(bytes: &[u8]) -> Result<Value> {
        Unpickler::new(bytes).load()
    }

    #[test]
    fn test_empty_tuple() {
        let v = load(&[0x80, 2, b')', b'.']).unwrap();
        assert_eq!(v, Value::Tuple(vec![]));
    }

    #[test]
    fn test_self_referencing_list_decodes_deterministically() {
        // ] q\x00 h\x00 a .
        let bytes = [0x80, 2, b']', b'q', 0, b'h', 0, b'a', b'.'];
        let first = load(&bytes).unwrap();
        let second = load(&bytes).unwrap();
        assert_eq!(first, second);
        match &first {
            Value::List(items) => match &items.borrow()[0] {
                Value::List(inner) => assert!(Rc::ptr_eq(inner, items)),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(format!("{first:?}"), "List([List([...])])");
    }

    #[test]
    fn test_memoized_list_identity() {
        // ] q\x00 K\x01 a h\x00 .
        let bytes = [0x80, 2, b']', b'q', 0, b'K', 1, b'a', b'h', 0, b'.'];
        let mut u = Unpickler::new(&bytes[..]);
        let v = u.load().unwrap();
        assert_eq!(v.sequence(), Some(vec![Value::Int(1)]));
        match (&v, u.memo.get(&0)) {
            (Value::List(a), Some(Value::List(b))) => assert!(Rc::ptr_eq(a, b)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_integers() {
        assert_eq!(load(b"I42\n.").unwrap(), Value::Int(42));
        assert_eq!(load(b"I01\n.").unwrap(), Value::Bool(true));
        assert_eq!(load(b"L-7L\n.").unwrap(), Value::Int(-7));
        assert_eq!(load(&[b'J', 0xff, 0xff, 0xff, 0xff, b'.']).unwrap(), Value::Int(-1));
        assert_eq!(load(&[b'M', 0x34, 0x12, b'.']).unwrap(), Value::Int(0x1234));
        assert_eq!(load(&[0x8a, 0, b'.']).unwrap(), Value::Int(0));
        assert_eq!(load(&[0x8a, 2, 0x00, 0x80, b'.']).unwrap(), Value::Int(-32768));
        let big = load(&[0x8a, 9, 0, 0, 0, 0, 0, 0, 0, 0, 1, b'.']).unwrap();
        assert_eq!(big, Value::BigInt(BigInt::from(1u128 << 64)));
    }

    #[test]
    fn test_floats() {
        assert_eq!(load(b"F0.5\n.").unwrap(), Value::Float(0.5));
        let mut bytes = vec![b'G'];
        bytes.extend_from_slice(&1.25f64.to_be_bytes());
        bytes.push(b'.');
        assert_eq!(load(&bytes).unwrap(), Value::Float(1.25));
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            load(b"S'a\\nb'\n.").unwrap(),
            Value::String("a\nb".to_string())
        );
        assert_eq!(
            load(b"Vcaf\\u00e9\n.").unwrap(),
            Value::String("caf\u{e9}".to_string())
        );
        assert_eq!(
            load(&[0x8c, 2, b'h', b'i', b'.']).unwrap(),
            Value::String("hi".to_string())
        );
        assert_eq!(
            load(&[b'C', 2, 0xff, 0x00, b'.']).unwrap(),
            Value::Bytes(vec![0xff, 0x00])
        );
    }

    #[test]
    fn test_dict_and_setitems() {
        // } ( X\x01\x00\x00\x00a K\x01 X\x01\x00\x00\x00b K\x02 u .
        let bytes = [
            b'}', b'(', b'X', 1, 0, 0, 0, b'a', b'K', 1, b'X', 1, 0, 0, 0, b'b', b'K', 2, b'u',
            b'.',
        ];
        match load(&bytes).unwrap() {
            Value::Dict(d) => {
                let d = d.borrow();
                assert_eq!(d.get_str("a"), Some(&Value::Int(1)));
                assert_eq!(d.get_str("b"), Some(&Value::Int(2)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pop_on_empty_stack_pops_mark() {
        // ( 0 ) . : MARK, POP (drops the mark), EMPTY_TUPLE, STOP
        assert_eq!(load(b"(0).").unwrap(), Value::Tuple(vec![]));
    }

    #[test]
    fn test_global_generic_and_reduce() {
        let v = load(b"cmymod\nThing\n(K\x01tR.").unwrap();
        match v {
            Value::Object(o) => {
                let o = o.borrow();
                assert_eq!(o.name, "Thing");
                assert_eq!(o.args, vec![Value::Int(1)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_strict_rejects_unknown_class() {
        let r = Unpickler::new(&b"cmymod\nThing\n."[..]).strict(true).load();
        assert!(matches!(
            r,
            Err(Error::Pickle(PickleError::UnresolvedClass { module, name }))
                if module == "mymod" && name == "Thing"
        ));
    }

    #[test]
    fn test_class_resolver_fallback() {
        let resolver = |module: &str, _name: &str| -> Option<Class> {
            (module == "mymod").then_some(Class::OrderedDict)
        };
        let v = Unpickler::new(&b"cmymod\nMyDict\n)R."[..])
            .strict(true)
            .with_class_resolver(resolver)
            .load()
            .unwrap();
        assert!(matches!(v, Value::Dict(d) if d.borrow().ordered));
    }

    #[test]
    fn test_build_sets_attributes() {
        // GLOBAL, EMPTY_TUPLE, NEWOBJ, EMPTY_DICT, key, value, SETITEM, BUILD
        let v = load(b"cmymod\nThing\n)\x81}X\x01\x00\x00\x00aK\x05sb.").unwrap();
        match v {
            Value::Object(o) => assert_eq!(o.borrow().attr("a"), Some(&Value::Int(5))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            load(&[0xff]),
            Err(Error::Pickle(PickleError::UnknownOpcode(0xff)))
        ));
        assert!(matches!(
            load(b"a."),
            Err(Error::Pickle(PickleError::StackUnderflow))
        ));
        assert!(matches!(
            load(b"h\x07."),
            Err(Error::Pickle(PickleError::MemoMiss(7)))
        ));
        assert!(matches!(
            load(&[0x80, 6]),
            Err(Error::Pickle(PickleError::UnsupportedProtocol(6)))
        ));
        assert!(matches!(
            load(b"K\x01K\x02R."),
            Err(Error::Pickle(PickleError::BadTypeForOpcode { opcode: "REDUCE", .. }))
        ));
        assert!(matches!(
            load(&[0x82, 9, b'.']),
            Err(Error::Pickle(PickleError::UnknownExtension(9)))
        ));
        assert!(matches!(
            load(b"N\x97."),
            Err(Error::Pickle(PickleError::MissingBuffer))
        ));
        assert!(matches!(
            load(b"N"),
            Err(Error::Io(_))
        ));
        assert!(matches!(
            load(b"K\x01Q."),
            Err(Error::Pickle(PickleError::UnsupportedPersistentId(_)))
        ));
    }

    #[test]
    fn test_frame_boundary() {
        // An 11-byte frame: N, then a FRAME opcode while one byte is left.
        let mut bytes = vec![0x80, 4, 0x95];
        bytes.extend_from_slice(&11u64.to_le_bytes());
        bytes.extend_from_slice(&[b'N', 0x95]);
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&[b'.', b'.']);
        assert!(matches!(
            load(&bytes),
            Err(Error::Pickle(PickleError::FrameBoundary))
        ));

        // An operand running past the end of its frame.
        let mut bytes = vec![0x95];
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&[b'J', 0, 0, 0, 0, b'.']);
        assert!(matches!(
            load(&bytes),
            Err(Error::Pickle(PickleError::FrameBoundary))
        ));
    }

    #[test]
    fn test_framed_stream() {
        let mut bytes = vec![0x80, 4, 0x95];
        bytes.extend_from_slice(&3u64.to_le_bytes());
        bytes.extend_from_slice(&[b'K', 9, b'.']);
        assert_eq!(load(&bytes).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_extension_and_buffers() {
        let v = Unpickler::new(&[0x82, 1, b')', 0x81, b'.'][..])
            .with_extension(1, "collections", "OrderedDict")
            .load()
            .unwrap();
        assert!(matches!(v, Value::Dict(_)));

        let v = Unpickler::new(&[0x97, 0x98, b'.'][..])
            .with_buffers(vec![vec![1, 2, 3]])
            .load()
            .unwrap();
        assert_eq!(v, Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let bytes = b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01]q\x02(K\x01K\x02eX\x01\x00\x00\x00bh\x02u.";
        assert_eq!(load(bytes).unwrap(), load(bytes).unwrap());
    }
}
