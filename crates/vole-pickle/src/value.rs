use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use vole_core::{Device, Kind};

use crate::class::{Class, StorageClass};

// Value: what the pickle machine computes with
//
// Immutable values (numbers, strings, tuples) are held by value. Mutable
// containers and objects are behind Rc<RefCell<..>>, so a memo GET hands out
// the same container the PUT stored: appending through one reference is
// visible through every other, as the format requires.
//
// Equality is structural. Two values built from the same bytes compare equal,
// which is what decoding determinism is checked against. The memo lets a
// container hold itself, so equality and Debug both track the containers they
// have entered: a pair already under comparison is taken as equal, and a
// container already being printed is elided as `[...]`, `{...}` or `...`.

/// Mutable list-like container.
pub type List = Rc<RefCell<Vec<Value>>>;

/// A decoded value.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Integers that do not fit in an i64.
    BigInt(BigInt),
    Float(f64),
    /// Byte strings, byte arrays and out-of-band buffers.
    Bytes(Vec<u8>),
    String(String),
    Tuple(Vec<Value>),
    List(List),
    Dict(Rc<RefCell<Dict>>),
    Set(List),
    FrozenSet(Vec<Value>),
    /// A resolved class or callable reference.
    Class(Rc<Class>),
    /// An instance of a class the decoder keeps only structurally.
    Object(Rc<RefCell<Object>>),
    /// Raw element data returned by the persistent loader.
    Storage(Rc<Storage>),
    /// A strided view over a storage, produced by the tensor reconstructors.
    StorageTensor(Rc<StorageTensor>),
}

impl Value {
    pub fn new_list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn new_dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::BigInt(_) => "int",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Class(_) => "class",
            Value::Object(_) => "object",
            Value::Storage(_) => "storage",
            Value::StorageTensor(_) => "tensor",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Elements of a tuple or list, cloned.
    pub fn sequence(&self) -> Option<Vec<Value>> {
        match self {
            Value::Tuple(items) | Value::FrozenSet(items) => Some(items.clone()),
            Value::List(items) | Value::Set(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    /// A tuple or list of integers, such as a shape or a stride.
    pub fn int_sequence(&self) -> Option<Vec<i64>> {
        self.sequence()?.iter().map(Value::as_i64).collect()
    }

    /// Rendering used when a value has to become a name.
    pub(crate) fn key_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::BigInt(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => format!("<{}>", other.type_name()),
        }
    }
}

type Seen = Vec<(usize, usize)>;

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        values_eq(self, other, &mut Vec::new())
    }
}

fn values_eq(a: &Value, b: &Value, seen: &mut Seen) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) | (Value::FrozenSet(x), Value::FrozenSet(y)) => {
            slices_eq(x, y, seen)
        }
        (Value::List(x), Value::List(y)) | (Value::Set(x), Value::Set(y)) => {
            shared_eq(x, y, seen, |x, y, seen| slices_eq(x, y, seen))
        }
        (Value::Dict(x), Value::Dict(y)) => shared_eq(x, y, seen, Dict::eq_in),
        (Value::Object(x), Value::Object(y)) => shared_eq(x, y, seen, Object::eq_in),
        (Value::Class(x), Value::Class(y)) => x == y,
        (Value::Storage(x), Value::Storage(y)) => x == y,
        (Value::StorageTensor(x), Value::StorageTensor(y)) => x == y,
        _ => false,
    }
}

fn slices_eq(a: &[Value], b: &[Value], seen: &mut Seen) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_eq(x, y, seen))
}

fn shared_eq<T>(
    a: &Rc<RefCell<T>>,
    b: &Rc<RefCell<T>>,
    seen: &mut Seen,
    eq: impl FnOnce(&T, &T, &mut Seen) -> bool,
) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
    if seen.contains(&pair) {
        return true;
    }
    let (Ok(x), Ok(y)) = (a.try_borrow(), b.try_borrow()) else {
        return false;
    };
    seen.push(pair);
    let equal = eq(&*x, &*y, seen);
    seen.pop();
    equal
}

thread_local! {
    // Containers whose Debug output is in progress on this thread.
    static FORMATTING: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Value::BigInt(i) => f.debug_tuple("BigInt").field(i).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Value::String(s) => f.debug_tuple("String").field(s).finish(),
            Value::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Value::List(items) => debug_shared(f, "List", items, "[...]"),
            Value::Dict(d) => debug_shared(f, "Dict", d, "{...}"),
            Value::Set(items) => debug_shared(f, "Set", items, "{...}"),
            Value::FrozenSet(items) => f.debug_tuple("FrozenSet").field(items).finish(),
            Value::Class(c) => f.debug_tuple("Class").field(c).finish(),
            Value::Object(o) => debug_shared(f, "Object", o, "..."),
            Value::Storage(s) => f.debug_tuple("Storage").field(s).finish(),
            Value::StorageTensor(t) => f.debug_tuple("StorageTensor").field(t).finish(),
        }
    }
}

fn debug_shared<T: fmt::Debug>(
    f: &mut fmt::Formatter<'_>,
    variant: &str,
    shared: &Rc<RefCell<T>>,
    elided: &str,
) -> fmt::Result {
    let ptr = Rc::as_ptr(shared) as usize;
    let entered = FORMATTING.with(|stack| {
        let mut stack = stack.borrow_mut();
        if stack.contains(&ptr) {
            false
        } else {
            stack.push(ptr);
            true
        }
    });
    if !entered {
        return f.debug_tuple(variant).field(&format_args!("{elided}")).finish();
    }
    let result = match shared.try_borrow() {
        Ok(inner) => f.debug_tuple(variant).field(&*inner).finish(),
        Err(_) => f.debug_tuple(variant).field(&format_args!("<borrowed>")).finish(),
    };
    FORMATTING.with(|stack| stack.borrow_mut().pop());
    result
}

/// Insertion-ordered mapping.
///
/// Ordered dictionaries and plain dictionaries are both kept in insertion
/// order; `ordered` records which one the stream asked for. String keys are
/// indexed, so building a state dict stays linear in its size.
#[derive(Clone, Default)]
pub struct Dict {
    pub ordered: bool,
    entries: Vec<(Value, Value)>,
    by_name: HashMap<String, usize>,
}

impl Dict {
    pub fn new(ordered: bool) -> Dict {
        Dict {
            ordered,
            ..Dict::default()
        }
    }

    /// Insert or replace, keeping the first insertion position.
    pub fn insert(&mut self, key: Value, value: Value) {
        let position = match &key {
            Value::String(name) => self.by_name.get(name).copied(),
            _ => self.entries.iter().position(|(k, _)| *k == key),
        };
        match position {
            Some(i) => self.entries[i].1 = value,
            None => {
                if let Value::String(name) = &key {
                    self.by_name.insert(name.clone(), self.entries.len());
                }
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        match key {
            Value::String(name) => self.get_str(name),
            _ => self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
        }
    }

    /// Look up a string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.by_name.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    fn eq_in(&self, other: &Dict, seen: &mut Seen) -> bool {
        self.ordered == other.ordered
            && self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|((k1, v1), (k2, v2))| values_eq(k1, k2, seen) && values_eq(v1, v2, seen))
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Dict) -> bool {
        self.eq_in(other, &mut Vec::new())
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dict")
            .field("ordered", &self.ordered)
            .field("entries", &self.entries)
            .finish()
    }
}

/// Instance of a class kept as data.
#[derive(Debug, Clone)]
pub struct Object {
    pub module: String,
    pub name: String,
    /// Positional constructor or call arguments.
    pub args: Vec<Value>,
    /// Attributes set through the instance dictionary or slot state.
    pub attrs: Vec<(String, Value)>,
    /// State given to BUILD that was not a dictionary.
    pub state: Option<Value>,
}

impl Object {
    pub fn new(module: &str, name: &str, args: Vec<Value>) -> Object {
        Object {
            module: module.to_string(),
            name: name.to_string(),
            args,
            attrs: Vec::new(),
            state: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub(crate) fn set_attr(&mut self, name: String, value: Value) {
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    fn eq_in(&self, other: &Object, seen: &mut Seen) -> bool {
        let state_eq = match (&self.state, &other.state) {
            (None, None) => true,
            (Some(a), Some(b)) => values_eq(a, b, seen),
            _ => false,
        };
        self.module == other.module
            && self.name == other.name
            && slices_eq(&self.args, &other.args, seen)
            && self.attrs.len() == other.attrs.len()
            && self
                .attrs
                .iter()
                .zip(&other.attrs)
                .all(|((n1, v1), (n2, v2))| n1 == n2 && values_eq(v1, v2, seen))
            && state_eq
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        self.eq_in(other, &mut Vec::new())
    }
}

/// One storage record: untyped bytes plus the element kind they hold.
pub struct Storage {
    pub class: StorageClass,
    /// Producer-chosen record key.
    pub key: String,
    /// Where the producer kept the storage.
    pub location: String,
    /// Number of elements.
    pub size: usize,
    /// Element bytes. Filled after the main pickle for legacy streams.
    pub data: RefCell<Vec<u8>>,
}

impl Storage {
    pub fn kind(&self) -> Kind {
        self.class.kind
    }

    pub fn nbytes(&self) -> usize {
        self.size * self.class.kind.elt_size_in_bytes()
    }

    /// The recorded location, or the CPU for locations this build cannot
    /// parse.
    pub fn device(&self) -> Device {
        Device::from_location(&self.location).unwrap_or(Device::Cpu)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("class", &self.class.name)
            .field("key", &self.key)
            .field("location", &self.location)
            .field("size", &self.size)
            .field("loaded_bytes", &self.data.borrow().len())
            .finish()
    }
}

impl PartialEq for Storage {
    fn eq(&self, other: &Storage) -> bool {
        self.class == other.class
            && self.key == other.key
            && self.location == other.location
            && self.size == other.size
            && *self.data.borrow() == *other.data.borrow()
    }
}

/// Strided view arguments of a reconstructed tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageTensor {
    pub storage: Rc<Storage>,
    /// Offset into the storage, in elements.
    pub offset: i64,
    pub shape: Vec<i64>,
    pub stride: Vec<i64>,
    pub requires_grad: bool,
}
