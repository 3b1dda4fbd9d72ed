use std::cell::RefCell;
use std::rc::Rc;

use vole_core::{Kind, PickleError, Result};

use crate::value::{Dict, Object, StorageTensor, Value};

// Class references
//
// GLOBAL and STACK_GLOBAL name a class or callable by (module, name). The
// decoder understands a handful of them natively:
//
//   collections.OrderedDict, builtins.dict       -> Dict
//   builtins.object, copyreg._reconstructor      -> Object
//   torch._utils._rebuild_tensor{,_v2}           -> StorageTensor
//   torch._utils._rebuild_parameter{,_with_state}-> StorageTensor + grad flag
//   torch.<Kind>Storage                          -> storage class token
//   _codecs.encode                               -> Bytes
//
// A few more reconstructors are recognised only to be refused. Anything else
// becomes a Generic class, and calling it yields an Object that keeps the
// arguments, so a stream full of unknown classes still decodes as long as the
// caller only wants the tensors out of it.

/// Element type of a storage record, named by its storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageClass {
    pub name: &'static str,
    pub kind: Kind,
}

const STORAGE_CLASSES: &[StorageClass] = &[
    StorageClass { name: "FloatStorage", kind: Kind::Float },
    StorageClass { name: "HalfStorage", kind: Kind::Half },
    StorageClass { name: "BFloat16Storage", kind: Kind::BFloat16 },
    StorageClass { name: "DoubleStorage", kind: Kind::Double },
    StorageClass { name: "ByteStorage", kind: Kind::Uint8 },
    StorageClass { name: "CharStorage", kind: Kind::Int8 },
    StorageClass { name: "ShortStorage", kind: Kind::Int16 },
    StorageClass { name: "IntStorage", kind: Kind::Int },
    StorageClass { name: "LongStorage", kind: Kind::Int64 },
    StorageClass { name: "BoolStorage", kind: Kind::Bool },
];

impl StorageClass {
    pub fn from_name(name: &str) -> Option<StorageClass> {
        STORAGE_CLASSES.iter().find(|c| c.name == name).copied()
    }
}

const REFUSED_RECONSTRUCTORS: &[&str] = &[
    "_rebuild_qtensor",
    "_rebuild_sparse_tensor",
    "_rebuild_sparse_csr_tensor",
    "_rebuild_device_tensor_from_numpy",
    "_rebuild_meta_tensor_no_storage",
];

/// A class or callable the machine can apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Class {
    OrderedDict,
    Dict,
    Object,
    Reconstructor,
    RebuildTensor,
    RebuildTensorV2,
    RebuildParameter,
    RebuildParameterWithState,
    CodecsEncode,
    Storage(StorageClass),
    /// Recognised, but calling it fails with `NotImplemented`.
    Unsupported(String),
    Generic { module: String, name: String },
}

/// Caller-supplied fallback for `(module, name)` pairs the decoder does not
/// know. Returning `None` leaves the pair to the default handling.
pub trait ClassResolver {
    fn resolve(&self, module: &str, name: &str) -> Option<Class>;
}

impl<F> ClassResolver for F
where
    F: Fn(&str, &str) -> Option<Class>,
{
    fn resolve(&self, module: &str, name: &str) -> Option<Class> {
        self(module, name)
    }
}

impl Class {
    /// Built-in resolution.
    pub fn builtin(module: &str, name: &str) -> Option<Class> {
        let class = match (module, name) {
            ("collections", "OrderedDict") => Class::OrderedDict,
            ("builtins" | "__builtin__", "dict") => Class::Dict,
            ("builtins" | "__builtin__", "object") => Class::Object,
            ("copyreg" | "copy_reg", "_reconstructor") => Class::Reconstructor,
            ("_codecs", "encode") => Class::CodecsEncode,
            ("torch._utils", "_rebuild_tensor") => Class::RebuildTensor,
            ("torch._utils", "_rebuild_tensor_v2") => Class::RebuildTensorV2,
            ("torch._utils", "_rebuild_parameter") => Class::RebuildParameter,
            ("torch._utils", "_rebuild_parameter_with_state") => {
                Class::RebuildParameterWithState
            }
            ("torch._utils", n) if REFUSED_RECONSTRUCTORS.contains(&n) => {
                Class::Unsupported(n.to_string())
            }
            ("torch", n) => Class::Storage(StorageClass::from_name(n)?),
            _ => return None,
        };
        Some(class)
    }

    pub fn generic(module: &str, name: &str) -> Class {
        Class::Generic {
            module: module.to_string(),
            name: name.to_string(),
        }
    }

    /// `(module, name)` for objects of this class.
    fn qualified(&self) -> (String, String) {
        let (module, name) = match self {
            Class::OrderedDict => ("collections", "OrderedDict"),
            Class::Dict => ("builtins", "dict"),
            Class::Object => ("builtins", "object"),
            Class::Reconstructor => ("copyreg", "_reconstructor"),
            Class::RebuildTensor => ("torch._utils", "_rebuild_tensor"),
            Class::RebuildTensorV2 => ("torch._utils", "_rebuild_tensor_v2"),
            Class::RebuildParameter => ("torch._utils", "_rebuild_parameter"),
            Class::RebuildParameterWithState => ("torch._utils", "_rebuild_parameter_with_state"),
            Class::CodecsEncode => ("_codecs", "encode"),
            Class::Storage(s) => ("torch", s.name),
            Class::Unsupported(n) => ("torch._utils", n.as_str()),
            Class::Generic { module, name } => (module.as_str(), name.as_str()),
        };
        (module.to_string(), name.to_string())
    }

    fn new_object(&self, args: Vec<Value>) -> Value {
        let (module, name) = self.qualified();
        Value::Object(Rc::new(RefCell::new(Object::new(&module, &name, args))))
    }

    /// Apply as a callable (REDUCE, INST, OBJ).
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        match self {
            Class::OrderedDict | Class::Dict => {
                let mut dict = Dict::new(*self == Class::OrderedDict);
                if let Some(items) = args.first().and_then(Value::sequence) {
                    for item in items {
                        match item.sequence().as_deref() {
                            Some([k, v]) => dict.insert(k.clone(), v.clone()),
                            _ => return Err(bad_type("REDUCE", "a sequence of pairs")),
                        }
                    }
                }
                Ok(Value::new_dict(dict))
            }
            Class::Object | Class::Storage(_) | Class::Generic { .. } => Ok(self.new_object(args)),
            Class::Reconstructor => {
                // (cls, base, state): an empty instance of cls.
                match args.first() {
                    Some(Value::Class(cls)) => cls.instantiate(args[1..].to_vec()),
                    _ => Err(bad_type("REDUCE", "a class as first reconstructor argument")),
                }
            }
            Class::RebuildTensor | Class::RebuildTensorV2 => rebuild_tensor(&args),
            Class::RebuildParameter | Class::RebuildParameterWithState => {
                rebuild_parameter(&args)
            }
            Class::CodecsEncode => codecs_encode(&args),
            Class::Unsupported(name) => Err(PickleError::NotImplemented(name.clone()).into()),
        }
    }

    /// Apply as a constructor (NEWOBJ, NEWOBJ_EX).
    pub fn instantiate(&self, args: Vec<Value>) -> Result<Value> {
        match self {
            Class::OrderedDict | Class::Dict => {
                Ok(Value::new_dict(Dict::new(*self == Class::OrderedDict)))
            }
            Class::Unsupported(name) => Err(PickleError::NotImplemented(name.clone()).into()),
            _ => Ok(self.new_object(args)),
        }
    }
}

fn bad_type(opcode: &'static str, expected: &'static str) -> vole_core::Error {
    PickleError::BadTypeForOpcode { opcode, expected }.into()
}

fn storage_tensor(
    storage: &Value,
    offset: &Value,
    shape: &Value,
    stride: &Value,
    requires_grad: bool,
) -> Result<Value> {
    const EXPECTED: &str = "(storage, offset, size, stride) tensor arguments";
    let storage = match storage {
        Value::Storage(s) => s.clone(),
        _ => return Err(bad_type("REDUCE", EXPECTED)),
    };
    let offset = offset.as_i64().ok_or_else(|| bad_type("REDUCE", EXPECTED))?;
    let shape = shape.int_sequence().ok_or_else(|| bad_type("REDUCE", EXPECTED))?;
    let stride = stride.int_sequence().ok_or_else(|| bad_type("REDUCE", EXPECTED))?;
    Ok(Value::StorageTensor(Rc::new(StorageTensor {
        storage,
        offset,
        shape,
        stride,
        requires_grad,
    })))
}

// _rebuild_tensor(storage, offset, size, stride)
// _rebuild_tensor_v2(storage, offset, size, stride, requires_grad, hooks[, metadata])
fn rebuild_tensor(args: &[Value]) -> Result<Value> {
    match args {
        [storage, offset, shape, stride] => storage_tensor(storage, offset, shape, stride, false),
        [storage, offset, shape, stride, requires_grad, ..] => {
            let requires_grad = requires_grad.as_bool().unwrap_or(false);
            storage_tensor(storage, offset, shape, stride, requires_grad)
        }
        _ => Err(bad_type("REDUCE", "at least four tensor arguments")),
    }
}

// _rebuild_parameter(data, requires_grad, hooks[, state])
fn rebuild_parameter(args: &[Value]) -> Result<Value> {
    match args {
        [Value::StorageTensor(t), requires_grad, ..] => {
            let mut t = (**t).clone();
            t.requires_grad = requires_grad.as_bool().unwrap_or(false);
            Ok(Value::StorageTensor(Rc::new(t)))
        }
        _ => Err(bad_type("REDUCE", "a tensor and a requires_grad flag")),
    }
}

// _codecs.encode(text, "latin1") is how protocol 2 spells a bytes literal.
fn codecs_encode(args: &[Value]) -> Result<Value> {
    match args {
        [Value::String(text), rest @ ..] => {
            let encoding = rest.first().and_then(Value::as_str).unwrap_or("utf-8");
            match encoding {
                "latin1" | "latin-1" | "iso-8859-1" => text
                    .chars()
                    .map(|c| u8::try_from(c as u32))
                    .collect::<std::result::Result<Vec<u8>, _>>()
                    .map(Value::Bytes)
                    .map_err(|_| {
                        PickleError::Malformed("character outside latin-1".to_string()).into()
                    }),
                _ => Ok(Value::Bytes(text.as_bytes().to_vec())),
            }
        }
        _ => Err(bad_type("REDUCE", "a string to encode")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Storage;
    use vole_core::Error;

    fn storage() -> Value {
        Value::Storage(Rc::new(Storage {
            class: StorageClass::from_name("FloatStorage").unwrap(),
            key: "0".to_string(),
            location: "cpu".to_string(),
            size: 6,
            data: RefCell::new(vec![0; 24]),
        }))
    }

    fn ints(v: &[i64]) -> Value {
        Value::Tuple(v.iter().map(|&i| Value::Int(i)).collect())
    }

    #[test]
    fn test_builtin_resolution() {
        assert_eq!(
            Class::builtin("collections", "OrderedDict"),
            Some(Class::OrderedDict)
        );
        assert_eq!(
            Class::builtin("torch", "HalfStorage"),
            Some(Class::Storage(StorageClass {
                name: "HalfStorage",
                kind: Kind::Half
            }))
        );
        assert_eq!(Class::builtin("torch", "nn"), None);
        assert_eq!(Class::builtin("mymodule", "Net"), None);
    }

    #[test]
    fn test_rebuild_tensor_v2() {
        let args = vec![
            storage(),
            Value::Int(0),
            ints(&[2, 3]),
            ints(&[3, 1]),
            Value::Bool(true),
            Value::new_dict(Dict::new(true)),
        ];
        match Class::RebuildTensorV2.call(args).unwrap() {
            Value::StorageTensor(t) => {
                assert_eq!(t.shape, vec![2, 3]);
                assert_eq!(t.stride, vec![3, 1]);
                assert!(t.requires_grad);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rebuild_parameter_sets_flag() {
        let t = Class::RebuildTensor
            .call(vec![storage(), Value::Int(0), ints(&[6]), ints(&[1])])
            .unwrap();
        let p = Class::RebuildParameter
            .call(vec![t, Value::Bool(true), Value::None])
            .unwrap();
        assert!(matches!(p, Value::StorageTensor(t) if t.requires_grad));
    }

    #[test]
    fn test_refused_reconstructor() {
        let class = Class::builtin("torch._utils", "_rebuild_qtensor").unwrap();
        assert!(matches!(
            class.call(vec![]),
            Err(Error::Pickle(PickleError::NotImplemented(n))) if n == "_rebuild_qtensor"
        ));
    }

    #[test]
    fn test_generic_call_keeps_arguments() {
        let class = Class::generic("mymodule", "Config");
        match class.call(vec![Value::Int(1)]).unwrap() {
            Value::Object(o) => {
                let o = o.borrow();
                assert_eq!((o.module.as_str(), o.name.as_str()), ("mymodule", "Config"));
                assert_eq!(o.args, vec![Value::Int(1)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_codecs_encode_latin1() {
        let v = Class::CodecsEncode
            .call(vec![
                Value::String("\u{ff}a".to_string()),
                Value::String("latin1".to_string()),
            ])
            .unwrap();
        assert_eq!(v, Value::Bytes(vec![0xff, b'a']));
    }
}
