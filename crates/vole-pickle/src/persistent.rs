use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::rc::Rc;

use vole_core::{Error, PickleError, Result};
use zip::ZipArchive;

use crate::class::{Class, StorageClass};
use crate::value::{Storage, Value};

/// Hook for PERSID/BINPERSID: turns a persistent-id payload into a value.
pub trait PersistentLoader {
    fn load(&mut self, pid: Value) -> Result<Value>;
}

impl<T: PersistentLoader + ?Sized> PersistentLoader for &mut T {
    fn load(&mut self, pid: Value) -> Result<Value> {
        (**self).load(pid)
    }
}

/// Closures work as loaders too.
pub struct FnLoader<F>(pub F);

impl<F: FnMut(Value) -> Result<Value>> PersistentLoader for FnLoader<F> {
    fn load(&mut self, pid: Value) -> Result<Value> {
        (self.0)(pid)
    }
}

/// Decoded `("storage", class, key, location, size[, view])` payload.
#[derive(Debug)]
pub(crate) struct StoragePid {
    pub class: StorageClass,
    pub key: String,
    pub location: String,
    pub size: usize,
    /// Legacy view metadata, `None` when absent or null.
    pub view: Option<Value>,
}

impl StoragePid {
    pub(crate) fn parse(pid: &Value) -> Result<StoragePid> {
        let unsupported = || -> Error {
            PickleError::UnsupportedPersistentId(format!("{pid:?}")).into()
        };
        let items = match pid {
            Value::Tuple(items) => items,
            _ => return Err(unsupported()),
        };
        match items.as_slice() {
            [tag, Value::Class(class), key, location, size, rest @ ..]
                if tag.as_str() == Some("storage") && rest.len() <= 1 =>
            {
                let class = match &**class {
                    Class::Storage(c) => *c,
                    _ => return Err(unsupported()),
                };
                let size = size
                    .as_i64()
                    .and_then(|s| usize::try_from(s).ok())
                    .ok_or_else(unsupported)?;
                let view = match rest.first() {
                    None | Some(Value::None) => None,
                    Some(v) => Some(v.clone()),
                };
                Ok(StoragePid {
                    class,
                    key: key.key_string(),
                    location: location.as_str().ok_or_else(unsupported)?.to_string(),
                    size,
                    view,
                })
            }
            _ => Err(unsupported()),
        }
    }

    fn into_storage(self, data: Vec<u8>) -> Rc<Storage> {
        Rc::new(Storage {
            class: self.class,
            key: self.key,
            location: self.location,
            size: self.size,
            data: RefCell::new(data),
        })
    }
}

/// Loads storages from the records of a zip checkpoint.
///
/// Each key is read once; later references to the same key share the
/// storage.
pub(crate) struct ZipStorageLoader<'z, R> {
    archive: &'z mut ZipArchive<R>,
    prefix: String,
    loaded: HashMap<String, Rc<Storage>>,
}

impl<'z, R: Read + Seek> ZipStorageLoader<'z, R> {
    pub(crate) fn new(archive: &'z mut ZipArchive<R>, prefix: &str) -> Self {
        ZipStorageLoader {
            archive,
            prefix: prefix.to_string(),
            loaded: HashMap::new(),
        }
    }

    fn read_record(&mut self, key: &str, nbytes: usize) -> Result<Vec<u8>> {
        let record = format!("{}data/{key}", self.prefix);
        let file = self
            .archive
            .by_name(&record)
            .map_err(|e| Error::UnsupportedFormat(format!("missing storage record {record}: {e}")))?;
        let mut data = Vec::new();
        file.take(nbytes as u64).read_to_end(&mut data)?;
        if data.len() < nbytes {
            return Err(Error::UnsupportedFormat(format!(
                "storage record {record} holds {} bytes, expected {nbytes}",
                data.len()
            )));
        }
        Ok(data)
    }
}

impl<R: Read + Seek> PersistentLoader for ZipStorageLoader<'_, R> {
    fn load(&mut self, pid: Value) -> Result<Value> {
        let pid = StoragePid::parse(&pid)?;
        if let Some(storage) = self.loaded.get(&pid.key) {
            return Ok(Value::Storage(storage.clone()));
        }
        let nbytes = pid.size * pid.class.kind.elt_size_in_bytes();
        let data = self.read_record(&pid.key, nbytes)?;
        let key = pid.key.clone();
        let storage = pid.into_storage(data);
        self.loaded.insert(key, storage.clone());
        Ok(Value::Storage(storage))
    }
}

/// Collects the storages of a legacy stream; their bytes follow the main
/// pickle and are filled in afterwards.
#[derive(Default)]
pub(crate) struct LegacyStorageLoader {
    pub loaded: HashMap<String, Rc<Storage>>,
}

impl PersistentLoader for LegacyStorageLoader {
    fn load(&mut self, pid: Value) -> Result<Value> {
        let pid = StoragePid::parse(&pid)?;
        if let Some(view) = &pid.view {
            return Err(PickleError::UnsupportedPersistentId(format!(
                "storage view {view:?} of {}",
                pid.key
            ))
            .into());
        }
        if let Some(storage) = self.loaded.get(&pid.key) {
            return Ok(Value::Storage(storage.clone()));
        }
        let key = pid.key.clone();
        let storage = pid.into_storage(Vec::new());
        self.loaded.insert(key, storage.clone());
        Ok(Value::Storage(storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(extra: Option<Value>) -> Value {
        let mut items = vec![
            Value::String("storage".to_string()),
            Value::Class(Rc::new(Class::builtin("torch", "FloatStorage").unwrap())),
            Value::String("0".to_string()),
            Value::String("cpu".to_string()),
            Value::Int(4),
        ];
        items.extend(extra);
        Value::Tuple(items)
    }

    #[test]
    fn test_parse_storage_pid() {
        let p = StoragePid::parse(&pid(None)).unwrap();
        assert_eq!(p.key, "0");
        assert_eq!(p.size, 4);
        assert_eq!(p.location, "cpu");
        assert!(p.view.is_none());
        assert!(StoragePid::parse(&pid(Some(Value::None))).unwrap().view.is_none());
    }

    #[test]
    fn test_rejects_other_payloads() {
        for bad in [
            Value::String("storage".to_string()),
            Value::Tuple(vec![Value::String("module".to_string())]),
        ] {
            assert!(matches!(
                StoragePid::parse(&bad),
                Err(Error::Pickle(PickleError::UnsupportedPersistentId(_)))
            ));
        }
    }

    #[test]
    fn test_legacy_loader_shares_and_refuses_views() {
        let mut loader = LegacyStorageLoader::default();
        let a = loader.load(pid(None)).unwrap();
        let b = loader.load(pid(None)).unwrap();
        match (a, b) {
            (Value::Storage(a), Value::Storage(b)) => assert!(Rc::ptr_eq(&a, &b)),
            _ => panic!("expected storages"),
        }
        let view = Value::Tuple(vec![
            Value::String("1".to_string()),
            Value::Int(0),
            Value::Int(2),
        ]);
        assert!(matches!(
            loader.load(pid(Some(view))),
            Err(Error::Pickle(PickleError::UnsupportedPersistentId(_)))
        ));
    }
}
