// Variable store
//
// A VarStore owns every parameter and buffer of a model, keyed by a dotted
// name. Paths are light views into the store: `vs.root().sub("enc").sub("l1")`
// names the subtree "enc.l1", and `path.zeros("w", ...)` creates "enc.l1.w".
//
//   Variables {
//     named_variables:     name -> Tensor   every variable, owned by the store
//     trainable_variables: [(name, Tensor)] shallow clones, insertion order
//   }
//
// Both collections sit behind one mutex. Paths, entries, optimizers and
// loads all take that lock; nothing reads either collection without it.
//
// Tensors handed back to callers are shallow clones: they share storage and
// the grad flag with the stored tensor, so writes through either are visible
// in both. The store must outlive any computation that uses them.
//
// Loading copies values into the existing tensors with grad mode off. Names
// are matched before the first copy, but a copy that fails part-way leaves
// the earlier variables overwritten.

use std::collections::{HashMap, HashSet};
use std::path::Path as FsPath;
use std::sync::{Arc, Mutex, MutexGuard};

use vole_core::{no_grad, Device, Error, Kind, Result, Tensor};

use crate::init::{self, Init};

/// The variables of a store. Reach it through [`VarStore::variables_`].
#[derive(Debug, Default)]
pub struct Variables {
    pub named_variables: HashMap<String, Tensor>,
    pub trainable_variables: Vec<(String, Tensor)>,
}

/// A store of named variables on one device.
#[derive(Debug)]
pub struct VarStore {
    pub variables_: Arc<Mutex<Variables>>,
    device: Device,
    kind: Kind,
}

/// A position in the variable hierarchy of a [`VarStore`].
#[derive(Debug, Clone)]
pub struct Path<'a> {
    path: Vec<String>,
    var_store: &'a VarStore,
}

/// A variable that may or may not exist yet, see [`Path::entry`].
///
/// Holds the store lock until consumed.
pub struct Entry<'a> {
    name: &'a str,
    variables: MutexGuard<'a, Variables>,
    path: &'a Path<'a>,
}

fn lock(variables: &Mutex<Variables>) -> MutexGuard<'_, Variables> {
    variables.lock().unwrap_or_else(|e| e.into_inner())
}

fn check_element(s: &str) -> Result<()> {
    if s.contains('.') {
        return Err(Error::InvalidPath(s.to_string()));
    }
    Ok(())
}

impl VarStore {
    /// An empty store creating `f32` variables on `device`.
    pub fn new(device: Device) -> VarStore {
        VarStore::new_with_kind(device, Kind::Float)
    }

    /// An empty store creating variables of `kind` on `device`.
    pub fn new_with_kind(device: Device, kind: Kind) -> VarStore {
        VarStore {
            variables_: Arc::new(Mutex::new(Variables::default())),
            device,
            kind,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// The empty path.
    pub fn root(&self) -> Path<'_> {
        Path {
            path: vec![],
            var_store: self,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.variables_).named_variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shallow clones of every variable, by name.
    pub fn variables(&self) -> Result<HashMap<String, Tensor>> {
        let variables = lock(&self.variables_);
        variables
            .named_variables
            .iter()
            .map(|(name, t)| Ok((name.clone(), t.shallow_clone()?)))
            .collect()
    }

    /// Shallow clones of the trainable variables, in insertion order.
    pub fn trainable_variables(&self) -> Result<Vec<Tensor>> {
        let variables = lock(&self.variables_);
        variables
            .trainable_variables
            .iter()
            .map(|(_, t)| t.shallow_clone())
            .collect()
    }

    /// Take a variable out of the store.
    ///
    /// Returns the stored handle, or `None` when no variable has this name.
    pub fn remove(&self, name: &str) -> Result<Option<Tensor>> {
        let mut variables = lock(&self.variables_);
        let removed = variables.named_variables.remove(name);
        if let Some(pos) = variables
            .trainable_variables
            .iter()
            .position(|(n, _)| n == name)
        {
            let (_, mut t) = variables.trainable_variables.remove(pos);
            t.free()?;
        }
        Ok(removed)
    }

    /// Copy every variable of `src` into the variable of the same name here.
    ///
    /// Every variable of this store must exist in `src`.
    pub fn copy(&mut self, src: &VarStore) -> Result<()> {
        if Arc::ptr_eq(&self.variables_, &src.variables_) {
            return Ok(());
        }
        let mut variables = lock(&self.variables_);
        let src_variables = lock(&src.variables_);
        let mut names: Vec<&String> = variables.named_variables.keys().collect();
        names.sort();
        if let Some(name) = names
            .into_iter()
            .find(|n| !src_variables.named_variables.contains_key(*n))
        {
            return Err(Error::MissingParameter(name.clone()));
        }
        let device = self.device;
        no_grad(|| {
            for (name, var) in variables.named_variables.iter_mut() {
                let src_var = &src_variables.named_variables[name];
                let mut moved = src_var.to_device(device)?;
                var.copy_(&moved)?;
                moved.free()?;
            }
            Ok(())
        })
    }

    /// Write every variable to `path` in the engine's multi-tensor format.
    pub fn save(&self, path: impl AsRef<FsPath>) -> Result<()> {
        let variables = lock(&self.variables_);
        let mut named: Vec<(&String, &Tensor)> = variables.named_variables.iter().collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Tensor::save_multi(&named, path)
    }

    /// Load a multi-tensor file written by [`VarStore::save`].
    ///
    /// The file must hold exactly the variables of this store:
    /// `MissingParameter` names a variable the file lacks,
    /// `UnexpectedParameter` a tensor the store lacks.
    pub fn load(&mut self, path: impl AsRef<FsPath>) -> Result<()> {
        let named = Tensor::load_multi_with_device(path, self.device)?;
        self.copy_named(named, false)?;
        Ok(())
    }

    /// Like [`VarStore::load`] but tolerant: returns the names of the
    /// variables the file lacks and ignores tensors the store lacks.
    pub fn load_partial(&mut self, path: impl AsRef<FsPath>) -> Result<Vec<String>> {
        let named = Tensor::load_multi_with_device(path, self.device)?;
        self.copy_named(named, true)
    }

    /// Load a pretrained checkpoint in the pickle-based `.pt` format.
    pub fn load_pt(&mut self, path: impl AsRef<FsPath>) -> Result<()> {
        let named = vole_pickle::read_pt_with_device(path, self.device)?;
        self.copy_named(named, false)?;
        Ok(())
    }

    /// Tolerant variant of [`VarStore::load_pt`].
    pub fn load_pt_partial(&mut self, path: impl AsRef<FsPath>) -> Result<Vec<String>> {
        let named = vole_pickle::read_pt_with_device(path, self.device)?;
        self.copy_named(named, true)
    }

    /// Copy loaded tensors into the variables of the same name, in the order
    /// they were loaded. Returns the variables no tensor was provided for.
    pub fn copy_named(&mut self, named: Vec<(String, Tensor)>, partial: bool) -> Result<Vec<String>> {
        let mut variables = lock(&self.variables_);
        let loaded: HashSet<&str> = named.iter().map(|(n, _)| n.as_str()).collect();
        let mut missing: Vec<String> = variables
            .named_variables
            .keys()
            .filter(|n| !loaded.contains(n.as_str()))
            .cloned()
            .collect();
        missing.sort();
        if !partial {
            if let Some(name) = missing.first() {
                return Err(Error::MissingParameter(name.clone()));
            }
            if let Some((name, _)) = named
                .iter()
                .find(|(n, _)| !variables.named_variables.contains_key(n))
            {
                return Err(Error::UnexpectedParameter(name.clone()));
            }
        }
        for (name, src) in named.iter() {
            if let Some(dst) = variables.named_variables.get(name) {
                let (dst_size, src_size) = (dst.size()?, src.size()?);
                if dst_size != src_size {
                    return Err(Error::msg(format!(
                        "shape mismatch for {name}: store has {dst_size:?}, loaded {src_size:?}"
                    )));
                }
            }
        }
        no_grad(|| {
            for (name, src) in named.iter() {
                if let Some(dst) = variables.named_variables.get_mut(name) {
                    dst.copy_(src)?;
                }
            }
            Ok::<(), Error>(())
        })?;
        for (_, mut t) in named {
            t.free()?;
        }
        Ok(missing)
    }

    fn set_trainable(&self, trainable: bool) -> Result<()> {
        let variables = lock(&self.variables_);
        for (_, t) in variables.trainable_variables.iter() {
            let mut handle = t.shallow_clone()?.set_requires_grad(trainable)?;
            handle.free()?;
        }
        Ok(())
    }

    /// Turn off gradient tracking for every trainable variable.
    ///
    /// The variables stay in the trainable list, so [`VarStore::unfreeze`]
    /// restores them.
    pub fn freeze(&mut self) -> Result<()> {
        self.set_trainable(false)
    }

    pub fn unfreeze(&mut self) -> Result<()> {
        self.set_trainable(true)
    }

    /// Release every variable now instead of when the store is dropped.
    pub fn free(self) -> Result<()> {
        let mut variables = lock(&self.variables_);
        for (_, mut t) in variables.trainable_variables.drain(..) {
            t.free()?;
        }
        for (_, mut t) in variables.named_variables.drain() {
            t.free()?;
        }
        Ok(())
    }
}

impl<'a> Path<'a> {
    /// The sub-path named `s`.
    ///
    /// A `.` in `s` is reported as `InvalidPath` by the first operation that
    /// names a variable under the returned path.
    pub fn sub<T: ToString>(&self, s: T) -> Path<'a> {
        let mut path = self.path.clone();
        path.push(s.to_string());
        Path {
            path,
            var_store: self.var_store,
        }
    }

    /// The empty path of the same store.
    pub fn root(&self) -> Path<'a> {
        self.var_store.root()
    }

    pub fn device(&self) -> Device {
        self.var_store.device
    }

    pub fn kind(&self) -> Kind {
        self.var_store.kind
    }

    /// The full dotted name of variable `name` under this path.
    pub fn path(&self, name: &str) -> Result<String> {
        for element in self.path.iter() {
            check_element(element)?;
        }
        check_element(name)?;
        if self.path.is_empty() {
            Ok(name.to_string())
        } else {
            Ok(format!("{}.{name}", self.path.join(".")))
        }
    }

    fn add_locked(
        &self,
        variables: &mut Variables,
        name: &str,
        tensor: Tensor,
        trainable: bool,
    ) -> Result<Tensor> {
        let mut tensor = tensor;
        let key = match self.path(name) {
            Ok(key) => key,
            Err(e) => {
                tensor.free()?;
                return Err(e);
            }
        };
        if variables.named_variables.contains_key(&key) {
            tensor.free()?;
            return Err(Error::PathExists(key));
        }
        let tensor = tensor.set_requires_grad(trainable)?.renamed(&key);
        if trainable {
            variables
                .trainable_variables
                .push((key.clone(), tensor.shallow_clone()?));
        }
        let out = tensor.shallow_clone()?;
        variables.named_variables.insert(key, tensor);
        Ok(out)
    }

    fn get_or_add_locked(
        &self,
        variables: &mut Variables,
        name: &str,
        tensor: Tensor,
        trainable: bool,
    ) -> Result<Tensor> {
        let key = self.path(name)?;
        if let Some(existing) = variables.named_variables.get(&key) {
            let mut tensor = tensor;
            tensor.free()?;
            return existing.shallow_clone();
        }
        self.add_locked(variables, name, tensor, trainable)
    }

    /// Insert `tensor` as variable `name`.
    ///
    /// Trainable variables require grad and join the trainable list; others
    /// have the grad flag cleared. On failure the tensor is released.
    pub fn add(&self, name: &str, tensor: Tensor, trainable: bool) -> Result<Tensor> {
        let mut variables = lock(&self.var_store.variables_);
        self.add_locked(&mut variables, name, tensor, trainable)
    }

    fn new_var(&self, name: &str, dims: &[i64], init: Init, trainable: bool) -> Result<Tensor> {
        let tensor = init::f_init(init, dims, self.device(), self.kind())?;
        self.add(name, tensor, trainable)
    }

    /// A new trainable variable.
    pub fn var(&self, name: &str, dims: &[i64], init: Init) -> Result<Tensor> {
        self.new_var(name, dims, init, true)
    }

    pub fn zeros(&self, name: &str, dims: &[i64]) -> Result<Tensor> {
        self.var(name, dims, Init::Const(0.))
    }

    pub fn ones(&self, name: &str, dims: &[i64]) -> Result<Tensor> {
        self.var(name, dims, Init::Const(1.))
    }

    /// A zero-filled buffer: stored and saved, never trained.
    pub fn zeros_no_train(&self, name: &str, dims: &[i64]) -> Result<Tensor> {
        self.new_var(name, dims, Init::Const(0.), false)
    }

    pub fn ones_no_train(&self, name: &str, dims: &[i64]) -> Result<Tensor> {
        self.new_var(name, dims, Init::Const(1.), false)
    }

    pub fn uniform(&self, name: &str, dims: &[i64], lo: f64, up: f64) -> Result<Tensor> {
        self.var(name, dims, Init::Uniform { lo, up })
    }

    pub fn randn(&self, name: &str, dims: &[i64], mean: f64, stdev: f64) -> Result<Tensor> {
        self.var(name, dims, Init::Randn { mean, stdev })
    }

    pub fn randn_standard(&self, name: &str, dims: &[i64]) -> Result<Tensor> {
        self.randn(name, dims, 0., 1.)
    }

    pub fn kaiming_uniform(&self, name: &str, dims: &[i64]) -> Result<Tensor> {
        self.var(name, dims, Init::KaimingUniform)
    }

    pub fn orthogonal(&self, name: &str, dims: &[i64], gain: f64) -> Result<Tensor> {
        self.var(name, dims, Init::Orthogonal { gain })
    }

    /// A new trainable variable holding a copy of `t`.
    pub fn var_copy(&self, name: &str, t: &Tensor) -> Result<Tensor> {
        let mut v = self.zeros(name, &t.size()?)?;
        no_grad(|| v.copy_(t))?;
        Ok(v)
    }

    /// A shallow clone of variable `name` under this path, if present.
    pub fn get(&self, name: &str) -> Result<Option<Tensor>> {
        let key = self.path(name)?;
        let variables = lock(&self.var_store.variables_);
        variables
            .named_variables
            .get(&key)
            .map(|t| t.shallow_clone())
            .transpose()
    }

    /// The variable `name` if it exists, or a slot to create it in.
    ///
    /// The store stays locked until the entry is consumed.
    pub fn entry<'b>(&'b self, name: &'b str) -> Entry<'b> {
        let variables = lock(&self.var_store.variables_);
        Entry {
            name,
            variables,
            path: self,
        }
    }
}

impl<'a, T: ToString> std::ops::Div<T> for &Path<'a> {
    type Output = Path<'a>;

    fn div(self, rhs: T) -> Self::Output {
        self.sub(rhs)
    }
}

impl<'a, T: ToString> std::ops::Div<T> for Path<'a> {
    type Output = Path<'a>;

    fn div(self, rhs: T) -> Self::Output {
        self.sub(rhs)
    }
}

// Every or_* returns the existing variable unchanged when the name is taken;
// the requested shape and initializer are only used on first creation.
impl Entry<'_> {
    fn or_new(mut self, dims: &[i64], init: Init, trainable: bool) -> Result<Tensor> {
        let key = self.path.path(self.name)?;
        if let Some(existing) = self.variables.named_variables.get(&key) {
            return existing.shallow_clone();
        }
        let tensor = init::f_init(init, dims, self.path.device(), self.path.kind())?;
        self.path
            .add_locked(&mut self.variables, self.name, tensor, trainable)
    }

    pub fn or_var(self, dims: &[i64], init: Init) -> Result<Tensor> {
        self.or_new(dims, init, true)
    }

    pub fn or_zeros(self, dims: &[i64]) -> Result<Tensor> {
        self.or_new(dims, Init::Const(0.), true)
    }

    pub fn or_ones(self, dims: &[i64]) -> Result<Tensor> {
        self.or_new(dims, Init::Const(1.), true)
    }

    pub fn or_zeros_no_train(self, dims: &[i64]) -> Result<Tensor> {
        self.or_new(dims, Init::Const(0.), false)
    }

    pub fn or_ones_no_train(self, dims: &[i64]) -> Result<Tensor> {
        self.or_new(dims, Init::Const(1.), false)
    }

    pub fn or_randn(self, dims: &[i64], mean: f64, stdev: f64) -> Result<Tensor> {
        self.or_new(dims, Init::Randn { mean, stdev }, true)
    }

    pub fn or_randn_standard(self, dims: &[i64]) -> Result<Tensor> {
        self.or_randn(dims, 0., 1.)
    }

    pub fn or_uniform(self, dims: &[i64], lo: f64, up: f64) -> Result<Tensor> {
        self.or_new(dims, Init::Uniform { lo, up }, true)
    }

    pub fn or_kaiming_uniform(self, dims: &[i64]) -> Result<Tensor> {
        self.or_new(dims, Init::KaimingUniform, true)
    }

    /// The existing variable, or a new trainable copy of `t`.
    pub fn or_var_copy(mut self, t: &Tensor) -> Result<Tensor> {
        let copy = no_grad(|| -> Result<Tensor> {
            let mut v = Tensor::zeros(&t.size()?, (self.path.kind(), self.path.device()))?;
            v.copy_(t)?;
            Ok(v)
        })?;
        self.path
            .get_or_add_locked(&mut self.variables, self.name, copy, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(t: &Tensor) -> Vec<f32> {
        t.to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_path_names() {
        let vs = VarStore::new(Device::Cpu);
        let root = vs.root();
        let p = root.sub("a").sub("b");
        assert_eq!(p.path("t").unwrap(), "a.b.t");
        assert_eq!(root.path("t").unwrap(), "t");
        assert_eq!((&root / "x" / 3).path("w").unwrap(), "x.3.w");
    }

    #[test]
    fn test_insert_and_duplicate() {
        let vs = VarStore::new(Device::Cpu);
        let p = vs.root().sub("layer");
        let w = p.zeros("w", &[2, 3]).unwrap();
        assert_eq!(w.size().unwrap(), vec![2, 3]);
        assert!(w.requires_grad().unwrap());
        assert_eq!(vs.len(), 1);

        let r = p.ones("w", &[4]);
        assert!(matches!(r, Err(Error::PathExists(ref k)) if k == "layer.w"));
        assert_eq!(vs.len(), 1);
        assert_eq!(values(&p.get("w").unwrap().unwrap()), vec![0.0; 6]);
    }

    #[test]
    fn test_invalid_path() {
        let vs = VarStore::new(Device::Cpu);
        assert!(matches!(
            vs.root().zeros("a.b", &[1]),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            vs.root().sub("x.y").zeros("w", &[1]),
            Err(Error::InvalidPath(_))
        ));
        assert!(vs.is_empty());
    }

    #[test]
    fn test_buffers_are_not_trainable() {
        let vs = VarStore::new(Device::Cpu);
        let bn = vs.root().sub("bn");
        let w = bn.ones("weight", &[4]).unwrap();
        let mean = bn.zeros_no_train("running_mean", &[4]).unwrap();
        assert!(w.requires_grad().unwrap());
        assert!(!mean.requires_grad().unwrap());
        assert_eq!(vs.len(), 2);
        assert_eq!(vs.trainable_variables().unwrap().len(), 1);
    }

    #[test]
    fn test_shallow_clones_share_storage() {
        let vs = VarStore::new(Device::Cpu);
        let w = vs.root().zeros("w", &[3]).unwrap();
        let mut other = vs.root().get("w").unwrap().unwrap();
        no_grad(|| other.fill_(2.0)).unwrap();
        assert_eq!(values(&w), vec![2.0; 3]);
    }

    #[test]
    fn test_entry_is_idempotent() {
        let vs = VarStore::new(Device::Cpu);
        let p = vs.root().sub("shared");
        let a = p.entry("emb").or_ones(&[2, 2]).unwrap();
        let b = p.entry("emb").or_zeros(&[5]).unwrap();
        assert_eq!(b.size().unwrap(), vec![2, 2]);
        assert_eq!(values(&b), vec![1.0; 4]);
        assert_eq!(a.data_ptr().unwrap(), b.data_ptr().unwrap());
        assert_eq!(vs.len(), 1);
    }

    #[test]
    fn test_entry_or_var_copy() {
        let vs = VarStore::new(Device::Cpu);
        let src = Tensor::from_slice(&[1.0f32, 2.0]).unwrap();
        let v = vs.root().entry("c").or_var_copy(&src).unwrap();
        assert_eq!(values(&v), vec![1.0, 2.0]);
        let again = vs.root().entry("c").or_var_copy(&Tensor::from_slice(&[9.0f32]).unwrap()).unwrap();
        assert_eq!(values(&again), vec![1.0, 2.0]);
    }

    #[test]
    fn test_remove_counts() {
        let vs = VarStore::new(Device::Cpu);
        vs.root().zeros("a", &[1]).unwrap();
        vs.root().zeros("b", &[1]).unwrap();
        vs.root().zeros_no_train("c", &[1]).unwrap();
        assert_eq!(vs.len(), 3);
        assert!(vs.remove("a").unwrap().is_some());
        assert!(vs.remove("a").unwrap().is_none());
        assert_eq!(vs.len(), 2);
        assert_eq!(vs.trainable_variables().unwrap().len(), 1);
    }

    #[test]
    fn test_freeze_unfreeze() {
        let mut vs = VarStore::new(Device::Cpu);
        let w = vs.root().randn_standard("w", &[3]).unwrap();
        vs.freeze().unwrap();
        assert!(!w.requires_grad().unwrap());
        assert_eq!(vs.trainable_variables().unwrap().len(), 1);
        vs.unfreeze().unwrap();
        assert!(w.requires_grad().unwrap());
    }

    #[test]
    fn test_var_copy() {
        let vs = VarStore::new(Device::Cpu);
        let src = Tensor::from_slice(&[3.0f32, 4.0, 5.0]).unwrap();
        let v = vs.root().var_copy("v", &src).unwrap();
        assert_eq!(values(&v), vec![3.0, 4.0, 5.0]);
        assert!(v.requires_grad().unwrap());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("weights.bin");

        let vs = VarStore::new(Device::Cpu);
        vs.root().sub("l").randn_standard("w", &[2, 3]).unwrap();
        vs.root().sub("l").uniform("b", &[3], -1.0, 1.0).unwrap();
        vs.save(&file).unwrap();

        let mut vs2 = VarStore::new(Device::Cpu);
        vs2.root().sub("l").zeros("w", &[2, 3]).unwrap();
        vs2.root().sub("l").zeros("b", &[3]).unwrap();
        vs2.load(&file).unwrap();

        let a = vs.variables().unwrap();
        let b = vs2.variables().unwrap();
        for name in ["l.w", "l.b"] {
            assert_eq!(values(&a[name]), values(&b[name]));
        }
    }

    #[test]
    fn test_load_mismatch_and_partial() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("t2.bin");
        let src = VarStore::new(Device::Cpu);
        src.root().sub("a").sub("b").ones("t2", &[2]).unwrap();
        src.save(&file).unwrap();

        let mut dst = VarStore::new(Device::Cpu);
        dst.root().sub("a").sub("b").zeros("t1", &[2]).unwrap();
        match dst.load(&file) {
            Err(Error::MissingParameter(name)) => assert_eq!(name, "a.b.t1"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dst.load_partial(&file).unwrap(), vec!["a.b.t1".to_string()]);
    }

    #[test]
    fn test_load_unexpected_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("extra.bin");
        let src = VarStore::new(Device::Cpu);
        src.root().ones("w", &[2]).unwrap();
        src.root().ones("extra", &[2]).unwrap();
        src.save(&file).unwrap();

        let mut dst = VarStore::new(Device::Cpu);
        let w = dst.root().zeros("w", &[2]).unwrap();
        assert!(matches!(
            dst.load(&file),
            Err(Error::UnexpectedParameter(ref n)) if n == "extra"
        ));
        assert_eq!(values(&w), vec![0.0, 0.0]);
        assert!(dst.load_partial(&file).unwrap().is_empty());
        assert_eq!(values(&w), vec![1.0, 1.0]);
    }

    #[test]
    fn test_copy_between_stores() {
        let src = VarStore::new(Device::Cpu);
        src.root().var("w", &[2], Init::Const(7.0)).unwrap();
        let mut dst = VarStore::new(Device::Cpu);
        let w = dst.root().zeros("w", &[2]).unwrap();
        dst.copy(&src).unwrap();
        assert_eq!(values(&w), vec![7.0, 7.0]);

        let mut lonely = VarStore::new(Device::Cpu);
        lonely.root().zeros("missing", &[1]).unwrap();
        assert!(matches!(
            lonely.copy(&src),
            Err(Error::MissingParameter(_))
        ));
    }
}
