use std::ffi::CStr;
use std::fmt;

use vole_sys::C_scalar;

use crate::error::{Error, Result};
use crate::registry;
use crate::utils::unsafe_engine;

/// Owning handle over one 0-dim engine value.
///
/// Follows the same lifetime discipline as [`crate::Tensor`]: registered on
/// creation, released by `free`, `must_free` or `Drop`.
#[derive(Debug)]
pub struct Scalar {
    c_scalar: *mut C_scalar,
    name: String,
}

unsafe impl Send for Scalar {}
unsafe impl Sync for Scalar {}

impl Scalar {
    fn wrap(c_scalar: *mut C_scalar) -> Result<Scalar> {
        if c_scalar.is_null() {
            return Err(Error::Engine("engine returned a null scalar".to_string()));
        }
        let bytes = if registry::is_debug() {
            std::mem::size_of::<f64>()
        } else {
            0
        };
        let name = registry::register(None, "scalar", bytes);
        Ok(Scalar { c_scalar, name })
    }

    pub fn int(v: i64) -> Result<Scalar> {
        Scalar::wrap(unsafe_engine!(vole_sys::vole_scalar_int(v)))
    }

    pub fn float(v: f64) -> Result<Scalar> {
        Scalar::wrap(unsafe_engine!(vole_sys::vole_scalar_float(v)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn as_ptr(&self) -> Result<*mut C_scalar> {
        if self.c_scalar.is_null() {
            return Err(Error::Released(self.name.clone()));
        }
        Ok(self.c_scalar)
    }

    pub fn to_int(&self) -> Result<i64> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_scalar_to_int(c)))
    }

    pub fn to_float(&self) -> Result<f64> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_scalar_to_float(c)))
    }

    /// The engine's rendering of the value.
    pub fn f_to_string(&self) -> Result<String> {
        let c = self.as_ptr()?;
        let ptr = unsafe_engine!(vole_sys::vole_scalar_to_string(c));
        if ptr.is_null() {
            return Err(Error::Engine("engine returned a null string".to_string()));
        }
        let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { vole_sys::vole_string_free(ptr) };
        Ok(s)
    }

    /// Release the engine value now; `DoubleFree` on repeat.
    pub fn free(&mut self) -> Result<()> {
        if self.c_scalar.is_null() {
            return Err(Error::DoubleFree(self.name.clone()));
        }
        let c = std::mem::replace(&mut self.c_scalar, std::ptr::null_mut());
        unsafe { vole_sys::vole_scalar_free(c) };
        registry::unregister(&self.name);
        crate::utils::read_and_clean_error()
    }

    pub fn must_free(&mut self) {
        if let Err(e) = self.free() {
            panic!("must_free failed for {}: {e}", self.name);
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.f_to_string() {
            Ok(s) => write!(f, "{s}"),
            Err(e) => write!(f, "<{e}>"),
        }
    }
}

impl Drop for Scalar {
    fn drop(&mut self) {
        if self.c_scalar.is_null() {
            return;
        }
        log::debug!("finalizing {}", self.name);
        if let Err(e) = self.free() {
            log::warn!("error while finalizing {}: {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_scalar_roundtrip() {
        let s = Scalar::int(45).unwrap();
        assert_eq!(s.to_int().unwrap(), 45);
        assert_eq!(s.f_to_string().unwrap(), "45");
        assert_eq!(s.to_float().unwrap(), 45.0);
        assert_eq!(s.to_string(), "45");
    }

    #[test]
    fn test_scalar_free_is_checked() {
        let mut s = Scalar::float(0.25).unwrap();
        assert!(registry::is_live(s.name()));
        s.free().unwrap();
        assert!(!registry::is_live(s.name()));
        assert!(matches!(s.free(), Err(Error::DoubleFree(_))));
        assert!(matches!(s.to_float(), Err(Error::Released(_))));
    }
}
