use std::ffi::{CStr, CString};
use std::path::Path;

use crate::error::{Error, Result};

/// Drain the engine's per-thread error slot.
pub(crate) fn read_and_clean_error() -> Result<()> {
    let ptr = vole_sys::vole_last_error();
    if ptr.is_null() {
        return Ok(());
    }
    let msg = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { vole_sys::vole_string_free(ptr) };
    Err(Error::Engine(msg))
}

/// Run an engine call, then surface whatever it left in the error slot.
macro_rules! unsafe_engine {
    ($e:expr) => {{
        #[allow(unused_unsafe)]
        let v = unsafe { $e };
        $crate::utils::read_and_clean_error()?;
        v
    }};
}

pub(crate) use unsafe_engine;

pub(crate) fn path_to_cstring(path: &Path) -> Result<CString> {
    let s = path
        .to_str()
        .ok_or_else(|| Error::msg(format!("path {} is not valid UTF-8", path.display())))?;
    CString::new(s).map_err(|_| Error::msg(format!("path {s:?} contains a NUL byte")))
}

pub(crate) fn str_to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::msg(format!("name {s:?} contains a NUL byte")))
}
