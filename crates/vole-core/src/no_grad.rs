// No-grad scope
//
// Grad mode is a per-thread engine switch. While it is off the engine records
// no autograd information and accepts in-place writes into tensors that
// require grad, which is what loading weights into parameters needs.
//
// NoGradGuard turns the switch off when created and restores the previous
// value when dropped, so the restore also happens on `?` early returns and
// on unwinding.

/// Whether grad mode is on for the calling thread.
pub fn grad_enabled() -> bool {
    vole_sys::vole_grad_is_enabled() != 0
}

/// Set grad mode for the calling thread, returning the previous mode.
pub fn set_grad_enabled(enabled: bool) -> bool {
    vole_sys::vole_grad_set_enabled(enabled as i32) != 0
}

/// Disables grad mode until dropped.
#[must_use = "grad mode is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct NoGradGuard {
    prev: bool,
}

impl NoGradGuard {
    pub fn new() -> NoGradGuard {
        NoGradGuard {
            prev: set_grad_enabled(false),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        NoGradGuard::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.prev);
    }
}

/// Run `f` with grad mode off, restoring the previous mode afterwards.
pub fn no_grad<T, F: FnOnce() -> T>(f: F) -> T {
    let _guard = NoGradGuard::new();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};

    #[test]
    fn test_guard_restores_previous_mode() {
        assert!(grad_enabled());
        {
            let _g = NoGradGuard::new();
            assert!(!grad_enabled());
            {
                let _inner = NoGradGuard::new();
                assert!(!grad_enabled());
            }
            assert!(!grad_enabled());
        }
        assert!(grad_enabled());
    }

    #[test]
    fn test_restored_on_error_path() {
        fn failing() -> Result<()> {
            no_grad(|| -> Result<()> {
                assert!(!grad_enabled());
                Err(Error::msg("boom"))
            })?;
            Ok(())
        }
        assert!(failing().is_err());
        assert!(grad_enabled());
    }

    #[test]
    fn test_restored_on_panic() {
        let r = std::panic::catch_unwind(|| no_grad(|| panic!("inside")));
        assert!(r.is_err());
        assert!(grad_enabled());
    }
}
