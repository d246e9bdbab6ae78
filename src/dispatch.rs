//! Dispatch
//!
//! The single entry point through which the host calls module functions.
//! The host only knows a function's handle; the record behind it decodes the
//! arguments, runs the native code and encodes the result.
//!
//! Native panics are caught here and nowhere else. A contained panic is
//! reported to the host as a `<prefix>-panic` signal, and the module stays
//! usable for later calls.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use log::error;

use crate::error::Error;
use crate::host::{Env, Trampoline, Value};
use crate::module::Module;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Trampoline for Module {
    /// # Panics
    ///
    /// Panics if `data` is not a live function handle. Such a call did not
    /// come from a function this module created.
    fn call(&self, env: &mut Env<'_>, args: &[Value], data: u64) -> Value {
        let record = self.inner.functions.lookup(data);

        let result = panic::catch_unwind(AssertUnwindSafe(|| record.call(env, args)));
        let err = match result {
            Ok(Ok(value)) => return value,
            Ok(Err(err)) => err,
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("panic in module function #{}: {}", data, message);
                Error::Panic(message)
            }
        };
        self.inner.translator.deliver(env, err);
        // The host ignores the result while an exit is pending.
        env.host().intern("nil")
    }

    fn finalize(&self, data: u64) {
        self.inner.functions.release(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 42");
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
