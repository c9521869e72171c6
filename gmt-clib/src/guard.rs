//! Process-wide admission control for native sessions.
//!
//! Non-reentrant libraries keep their parameter table and working state in
//! globals, so at most one [`Session`](crate::Session) may be alive for them
//! per process. The guard is taken before the native create call and
//! released after the native destroy call.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

static ACTIVE: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
pub(crate) struct ProcessGuard {
    // Released on the thread that created the session.
    _not_send: PhantomData<*const ()>,
}

impl ProcessGuard {
    pub(crate) fn acquire() -> Result<Self> {
        ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ConcurrentSession)?;
        Ok(Self {
            _not_send: PhantomData,
        })
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        ACTIVE.store(false, Ordering::Release);
    }
}

/// Whether a guarded session currently exists in this process.
pub fn session_active() -> bool {
    ACTIVE.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let _serial = crate::tests::serial();
        let first = ProcessGuard::acquire().unwrap();
        assert!(session_active());
        assert!(matches!(
            ProcessGuard::acquire(),
            Err(Error::ConcurrentSession)
        ));
        drop(first);
        assert!(!session_active());
        let again = ProcessGuard::acquire().unwrap();
        drop(again);
    }
}
