//! Cooperative interruption of running work.
//!
//! While deadline-guarded work runs, its cancellation token is installed in a
//! thread-local slot. Long-running work polls [`interrupted`] (or grabs the
//! token with [`current_interrupt`]) and returns early; the result is then
//! discarded and the caller sees `TimeLimitExceeded { executed: true, interrupted: true }`.

use std::cell::RefCell;

use tokio_util::sync::CancellationToken;

thread_local! {
    static CURRENT: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

/// True if the deadline of the work running on this thread has fired.
///
/// Always `false` outside deadline-guarded work.
pub fn interrupted() -> bool {
    CURRENT.with(|c| c.borrow().as_ref().is_some_and(|t| t.is_cancelled()))
}

/// Token of the deadline-guarded work running on this thread, if any.
pub fn current_interrupt() -> Option<CancellationToken> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Runs `f` with `token` installed; restores the previous token afterwards,
/// including when `f` unwinds.
pub(crate) fn scope<R>(token: CancellationToken, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<CancellationToken>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            CURRENT.with(|c| *c.borrow_mut() = prev);
        }
    }

    let prev = CURRENT.with(|c| c.borrow_mut().replace(token));
    let _restore = Restore(prev);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_installs_and_restores() {
        assert!(!interrupted());
        assert!(current_interrupt().is_none());

        let outer = CancellationToken::new();
        scope(outer.clone(), || {
            assert!(!interrupted());
            outer.cancel();
            assert!(interrupted());

            let inner = CancellationToken::new();
            scope(inner, || assert!(!interrupted()));

            assert!(interrupted());
        });

        assert!(current_interrupt().is_none());
    }

    #[test]
    fn test_scope_restores_after_panic() {
        let token = CancellationToken::new();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope(token, || panic!("inside"))
        }));
        assert!(caught.is_err());
        assert!(current_interrupt().is_none());
    }
}
