//! Panic recovery boundaries.
//!
//! [`recover`] and [`recover_future`] run a unit of work and, if it panics,
//! turn the panic into a [`StackError`] carrying the stack at the panic site,
//! log it as one error-level record, and hand it back to the caller instead
//! of unwinding further. Whether to re-raise is the caller's call.

use crate::stack::{capture_frames, StackError, StackFrame};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

/// Prefix of the message of every recovered panic.
pub const RECOVERED_PANIC: &str = "recovered panic";

struct PanicCapture {
    frames: Vec<StackFrame>,
    location: Option<String>,
}

thread_local! {
    /// Depth of recovery scopes active on this thread; the hook only
    /// captures while it is non-zero.
    static ARMED: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<PanicCapture>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Chain a hook in front of the current one. Inside a recovery scope it
/// records the panic site and stays silent; elsewhere the previous hook
/// runs unchanged.
fn install_hook() {
    HOOK.call_once(|| {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if ARMED.with(|a| a.get()) == 0 {
                prev(info);
                return;
            }
            let capture = PanicCapture {
                frames: capture_frames(),
                location: info.location().map(|l| l.to_string()),
            };
            LAST_PANIC.with(|p| *p.borrow_mut() = Some(capture));
        }));
    });
}

/// Marks the current thread as inside a recovery scope until dropped.
struct Armed;

impl Armed {
    fn new() -> Self {
        install_hook();
        ARMED.with(|a| a.set(a.get() + 1));
        Armed
    }
}

impl Drop for Armed {
    fn drop(&mut self) {
        ARMED.with(|a| a.set(a.get().saturating_sub(1)));
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

fn into_stack_error(payload: Box<dyn Any + Send>) -> (StackError, Option<String>) {
    let capture = LAST_PANIC.with(|p| p.borrow_mut().take());
    let msg = format!("{RECOVERED_PANIC}: {}", payload_message(payload.as_ref()));
    match capture {
        Some(PanicCapture { frames, location }) => (StackError::from_frames(msg, frames), location),
        None => (StackError::from_frames(msg, capture_frames()), None),
    }
}

fn emit(err: &StackError, location: Option<&str>) {
    match location {
        Some(location) => tracing::error!(error = err.as_dyn(), panic.location = location),
        None => tracing::error!(error = err.as_dyn()),
    }
}

/// Run `f`; a panic inside it is logged once at error level and returned
/// as `Err` instead of unwinding past this call.
///
/// ```
/// let res = tracing_logutil::recover(|| -> u32 { panic!("testing") });
/// assert_eq!(res.unwrap_err().to_string(), "recovered panic: testing");
/// ```
pub fn recover<F, T>(f: F) -> Result<T, StackError>
where
    F: FnOnce() -> T,
{
    let outcome = {
        let _armed = Armed::new();
        panic::catch_unwind(AssertUnwindSafe(f))
    };
    outcome.map_err(|payload| {
        let (err, location) = into_stack_error(payload);
        emit(&err, location.as_deref());
        err
    })
}

/// Future returned by [`recover_future`].
pub struct Recover<F> {
    inner: Option<Pin<Box<F>>>,
}

/// Wrap `fut` so a panic during any of its polls resolves the wrapper to
/// `Err(StackError)` after logging it once.
pub fn recover_future<F: Future>(fut: F) -> Recover<F> {
    Recover {
        inner: Some(Box::pin(fut)),
    }
}

impl<F: Future> Future for Recover<F> {
    type Output = Result<F::Output, StackError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(inner) = self.inner.as_mut() else {
            panic!("`Recover` polled after completion");
        };
        let outcome = {
            let _armed = Armed::new();
            panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx)))
        };
        match outcome {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(out)) => {
                self.inner = None;
                Poll::Ready(Ok(out))
            }
            Err(payload) => {
                self.inner = None;
                let (err, location) = into_stack_error(payload);
                emit(&err, location.as_deref());
                Poll::Ready(Err(err))
            }
        }
    }
}

/// Log an ordinary error as one error-level record, attaching the stack of
/// the first [`StackError`] in its source chain.
pub fn report(err: &(dyn Error + 'static)) {
    tracing::error!(error = err);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value_when_nothing_panics() {
        assert_eq!(recover(|| 7).unwrap(), 7);
    }

    #[test]
    fn formats_string_and_str_payloads() {
        let err = recover(|| panic!("plain")).unwrap_err();
        assert_eq!(err.to_string(), "recovered panic: plain");

        let code = 3;
        let err = recover(|| panic!("code {code}")).unwrap_err();
        assert_eq!(err.to_string(), "recovered panic: code 3");
    }

    #[test]
    fn disarms_after_scope() {
        let _ = recover(|| panic!("once"));
        assert_eq!(ARMED.with(|a| a.get()), 0);
        assert!(LAST_PANIC.with(|p| p.borrow().is_none()));
    }

    #[test]
    fn nested_scopes_recover_innermost() {
        let outer = recover(|| {
            let inner = recover(|| panic!("inner"));
            assert!(inner.is_err());
            "outer ok"
        });
        assert_eq!(outer.unwrap(), "outer ok");
    }
}
