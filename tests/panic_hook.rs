// Kept in its own test binary: it replaces the process-wide panic hook.

use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing_logutil::recover;

static PREVIOUS_HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

#[test]
fn previous_hook_runs_only_outside_recovery_scopes() {
    panic::set_hook(Box::new(|_| {
        PREVIOUS_HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
    }));

    // First use chains the recovery hook in front of the counting one.
    let res = recover(|| -> () { panic!("inside scope") });
    assert!(res.is_err());
    assert_eq!(PREVIOUS_HOOK_CALLS.load(Ordering::SeqCst), 0);

    let outside = panic::catch_unwind(|| panic!("same thread, no scope"));
    assert!(outside.is_err());
    assert_eq!(PREVIOUS_HOOK_CALLS.load(Ordering::SeqCst), 1);

    let joined = thread::spawn(|| panic!("other thread")).join();
    assert!(joined.is_err());
    assert_eq!(PREVIOUS_HOOK_CALLS.load(Ordering::SeqCst), 2);

    let res = recover(|| -> () { panic!("inside again") });
    assert!(res.is_err());
    assert_eq!(PREVIOUS_HOOK_CALLS.load(Ordering::SeqCst), 2);
}
