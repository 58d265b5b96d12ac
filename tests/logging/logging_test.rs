//! Tests for `src/logging.rs`.

use chat_delivery::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // The global subscriber can only be installed once per process; this is
    // the only test in this binary that installs it, so the call is safe.
    // The directory must exist regardless of subscriber state.
    let _guard = chat_delivery::logging::init_production(&logs_dir);
    assert!(logs_dir.exists(), "logs directory should be created");
}
