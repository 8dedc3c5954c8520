//! Shared fixtures for the scenario test suite
//!
//! The heavy lifting lives in `refclk_core::mock`; this crate adds the
//! conveniences the integration tests share.

use std::sync::Once;

/// Install a test logger once; `RUST_LOG=debug` shows driver activity
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Spin until a condition holds or a real-time deadline passes
pub fn wait_for(mut cond: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let start = std::time::Instant::now();
    while !cond() {
        if start.elapsed().as_millis() as u64 > timeout_ms {
            return false;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    true
}
