//! Logger setup for hosts that load the library through the C ABI.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install an `env_logger` filtered by `MESHMIND_LOG` (default `warn`).
///
/// Safe to call repeatedly. If the host process already installed a logger,
/// that logger is kept.
pub fn init() {
    INIT.call_once(|| {
        let env = env_logger::Env::new()
            .filter_or("MESHMIND_LOG", "warn")
            .write_style("MESHMIND_LOG_STYLE");
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("host logger already installed; keeping it");
        }
    });
}
