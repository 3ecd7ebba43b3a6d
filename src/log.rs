use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Mute orchestrator logs (background output readers and watchers included).
pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst)
}

/// Install `env_logger` as a global logger. `RUST_LOG` takes precedence over `filter`.
/// Records are written to stderr, stdout is reserved for the service transport.
pub fn init(filter: &str) {
    let env = env_logger::Env::default().default_filter_or(filter);
    let result = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .try_init();
    if let Err(e) = result {
        eprintln!("logger already installed: {e}");
    }
}

#[macro_export]
macro_rules! orch_info {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::info!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::info!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! orch_warn {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::warn!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::warn!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! orch_error {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::error!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::error!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! orch_debug {
    (target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::debug!(target: $target, $($arg)+)
        }
    };
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            log::debug!($($arg)+)
        }
    };
}
