//! Process-wide logging setup.

/// Tracing subscriber configuration.
pub mod tracing;

/// Initialize process-wide logging with the default `info` level.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_DIRECTIVE);
}
