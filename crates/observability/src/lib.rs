//! Process-wide tracing setup shared by the binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::LogFormat;

/// Initialize process-wide tracing.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
