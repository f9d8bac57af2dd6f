//! Process-wide logging setup shared by the `stepwise` binaries.

/// Initialize structured JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing subscriber configuration (filters, format).
pub mod tracing;
