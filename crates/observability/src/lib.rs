//! Process-wide tracing/logging setup shared by the Warden binaries.

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Initialize process-wide observability for `service`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(service: &'static str) {
    tracing::init(service);
}
