/// Closeable blocking queue for completion dispatch.
pub(crate) mod queue;

/// Big-endian wire-format helpers.
pub(crate) mod serdes;
