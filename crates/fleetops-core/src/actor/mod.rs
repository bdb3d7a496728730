//! Actor implementations

pub mod handle;
pub mod pool;
