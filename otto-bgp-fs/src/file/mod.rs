//! File-level primitives behind small single-method traits. The discovery
//! store composes writer + renamer into an atomic write (temp file, then
//! rename); the policy writer and lock use writer/deleter directly.

pub mod deleter;
pub mod reader;
pub mod renamer;
pub mod writer;

/// Zero-sized marker implementing every file trait against the real
/// filesystem. The `mocks` feature substitutes `MockLocalFile` behind the
/// same traits.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFile;
