//! Shared value types for keg package descriptors.
//!
//! Everything here is plain data: host platform detection, the platform
//! predicates a source variant can be gated on, SHA-256 newtypes and the
//! normalised package name / version strings. Parsing of whole descriptors
//! lives in `keg-core`.

pub mod arch;
pub mod hash;
pub mod platform;
pub mod types;

// Re-exports
pub use arch::*;
pub use hash::*;
pub use platform::*;
pub use types::*;
