//! keg core: the descriptor model and the pipeline that consumes it.
//!
//! ```text
//! PackageDescriptor --resolve--> Resolved --fetch--> Verified --install--> Installed --test--> InstallOutcome
//! ```
//!
//! Every stage except the smoke test is terminal on failure. See
//! [`pipeline`] for the driver and [`descriptor`] for the on-disk format.

pub mod descriptor;
pub mod formula;
pub mod install;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod receipt;
pub mod reporter;
pub mod resolver;
pub mod smoke;
pub mod template;

pub use descriptor::{PackageDescriptor, SourceVariant};
pub use paths::{Paths, filename_from_url};
pub use pipeline::{InstallOutcome, Pipeline, PipelineError, PipelineOptions};
pub use reporter::{NullReporter, Reporter};

/// Re-exported so callers need only depend on `keg-core`.
pub use keg_schema as types;

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("keg/", env!("CARGO_PKG_VERSION"));
