//! Platform resolution: pick exactly one source variant for a host.
//!
//! Variants are evaluated in declaration order and the first whose predicate
//! holds wins. Resolution is a pure function of the descriptor and the
//! platform; nothing here touches the network or the filesystem.

use thiserror::Error;

use keg_schema::Platform;

use crate::descriptor::SourceVariant;

/// Resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No variant's predicate holds on the requested platform.
    #[error("no source variant for {platform} (declared: {})", .declared.join(", "))]
    NoMatchingVariant {
        /// The platform that was resolved for.
        platform: Platform,
        /// Labels of the variants the descriptor does declare.
        declared: Vec<String>,
    },
}

/// Select the first variant in `sources` that applies on `platform`.
///
/// # Errors
///
/// Returns [`ResolveError::NoMatchingVariant`] when no predicate holds.
pub fn select_variant(
    sources: &[SourceVariant],
    platform: Platform,
) -> Result<&SourceVariant, ResolveError> {
    let selected = sources.iter().find(|s| s.matches(platform));

    match selected {
        Some(variant) => {
            tracing::debug!(%platform, variant = variant.label(), url = %variant.url, "Resolved source variant");
            Ok(variant)
        }
        None => Err(ResolveError::NoMatchingVariant {
            platform,
            declared: sources.iter().map(|s| s.label().to_string()).collect(),
        }),
    }
}
