use std::sync::Arc;

use thiserror::Error;

use crate::types::DynError;

pub type Result<T, E = CompositionError> = std::result::Result<T, E>;

/// Errors raised while resolving or activating a composition
///
/// Any of these is fatal for the [crate::operation::CompositionOperation] that raised it.
/// Retrying means starting a new request.
#[derive(Error, Debug, Clone)]
pub enum CompositionError {
    /// Nothing satisfies the requested contract
    #[error("No export was found for the contract '{contract}'.")]
    NoExport { contract: String },

    /// More than one export satisfies a single-valued contract
    #[error("Only one export for the contract '{contract}' was expected, but found: {origins}.")]
    AmbiguousMatch { contract: String, origins: String },

    /// A required import resolved to zero exports
    #[error("'{site}' on '{required_by}' requires '{contract}' but it is missing")]
    MissingDependency {
        site: String,
        contract: String,
        required_by: String,
    },

    /// Prerequisites depend on each other, without a deferred edge in between
    #[error("A cyclic dependency exists through {} - Consider using `Lazy`", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    /// A provider or the scope broke an internal invariant
    #[error("Internal error occurred: {0}")]
    InvariantViolation(&'static str),

    #[error("Failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },

    #[error("Metadata view '{view}' could not be created - error: {error}")]
    MetadataView {
        view: &'static str,
        error: Arc<DynError>,
    },

    /// User code failed while activating an export
    #[error("Activation of '{origin}' failed - error: {error}")]
    ActivationFailed {
        origin: String,
        error: Arc<DynError>,
    },

    /// A factory asked for an import it never declared
    #[error("'{origin}' requested the import '{site}' which it does not declare")]
    MissingImport { site: String, origin: String },

    /// The contract can never be satisfied the way it is shaped
    #[error("The contract '{contract}' is not supported - {reason}")]
    UnsupportedContract { contract: String, reason: &'static str },

    /// A shared export was requested outside of its sharing boundary
    #[error("No scope with the sharing boundary '{boundary}' is available")]
    SharingBoundaryNotFound { boundary: String },
}
