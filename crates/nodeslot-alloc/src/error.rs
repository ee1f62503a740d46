//! Topology construction error types.

use thiserror::Error;

/// Errors raised while building a [`Machine`](crate::Machine) from discovery facts.
///
/// Placement and release never fail; running out of capacity shows up as a
/// short placed count instead.
#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("expected topology object missing: {0}")]
    SystemTopologyMissing(String),

    #[error("unrecognized hardware layout: {0}")]
    UnrecognizedLayout(String),

    #[error("accelerator enumeration failed: {0}")]
    DeviceEnumerationFailed(String),
}

pub type TopologyResult<T> = Result<T, TopologyError>;
