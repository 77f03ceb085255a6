//! Failure taxonomy for the detector boundary.
//!
//! Engine, configuration and IO code reports `anyhow::Error`. The boundary
//! wraps those errors in a [`Failure`] that remembers which call failed, so the
//! ABI can map every failure onto one of the fixed status codes.

use std::fmt;
use std::os::raw::c_int;

pub const MESHMIND_SUCCESS: c_int = 0;
pub const MESHMIND_ERROR_INIT: c_int = -1;
pub const MESHMIND_ERROR_LOAD: c_int = -2;
pub const MESHMIND_ERROR_DETECT: c_int = -3;
pub const MESHMIND_ERROR_EXPORT: c_int = -4;
pub const MESHMIND_ERROR_INVALID_PARAM: c_int = -5;

/// Category of a boundary failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Init,
    Load,
    Detect,
    Export,
    InvalidParameter,
    /// The engine answered with data that does not match the transfer contract.
    SchemaMismatch,
}

impl FailureKind {
    /// ABI status code for this category.
    ///
    /// Schema mismatches can only be observed while decoding detections, so
    /// they share the detect code.
    pub fn status(self) -> c_int {
        match self {
            FailureKind::Init => MESHMIND_ERROR_INIT,
            FailureKind::Load => MESHMIND_ERROR_LOAD,
            FailureKind::Detect | FailureKind::SchemaMismatch => MESHMIND_ERROR_DETECT,
            FailureKind::Export => MESHMIND_ERROR_EXPORT,
            FailureKind::InvalidParameter => MESHMIND_ERROR_INVALID_PARAM,
        }
    }
}

/// Engine output violated the data-transfer contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaMismatch {
    pub field: String,
    pub reason: String,
}

impl SchemaMismatch {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema mismatch: field `{}` {}", self.field, self.reason)
    }
}

impl std::error::Error for SchemaMismatch {}

/// A failed boundary call.
#[derive(Debug)]
pub struct Failure {
    op: FailureKind,
    error: anyhow::Error,
}

impl Failure {
    pub fn new(op: FailureKind, error: impl Into<anyhow::Error>) -> Self {
        Self {
            op,
            error: error.into(),
        }
    }

    pub fn invalid_parameter(message: impl fmt::Display) -> Self {
        Self::new(
            FailureKind::InvalidParameter,
            anyhow::anyhow!("invalid parameter: {}", message),
        )
    }

    /// Failure category, with schema violations reported as such regardless
    /// of the call they surfaced in.
    pub fn kind(&self) -> FailureKind {
        if self.error.chain().any(|cause| cause.is::<SchemaMismatch>()) {
            FailureKind::SchemaMismatch
        } else {
            self.op
        }
    }

    /// Status code of the call that failed.
    pub fn status(&self) -> c_int {
        self.op.status()
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.error)
    }
}

/// Attach a failure category to a fallible result.
pub(crate) trait FailWith<T> {
    fn fail_with(self, op: FailureKind) -> Result<T, Failure>;
}

impl<T> FailWith<T> for anyhow::Result<T> {
    fn fail_with(self, op: FailureKind) -> Result<T, Failure> {
        self.map_err(|e| Failure::new(op, e))
    }
}
