//! The error surface of the substrate.
//!
//! Every fallible call returns a [`TesseraError`] directly; there is no
//! out-of-band failure channel. Pure queries (patterns, pointers) report
//! their error kind immediately, non-blocking data movement may defer a
//! transport failure to the corresponding `wait`/`flush`.

/// The error kinds surfaced by the substrate.
///
/// Collective operations are expected to fail at every participating unit or
/// at none; an asymmetric failure is reported as [`TransportError`][Self::TransportError]
/// and is fatal for the team.
#[derive(Debug, Clone, PartialEq)]
pub enum TesseraError {
    /// Caller-supplied inputs violate a stated precondition (mismatched
    /// collective arguments, zero-size team, null pattern, ...).
    InvalidArgument(String),
    /// A pattern query was issued for an index outside the declared shape.
    OutOfRange(String),
    /// A local-address query on a global pointer that does not reside on the
    /// calling unit.
    NotLocal {
        /// The unit component of the offending pointer (team-relative).
        unit: u32,
    },
    /// The substrate was used before `init` or after `finalize`.
    NotInitialized,
    /// A group/team/action lookup by id or name failed.
    NotFound(String),
    /// A non-blocking test observed an incomplete handle. Informational.
    Pending,
    /// A provider-level failure (collective deadlock, segment exhaustion,
    /// transfer failure).
    TransportError(String),
}

impl std::fmt::Display for TesseraError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TesseraError::InvalidArgument(msg) => {
                write!(f, "invalid argument: {}", msg)
            }
            TesseraError::OutOfRange(msg) => {
                write!(f, "index out of range: {}", msg)
            }
            TesseraError::NotLocal { unit } => {
                write!(f, "global pointer into unit {} is not local to the caller", unit)
            }
            TesseraError::NotInitialized => {
                write!(f, "substrate is not initialized (before init or after finalize)")
            }
            TesseraError::NotFound(what) => {
                write!(f, "lookup failed: {}", what)
            }
            TesseraError::Pending => {
                write!(f, "operation has not completed yet")
            }
            TesseraError::TransportError(msg) => {
                write!(f, "transport failure: {}", msg)
            }
        }
    }
}

impl std::error::Error for TesseraError {}

/// A Result type for all fallible substrate operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

impl TesseraError {
    pub(crate) fn invalid(msg: impl Into<String>) -> TesseraError {
        TesseraError::InvalidArgument(msg.into())
    }
    pub(crate) fn out_of_range(msg: impl Into<String>) -> TesseraError {
        TesseraError::OutOfRange(msg.into())
    }
    pub(crate) fn transport(msg: impl Into<String>) -> TesseraError {
        TesseraError::TransportError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind() {
        let e = TesseraError::NotLocal { unit: 3 };
        assert!(format!("{}", e).contains("unit 3"));
        let e = TesseraError::invalid("nelem mismatch");
        assert!(format!("{}", e).contains("nelem mismatch"));
    }
}
