//! Error types for tree operations.

/// Errors surfaced by cell construction, table generation and the
/// distributed tree pipeline.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A coordinate/level pair does not describe a cell: some coordinate has
    /// bits set below the level mask or lies outside the domain.
    #[error("invalid cell: coordinate {coord} is not aligned to level {level}")]
    InvalidCell {
        /// The offending coordinate value.
        coord: u32,
        /// The requested level.
        level: u32,
    },
    /// The rotation table generator only supports dimensions whose child
    /// locations fit into a `MAX_DIM`-bit word.
    #[error("dimension {0} is outside the supported range 2..=8")]
    DimensionUnsupported(usize),
    /// The transport layer reported a failure.
    #[error("communication failure: {0}")]
    CommFailure(String),
    /// An operation was attempted on a container that is already in an
    /// error state.
    #[error("tree container is poisoned by an earlier failure")]
    Poisoned,
    /// A consumer violated an interface contract, e.g. called an operation
    /// that its concrete type does not implement or re-ran a one-shot
    /// operation.
    #[error("logic error: {0}")]
    LogicError(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
