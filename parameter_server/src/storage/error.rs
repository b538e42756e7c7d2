use std::{
    error::Error,
    fmt::{self, Display},
};

/// The specific result type for size mismatch checks inside the storage module.
pub type Result<T> = std::result::Result<T, SizeMismatchErr>;

/// Error returned whenever a gradient, a parameter buffer or an optimizer state doesn't have the
/// length of the parameters held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatchErr;

impl Display for SizeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParameterStore error: the provided buffer length doesn't match the store size")
    }
}

impl Error for SizeMismatchErr {}
