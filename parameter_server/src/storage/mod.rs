mod error;
mod store;

pub use error::{Result, SizeMismatchErr};
pub use store::ParameterStore;
