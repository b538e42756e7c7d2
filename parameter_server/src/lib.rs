pub mod initialization;
pub mod optimization;
pub mod storage;

pub use storage::{ParameterStore, Result, SizeMismatchErr};
