pub mod common;
pub mod consensus;
pub mod error;
pub mod execution;
pub mod network;

pub use error::{NodeError, TransactionError};
