pub mod state;
pub mod transaction;

pub use state::*;
pub use transaction::*;
