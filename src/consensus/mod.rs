pub mod mempool;
pub mod message;
pub mod peers;
pub mod processor;
pub mod qc;
pub mod store;
pub mod votes;

pub use mempool::*;
pub use message::*;
pub use peers::*;
pub use processor::*;
pub use qc::*;
pub use store::*;
pub use votes::*;
