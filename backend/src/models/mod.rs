pub mod snapshot;

pub use snapshot::{RequestSnapshot, ResponseSnapshot};
