pub mod publisher;

pub use publisher::{PublishError, Published, Publisher};
