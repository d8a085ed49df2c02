//! Content store backends.
//!
//! All backends implement [`crate::ContentStore`] and pass the same
//! conformance suite.

mod file;
mod memory;
mod object;

pub use file::FileContentStore;
pub use memory::MemoryContentStore;
pub use object::{
    MemoryObjectClient, ObjectClient, ObjectClientError, ObjectContentStore, ObjectResponse,
};
