//! Backend-agnostic content I/O.
//!
//! A [`ContentStore`] persists byte streams and hands back opaque
//! [`ContentReference`]s. Reads produce a [`ContentReader`]: metadata plus a
//! single-use stream, optionally restricted to a [`ByteRange`].

mod range;
mod reader;
mod reference;
mod store;

pub use range::{declared_size, ByteRange, ContentRange};
pub use reader::{ByteStream, ContentAccessor, ContentReader};
pub(crate) use reader::RangeWindow;
pub use reference::ContentReference;
pub use store::ContentStore;
