//! # Blobseal Testkit
//!
//! Test utilities for blobseal.
//!
//! This crate provides:
//! - The content store conformance suite every backend must pass
//! - Fixtures for temporary stores, key rings and encrypted stacks
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use blobseal_core::MemoryContentStore;
//! use blobseal_testkit::prelude::*;
//!
//! let store = xor_store(MemoryContentStore::new(), key_ring("kek-1"));
//! run_conformance_suite(&store);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use conformance::*;
pub use fixtures::*;
pub use generators::*;
