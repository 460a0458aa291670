//! Namespace keys and observation types

pub mod hasher;
pub mod node;
pub mod url;

pub use node::{FileRecord, FileType};
pub use url::Url;
