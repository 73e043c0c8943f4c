//! Nido Core — domain models, the permission bitset and the delegated
//! authorization tree shared by every other crate.

pub mod error;
pub mod models;
pub mod repository;
pub mod tree;

pub use error::{NidoError, NidoResult};
pub use models::permission::Permissions;
pub use tree::AuthTree;
