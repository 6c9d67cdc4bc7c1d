//! Core types and abstractions for the Hippo episodic memory system.
//!
//! This crate provides the domain model (episodes, conversation messages,
//! experiences), the store traits implemented by `hippo-storage`, timestamp
//! handling, configuration and the error taxonomy shared by every component.

pub mod config;
pub mod error;
pub mod id;
pub mod time;
pub mod traits;
pub mod types;

pub use config::HippoConfig;
pub use error::{HippoError, Result};
pub use id::HippoId;
pub use traits::*;
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::HippoConfig;
    pub use crate::error::{HippoError, Result};
    pub use crate::id::HippoId;
    pub use crate::time::{format_instant, parse_instant};
    pub use crate::traits::*;
    pub use crate::types::*;
}
