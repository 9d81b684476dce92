//! Utility modules.
pub mod devlog;
