//! Warpgate Core Types and Traits
//!
//! This crate provides the fundamental types used throughout Warpgate:
//! - Client conversation types shared by both dialects
//! - Upstream chat wire types and event-line parsing
//! - The model alias table
//! - Identifier and credential generation
//! - Core error types

pub mod conversation;
pub mod error;
pub mod ids;
pub mod models;
pub mod upstream;

pub use error::{Error, Result};
