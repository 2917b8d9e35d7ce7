//! Core data models for Courier.
//!
//! This crate provides the fundamental value types shared by every Courier
//! adapter: session identifiers and update priority classes.

pub mod ids;
pub mod priority;

// Re-export main types
pub use ids::SessionId;
pub use priority::UpdatePriority;
