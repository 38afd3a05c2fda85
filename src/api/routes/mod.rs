//! API Routes
//!
//! Route handlers organized by functionality.

pub mod blocks;
pub mod health;
pub mod query;
pub mod sync;
