//! Endpoint handlers. Each one delegates to the mapping pipeline.

pub mod health;
pub mod map;
