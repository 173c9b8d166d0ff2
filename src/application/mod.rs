//! Application seams between the cache and its collaborators.

pub mod engine;
pub mod error;
pub mod repos;
