//! Data types shared across the engine.

pub mod analysis;
pub mod backup;
pub mod content;
pub mod job;
pub mod mapping;
pub mod rule;
