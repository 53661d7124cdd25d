//! Collaborator traits the engine runs against.
//!
//! Applications implement these to plug in their rule table, content
//! repository, and persistent key-value storage.

pub mod content;
pub mod kv;
pub mod rules;
