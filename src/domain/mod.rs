//! Domain layer: tags, request facts and content records.

pub mod content;
pub mod request;
pub mod tags;
pub mod types;
