// crates/waypoint-server/src/utils/mod.rs
// Shared helpers

pub mod json;

pub use json::{excerpt, extract_llm_json};
