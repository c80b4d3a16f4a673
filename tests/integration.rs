#[path = "integration/basic_inference.rs"]
mod basic_inference;
