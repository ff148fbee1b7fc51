//! Model backend abstractions for Colloquy.
//!
//! - `LlmProvider`: RPITIT trait for concrete backend implementations
//! - `BoxLlmProvider`: Object-safe wrapper for dynamic dispatch
//! - `TokenCounter`: Approximate token estimates for context budgeting
//! - `system_prompt`: Leading system message normalization

pub mod box_provider;
pub mod provider;
pub mod system_prompt;
pub mod tokenizer;
