//! Infrastructure layer for Colloquy.
//!
//! Contains implementations of the ports defined in `colloquy-core`:
//! SQLite storage for conversations and messages, the Ollama model
//! backend, and the `config.toml` loader.

pub mod config;
pub mod llm;
pub mod sqlite;
