//! Conversation and message persistence abstractions plus the chat-turn
//! pipeline for Colloquy.
//!
//! `ChatRepository` is the port the infrastructure layer implements.
//! `ChatService` drives one turn end to end: registry, context window,
//! backend call and persistence.

pub mod context;
pub mod lock;
pub mod pipeline;
pub mod registry;
pub mod repository;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;
