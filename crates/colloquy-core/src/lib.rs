//! Chat-turn pipeline logic and repository trait definitions for Colloquy.
//!
//! This crate defines the "ports" (repository and provider traits) that the
//! infrastructure layer implements, plus the context-window assembler and the
//! streaming delta pipeline. It depends on `colloquy-types` and `colloquy-observe`, never on
//! `colloquy-infra` or any database/IO crate.

pub mod chat;
pub mod llm;
