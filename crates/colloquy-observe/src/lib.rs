//! Observability for Colloquy: tracing subscriber setup with optional
//! OpenTelemetry export, and GenAI semantic-convention attribute names.

pub mod genai_attrs;
pub mod tracing_setup;
