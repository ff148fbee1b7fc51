//! Custom axum extractors.

pub mod owner;
