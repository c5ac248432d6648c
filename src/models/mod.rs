//! Core data models for the video ingest service.
//!
//! These map to database tables via `sqlx::FromRow` and serialize as JSON
//! via `serde` for API responses.

pub mod video;
