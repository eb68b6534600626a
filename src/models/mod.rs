//! Core data models for the relay.
//!
//! Row types map to the local store's SQLite tables via `sqlx::FromRow`;
//! everything serializes as JSON via `serde` for the HTTP surface.

pub mod media;
pub mod multipart;
pub mod object;
pub mod premium;
