//! Types broadcast to host UIs.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON unchanged.

pub mod events;
