//! Types delivered to embedding applications.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them over their own event bus unchanged.

pub mod events;
