//! Event types broadcast to engine subscribers.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so collaborators
//! can forward them over any transport (sockets, IPC bridges, log sinks)
//! without re-mapping.

pub mod events;
