//! # Payload Engine
//!
//! Registry mapping payload identifiers to executable payloads, plus the
//! built-in profile table. Lookup is lock-free; registering or removing a
//! payload never interrupts in-flight dispatch.

pub mod profiles;
pub mod registry;

pub use profiles::{builtin_registry, PayloadProfile, ProfilePayload};
pub use registry::{PayloadRegistry, RegistryStats};
