//! Wire types shared by the Atrium crates: persisted enums, sanitized
//! payloads, gateway events and HTTP request/response bodies.

pub mod api;
pub mod events;
pub mod models;
