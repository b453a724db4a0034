//! REST command surface
//!
//! Every bot command maps to one HTTP endpoint, scoped per guild.
//! Blacklist screening and the usage counter wrap every command
//! handler; domain errors map to stable HTTP statuses so the frontend
//! can relay them verbatim.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
