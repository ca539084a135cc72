//! Command handlers.

pub mod paths;
pub mod search;
pub mod serve;
pub mod servers;
pub mod verify;
