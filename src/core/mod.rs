//! Core types and constants for the warehouse localization system

pub mod types;
pub mod constants;

pub use types::*;
pub use constants::*;
