//! # wagate-core
//!
//! Core types, traits, configuration, and error handling for the wagate gateway.

pub mod config;
pub mod error;
pub mod phone;
pub mod template;
pub mod traits;
pub mod types;

pub use config::shellexpand;
