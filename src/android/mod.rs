//! Emulator input module
//!
//! Touch commands in reference coordinates and the [`Actuation`] trait the
//! device backend implements.

pub mod input;

pub use input::*;
