//! Core traits shared across emulator components.
//!
//! The 3B1 core is driven by CPU bus-cycle calls rather than a master clock,
//! so this crate carries only the observability surface: every component
//! exposes its internal state for inspection, and queries never affect
//! emulation state.

mod observable;

pub use observable::{Observable, Value};
