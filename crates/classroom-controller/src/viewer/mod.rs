//! Viewer-side components, one instance per connected viewer.

pub mod focus;

pub use focus::{FocusTracker, FocusWorkers};
