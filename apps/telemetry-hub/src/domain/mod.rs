//! Domain Layer - Core dispatch and series types.
//!
//! Pure logic with no I/O: everything here is driven by values and an
//! injected clock, which is what makes the dispatch and windowing rules
//! testable without a transport.

/// Injectable time source.
pub mod clock;

/// Device metadata tree and delta application.
pub mod metadata;

/// Sampling resolutions.
pub mod resolution;

/// Subscription window variants.
pub mod subscription;

/// Gap-aware per-sensor series storage.
pub mod timeseries;
