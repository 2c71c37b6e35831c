//! Cross-layer integration tests for Reticle
//!
//! Tests that exercise the whole pipeline from fact insertion to firing.
