//! Fuzzing harnesses for the pursuit turn protocol.
//!
//! The models run in memory, without real locks or mappings, and drive the
//! client's own phase machine and return-code classifier.

pub mod turn_model;
