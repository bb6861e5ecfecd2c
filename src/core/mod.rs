//! Deterministic primitives shared by the engine.

pub mod rng;
