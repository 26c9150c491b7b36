//! Integration test crate for reelfix.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It drives the pipeline end to end over the in-memory media backend.

#[cfg(test)]
mod windows;

#[cfg(test)]
mod stabilization;

#[cfg(test)]
mod batch;
