//! Purpose: Library crate behind the `pickleframe` CLI and tests.
//! Exports: `api` (frame decoding, pickle decoding/encoding, JSON conversion, errors)
//! and `graphite` (metric batches carried in pickle frames).
//! Role: Pure, synchronous building blocks; no file or network I/O inside the library.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
mod core;
pub mod graphite;
