//! Export worker pool
//!
//! Each worker owns one broker channel and runs deliveries to completion one
//! at a time: look up the handler, run it, then ack or hand the failure to the
//! retry scheduler.

pub mod runner;

pub use runner::{DeliveryOutcome, Worker, spawn_workers};
