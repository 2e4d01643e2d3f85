// ABOUTME: Library root for delta-replicator
// ABOUTME: Exposes the streaming consumer, batch sync engine, and shared plumbing

pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod error;
pub mod postgres;
pub mod stream;
pub mod sync;
pub mod utils;
