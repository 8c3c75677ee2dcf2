//! Multi-source event ingestion.
//!
//! Polls append-only event feeds from independent remote sources and commits
//! them to durable storage, safe to run as several processes at once.

pub mod consumer;
