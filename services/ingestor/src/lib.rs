//! RSS Media Bus ingestor: polls configured feeds, normalizes entries and
//! persists new articles into the shared store. The notifier picks them up
//! from there; the store is the only rendezvous between the two processes.

pub mod config;
pub mod cycle;
pub mod extensions;
pub mod fetch;
pub mod governor;
pub mod normalize;
