//! Live token screener: an in-memory entity table fed by a simulated price
//! stream, shown through a filtered and sorted projection.

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod format;
pub mod metrics;
pub mod projection;
pub mod service;
pub mod source;
pub mod state;
pub mod types;
pub mod view;
