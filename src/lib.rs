//! Parallel, contig-sharded loader of genomic reference and variant data
//! into a document store.

pub mod app;
pub mod batch;
pub mod config;
pub mod domain;
pub mod enrich;
pub mod error;
pub mod lifecycle;
pub mod output;
pub mod partition;
pub mod pool;
pub mod progress;
pub mod sources;
pub mod store;
pub mod tabix;
