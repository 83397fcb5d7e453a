//! Elasticsearch / OpenSearch adapter for the analyzers.

pub mod client;

pub use client::OpenSearchClient;
