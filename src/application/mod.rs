//! Application services: ingestion, queries and the contracts they depend on.

pub mod cache_access;
pub mod circuit_breaker;
pub mod error;
pub mod ingest;
pub mod ordering;
pub mod pagination;
pub mod query;
pub mod repos;
pub mod retry;
