//! Realty RSS - Real Estate News Feed Aggregator
//!
//! This crate republishes a fixed set of real-estate news feeds over HTTP,
//! one RSS 2.0 document per source plus a merged feed sorted newest first.

pub mod aggregator;
pub mod config;
pub mod fetcher;
pub mod routes;
pub mod rss;
