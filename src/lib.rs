#![forbid(unsafe_code)]

pub mod blocks;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod importer;
pub mod logging;
pub mod media_store;
pub mod migrate;
pub mod pipeline;
pub mod report;
pub mod repository;
pub mod resolver;
pub mod rewrite;
