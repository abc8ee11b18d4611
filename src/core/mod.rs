//! Core engine for dependency analysis and graph queries

pub mod analyser;
pub mod config;
pub mod graph;
pub mod models;
pub mod parser;
pub mod query;
pub mod resolve;
