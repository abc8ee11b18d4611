//! DAG Engine - cross-language source dependency analysis
//!
//! This library parses a project's source files into a directed graph of
//! files, classes and functions, answers impact and reachability queries
//! over it, and serves those queries as line-delimited JSON-RPC.

pub mod core;
pub mod error;
pub mod languages;
pub mod server;

pub use crate::core::analyser::ProjectAnalyser;
pub use crate::core::config::Config;
pub use crate::core::graph::{DependencyGraph, GraphBuilder};
pub use crate::core::models::{Confidence, ImpactReport, ProjectGraph};
pub use crate::core::query::GraphQueries;
pub use crate::error::{Error, Result};
pub use crate::languages::{ParserRegistry, SourceParser};
pub use crate::server::RpcServer;
