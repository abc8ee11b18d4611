//! RPC method table

use serde_json::Value;

use super::handlers::{self, HandlerResult};
use crate::core::analyser::ProjectAnalyser;

pub type Handler = fn(&mut ProjectAnalyser, Value) -> HandlerResult;

/// Every method the server answers
pub const ROUTES: &[(&str, Handler)] = &[
    // Service
    ("get_status", handlers::get_status),
    ("shutdown", handlers::shutdown),
    // Analysis
    ("analyse_project", handlers::analyse_project),
    ("analyse_file", handlers::analyse_file),
    ("invalidate_file", handlers::invalidate_file),
    ("clear_cache", handlers::clear_cache),
    ("get_cached_graph", handlers::get_cached_graph),
    // Queries
    ("get_impact", handlers::get_impact),
    ("get_callers", handlers::get_callers),
    ("get_callees", handlers::get_callees),
    ("get_reachable", handlers::get_reachable),
    ("get_shortest_path", handlers::get_shortest_path),
    ("find_cycles", handlers::find_cycles),
    ("query_nodes", handlers::query_nodes),
    ("get_edges_for_node", handlers::get_edges_for_node),
];

pub fn lookup(method: &str) -> Option<Handler> {
    ROUTES
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, handler)| *handler)
}
