//! RPC method handlers

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::protocol::RpcError;
use crate::core::analyser::ProjectAnalyser;
use crate::core::models::{Confidence, NodeType};
use crate::core::parser::path_key;
use crate::core::query::TraversalDirection;

pub type HandlerResult = Result<Value, RpcError>;

// ==================== Request Types ====================

#[derive(Deserialize)]
pub struct AnalyseProjectParams {
    pub root: PathBuf,
}

#[derive(Deserialize)]
pub struct FileParams {
    pub file: PathBuf,
}

#[derive(Deserialize)]
pub struct ImpactParams {
    pub file: PathBuf,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub min_confidence: Option<Confidence>,
}

#[derive(Deserialize)]
pub struct NodeParams {
    pub node_id: String,
}

#[derive(Deserialize)]
pub struct QueryNodesParams {
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub node_type: Option<NodeType>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct ReachableParams {
    pub node_id: String,
    #[serde(default)]
    pub direction: TraversalDirection,
}

#[derive(Deserialize)]
pub struct PathParams {
    pub from: String,
    pub to: String,
}

#[derive(Deserialize)]
pub struct CyclesParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

// ==================== Helpers ====================

/// Deserialize params; absent params behave like an empty object
fn params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = match params {
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

fn to_result<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(RpcError::internal)
}

// ==================== Handlers ====================

pub fn get_status(analyser: &mut ProjectAnalyser, _params: Value) -> HandlerResult {
    to_result(&analyser.status())
}

pub fn analyse_project(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: AnalyseProjectParams = params(raw)?;
    let graph = analyser.analyse_project(&p.root)?;
    to_result(graph)
}

pub fn analyse_file(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: FileParams = params(raw)?;
    to_result(&analyser.analyse_file(&p.file)?)
}

pub fn get_impact(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: ImpactParams = params(raw)?;
    let report = analyser.get_impact(
        &path_key(&p.file),
        p.function.as_deref(),
        p.max_depth,
        p.min_confidence,
    );
    to_result(&report)
}

pub fn get_callers(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: NodeParams = params(raw)?;
    to_result(&analyser.get_callers(&p.node_id))
}

pub fn get_callees(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: NodeParams = params(raw)?;
    to_result(&analyser.get_callees(&p.node_id))
}

pub fn invalidate_file(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: FileParams = params(raw)?;
    analyser.invalidate_file(&p.file);
    Ok(Value::Null)
}

pub fn clear_cache(analyser: &mut ProjectAnalyser, _params: Value) -> HandlerResult {
    analyser.clear_cache();
    Ok(Value::Null)
}

pub fn get_cached_graph(analyser: &mut ProjectAnalyser, _params: Value) -> HandlerResult {
    to_result(&analyser.cached_graph())
}

pub fn query_nodes(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: QueryNodesParams = params(raw)?;
    let (nodes, total_count) = analyser.search_nodes(
        p.file_path.as_deref(),
        p.name.as_deref(),
        p.node_type,
        p.limit,
    );
    Ok(json!({ "nodes": nodes, "total_count": total_count }))
}

pub fn get_edges_for_node(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: NodeParams = params(raw)?;
    let (incoming, outgoing) = analyser.edges_for_node(&p.node_id);
    Ok(json!({ "incoming": incoming, "outgoing": outgoing }))
}

pub fn get_reachable(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: ReachableParams = params(raw)?;
    to_result(&analyser.get_reachable(&p.node_id, p.direction))
}

pub fn get_shortest_path(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: PathParams = params(raw)?;
    to_result(&analyser.get_shortest_path(&p.from, &p.to))
}

pub fn find_cycles(analyser: &mut ProjectAnalyser, raw: Value) -> HandlerResult {
    let p: CyclesParams = params(raw)?;
    to_result(&analyser.find_cycles(Some(p.limit)))
}

pub fn shutdown(analyser: &mut ProjectAnalyser, _params: Value) -> HandlerResult {
    analyser.shutdown();
    Ok(Value::Null)
}
