//! Ranked search endpoints (spec §4.6, §4.7, §6 fulltext_search/vector_search/fusion_search).

use hyper::{body::Bytes, Request, Response};
use serde::Deserialize;

use super::crud_handlers::respond;
use super::request_utils::read_json_body;
use super::response::success_body;
use crate::dto::FusionSearchRequest;
use crate::router::{AppState, RouterError};

#[derive(Debug, Deserialize)]
pub struct FulltextSearchRequest {
    pub table: String,
    pub column: String,
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct VectorSearchRequest {
    pub table: String,
    pub column: String,
    pub query: Vec<f32>,
    #[serde(default = "default_limit")]
    pub k: usize,
    #[serde(default)]
    pub filter: Option<Vec<String>>,
}

fn default_limit() -> usize {
    10
}

pub async fn fulltext_search(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let body: FulltextSearchRequest = read_json_body(req).await?;
    let hits = state.facade.fulltext_search(&body.table, &body.column, &body.query, body.limit)?;
    respond(success_body(hits))
}

pub async fn vector_search(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let body: VectorSearchRequest = read_json_body(req).await?;
    let hits = state.facade.vector_search(&body.table, &body.column, &body.query, body.k, body.filter.as_deref())?;
    respond(success_body(hits))
}

pub async fn fusion_search(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let body: FusionSearchRequest = read_json_body(req).await?;
    let hits = state.facade.fusion_search(body)?;
    respond(success_body(hits))
}
