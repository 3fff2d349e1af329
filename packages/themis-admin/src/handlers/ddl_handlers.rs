//! Index lifecycle endpoints (spec §6 create_index/drop_index).

use hyper::{body::Bytes, Request, Response};
use serde::Deserialize;

use super::crud_handlers::respond;
use super::request_utils::read_json_body;
use super::response::success_body;
use crate::router::{AppState, RouterError};
use themis_core::catalog::IndexKind;

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    pub table: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    #[serde(default)]
    pub vector_dim: Option<u32>,
}

pub async fn create_index(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let body: IndexRequest = read_json_body(req).await?;
    state.facade.create_index(body.kind, &body.table, body.columns, body.vector_dim)?;
    respond(success_body(serde_json::json!({"created": true})))
}

pub async fn drop_index(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let body: IndexRequest = read_json_body(req).await?;
    let dropped = state.facade.drop_index(&body.table, &body.columns, body.kind)?;
    respond(success_body(serde_json::json!({"dropped": dropped})))
}
