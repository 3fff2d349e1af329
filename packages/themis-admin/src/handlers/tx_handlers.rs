//! Transaction lifecycle endpoints (spec §6 begin_tx/commit_tx/rollback_tx).

use hyper::{body::Bytes, Request, Response};
use serde::Deserialize;

use super::crud_handlers::respond;
use super::request_utils::read_json_body;
use super::response::success_body;
use crate::router::{AppState, RouterError};

#[derive(Debug, Deserialize, Default)]
pub struct BeginTxRequest {
    #[serde(default)]
    pub snapshot_isolation: bool,
}

pub async fn begin_tx(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let body: BeginTxRequest = read_json_body(req).await.unwrap_or_default();
    let tx_id = state.facade.begin_tx(body.snapshot_isolation)?;
    respond(success_body(serde_json::json!({"tx_id": tx_id})))
}

fn parse_tx_id(params: &matchit::Params<'_, '_>) -> Result<u64, RouterError> {
    params
        .get("id")
        .ok_or_else(|| RouterError::BadRequest("missing tx id".into()))?
        .parse::<u64>()
        .map_err(|_| RouterError::BadRequest("invalid tx id".into()))
}

pub async fn commit_tx(
    _req: Request<hyper::body::Incoming>,
    params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let tx_id = parse_tx_id(&params)?;
    state.facade.commit_tx(tx_id, crate::now_ms())?;
    respond(success_body(serde_json::json!({"committed": true})))
}

pub async fn rollback_tx(
    _req: Request<hyper::body::Incoming>,
    params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let tx_id = parse_tx_id(&params)?;
    state.facade.rollback_tx(tx_id)?;
    respond(success_body(serde_json::json!({"rolled_back": true})))
}
