//! AQL execution endpoint (spec §6 execute_aql).

use hyper::{body::Bytes, Request, Response};
use serde::Deserialize;
use std::collections::HashMap;

use super::crud_handlers::respond;
use super::request_utils::{read_json_body, tx_id_query_param};
use super::response::success_body;
use crate::dto::{json_to_value, value_to_json};
use crate::router::{AppState, RouterError};

#[derive(Debug, Deserialize)]
pub struct ExecuteAqlRequest {
    pub query: String,
    #[serde(default)]
    pub bind_vars: HashMap<String, serde_json::Value>,
}

pub async fn execute_aql(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let tx_id = tx_id_query_param(&req)?;
    let body: ExecuteAqlRequest = read_json_body(req).await?;
    let bind_vars = body.bind_vars.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect();
    let rows = state.facade.execute_aql(&body.query, bind_vars, tx_id)?;
    let json_rows: Vec<serde_json::Value> = rows.iter().map(value_to_json).collect();
    respond(success_body(json_rows))
}
