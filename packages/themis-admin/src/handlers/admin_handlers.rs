//! Changefeed and stats endpoints (spec §6 changefeed_read/stats, §7 degraded-mode flag).

use hyper::{body::Bytes, Request, Response};

use super::crud_handlers::respond;
use super::request_utils::parse_query_string;
use super::response::success_body;
use crate::router::{AppState, RouterError};

pub async fn changefeed_read(
    req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let query = parse_query_string(&req);
    let from_seq = query.get("from").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    let limit = query.get("limit").and_then(|v| v.parse::<usize>().ok()).unwrap_or(100);
    let events = state.facade.changefeed_read(from_seq, limit)?;
    respond(success_body(events))
}

pub async fn stats(
    _req: Request<hyper::body::Incoming>,
    _params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let stats = state.facade.stats()?;
    respond(success_body(stats))
}
