//! Shared request-parsing helpers for the handler functions.

use http_body_util::BodyExt;
use hyper::Request;
use std::collections::HashMap;

use crate::router::RouterError;

pub async fn read_json_body<T: serde::de::DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, RouterError> {
    let bytes = req
        .collect()
        .await
        .map_err(|e| RouterError::BadRequest(format!("failed to read request body: {e}")))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| RouterError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Parses `?tx=<id>` off a request URI, used by every endpoint that can run
/// inside a caller-supplied transaction.
pub fn tx_id_query_param(req: &Request<hyper::body::Incoming>) -> Result<Option<u64>, RouterError> {
    let Some(query) = req.uri().query() else { return Ok(None) };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("tx=") {
            let id = value
                .parse::<u64>()
                .map_err(|_| RouterError::BadRequest(format!("invalid tx id: {value}")))?;
            return Ok(Some(id));
        }
    }
    Ok(None)
}

pub fn parse_query_string(req: &Request<hyper::body::Incoming>) -> HashMap<String, String> {
    let Some(query) = req.uri().query() else { return HashMap::new() };
    query
        .split('&')
        .filter_map(|pair| {
            let mut it = pair.splitn(2, '=');
            let key = it.next()?;
            let value = it.next().unwrap_or("");
            let decoded = percent_encoding::percent_decode_str(value).decode_utf8().ok()?;
            Some((key.to_string(), decoded.to_string()))
        })
        .collect()
}
