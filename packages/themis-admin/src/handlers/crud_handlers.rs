//! Entity CRUD and batch endpoints (spec §6 put_entity/get_entity/delete_entity/batch_*).

use hyper::{body::Bytes, Request, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::request_utils::{read_json_body, tx_id_query_param};
use super::response::success_body;
use crate::dto::value_to_json;
use crate::router::{AppState, RouterError};
use themis_core::entity::Entity;

#[derive(Debug, Deserialize)]
pub struct PutEntityRequest {
    pub pk: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct BatchPutRequest {
    pub entities: Vec<PutEntityRequest>,
}

#[derive(Debug, Serialize)]
pub struct EntityResponse {
    pub table: String,
    pub pk: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

fn to_entity(table: &str, req: PutEntityRequest, now_ms: i64) -> Entity {
    let mut entity = Entity::new(table, req.pk, now_ms);
    for (name, value) in req.fields {
        entity = entity.with_field(name, crate::dto::json_to_value(&value));
    }
    entity
}

fn entity_response(entity: &Entity) -> EntityResponse {
    EntityResponse {
        table: entity.table.clone(),
        pk: entity.pk.clone(),
        fields: entity.fields.iter().map(|(name, value)| (name.clone(), value_to_json(value))).collect(),
    }
}

pub async fn put_entity(
    req: Request<hyper::body::Incoming>,
    params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let table = params.get("table").ok_or_else(|| RouterError::BadRequest("missing table".into()))?.to_string();
    let tx_id = tx_id_query_param(&req)?;
    let body: PutEntityRequest = read_json_body(req).await?;
    let entity = to_entity(&table, body, crate::now_ms());
    state.facade.put_entity(entity, crate::now_ms(), tx_id)?;
    respond(success_body(serde_json::json!({"ok": true})))
}

pub async fn get_entity(
    req: Request<hyper::body::Incoming>,
    params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let table = params.get("table").ok_or_else(|| RouterError::BadRequest("missing table".into()))?;
    let pk = params.get("pk").ok_or_else(|| RouterError::BadRequest("missing pk".into()))?;
    let tx_id = tx_id_query_param(&req)?;
    match state.facade.get_entity(table, pk, tx_id)? {
        Some(entity) => respond(success_body(entity_response(&entity))),
        None => Err(RouterError::NotFound(format!("{table}/{pk}"))),
    }
}

pub async fn delete_entity(
    req: Request<hyper::body::Incoming>,
    params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let table = params.get("table").ok_or_else(|| RouterError::BadRequest("missing table".into()))?;
    let pk = params.get("pk").ok_or_else(|| RouterError::BadRequest("missing pk".into()))?;
    let tx_id = tx_id_query_param(&req)?;
    let deleted = state.facade.delete_entity(table, pk, tx_id)?;
    respond(success_body(serde_json::json!({"deleted": deleted})))
}

pub async fn batch_put(
    req: Request<hyper::body::Incoming>,
    params: matchit::Params<'_, '_>,
    state: AppState,
) -> Result<Response<Bytes>, RouterError> {
    let table = params.get("table").ok_or_else(|| RouterError::BadRequest("missing table".into()))?.to_string();
    let tx_id = tx_id_query_param(&req)?;
    let body: BatchPutRequest = read_json_body(req).await?;
    let now = crate::now_ms();
    let entities: Vec<Entity> = body.entities.into_iter().map(|e| to_entity(&table, e, now)).collect();
    let count = entities.len();
    state.facade.batch_put(entities, now, tx_id)?;
    respond(success_body(serde_json::json!({"count": count})))
}

pub(super) fn respond<T: Serialize>(body: T) -> Result<Response<Bytes>, RouterError> {
    let bytes = serde_json::to_vec(&body).map_err(|e| RouterError::Internal(format!("failed to encode response: {e}")))?;
    Response::builder()
        .status(200)
        .header("Content-Type", "application/json")
        .body(Bytes::from(bytes))
        .map_err(|e| RouterError::Internal(format!("failed to build response: {e}")))
}
