//! Matchit routing over the admin facade (spec §6). Each route calls
//! straight into `AdminFacade` on the request task rather than forwarding to
//! a separate actor loop -- the storage stack underneath is already
//! thread-safe (sled plus an `ArcSwap`-backed catalog and an internally
//! mutexed transaction manager), so there is nothing an indirection buys us
//! here (see DESIGN.md).

use std::sync::Arc;

use hyper::{body::Bytes, Request, Response};
use matchit::Router as MatchitRouter;

use crate::handlers;
use crate::AdminFacade;

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<AdminFacade>,
}

pub struct Router {
    inner: MatchitRouter<RouteHandler>,
    state: AppState,
}

impl Router {
    pub fn new(facade: Arc<AdminFacade>) -> Self {
        let mut router = MatchitRouter::new();
        router.insert("/entities/:table", RouteHandler::EntityCollection).expect("route");
        router.insert("/entities/:table/:pk", RouteHandler::Entity).expect("route");
        router.insert("/entities/:table/batch", RouteHandler::Batch).expect("route");
        router.insert("/indexes", RouteHandler::Index).expect("route");
        router.insert("/search/fulltext", RouteHandler::FulltextSearch).expect("route");
        router.insert("/search/vector", RouteHandler::VectorSearch).expect("route");
        router.insert("/search/fusion", RouteHandler::FusionSearch).expect("route");
        router.insert("/query", RouteHandler::Query).expect("route");
        router.insert("/tx", RouteHandler::BeginTx).expect("route");
        router.insert("/tx/:id/commit", RouteHandler::CommitTx).expect("route");
        router.insert("/tx/:id/rollback", RouteHandler::RollbackTx).expect("route");
        router.insert("/changefeed", RouteHandler::Changefeed).expect("route");
        router.insert("/stats", RouteHandler::Stats).expect("route");

        Self { inner: router, state: AppState { facade } }
    }

    pub async fn route(&self, req: Request<hyper::body::Incoming>) -> Result<Response<Bytes>, RouterError> {
        let path = req.uri().path().to_string();
        match self.inner.at(&path) {
            Ok(matched) => matched.value.handle(req, matched.params, self.state.clone()).await,
            Err(_) => Err(RouterError::NotFound(format!("no route for {path}"))),
        }
    }
}

enum RouteHandler {
    EntityCollection,
    Entity,
    Batch,
    Index,
    FulltextSearch,
    VectorSearch,
    FusionSearch,
    Query,
    BeginTx,
    CommitTx,
    RollbackTx,
    Changefeed,
    Stats,
}

impl RouteHandler {
    async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
        params: matchit::Params<'_, '_>,
        state: AppState,
    ) -> Result<Response<Bytes>, RouterError> {
        use hyper::Method;
        match self {
            RouteHandler::EntityCollection => match *req.method() {
                Method::POST => handlers::put_entity(req, params, state).await,
                _ => Err(RouterError::MethodNotAllowed),
            },
            RouteHandler::Entity => match *req.method() {
                Method::GET => handlers::get_entity(req, params, state).await,
                Method::DELETE => handlers::delete_entity(req, params, state).await,
                _ => Err(RouterError::MethodNotAllowed),
            },
            RouteHandler::Batch => match *req.method() {
                Method::POST => handlers::batch_put(req, params, state).await,
                _ => Err(RouterError::MethodNotAllowed),
            },
            RouteHandler::Index => match *req.method() {
                Method::POST => handlers::create_index(req, params, state).await,
                Method::DELETE => handlers::drop_index(req, params, state).await,
                _ => Err(RouterError::MethodNotAllowed),
            },
            RouteHandler::FulltextSearch if *req.method() == Method::POST => {
                handlers::fulltext_search(req, params, state).await
            }
            RouteHandler::VectorSearch if *req.method() == Method::POST => {
                handlers::vector_search(req, params, state).await
            }
            RouteHandler::FusionSearch if *req.method() == Method::POST => {
                handlers::fusion_search(req, params, state).await
            }
            RouteHandler::Query if *req.method() == Method::POST => handlers::execute_aql(req, params, state).await,
            RouteHandler::BeginTx if *req.method() == Method::POST => handlers::begin_tx(req, params, state).await,
            RouteHandler::CommitTx if *req.method() == Method::POST => handlers::commit_tx(req, params, state).await,
            RouteHandler::RollbackTx if *req.method() == Method::POST => {
                handlers::rollback_tx(req, params, state).await
            }
            RouteHandler::Changefeed if *req.method() == Method::GET => {
                handlers::changefeed_read(req, params, state).await
            }
            RouteHandler::Stats if *req.method() == Method::GET => handlers::stats(req, params, state).await,
            RouteHandler::FulltextSearch
            | RouteHandler::VectorSearch
            | RouteHandler::FusionSearch
            | RouteHandler::Query
            | RouteHandler::BeginTx
            | RouteHandler::CommitTx
            | RouteHandler::RollbackTx
            | RouteHandler::Changefeed
            | RouteHandler::Stats => Err(RouterError::MethodNotAllowed),
        }
    }
}

#[derive(Debug)]
pub enum RouterError {
    MethodNotAllowed,
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterError::MethodNotAllowed => write!(f, "method not allowed"),
            RouterError::BadRequest(m) => write!(f, "bad request: {m}"),
            RouterError::NotFound(m) => write!(f, "not found: {m}"),
            RouterError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl std::error::Error for RouterError {}

impl From<themis_core::error::ThemisError> for RouterError {
    fn from(e: themis_core::error::ThemisError) -> Self {
        use themis_core::error::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => RouterError::NotFound(e.to_string()),
            ErrorKind::ParseError | ErrorKind::SchemaViolation | ErrorKind::Unsupported => {
                RouterError::BadRequest(e.to_string())
            }
            _ => RouterError::Internal(e.to_string()),
        }
    }
}

impl From<RouterError> for Response<Bytes> {
    fn from(err: RouterError) -> Self {
        let status = match &err {
            RouterError::MethodNotAllowed => 405,
            RouterError::BadRequest(_) => 400,
            RouterError::NotFound(_) => 404,
            RouterError::Internal(_) => 500,
        };
        let body = handlers::response::error_body(status, err.to_string());
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Bytes::from(bytes))
            .unwrap_or_else(|_| Response::builder().status(500).body(Bytes::from("internal error")).expect("fallback response"))
    }
}
