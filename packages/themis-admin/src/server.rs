//! Hyper connection loop serving the admin facade over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming as IncomingBody};
use hyper::{Request, Response, Result as HyperResult};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use tokio::net::TcpListener;

use crate::router::Router;

pub struct Server {
    addr: SocketAddr,
    router: Arc<Router>,
}

impl Server {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router: Arc::new(router) }
    }

    pub async fn serve(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "admin HTTP server listening");

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let router = Arc::clone(&self.router);

            tokio::task::spawn(async move {
                let builder = ConnectionBuilder::new(TokioExecutor::new());
                if let Err(err) = builder
                    .serve_connection(io, hyper::service::service_fn(move |req| handle_request(req, router.clone())))
                    .await
                {
                    tracing::warn!(error = %err, "connection error");
                }
            });
        }
    }
}

async fn handle_request(req: Request<IncomingBody>, router: Arc<Router>) -> HyperResult<Response<Full<Bytes>>> {
    match router.route(req).await {
        Ok(response) => Ok(response.map(Full::new)),
        Err(err) => {
            tracing::warn!(error = %err, "request error");
            Ok(Response::<Bytes>::from(err).map(Full::new))
        }
    }
}
