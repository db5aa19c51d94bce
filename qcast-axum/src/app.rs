use std::future::Future;

use axum::http::{HeaderValue, Request};
use axum::routing::get;
use axum::Router;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::{routes, ws, QcastAxumState};

#[derive(Clone, Copy, Default)]
struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// The assembled HTTP + real-time surface.
#[derive(Clone)]
pub struct QcastAxumApp {
    pub state: QcastAxumState,
    pub router: Router<()>,
}

impl QcastAxumApp {
    pub fn new(state: QcastAxumState) -> Self {
        let router = Router::new()
            .route("/health", get(routes::health))
            .nest("/api/queue", routes::queue_router())
            .route("/ws", get(ws::upgrade))
            .fallback(routes::not_found)
            .with_state(state.clone())
            .layer(CorsLayer::permissive())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4));

        Self { state, router }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn listen<A, F>(self, addr: A, shutdown: F) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "qcast listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

pub fn axum(state: QcastAxumState) -> QcastAxumApp {
    QcastAxumApp::new(state)
}
