use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use hyper::body::Body;
use hyper::service::Service;
use routing::{Route, RouteTable};
use shared::http::make_status_response;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::coordinator::{Coordinator, UploadKind};
use crate::errors::RelayError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The upload endpoints served on both the plain and mutual-TLS listeners.
pub struct RelayService {
    routes: RouteTable<UploadKind>,
    coordinator: Arc<Coordinator>,
}

impl RelayService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let routes = RouteTable::new(vec![
            Route::new("/v1/droplet/{guid}", UploadKind::Droplet).with_method(Method::POST),
            Route::new("/v1/build_artifacts/{guid}", UploadKind::BuildArtifacts)
                .with_method(Method::POST),
        ]);
        Self {
            routes,
            coordinator,
        }
    }
}

impl<B> Service<Request<B>> for RelayService
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let Some((kind, guid)) = self.routes.resolve(&req).map(|matched| {
            let guid = matched.params.get("guid").map(|g| g.to_string());
            (*matched.action, guid.unwrap_or_default())
        }) else {
            tracing::debug!(method = %req.method(), path = req.uri().path(), "no route");
            return Box::pin(async { Ok(make_status_response(StatusCode::NOT_FOUND)) });
        };

        let coordinator = self.coordinator.clone();
        let span = tracing::info_span!("upload", kind = kind.as_str(), guid = %guid);

        Box::pin(async move {
            // Fires when hyper drops this future because the caller went away.
            let cancel = CancellationToken::new();
            let _disconnect_guard = cancel.clone().drop_guard();

            let status = match spawn_upload(coordinator, kind, req, cancel, span).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::error!(error = %e, "upload task failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            Ok(make_status_response(status))
        })
    }
}

/// Runs one upload on its own task, so that a caller disconnecting cancels
/// it through `cancel` instead of dropping it mid-flight.
fn spawn_upload<B>(
    coordinator: Arc<Coordinator>,
    kind: UploadKind,
    req: Request<B>,
    cancel: CancellationToken,
    span: tracing::Span,
) -> JoinHandle<StatusCode>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    tokio::spawn(async move { coordinator.handle(kind, req, &cancel).await }.instrument(span))
}
