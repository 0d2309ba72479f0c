use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Serves plain HTTP on `host:port` until `shutdown` fires.
///
/// Firing `shutdown` closes the listening socket and asks every open
/// connection to shut down gracefully: a request already in flight runs to
/// completion, after which the connection is closed instead of waiting for
/// the next request.
pub async fn run_http_service<S, B>(
    host: &str,
    port: u16,
    service: S,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "listening");
    let service_arc = Arc::new(service);

    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?.0,
        };
        let _ = stream.set_nodelay(true);
        let svc = service_arc.clone();

        tokio::spawn(serve_connection(TokioIo::new(stream), svc, shutdown.clone()));
    }

    tracing::info!(host, port, "stopped accepting connections");
    Ok(())
}

/// Same as [`run_http_service`], but every accepted socket goes through a TLS
/// handshake first. Handshakes run on the connection task so a slow client
/// cannot stall the accept loop.
pub async fn run_https_service<S, B>(
    host: &str,
    port: u16,
    service: S,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    tracing::info!(host, port, "listening (tls)");
    let service_arc = Arc::new(service);

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let _ = stream.set_nodelay(true);
        let svc = service_arc.clone();
        let acceptor = acceptor.clone();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    serve_connection(TokioIo::new(tls_stream), svc, shutdown).await
                }
                Err(e) => tracing::warn!(peer = %peer_addr, error = %e, "tls handshake failed"),
            }
        });
    }

    tracing::info!(host, port, "stopped accepting connections (tls)");
    Ok(())
}

async fn serve_connection<I, S, B>(io: TokioIo<I>, service: Arc<S>, shutdown: CancellationToken)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Service<Request<Incoming>, Response = Response<B>> + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    // Hand the connection to hyper; auto-detect h1/h2 on this socket
    let builder = Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.cancelled() => {
            // Let the in-flight request finish, then close instead of
            // reading another one.
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "connection closed with error");
    }
}

/// Builds a response whose body is the canonical reason phrase of `status_code`.
pub fn make_status_response<E>(status_code: StatusCode) -> Response<BoxBody<Bytes, E>>
where
    E: 'static,
{
    let message = status_code.canonical_reason().unwrap_or("unknown status");

    let mut response = Response::new(
        Full::new(Bytes::from(format!("{message}\n")))
            .map_err(|e| match e {})
            .boxed(),
    );
    *response.status_mut() = status_code;
    response
}
