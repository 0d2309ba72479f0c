use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use url::Url;

use crate::transport::{Credentials, OutboundRequest, Transport, TransportError, UploadOutcome};

/// What a [`RecordingTransport`] does with the next request.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Status(StatusCode, &'static str),
    Dial,
    Network,
    /// Never completes.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub transport: &'static str,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub credentials: Option<Credentials>,
    pub has_form: bool,
}

/// A transport double that records every request and answers from a script.
/// The last reply repeats once the script runs out.
pub struct RecordingTransport {
    name: &'static str,
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingTransport {
    pub fn new(name: &'static str, replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            name,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_reply(&self) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            *replies.front().expect("no reply scripted")
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, request: OutboundRequest) -> Result<UploadOutcome, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            transport: self.name,
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            credentials: request.credentials.clone(),
            has_form: request.form.is_some(),
        });

        match self.next_reply() {
            Reply::Status(status, body) => {
                let mut response = Response::new(Bytes::from_static(body.as_bytes()));
                *response.status_mut() = status;
                Ok(response)
            }
            Reply::Dial => Err(TransportError::Dial("connection refused".into())),
            Reply::Network => Err(TransportError::Network("connection reset".into())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Returns a port nothing is listening on.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let fut = handler(req);
                    async move { Ok::<_, Infallible>(fut.await) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// Starts a server that answers every request with 200, echoing the request
/// URI and Authorization header back as `x-echo-uri` and `x-echo-authorization`.
pub async fn start_test_server() -> u16 {
    let addr = serve(|req: Request<Incoming>| async move {
        let mut response = Response::new(Full::new(Bytes::from_static(b"ok")));
        if let Some(auth) = req.headers().get(http::header::AUTHORIZATION) {
            response
                .headers_mut()
                .insert("x-echo-authorization", auth.clone());
        }
        if let Ok(uri) = req.uri().to_string().parse() {
            response.headers_mut().insert("x-echo-uri", uri);
        }
        response
    })
    .await;
    addr.port()
}

/// How a [`FakeController`] answers uploads.
#[derive(Debug, Clone)]
pub enum ControllerMode {
    /// 201 with a job that already finished.
    Synchronous,
    /// 202 with a queued job whose status polls return these values in turn.
    Asynchronous(Vec<&'static str>),
    /// Refuses uploads with this status.
    Reject(StatusCode),
}

#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Default)]
struct ControllerState {
    uploads: Vec<ReceivedUpload>,
    statuses: VecDeque<&'static str>,
    polls: usize,
}

/// An in-process stand-in for the controller's upload and job endpoints.
pub struct FakeController {
    addr: SocketAddr,
    state: Arc<Mutex<ControllerState>>,
}

fn job_body(status: &str) -> Bytes {
    Bytes::from(format!(
        r#"{{"metadata":{{"guid":"job-guid","url":"/v2/jobs/job-guid"}},"entity":{{"status":"{status}"}}}}"#
    ))
}

fn reply(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

impl FakeController {
    pub async fn start(mode: ControllerMode) -> Self {
        let state = Arc::new(Mutex::new(ControllerState::default()));
        if let ControllerMode::Asynchronous(statuses) = &mode {
            state.lock().unwrap().statuses = statuses.iter().copied().collect();
        }

        let handler_state = state.clone();
        let addr = serve(move |req: Request<Incoming>| {
            let state = handler_state.clone();
            let mode = mode.clone();
            async move {
                let (parts, body) = req.into_parts();

                if parts.method == Method::GET && parts.uri.path() == "/v2/jobs/job-guid" {
                    let mut state = state.lock().unwrap();
                    state.polls += 1;
                    let status = if state.statuses.len() > 1 {
                        state.statuses.pop_front().unwrap()
                    } else {
                        state.statuses.front().copied().unwrap_or("finished")
                    };
                    return reply(StatusCode::OK, job_body(status));
                }

                let body = body.collect().await.unwrap().to_bytes();
                state.lock().unwrap().uploads.push(ReceivedUpload {
                    path: parts.uri.path().to_string(),
                    headers: parts.headers,
                    body,
                });

                match mode {
                    ControllerMode::Synchronous => reply(StatusCode::CREATED, job_body("finished")),
                    ControllerMode::Asynchronous(_) => {
                        reply(StatusCode::ACCEPTED, job_body("queued"))
                    }
                    ControllerMode::Reject(status) => reply(status, Bytes::from_static(b"nope")),
                }
            }
        })
        .await;

        Self { addr, state }
    }

    pub fn upload_url(&self, guid: &str) -> Url {
        Url::parse(&format!(
            "http://{}/staging/droplets/{guid}/upload?async=true",
            self.addr
        ))
        .unwrap()
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }
}

/// Whether `haystack` contains `needle` as a contiguous byte run.
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
