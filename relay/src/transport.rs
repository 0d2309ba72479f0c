//! Outbound transports to the controller.
//!
//! A [`Transport`] executes a single prepared request and reports failures
//! already classified as dial or post-connect errors, which is what the
//! upload retry policy keys on. The relay keeps three long-lived transports:
//! a plain one, a mutual-TLS one trusted by the controller's secure listener,
//! and a polling one that presents the client identity but does not verify
//! the server (job URLs handed out by older controllers may not present a
//! certificate from the controller CA).

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, Response};
use percent_encoding::percent_decode_str;
use reqwest::multipart::Form;
use reqwest::{Certificate, Identity};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::ControllerTls;
use crate::errors::Result;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// The controller's answer to an outbound request.
pub type UploadOutcome = Response<Bytes>;

#[derive(Error, Debug)]
pub enum TransportError {
    /// No connection could be established.
    #[error("could not connect: {0}")]
    Dial(String),

    /// Anything that went wrong after (or other than) connecting, TLS
    /// handshake failures included.
    #[error("{0}")]
    Network(String),
}

impl TransportError {
    pub fn is_dial(&self) -> bool {
        matches!(self, TransportError::Dial(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let description = describe(&e);
        if e.is_connect() && !is_tls_failure(&e) {
            TransportError::Dial(description)
        } else {
            TransportError::Network(description)
        }
    }
}

// rustls reports handshake and certificate failures wrapped in I/O errors,
// whose `source()` skips the wrapped error, so look inside with `get_ref()`.
fn is_tls_failure(e: &(dyn StdError + 'static)) -> bool {
    let mut source = e.source();
    while let Some(err) = source {
        if err.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && (io.kind() == std::io::ErrorKind::InvalidData
                || io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()))
        {
            return true;
        }
        source = err.source();
    }
    false
}

fn describe(e: &(dyn StdError + 'static)) -> String {
    let mut description = e.to_string();
    let mut source = e.source();
    while let Some(err) = source {
        description.push_str(": ");
        description.push_str(&err.to_string());
        source = err.source();
    }
    description
}

/// Basic-auth credentials lifted out of a URL's userinfo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// Splits `target` into a URL without userinfo and the credentials it carried.
pub fn split_credentials(target: &Url) -> (Url, Option<Credentials>) {
    let mut url = target.clone();
    if url.username().is_empty() && url.password().is_none() {
        return (url, None);
    }

    let credentials = Credentials {
        username: decode(url.username()),
        password: url.password().map(decode),
    };
    // Only fails for URLs that cannot carry credentials in the first place.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    (url, Some(credentials))
}

fn decode(component: &str) -> String {
    percent_decode_str(component).decode_utf8_lossy().into_owned()
}

/// A request ready to hand to a [`Transport`].
pub struct OutboundRequest {
    pub method: Method,
    /// Never carries userinfo; see `credentials`.
    pub url: Url,
    pub headers: HeaderMap,
    pub credentials: Option<Credentials>,
    pub form: Option<Form>,
}

impl OutboundRequest {
    pub fn new(method: Method, target: &Url) -> Self {
        let (url, credentials) = split_credentials(target);
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            credentials,
            form: None,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, request: OutboundRequest) -> Result<UploadOutcome, TransportError>;
}

/// A [`Transport`] backed by a shared `reqwest` client.
pub struct HttpTransport {
    name: &'static str,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(name: &'static str, client: reqwest::Client) -> Self {
        Self { name, client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, request: OutboundRequest) -> Result<UploadOutcome, TransportError> {
        let OutboundRequest {
            method,
            url,
            headers,
            credentials,
            form,
        } = request;

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(credentials) = credentials {
            builder = builder.basic_auth(credentials.username, credentials.password);
        }
        if let Some(form) = form {
            builder = builder.multipart(form);
        }

        let response = builder.send().await?;

        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        let mut outcome = Response::new(body);
        *outcome.status_mut() = status;
        *outcome.version_mut() = version;
        *outcome.headers_mut() = headers;
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    MutualTls,
}

impl TransportKind {
    /// `https` targets always go through mutual TLS; anything else is sent in
    /// plain text and left for the controller to refuse if that is wrong.
    pub fn for_target(target: &Url) -> Self {
        match target.scheme() {
            "https" => TransportKind::MutualTls,
            _ => TransportKind::Plain,
        }
    }
}

/// Picks the upload transport for a target.
#[derive(Clone)]
pub struct TransportSelector {
    plain: Arc<dyn Transport>,
    mutual_tls: Arc<dyn Transport>,
}

impl TransportSelector {
    pub fn new(plain: Arc<dyn Transport>, mutual_tls: Arc<dyn Transport>) -> Self {
        Self { plain, mutual_tls }
    }

    pub fn select(&self, target: &Url) -> &Arc<dyn Transport> {
        match TransportKind::for_target(target) {
            TransportKind::Plain => &self.plain,
            TransportKind::MutualTls => &self.mutual_tls,
        }
    }
}

/// The process-wide transports, built once at startup.
pub struct Transports {
    pub plain: Arc<dyn Transport>,
    pub mutual_tls: Arc<dyn Transport>,
    pub polling: Arc<dyn Transport>,
}

impl Transports {
    pub fn from_config(config: &ControllerTls) -> Result<Self> {
        let mut identity_pem = std::fs::read(&config.client_cert)?;
        identity_pem.push(b'\n');
        identity_pem.extend(std::fs::read(&config.client_key)?);
        let ca_pem = std::fs::read(&config.ca_cert)?;

        let plain = base_client().build()?;

        let mutual_tls = base_client()
            .identity(Identity::from_pem(&identity_pem)?)
            .add_root_certificate(Certificate::from_pem(&ca_pem)?)
            .build()?;

        let polling = base_client()
            .identity(Identity::from_pem(&identity_pem)?)
            .add_root_certificate(Certificate::from_pem(&ca_pem)?)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            plain: Arc::new(HttpTransport::new("plain", plain)),
            mutual_tls: Arc::new(HttpTransport::new("mutual-tls", mutual_tls)),
            polling: Arc::new(HttpTransport::new("polling", polling)),
        })
    }
}

fn base_client() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
}
