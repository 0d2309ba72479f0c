use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Method, Request};
use http_body_util::BodyExt;
use hyper::body::Body;
use reqwest::multipart::{Form, Part};
use shared::counter;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cancel::{run_or_cancel, sleep_or_cancel};
use crate::errors::{RelayError, Result};
use crate::metrics_defs::UPLOAD_ATTEMPTS;
use crate::transport::{
    OutboundRequest, TransportError, TransportSelector, UploadOutcome, split_credentials,
};

/// Total attempts for an upload whose connection could not be established.
pub const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Inbound headers copied onto the outbound upload.
const FORWARDED_HEADERS: &[&str] = &["content-md5"];

type BoxError = Box<dyn StdError + Send + Sync>;

pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// The inbound file being relayed.
pub struct TransferRequest {
    /// Declared length, if the caller declared one.
    pub content_length: Option<u64>,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl TransferRequest {
    pub fn from_request<B>(request: Request<B>) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();

        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .or_else(|| body.size_hint().exact());

        Self {
            content_length,
            headers: parts.headers,
            body: body.into_data_stream().map_err(Into::into).boxed(),
        }
    }
}

/// Hands the inbound body to whichever attempt first manages to connect.
///
/// A dial failure never polls the request body, so the stream is still in
/// its slot for the next attempt. An attempt that finds the slot empty fails
/// its body instead of silently sending nothing.
struct DeferredBody {
    slot: Arc<Mutex<Option<BodyStream>>>,
}

impl DeferredBody {
    fn new(body: BodyStream) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(body))),
        }
    }

    fn for_attempt(&self) -> reqwest::Body {
        let slot = Arc::clone(&self.slot);
        let taken = stream::once(async move {
            match slot.lock() {
                Ok(mut slot) => slot
                    .take()
                    .ok_or_else(|| BoxError::from("upload body already consumed")),
                Err(_) => Err(BoxError::from("upload body lock poisoned")),
            }
        });
        reqwest::Body::wrap_stream(taken.try_flatten())
    }
}

/// Streams inbound files to the controller as multipart uploads.
pub struct Uploader {
    transports: TransportSelector,
    retry_delay: Duration,
}

impl Uploader {
    pub fn new(transports: TransportSelector, retry_delay: Duration) -> Self {
        Self {
            transports,
            retry_delay,
        }
    }

    /// Uploads `transfer` to `target` as a multipart file part named `filename`.
    ///
    /// A declared length of zero fails with `LengthRequired` before any network
    /// I/O. Attempts that cannot connect are retried up to
    /// [`MAX_UPLOAD_ATTEMPTS`] in total; any other failure is returned at once.
    /// Whatever status the controller answers with is returned as the outcome.
    pub async fn upload(
        &self,
        target: &Url,
        filename: &str,
        transfer: TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        if transfer.content_length == Some(0) {
            return Err(RelayError::LengthRequired);
        }

        let transport = self.transports.select(target);
        let (redacted_url, _) = split_credentials(target);
        let body = DeferredBody::new(transfer.body);

        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }

            let mut request = OutboundRequest::new(Method::POST, target);
            for name in FORWARDED_HEADERS {
                for value in transfer.headers.get_all(*name) {
                    request.headers.append(*name, value.clone());
                }
            }
            request.form = Some(multipart_form(filename, &body, transfer.content_length)?);

            tracing::debug!(
                url = %redacted_url,
                attempt,
                transport = transport.name(),
                "uploading"
            );

            match run_or_cancel(cancel, transport.send(request)).await? {
                Ok(outcome) => {
                    counter!(UPLOAD_ATTEMPTS, "result" => "ok").increment(1);
                    return Ok(outcome);
                }
                Err(TransportError::Dial(reason)) if attempt < MAX_UPLOAD_ATTEMPTS => {
                    counter!(UPLOAD_ATTEMPTS, "result" => "dial_error").increment(1);
                    tracing::warn!(url = %redacted_url, attempt, %reason, "could not connect, retrying");
                    sleep_or_cancel(cancel, self.retry_delay).await?;
                }
                Err(source @ TransportError::Dial(_)) => {
                    counter!(UPLOAD_ATTEMPTS, "result" => "dial_error").increment(1);
                    return Err(RelayError::Dial {
                        url: redacted_url,
                        attempts: attempt,
                        source,
                    });
                }
                Err(source) => {
                    counter!(UPLOAD_ATTEMPTS, "result" => "network_error").increment(1);
                    return Err(RelayError::Network {
                        url: redacted_url,
                        source,
                    });
                }
            }
        }
    }
}

fn multipart_form(filename: &str, body: &DeferredBody, length: Option<u64>) -> Result<Form> {
    let part = match length {
        Some(length) => Part::stream_with_length(body.for_attempt(), length),
        None => Part::stream(body.for_attempt()),
    };
    let part = part
        .file_name(filename.to_string())
        .mime_str("application/octet-stream")?;

    Ok(Form::new().part(filename.to_string(), part))
}
