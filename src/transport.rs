use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::Request;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::error::{BoxError, TransportErrorKind};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Response body as the transport hands it over: not yet read, failure
/// typed as [`BoxError`].
pub type RespBody = BoxBody<Bytes, BoxError>;

/// The send-request-receive-response capability the agent executes against.
///
/// Implementations must be shareable across concurrent `send` calls; the
/// agent borrows the transport per attempt and never assumes exclusive
/// ownership. Request bodies are buffered (`Full<Bytes>`) so the agent can
/// replay them across retries.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> BoxFuture<'_, Result<http::Response<RespBody>, BoxError>>;
}

/// Builds a [`RespBody`] from in-memory bytes. Intended for [`Transport`]
/// implementations that fabricate responses, mock transports included.
pub fn body_from_bytes(body: impl Into<Bytes>) -> RespBody {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Default transport: a shared hyper client with HTTP/1.1 + HTTP/2 support
/// and rustls (webpki roots) for https.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("HyperTransport")
    }
}

impl HyperTransport {
    pub fn new() -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> BoxFuture<'_, Result<http::Response<RespBody>, BoxError>> {
        Box::pin(async move {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|error| Box::new(error) as BoxError)?;
            Ok(response.map(|body| body.map_err(|error| Box::new(error) as BoxError).boxed()))
        })
    }
}

/// The process-wide transport used when an agent has none injected.
pub fn default_transport() -> Arc<dyn Transport> {
    static DEFAULT_TRANSPORT: OnceLock<Arc<HyperTransport>> = OnceLock::new();
    DEFAULT_TRANSPORT
        .get_or_init(|| Arc::new(HyperTransport::new()))
        .clone()
}

pub(crate) fn classify_transport_error(error: &(dyn StdError + 'static)) -> TransportErrorKind {
    if let Some(legacy) = error.downcast_ref::<hyper_util::client::legacy::Error>() {
        if legacy.is_connect() {
            let text = legacy.to_string().to_ascii_lowercase();
            if text.contains("dns")
                || text.contains("name or service not known")
                || text.contains("failed to lookup address")
            {
                return TransportErrorKind::Dns;
            }
            if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
                return TransportErrorKind::Tls;
            }
            return TransportErrorKind::Connect;
        }
    }

    let text = error.to_string().to_ascii_lowercase();
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}
