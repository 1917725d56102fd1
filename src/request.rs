use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, Request};
use http_body_util::Full;
use serde::Serialize;
use url::Url;

use crate::agent::AgentOp;
use crate::error::Error;
use crate::util::append_raw_query;

/// The outbound request while pre-handlers are still shaping it.
///
/// Converted into an `http::Request` per attempt; the body is buffered so
/// retries can replay it.
#[derive(Clone, Debug)]
pub struct RequestDraft {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestDraft {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub(crate) fn build(&self) -> Result<Request<Full<Bytes>>, Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
            .body(Full::new(self.body.clone().unwrap_or_default()))
            .map_err(|source| Error::RequestBuild { source })
    }
}

/// A request-mutating step applied before send, in registration order.
///
/// A handler receives the current draft and returns the draft to continue
/// with (the same one mutated, or a replacement), or an error that aborts
/// assembly before any network I/O. Later handlers see the draft as earlier
/// ones left it.
pub trait PreHandler: Send + Sync {
    fn pre_handle(&self, draft: RequestDraft) -> Result<RequestDraft, Error>;
}

impl<F> PreHandler for F
where
    F: Fn(RequestDraft) -> Result<RequestDraft, Error> + Send + Sync,
{
    fn pre_handle(&self, draft: RequestDraft) -> Result<RequestDraft, Error> {
        self(draft)
    }
}

/// Sends `payload` as a JSON request body, setting `Content-Type` with it.
///
/// Serialization happens up front; a failure surfaces when the option is
/// applied, before any request is built.
pub fn json_body<T>(payload: &T) -> AgentOp
where
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_vec(payload);
    AgentOp::new(move |agent| {
        let body = Bytes::from(encoded.map_err(|source| Error::SerializeJson { source })?);
        agent.push_pre_handler(move |mut draft: RequestDraft| {
            draft.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            );
            draft.body = Some(body.clone());
            Ok(draft)
        });
        Ok(())
    })
}

/// Sends `payload` form-urlencoded.
///
/// For GET the encoded pairs are appended to the URL query (joined with `&`
/// when a query already exists); for every other method they become the
/// request body.
pub fn form_body<T>(payload: &T) -> AgentOp
where
    T: Serialize + ?Sized,
{
    let encoded = serde_urlencoded::to_string(payload);
    AgentOp::new(move |agent| {
        let encoded = encoded.map_err(|source| Error::SerializeForm { source })?;
        agent.push_pre_handler(move |mut draft: RequestDraft| {
            draft.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
            );
            if draft.method == Method::GET {
                append_raw_query(&mut draft.url, &encoded);
            } else {
                draft.body = Some(Bytes::from(encoded.clone()));
            }
            Ok(draft)
        });
        Ok(())
    })
}

/// Sends `body` as plain text.
pub fn text_body(body: impl Into<String>) -> AgentOp {
    let body = Bytes::from(body.into());
    AgentOp::new(move |agent| {
        agent.push_pre_handler(move |mut draft: RequestDraft| {
            draft.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            draft.body = Some(body.clone());
            Ok(draft)
        });
        Ok(())
    })
}
