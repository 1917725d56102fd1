use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::BodyExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use crate::error::{Error, SharedError, StatusError};
use crate::request::{PreHandler, RequestDraft};
use crate::response::{RespHandler, Response, Wrapper};
use crate::retry::RetryPolicy;
use crate::transport::{Transport, classify_transport_error, default_transport};
use crate::util::{merge_headers, parse_header_name, parse_header_value, redact_url_for_logs};

/// The configurable, not-yet-executed request.
///
/// Built by a method factory ([`get`], [`post`], ...), configured by
/// queued [`AgentOp`]s applied in registration order when [`Agent::send`]
/// runs, and consumed by that single `send` call.
pub struct Agent {
    url: String,
    method: Method,
    cancel: Option<CancellationToken>,
    pre_handlers: Vec<Box<dyn PreHandler>>,
    resp_handler: Option<Box<dyn RespHandler>>,
    resp_wrapper: Option<Arc<dyn Wrapper>>,
    transport: Option<Arc<dyn Transport>>,
    expected_statuses: Vec<StatusCode>,
    retry: Option<RetryPolicy>,
    pending_ops: Vec<AgentOp>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Agent")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("expected_statuses", &self.expected_statuses)
            .field("retry", &self.retry)
            .field("pending_ops", &self.pending_ops.len())
            .finish_non_exhaustive()
    }
}

/// A typed configuration command queued on an [`Agent`].
///
/// Ops are applied strictly in registration order at the start of
/// [`Agent::send`]; each may fail, aborting configuration before any I/O.
pub struct AgentOp {
    apply: Box<dyn FnOnce(&mut Agent) -> Result<(), Error> + Send>,
}

impl AgentOp {
    pub fn new(apply: impl FnOnce(&mut Agent) -> Result<(), Error> + Send + 'static) -> Self {
        Self {
            apply: Box::new(apply),
        }
    }

    pub(crate) fn apply(self, agent: &mut Agent) -> Result<(), Error> {
        (self.apply)(agent)
    }
}

impl std::fmt::Debug for AgentOp {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("AgentOp")
    }
}

/// Starts a GET request agent.
pub fn get(url: impl Into<String>) -> Agent {
    request(Method::GET, url)
}

/// Starts a POST request agent.
pub fn post(url: impl Into<String>) -> Agent {
    request(Method::POST, url)
}

/// Starts a PUT request agent.
pub fn put(url: impl Into<String>) -> Agent {
    request(Method::PUT, url)
}

/// Starts a PATCH request agent.
pub fn patch(url: impl Into<String>) -> Agent {
    request(Method::PATCH, url)
}

/// Starts a DELETE request agent.
pub fn delete(url: impl Into<String>) -> Agent {
    request(Method::DELETE, url)
}

/// Starts a request agent with an arbitrary method.
pub fn request(method: Method, url: impl Into<String>) -> Agent {
    Agent {
        url: url.into(),
        method,
        cancel: None,
        pre_handlers: Vec::new(),
        resp_handler: None,
        resp_wrapper: None,
        transport: None,
        expected_statuses: Vec::new(),
        retry: None,
        pending_ops: Vec::new(),
    }
}

impl Agent {
    /// Queues a configuration option.
    pub fn op(mut self, op: AgentOp) -> Self {
        self.pending_ops.push(op);
        self
    }

    /// Queues configuration options, preserving their order.
    pub fn ops(mut self, ops: impl IntoIterator<Item = AgentOp>) -> Self {
        self.pending_ops.extend(ops);
        self
    }

    /// Appends a request pre-handler. Handlers run in registration order
    /// during assembly; later handlers see earlier mutations.
    pub fn push_pre_handler(&mut self, handler: impl PreHandler + 'static) {
        self.pre_handlers.push(Box::new(handler));
    }

    /// Installs the response handler, running its configuration check
    /// first. The last handler registered wins.
    pub fn set_resp_handler(&mut self, handler: impl RespHandler + 'static) -> Result<(), Error> {
        handler.check()?;
        self.resp_handler = Some(Box::new(handler));
        Ok(())
    }

    pub fn set_resp_wrapper(&mut self, wrapper: Arc<dyn Wrapper>) {
        self.resp_wrapper = Some(wrapper);
    }

    pub fn set_expected_statuses(&mut self, expected: Vec<StatusCode>) {
        self.expected_statuses = expected;
    }

    pub fn set_cancellation(&mut self, cancel: CancellationToken) {
        self.cancel = Some(cancel);
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry = Some(policy);
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Executes the request.
    ///
    /// Applies queued options in order, defaults the expected-status set
    /// and the transport, assembles the request through the pre-handlers,
    /// then performs a single attempt or, with a retry policy, the full
    /// retry loop. Consumes the agent, so a second in-flight execution is
    /// unrepresentable.
    pub async fn send(mut self) -> Result<(), Error> {
        for op in mem::take(&mut self.pending_ops) {
            op.apply(&mut self)?;
        }
        if self.expected_statuses.is_empty() {
            self.expected_statuses
                .push(default_success_status(&self.method));
        }

        let url = Url::parse(&self.url).map_err(|source| Error::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        let mut draft = RequestDraft::new(self.method.clone(), url);
        for handler in mem::take(&mut self.pre_handlers) {
            draft = handler.pre_handle(draft)?;
        }

        let transport = self.transport.clone().unwrap_or_else(default_transport);
        let cancel = self.cancel.clone().unwrap_or_else(CancellationToken::new);
        let redacted_url = redact_url_for_logs(&draft.url);

        match self.retry.clone() {
            None => {
                let span = info_span!(
                    "reqkit.request",
                    method = %self.method,
                    url = %redacted_url,
                    attempt = 1_usize,
                    max_attempts = 1_usize
                );
                self.attempt(transport.as_ref(), &draft, &cancel, &redacted_url)
                    .instrument(span)
                    .await
            }
            Some(policy) => {
                self.send_with_retry(transport.as_ref(), &draft, &cancel, &redacted_url, &policy)
                    .await
            }
        }
    }

    async fn send_with_retry(
        &self,
        transport: &dyn Transport,
        draft: &RequestDraft,
        cancel: &CancellationToken,
        redacted_url: &str,
        policy: &RetryPolicy,
    ) -> Result<(), Error> {
        let max_attempts = policy.effective_attempts();
        let mut attempt = 1_usize;
        loop {
            let span = info_span!(
                "reqkit.request",
                method = %self.method,
                url = %redacted_url,
                attempt,
                max_attempts
            );
            let error = match self
                .attempt(transport, draft, cancel, redacted_url)
                .instrument(span)
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            if matches!(error, Error::Cancelled) || !error.is_retryable() {
                return Err(error);
            }
            if error.is_validation() && !policy.retries_validation_errors() {
                return Err(error);
            }
            if attempt >= max_attempts {
                return Err(error);
            }

            let delay = policy.backoff_for_retry(attempt);
            warn!(
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying request"
            );
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = sleep(delay) => {}
                }
            }
            attempt += 1;
        }
    }

    /// One send-check-handle pass. The response body is fully collected
    /// (and thereby released) on every exit path.
    async fn attempt(
        &self,
        transport: &dyn Transport,
        draft: &RequestDraft,
        cancel: &CancellationToken,
        redacted_url: &str,
    ) -> Result<(), Error> {
        let request = draft.build()?;
        debug!("sending request");
        let sent = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sent = transport.send(request) => sent,
        };
        let response = sent.map_err(|source| {
            let kind = classify_transport_error(&*source);
            Error::Transport {
                kind,
                method: self.method.clone(),
                url: redacted_url.to_owned(),
                source,
            }
        })?;

        let (parts, body) = response.into_parts();
        let collected = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            collected = body.collect() => collected,
        };
        let body: Result<Bytes, SharedError> = collected
            .map(|collected| collected.to_bytes())
            .map_err(SharedError::from);

        if !self.expected_statuses.contains(&parts.status) {
            return Err(Error::Status(StatusError::new(
                &self.expected_statuses,
                parts.status,
                body,
            )));
        }

        if let Some(handler) = &self.resp_handler {
            let response = Response::new(parts.status, parts.headers, body);
            return handler.handle(&response, self.resp_wrapper.as_deref());
        }

        Ok(())
    }
}

/// Conventional success code for a method, used when the caller set no
/// expectation.
fn default_success_status(method: &Method) -> StatusCode {
    match *method {
        Method::POST => StatusCode::CREATED,
        Method::DELETE => StatusCode::NO_CONTENT,
        _ => StatusCode::OK,
    }
}

/// Replaces the expected status-code set. An empty set falls back to the
/// method default at execution time.
pub fn expect_status<I>(codes: I) -> AgentOp
where
    I: IntoIterator<Item = u16>,
{
    let codes: Vec<u16> = codes.into_iter().collect();
    AgentOp::new(move |agent| {
        let mut expected = Vec::with_capacity(codes.len());
        for code in &codes {
            expected.push(StatusCode::from_u16(*code).map_err(|_| {
                Error::configuration(format!("invalid expected status code {code}"))
            })?);
        }
        agent.set_expected_statuses(expected);
        Ok(())
    })
}

/// Threads a cancellation token through the send and any retry delays.
pub fn context(cancel: CancellationToken) -> AgentOp {
    AgentOp::new(move |agent| {
        agent.set_cancellation(cancel);
        Ok(())
    })
}

/// Merges `additions` into the request headers: a listed name overrides,
/// unlisted names survive.
pub fn headers(additions: HeaderMap) -> AgentOp {
    AgentOp::new(move |agent| {
        agent.push_pre_handler(move |mut draft: RequestDraft| {
            merge_headers(&mut draft.headers, &additions);
            Ok(draft)
        });
        Ok(())
    })
}

/// Sets a single header, parsing name and value when the option is
/// applied.
pub fn header(name: impl Into<String>, value: impl Into<String>) -> AgentOp {
    let name = name.into();
    let value = value.into();
    AgentOp::new(move |agent| {
        let name = parse_header_name(&name)?;
        let value = parse_header_value(name.as_str(), &value)?;
        agent.push_pre_handler(move |mut draft: RequestDraft| {
            draft.headers.insert(name.clone(), value.clone());
            Ok(draft)
        });
        Ok(())
    })
}

/// Enables retrying with `policy`.
pub fn retry(policy: RetryPolicy) -> AgentOp {
    AgentOp::new(move |agent| {
        agent.set_retry_policy(policy);
        Ok(())
    })
}

/// Sends through `transport` instead of the shared default client.
pub fn client(transport: Arc<dyn Transport>) -> AgentOp {
    AgentOp::new(move |agent| {
        agent.set_transport(transport);
        Ok(())
    })
}

/// Unwraps responses through `wrapper` before the decode target, and runs
/// its validation after a successful decode.
pub fn resp_wrapper(wrapper: Arc<dyn Wrapper>) -> AgentOp {
    AgentOp::new(move |agent| {
        agent.set_resp_wrapper(wrapper);
        Ok(())
    })
}

/// Installs a custom response handler. Its configuration check runs
/// immediately on application, before any network call.
pub fn resp_handler(handler: impl RespHandler + 'static) -> AgentOp {
    AgentOp::new(move |agent| agent.set_resp_handler(handler))
}
