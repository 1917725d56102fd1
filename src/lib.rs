//! `reqkit` is a fluent HTTP request agent: compose a request from
//! reusable options, execute it, and dispatch the response to a pluggable
//! handler that decodes and optionally validates the payload.
//!
//! # Quick Start
//!
//! ```no_run
//! use reqkit::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct CreateItem {
//!     name: String,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> reqkit::Result<()> {
//!     let created = Slot::<Item>::new();
//!     reqkit::post("https://api.example.com/v1/items")
//!         .op(json_body(&CreateItem { name: "demo".into() }))
//!         .op(json_resp(&created))
//!         .op(retry(RetryPolicy::new().attempts(3)))
//!         .send()
//!         .await?;
//!
//!     let item = created.take().expect("populated on success");
//!     println!("created id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Execution model
//!
//! Options are applied strictly in registration order when `send()` runs;
//! each may fail and abort before any I/O. The assembled request is
//! buffered, so a configured [`RetryPolicy`] can replay the whole
//! send-decode-validate sequence, wrapper validation failures included.
//! Cancellation (a [`tokio_util::sync::CancellationToken`] via
//! [`context`]) aborts in-flight sends and pending retry delays.

mod agent;
mod error;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::agent::{
    Agent, AgentOp, client, context, delete, expect_status, get, header, headers, patch, post, put,
    request, resp_handler, resp_wrapper, retry,
};
pub use crate::error::{BoxError, Error, ErrorCode, SharedError, StatusError, TransportErrorKind};
pub use crate::request::{PreHandler, RequestDraft, form_body, json_body, text_body};
pub use crate::response::{
    CodeEnvelope, HybridResp, JsonResp, RawResp, RespHandler, Response, ResponseHead, Slot,
    Wrapper, hybrid_resp, json_resp, raw_resp,
};
pub use crate::retry::RetryPolicy;
pub use crate::transport::{
    BoxFuture, HyperTransport, RespBody, Transport, body_from_bytes, default_transport,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod prelude {
    pub use crate::{
        Agent, AgentOp, CodeEnvelope, Error, ErrorCode, HybridResp, JsonResp, RawResp, RespHandler,
        Response, ResponseHead, Result, RetryPolicy, Slot, StatusError, Transport,
        TransportErrorKind, Wrapper, client, context, delete, expect_status, form_body, get,
        header, headers, hybrid_resp, json_body, json_resp, patch, post, put, raw_resp, request,
        resp_handler, resp_wrapper, retry, text_body,
    };
}

#[cfg(test)]
mod tests;
