use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::agent::AgentOp;
use crate::error::{Error, SharedError};
use crate::util::{lock_unpoisoned, truncate_body};

/// The response as handlers see it: status, headers, and the eagerly
/// collected body (or the failure that reading it produced).
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Result<Bytes, SharedError>,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Result<Bytes, SharedError>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body bytes, or the read failure as [`Error::ReadBody`].
    pub fn bytes(&self) -> Result<Bytes, Error> {
        self.body
            .clone()
            .map_err(|source| Error::ReadBody { source })
    }

    pub fn head(&self) -> ResponseHead {
        ResponseHead {
            status: self.status,
            headers: self.headers.clone(),
        }
    }
}

/// Response metadata without the body, for [`RawResp`] head capture.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Caller-owned output location a handler decodes into.
///
/// The caller keeps the `Slot` and reads it after `send()` resolves;
/// handlers hold a weak reference. Dropping the slot before execution is a
/// configuration error caught before any network call.
#[derive(Debug)]
pub struct Slot<T> {
    cell: Arc<Mutex<Option<T>>>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(None)),
        }
    }

    /// Moves the decoded value out, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        lock_unpoisoned(&self.cell).take()
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<Option<T>>> {
        Arc::downgrade(&self.cell)
    }
}

impl<T: Clone> Slot<T> {
    pub fn get(&self) -> Option<T> {
        lock_unpoisoned(&self.cell).clone()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

fn check_live<T>(target: &Weak<Mutex<Option<T>>>, what: &str) -> Result<(), Error> {
    if target.upgrade().is_none() {
        return Err(Error::configuration(format!("{what} slot was dropped")));
    }
    Ok(())
}

fn deposit<T>(target: &Weak<Mutex<Option<T>>>, what: &str, value: T) -> Result<(), Error> {
    let Some(cell) = target.upgrade() else {
        return Err(Error::configuration(format!("{what} slot was dropped")));
    };
    *lock_unpoisoned(&cell) = Some(value);
    Ok(())
}

/// Decode/validate strategy applied after the status check passes.
///
/// `check` runs once when the handler is registered, before any network
/// call; `handle` runs per attempt and may run more than once under a
/// retry policy.
pub trait RespHandler: Send + Sync {
    fn check(&self) -> Result<(), Error> {
        Ok(())
    }

    fn handle(&self, response: &Response, wrapper: Option<&dyn Wrapper>) -> Result<(), Error>;
}

/// Envelope capability around the real payload, e.g. `{code, msg, data}`.
///
/// `absorb` decodes the envelope from the raw body, retains the envelope
/// fields for later inspection, and returns the inner payload document for
/// the JSON handler to decode into its target. `validate` reports a
/// semantic failure even when HTTP status and decoding succeeded; under a
/// retry policy that failure re-runs the whole send-decode-validate
/// sequence.
pub trait Wrapper: Send + Sync {
    fn absorb(&self, body: &[u8]) -> Result<serde_json::Value, serde_json::Error>;

    fn validate(&self) -> Result<(), Error>;
}

/// Stock [`Wrapper`] for the common `{code, msg, data}` envelope: any
/// non-zero `code` fails validation with the server's message.
#[derive(Debug, Default)]
pub struct CodeEnvelope {
    seen: Mutex<Option<(i64, String)>>,
}

#[derive(Deserialize)]
struct CodeEnvelopeDoc {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl CodeEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelope code from the last decoded response.
    pub fn code(&self) -> Option<i64> {
        lock_unpoisoned(&self.seen).as_ref().map(|(code, _)| *code)
    }

    /// Envelope message from the last decoded response.
    pub fn message(&self) -> Option<String> {
        lock_unpoisoned(&self.seen)
            .as_ref()
            .map(|(_, msg)| msg.clone())
    }
}

impl Wrapper for CodeEnvelope {
    fn absorb(&self, body: &[u8]) -> Result<serde_json::Value, serde_json::Error> {
        let document: CodeEnvelopeDoc = serde_json::from_slice(body)?;
        *lock_unpoisoned(&self.seen) = Some((document.code, document.msg));
        Ok(document.data)
    }

    fn validate(&self) -> Result<(), Error> {
        match lock_unpoisoned(&self.seen).as_ref() {
            Some((0, _)) => Ok(()),
            Some((code, msg)) if msg.is_empty() => {
                Err(Error::validation(format!("server code[{code}] is incorrect")))
            }
            Some((code, msg)) => Err(Error::validation(format!(
                "server code[{code}] is incorrect: {msg}"
            ))),
            None => Err(Error::validation("no envelope was decoded")),
        }
    }
}

/// Copies the response head and/or raw body bytes into caller slots
/// without decoding.
#[derive(Debug, Default)]
pub struct RawResp {
    head: Option<Weak<Mutex<Option<ResponseHead>>>>,
    body: Option<Weak<Mutex<Option<Bytes>>>>,
}

impl RawResp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(mut self, slot: &Slot<ResponseHead>) -> Self {
        self.head = Some(slot.downgrade());
        self
    }

    pub fn body(mut self, slot: &Slot<Bytes>) -> Self {
        self.body = Some(slot.downgrade());
        self
    }
}

impl RespHandler for RawResp {
    fn check(&self) -> Result<(), Error> {
        if let Some(head) = &self.head {
            check_live(head, "raw response head")?;
        }
        if let Some(body) = &self.body {
            check_live(body, "raw response body")?;
        }
        Ok(())
    }

    fn handle(&self, response: &Response, _wrapper: Option<&dyn Wrapper>) -> Result<(), Error> {
        // Head first: a body-read failure must not lose the metadata copy.
        if let Some(head) = &self.head {
            deposit(head, "raw response head", response.head())?;
        }
        if let Some(body) = &self.body {
            let bytes = response.bytes()?;
            deposit(body, "raw response body", bytes)?;
        }
        Ok(())
    }
}

/// Decodes the JSON body into the target slot, unwrapping an envelope
/// first when a [`Wrapper`] is configured.
#[derive(Debug)]
pub struct JsonResp<T> {
    target: Weak<Mutex<Option<T>>>,
}

impl<T> JsonResp<T> {
    pub fn new(slot: &Slot<T>) -> Self {
        Self {
            target: slot.downgrade(),
        }
    }
}

impl<T> RespHandler for JsonResp<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn check(&self) -> Result<(), Error> {
        check_live(&self.target, "json decode target")
    }

    fn handle(&self, response: &Response, wrapper: Option<&dyn Wrapper>) -> Result<(), Error> {
        // Decoding from the collected buffer keeps the raw text available
        // for the error message; an incremental decoder would lose it.
        let body = response.bytes()?;
        let decoded: T = match wrapper {
            Some(wrapper) => {
                let payload = wrapper.absorb(&body).map_err(|source| Error::Decode {
                    source,
                    body: truncate_body(&body),
                })?;
                serde_json::from_value(payload).map_err(|source| Error::Decode {
                    source,
                    body: truncate_body(&body),
                })?
            }
            None => serde_json::from_slice(&body).map_err(|source| Error::Decode {
                source,
                body: truncate_body(&body),
            })?,
        };
        deposit(&self.target, "json decode target", decoded)?;

        match wrapper {
            Some(wrapper) => wrapper.validate(),
            None => Ok(()),
        }
    }
}

type Predicate = Box<dyn Fn(&Response) -> bool + Send + Sync>;

struct HybridArm {
    predicate: Predicate,
    handler: Box<dyn RespHandler>,
}

/// Ordered `(predicate, handler)` arms; every arm whose predicate matches
/// the response runs, in order, and the first failure aborts tagged with
/// the failing arm's index.
#[derive(Default)]
pub struct HybridResp {
    arms: Vec<HybridArm>,
}

impl HybridResp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when<P, H>(mut self, predicate: P, handler: H) -> Self
    where
        P: Fn(&Response) -> bool + Send + Sync + 'static,
        H: RespHandler + 'static,
    {
        self.arms.push(HybridArm {
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        });
        self
    }
}

impl RespHandler for HybridResp {
    fn check(&self) -> Result<(), Error> {
        for arm in &self.arms {
            arm.handler.check()?;
        }
        Ok(())
    }

    fn handle(&self, response: &Response, wrapper: Option<&dyn Wrapper>) -> Result<(), Error> {
        for (index, arm) in self.arms.iter().enumerate() {
            if (arm.predicate)(response) {
                arm.handler
                    .handle(response, wrapper)
                    .map_err(|source| Error::Hybrid {
                        index,
                        source: Box::new(source),
                    })?;
            }
        }
        Ok(())
    }
}

/// Decode the JSON response into `slot`.
pub fn json_resp<T>(slot: &Slot<T>) -> AgentOp
where
    T: DeserializeOwned + Send + 'static,
{
    crate::agent::resp_handler(JsonResp::new(slot))
}

/// Capture the raw response body into `slot`. Use [`RawResp`] with
/// [`crate::resp_handler`] to also capture the head.
pub fn raw_resp(slot: &Slot<Bytes>) -> AgentOp {
    crate::agent::resp_handler(RawResp::new().body(slot))
}

/// Dispatch the response through `handler`'s predicate arms.
pub fn hybrid_resp(handler: HybridResp) -> AgentOp {
    crate::agent::resp_handler(handler)
}
