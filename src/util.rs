use std::sync::Mutex;

use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Per-name insert: an addition overrides an existing value for the same
/// name, names it does not mention survive.
pub(crate) fn merge_headers(target: &mut HeaderMap, additions: &HeaderMap) {
    for (name, value) in additions {
        target.insert(name.clone(), value.clone());
    }
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse()
        .map_err(|source| Error::configuration(format!("invalid header name {name}: {source}")))
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| {
        Error::configuration(format!("invalid header value for {name}: {source}"))
    })
}

/// Appends an already-encoded query string to the URL, joining with `&`
/// when a query is present and setting it directly otherwise.
pub(crate) fn append_raw_query(url: &mut Url, encoded: &str) {
    if encoded.is_empty() {
        return;
    }

    let merged = match url.query() {
        None | Some("") => encoded.to_owned(),
        Some(existing) => format!("{existing}&{encoded}"),
    };
    url.set_query(Some(&merged));
}

/// Body text for error messages, bounded so a huge payload cannot flood
/// logs.
pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

/// URL text safe for spans and error messages: no userinfo, query, or
/// fragment.
pub(crate) fn redact_url_for_logs(url: &Url) -> String {
    let mut cleaned = url.clone();
    let _ = cleaned.set_username("");
    let _ = cleaned.set_password(None);
    cleaned.set_query(None);
    cleaned.set_fragment(None);
    cleaned.to_string()
}
