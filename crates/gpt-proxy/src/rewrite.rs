//! Request body rewriting.
//!
//! Before a chat-completion request goes upstream, every occurrence of the
//! marker substring (e.g. `(q)`) is removed from its `model` field. Clients
//! use the marker to tag models in their UI; the upstream API would reject
//! the tagged name.

use crate::error::RewriteError;
use crate::types::ChatRequest;
use actix_web::web::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Remove every occurrence of `marker` from `model`.
pub fn strip_marker(model: &str, marker: &str) -> String {
    if marker.is_empty() {
        return model.to_string();
    }
    model.replace(marker, "")
}

/// Strip `marker` from the `model` of a chat request and re-serialize.
///
/// The body must deserialize as a [`ChatRequest`], but only `model` is
/// edited: the rest of the document, explicit `null`s included, is emitted
/// exactly as parsed.
///
/// Returns `Ok(None)` when the model does not contain the marker, in which
/// case the caller should forward the original bytes untouched.
pub fn rewrite_body(body: &[u8], marker: &str) -> Result<Option<Vec<u8>>, RewriteError> {
    let mut document: Value = serde_json::from_slice(body).map_err(RewriteError::Parse)?;
    let request = ChatRequest::deserialize(&document).map_err(RewriteError::Parse)?;

    let stripped = strip_marker(&request.model, marker);
    if stripped == request.model {
        return Ok(None);
    }

    debug!(from = %request.model, to = %stripped, "rewrote model");
    document["model"] = Value::String(stripped);

    serde_json::to_vec(&document)
        .map(Some)
        .map_err(RewriteError::Serialize)
}

/// Best-effort variant of [`rewrite_body`].
///
/// Any failure is logged and the original body is returned unchanged, so a
/// request is never dropped because its payload was not what we expected.
pub fn rewrite_or_passthrough(body: Bytes, marker: &str) -> Bytes {
    if body.is_empty() {
        return body;
    }

    match rewrite_body(&body, marker) {
        Ok(Some(rewritten)) => Bytes::from(rewritten),
        Ok(None) => body,
        Err(e) => {
            warn!(error = %e, "forwarding original request body");
            body
        }
    }
}
