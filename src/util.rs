use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client as HyperClient, connect::HttpConnector};

use crate::prelude::*;


pub type HttpBody = Full<Bytes>;

/// Pooled HTTP client shared by all simulated users. Supports both `http`
/// and `https` URIs.
pub type HttpClient = HyperClient<HttpsConnector<HttpConnector>, HttpBody>;

pub fn http_client() -> HttpClient {
    let builder = match HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(e) => {
            warn!("failed to load native certificate roots ({e}), using bundled roots instead");
            HttpsConnectorBuilder::new().with_webpki_roots()
        }
    };
    let https = builder
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    HyperClient::builder(hyper_util::rt::TokioExecutor::new()).build(https)
}

/// Awaits `future`, giving up after `timeout`. A zero timeout waits forever.
pub async fn with_timeout<F: Future>(timeout: Duration, future: F) -> Option<F::Output> {
    if timeout.is_zero() {
        Some(future.await)
    } else {
        tokio::time::timeout(timeout, future).await.ok()
    }
}

/// Truncates `s` to at most `max` characters, for logging bodies and tokens.
pub fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
