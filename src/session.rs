//! Per-user request context.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    HeaderMap, Method, Request,
    header::{self, HeaderValue},
    http::uri::PathAndQuery,
};

use crate::{auth::Credential, config::HttpHost, util::HttpBody};


/// Everything a simulated user adds to each of its requests: the target host
/// and a set of default headers.
///
/// This is a plain value. Authenticating does not change a context, but
/// produces a new one via [`RequestContext::with_credential`], which then
/// replaces the old one in the user.
#[derive(Debug, Clone)]
pub struct RequestContext {
    host: HttpHost,
    headers: HeaderMap,
}

impl RequestContext {
    /// Context without any credential.
    pub fn new(host: HttpHost) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        Self { host, headers }
    }

    /// Returns a copy of this context that sends `Authorization: Bearer <token>`.
    pub fn with_credential(&self, credential: &Credential) -> Self {
        let mut headers = self.headers.clone();
        headers.insert(header::AUTHORIZATION, credential.header_value());
        Self { host: self.host.clone(), headers }
    }

    pub fn is_authenticated(&self) -> bool {
        self.headers.contains_key(header::AUTHORIZATION)
    }

    /// Builds a request to `path` on the target host, carrying all headers of
    /// this context. With `json`, that is sent as body with the matching
    /// content type.
    pub fn request(
        &self,
        method: Method,
        path: &'static str,
        json: Option<Bytes>,
    ) -> Request<HttpBody> {
        let uri = self.host.with_path_and_query(PathAndQuery::from_static(path));
        let mut builder = Request::builder().method(method).uri(uri);
        let headers = builder.headers_mut().expect("builder has no error yet");
        headers.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let body = match json {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Full::new(json)
            }
            None => Full::default(),
        };

        builder.body(body).expect("request parts are all valid")
    }
}

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
