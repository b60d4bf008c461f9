// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Forwarding of signed requests to the upstream origin.

use crate::config::ProxyConfig;
use bytes::Bytes;
use esproxy_core::{Error, Result};
use http::header::{self, HeaderName};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use log::debug;
use reqwest::Url;

/// Boxed error carried by relayed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body of every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// Headers that only make sense for a single transport hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf", "eot",
    "otf",
];

const STATIC_CACHE_CONTROL: &str = "public, max-age=86400";

/// A captured inbound request, ready to be signed and sent upstream.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method as received.
    pub method: Method,
    /// Outbound URL, exactly as it goes on the wire.
    pub url: Url,
    /// Inbound headers without hop-by-hop headers, `host` or `content-length`.
    pub headers: HeaderMap,
    /// Captured body.
    pub body: Bytes,
}

impl ProxyRequest {
    /// Build from the inbound request head, its outbound URL and its
    /// captured body.
    pub fn new(parts: &Parts, url: Url, body: Bytes) -> Self {
        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        Self {
            method: parts.method.clone(),
            url,
            headers,
            body,
        }
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// The inbound path and query, `/` when the request line carries none.
pub fn path_and_query(parts: &Parts) -> &str {
    parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/")
}

/// Path and query of `url` as they appear in the outbound request line.
pub fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

/// Forwarder sends requests to the single upstream origin over a shared client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    origin: String,
}

impl Forwarder {
    /// Build the shared client for `config`'s upstream.
    ///
    /// Redirects are never followed and proxy environment variables are ignored.
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .pool_idle_timeout(std::time::Duration::from_secs(90));
        if let Some(timeout) = config.upstream_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| {
            Error::config_invalid("failed to build the upstream http client").with_source(e)
        })?;

        Ok(Self {
            client,
            origin: config.origin(),
        })
    }

    /// Resolve an inbound path and query against the upstream origin.
    ///
    /// The URL parser may escape characters or drop dot segments, so the
    /// signature must be computed over [`request_target`] of the result
    /// rather than over the inbound request line.
    pub fn url(&self, path_and_query: &str) -> Result<Url> {
        Url::parse(&format!("{}{path_and_query}", self.origin)).map_err(|e| {
            Error::request_invalid(format!("{path_and_query} is not a valid request target"))
                .with_source(e)
        })
    }

    /// Send `req` upstream and relay the response.
    ///
    /// Transport failures are never retried: timeouts are `UpstreamTimeout`,
    /// everything else is `Upstream`.
    pub async fn forward(&self, req: ProxyRequest) -> Result<Response<ProxyBody>> {
        let url = req.url.to_string();
        let is_static = is_static_asset(req.path());
        debug!("forwarding {} {url}", req.method);

        let resp = self
            .client
            .request(req.method, req.url)
            .headers(req.headers)
            .body(req.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::upstream_timeout(format!("upstream {url} timed out")).with_source(e)
                } else {
                    Error::upstream(format!("failed to reach upstream {url}")).with_source(e)
                }
            })?;
        debug!("upstream responded with {}", resp.status());

        let mut resp: Response<reqwest::Body> = resp.into();
        strip_hop_by_hop(resp.headers_mut());
        if is_static {
            resp.headers_mut().insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(STATIC_CACHE_CONTROL),
            );
        }

        Ok(resp.map(|body| body.map_err(BoxError::from).boxed()))
    }
}

/// Remove hop-by-hop headers, including the ones named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect::<Vec<_>>();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Whether `path` names a static asset the browser may cache.
pub fn is_static_asset(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => STATIC_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// A complete in-memory body.
pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}
