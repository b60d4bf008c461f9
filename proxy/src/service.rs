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

use crate::body::capture;
use crate::config::ProxyConfig;
use crate::forward::{
    full, path_and_query, request_target, BoxError, Forwarder, ProxyBody, ProxyRequest,
};
use bytes::Bytes;
use esproxy_aws_v4::{CredentialSource, RequestSigner, ES_SERVICE};
use esproxy_core::{Error, ErrorKind, Result};
use http::request::Parts;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use hyper::body::{Body, Incoming};
use hyper::service::Service;
use log::{debug, warn};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(Debug)]
struct ProxyState {
    config: ProxyConfig,
    signer: RequestSigner,
    forwarder: Forwarder,
    credentials: CredentialSource,
}

/// The proxy pipeline: health check, gate, capture, sign, forward.
///
/// Cloning is cheap, every connection gets its own clone.
#[derive(Debug, Clone)]
pub struct ProxyService {
    state: Arc<ProxyState>,
}

impl ProxyService {
    /// Create the service for `config`, signing with `credentials`.
    pub fn new(config: ProxyConfig, credentials: CredentialSource) -> Result<Self> {
        let signer = RequestSigner::new(ES_SERVICE, &config.region, config.authority.as_str());
        let forwarder = Forwarder::new(&config)?;

        Ok(Self {
            state: Arc::new(ProxyState {
                config,
                signer,
                forwarder,
                credentials,
            }),
        })
    }

    /// Run one request through the pipeline. Failures become error responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        debug!("{} {}", parts.method, parts.uri);

        if self.is_health_check(&parts) {
            return health_response();
        }

        if let Some(auth) = &self.state.config.auth {
            if !auth.check(&parts.headers) {
                debug!("rejected {} {}: missing or wrong basic auth", parts.method, parts.uri);
                return auth.challenge();
            }
        }

        match self.proxy(&parts, body).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!("{} {} failed: {err:?}", parts.method, parts.uri);
                error_response(&err)
            }
        }
    }

    async fn proxy<B>(&self, parts: &Parts, body: B) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let state = &self.state;
        let body = capture(body, state.config.limit).await?;

        // Sign what the transport will send, not the inbound request line.
        let url = state.forwarder.url(path_and_query(parts))?;
        let signable = state
            .signer
            .signable(&parts.method, &request_target(&url), body);
        let credential = state.credentials.current();
        let signature = state.signer.sign(&signable, &credential)?;

        let mut req = ProxyRequest::new(parts, url, signable.body);
        signature.apply(&mut req.headers);

        state.forwarder.forward(req).await
    }

    fn is_health_check(&self, parts: &Parts) -> bool {
        match &self.state.config.health_path {
            Some(path) => {
                (parts.method == Method::GET || parts.method == Method::HEAD)
                    && parts.uri.path() == path
            }
            None => false,
        }
    }
}

impl Service<Request<Incoming>> for ProxyService {
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

fn health_response() -> Response<ProxyBody> {
    let mut resp = Response::new(full("ok"));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

/// Map an error to the response the client sees.
pub fn error_response(err: &Error) -> Response<ProxyBody> {
    let status = match err.kind() {
        ErrorKind::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::CredentialInvalid => StatusCode::FORBIDDEN,
        ErrorKind::RequestInvalid => StatusCode::BAD_REQUEST,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ConfigInvalid | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut resp = Response::new(full(format!("{}\n", err.message())));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
