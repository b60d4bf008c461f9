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

//! HTTP Basic authentication in front of the proxy.

use crate::forward::{full, ProxyBody};
use esproxy_core::hash::base64_decode;
use esproxy_core::utils::Redact;
use http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use std::fmt::{Debug, Formatter};
use subtle::ConstantTimeEq;

const CHALLENGE: &str = r#"Basic realm="esproxy""#;

/// The single user/password pair allowed through the gate.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    user: String,
    password: String,
}

impl BasicAuth {
    /// Create a gate for `user` and `password`.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Whether `headers` carry the expected `Authorization: Basic` value.
    pub fn check(&self, headers: &HeaderMap) -> bool {
        let Some((user, password)) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(decode_basic)
        else {
            return false;
        };

        let user_ok = user.as_bytes().ct_eq(self.user.as_bytes());
        let password_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (user_ok & password_ok).into()
    }

    /// The `401` answer asking the client for credentials.
    pub fn challenge(&self) -> Response<ProxyBody> {
        let mut resp = Response::new(full("Unauthorized\n"));
        *resp.status_mut() = StatusCode::UNAUTHORIZED;
        resp.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(CHALLENGE),
        );
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        resp
    }
}

impl Debug for BasicAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &Redact::from(&self.password))
            .finish()
    }
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64_decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use esproxy_core::hash::base64_encode;
    use test_case::test_case;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(value).expect("header must be valid"),
        );
        headers
    }

    fn basic(user_pass: &str) -> String {
        format!("Basic {}", base64_encode(user_pass.as_bytes()))
    }

    #[test]
    fn test_check_accepts_matching_credentials() {
        let gate = BasicAuth::new("admin", "s3cret:with:colons");
        assert!(gate.check(&headers_with(&basic("admin:s3cret:with:colons"))));
        assert!(gate.check(&headers_with(&format!(
            "basic {}",
            base64_encode(b"admin:s3cret:with:colons")
        ))));
    }

    #[test_case(&basic("admin:wrong"); "wrong_password")]
    #[test_case(&basic("root:secret"); "wrong_user")]
    #[test_case(&basic("admin"); "missing_colon")]
    #[test_case("Basic !!!notbase64"; "invalid_base64")]
    #[test_case("Bearer abc"; "other_scheme")]
    #[test_case("AWS4-HMAC-SHA256 Credential=x"; "sigv4_header")]
    fn test_check_rejects(value: &str) {
        let gate = BasicAuth::new("admin", "secret");
        assert!(!gate.check(&headers_with(value)));
    }

    #[test]
    fn test_check_rejects_missing_header() {
        let gate = BasicAuth::new("admin", "secret");
        assert!(!gate.check(&HeaderMap::new()));
    }

    #[test]
    fn test_challenge() {
        let resp = BasicAuth::new("admin", "secret").challenge();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers()[header::WWW_AUTHENTICATE],
            r#"Basic realm="esproxy""#
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let out = format!("{:?}", BasicAuth::new("admin", "supersecretpassword"));
        assert!(out.contains("admin"));
        assert!(!out.contains("supersecretpassword"));
    }
}
