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

use crate::constants::{
    AWS4_HMAC_SHA256, AWS4_REQUEST, AWS_QUERY_ENCODE_SET, X_AMZ_DATE, X_AMZ_SECURITY_TOKEN,
};
use crate::Credential;
use bytes::Bytes;
use esproxy_core::hash::{hex_hmac_sha256, hex_sha256, hmac_sha256};
use esproxy_core::time::{format_date, format_iso8601, now, DateTime};
use esproxy_core::{Error, Result, SigningCredential};
use http::{header, HeaderMap, HeaderValue, Method};
use log::debug;
use percent_encoding::utf8_percent_encode;
use std::fmt::Write;

/// Everything the signature covers, captured once per inbound request.
#[derive(Debug, Clone)]
pub struct SignableRequest {
    /// HTTP method as received.
    pub method: Method,
    /// Upstream authority, sent as the `Host` header.
    pub host: String,
    /// Path exactly as received, already percent-encoded.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    /// Signing region.
    pub region: String,
    /// Signing service name.
    pub service: String,
    /// Exact body bytes that will be transmitted.
    pub body: Bytes,
    /// Signing time.
    pub time: DateTime,
}

/// Headers produced by [`RequestSigner::sign`].
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// `Host` header value.
    pub host: HeaderValue,
    /// `X-Amz-Date` header value.
    pub x_amz_date: HeaderValue,
    /// `Authorization` header value, marked sensitive.
    pub authorization: HeaderValue,
    /// `X-Amz-Security-Token` header value, present with temporary credentials.
    pub security_token: Option<HeaderValue>,
}

impl SignatureHeaders {
    /// Write the signature into `headers`, overwriting existing values.
    ///
    /// A security token already present in `headers` is removed when this
    /// signature carries none.
    pub fn apply(self, headers: &mut HeaderMap) {
        headers.insert(header::HOST, self.host);
        headers.insert(X_AMZ_DATE, self.x_amz_date);
        headers.insert(header::AUTHORIZATION, self.authorization);
        match self.security_token {
            Some(token) => {
                headers.insert(X_AMZ_SECURITY_TOKEN, token);
            }
            None => {
                headers.remove(X_AMZ_SECURITY_TOKEN);
            }
        }
    }
}

/// RequestSigner that implement AWS SigV4 for one upstream host.
///
/// - [Signature Version 4 signing process](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
#[derive(Debug, Clone)]
pub struct RequestSigner {
    service: String,
    region: String,
    host: String,

    time: Option<DateTime>,
}

impl RequestSigner {
    /// Create a new signer for the given service, region and upstream host.
    pub fn new(service: &str, region: &str, host: &str) -> Self {
        Self {
            service: service.into(),
            region: region.into(),
            host: host.into(),

            time: None,
        }
    }

    /// Specify the signing time.
    ///
    /// # Note
    ///
    /// We should always take current time to sign requests.
    /// Only use this function for testing.
    #[cfg(test)]
    pub fn with_time(mut self, time: DateTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Capture a request for signing, taking the signing time now.
    pub fn signable(&self, method: &Method, path_and_query: &str, body: Bytes) -> SignableRequest {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        SignableRequest {
            method: method.clone(),
            host: self.host.clone(),
            path: if path.is_empty() { "/" } else { path }.to_string(),
            query: query.filter(|q| !q.is_empty()).map(|q| q.to_string()),
            region: self.region.clone(),
            service: self.service.clone(),
            body,
            time: self.time.unwrap_or_else(now),
        }
    }

    /// Compute the signature headers for `req` with `cred`.
    pub fn sign(&self, req: &SignableRequest, cred: &Credential) -> Result<SignatureHeaders> {
        if !cred.is_valid() {
            return Err(Error::credential_invalid(
                "credential has an empty access key or secret key",
            ));
        }

        let host = HeaderValue::from_str(&req.host).map_err(|e| {
            Error::request_invalid(format!("host {} is not a valid header value", req.host))
                .with_source(e)
        })?;
        let date = format_iso8601(req.time);
        let security_token = cred
            .session_token
            .as_deref()
            .map(|token| {
                let mut value = HeaderValue::from_str(token).map_err(|e| {
                    Error::credential_invalid("session token is not a valid header value")
                        .with_source(e)
                })?;
                // Set token value sensitive to valid leaking.
                value.set_sensitive(true);
                Ok::<_, Error>(value)
            })
            .transpose()?;

        let mut signed_headers = vec![
            (header::HOST.as_str(), normalize_header_value(&req.host)),
            (X_AMZ_DATE, date.clone()),
        ];
        if let Some(token) = &cred.session_token {
            signed_headers.push((X_AMZ_SECURITY_TOKEN, normalize_header_value(token)));
        }
        signed_headers.sort_unstable();

        let creq = canonical_request_string(req, &signed_headers)?;
        let encoded_req = hex_sha256(creq.as_bytes());

        // Scope: "20220313/<region>/<service>/aws4_request"
        let scope = format!(
            "{}/{}/{}/{AWS4_REQUEST}",
            format_date(req.time),
            req.region,
            req.service
        );
        debug!("calculated scope: {scope}");

        // StringToSign:
        //
        // AWS4-HMAC-SHA256
        // 20220313T072004Z
        // 20220313/<region>/<service>/aws4_request
        // <hashed_canonical_request>
        let string_to_sign = {
            let mut f = String::new();
            writeln!(f, "{AWS4_HMAC_SHA256}")?;
            writeln!(f, "{date}")?;
            writeln!(f, "{scope}")?;
            write!(f, "{encoded_req}")?;
            f
        };
        debug!("calculated string to sign: {string_to_sign}");

        let signing_key =
            generate_signing_key(&cred.secret_access_key, req.time, &req.region, &req.service);
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let mut authorization = HeaderValue::from_str(&format!(
            "{AWS4_HMAC_SHA256} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
            cred.access_key_id,
            signed_header_names(&signed_headers),
        ))
        .map_err(|e| {
            Error::credential_invalid("access key is not a valid header value").with_source(e)
        })?;
        authorization.set_sensitive(true);

        Ok(SignatureHeaders {
            host,
            x_amz_date: HeaderValue::try_from(date).map_err(|e| {
                Error::unexpected("failed to create date header").with_source(e)
            })?,
            authorization,
            security_token,
        })
    }
}

fn canonical_request_string(req: &SignableRequest, headers: &[(&str, String)]) -> Result<String> {
    // 256 is specially chosen to avoid reallocation for most requests.
    let mut f = String::with_capacity(256);

    writeln!(f, "{}", req.method)?;
    // The path is signed as received, the upstream sees the same bytes.
    writeln!(f, "{}", req.path)?;
    writeln!(f, "{}", canonical_query(req.query.as_deref().unwrap_or_default()))?;
    for (name, value) in headers {
        writeln!(f, "{name}:{value}")?;
    }
    writeln!(f)?;
    writeln!(f, "{}", signed_header_names(headers))?;
    write!(f, "{}", hex_sha256(&req.body))?;

    Ok(f)
}

fn canonical_query(query: &str) -> String {
    let mut pairs = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, &AWS_QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(&v, &AWS_QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect::<Vec<_>>();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn signed_header_names(headers: &[(&str, String)]) -> String {
    headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";")
}

/// Trim the value and collapse inner whitespace runs into one space.
fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn generate_signing_key(secret: &str, time: DateTime, region: &str, service: &str) -> Vec<u8> {
    // Sign secret
    let secret = format!("AWS4{secret}");
    // Sign date
    let sign_date = hmac_sha256(secret.as_bytes(), format_date(time).as_bytes());
    // Sign region
    let sign_region = hmac_sha256(sign_date.as_slice(), region.as_bytes());
    // Sign service
    let sign_service = hmac_sha256(sign_region.as_slice(), service.as_bytes());
    // Sign request
    hmac_sha256(sign_service.as_slice(), AWS4_REQUEST.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ES_SERVICE;
    use aws_credential_types::Credentials;
    use aws_sigv4::http_request::{
        PayloadChecksumKind, PercentEncodingMode, SignableBody, SigningSettings,
    };
    use aws_sigv4::sign::v4;
    use chrono::TimeZone;
    use chrono::Utc;
    use esproxy_core::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::time::SystemTime;
    use test_case::test_case;

    const HOST: &str = "search-logs-abc123.us-east-1.es.amazonaws.com";

    fn fixed_time() -> DateTime {
        Utc.with_ymd_and_hms(2024, 3, 13, 7, 20, 4)
            .single()
            .expect("time must be valid")
    }

    fn signer() -> RequestSigner {
        RequestSigner::new(ES_SERVICE, "us-east-1", HOST).with_time(fixed_time())
    }

    /// Authorization value computed by aws-sigv4 for the same request.
    fn expected_authorization(
        method: &str,
        path_and_query: &str,
        body: &[u8],
        token: Option<&str>,
    ) -> String {
        let uri = format!("https://{HOST}{path_and_query}");
        let mut req = http::Request::builder()
            .method(method)
            .uri(&uri)
            .body(())
            .expect("request must be valid");

        let mut ss = SigningSettings::default();
        ss.percent_encoding_mode = PercentEncodingMode::Single;
        ss.payload_checksum_kind = PayloadChecksumKind::NoHeader;
        let id = Credentials::new(
            "access_key_id",
            "secret_access_key",
            token.map(|t| t.to_string()),
            None,
            "hardcoded-credentials",
        )
        .into();
        let sp = v4::SigningParams::builder()
            .identity(&id)
            .region("us-east-1")
            .name(ES_SERVICE)
            .time(SystemTime::from(fixed_time()))
            .settings(ss)
            .build()
            .expect("signing params must be valid");

        let output = aws_sigv4::http_request::sign(
            aws_sigv4::http_request::SignableRequest::new(
                method,
                uri.clone(),
                std::iter::empty(),
                SignableBody::Bytes(body),
            )
            .expect("signable request must be valid"),
            &sp.into(),
        )
        .expect("signing must succeed");
        let (instructions, _) = output.into_parts();
        instructions.apply_to_request_http1x(&mut req);

        req.headers()[header::AUTHORIZATION]
            .to_str()
            .expect("authorization must be valid")
            .to_string()
    }

    #[test_case("GET", "/_search", b"", None; "get_search")]
    #[test_case("GET", "/_cat/indices?v=true&s=index", b"", None; "get_with_query")]
    #[test_case("POST", "/logs/_search", br#"{"query":{"match_all":{}}}"#, None; "post_with_body")]
    #[test_case("PUT", "/logs/_doc/1?refresh=wait_for", br#"{"a":1}"#, Some("session_token"); "put_with_token")]
    #[test_case("GET", "/_search?q=title:rust", b"", Some("session_token"); "get_query_with_token")]
    fn test_matches_aws_sigv4(
        method: &str,
        path_and_query: &str,
        body: &'static [u8],
        token: Option<&str>,
    ) {
        let mut cred = Credential::new("access_key_id", "secret_access_key");
        if let Some(token) = token {
            cred = cred.with_session_token(token);
        }

        let signer = signer();
        let method = Method::from_bytes(method.as_bytes()).expect("method must be valid");
        let req = signer.signable(&method, path_and_query, Bytes::from_static(body));
        let headers = signer.sign(&req, &cred).expect("signing must succeed");

        assert_eq!(
            headers.authorization.to_str().expect("must be valid"),
            expected_authorization(method.as_str(), path_and_query, body, token)
        );
        assert_eq!(headers.x_amz_date, "20240313T072004Z");
        assert_eq!(headers.host, HOST);
        assert!(headers.authorization.is_sensitive());
        assert_eq!(headers.security_token.is_some(), token.is_some());
    }

    #[test_case("a=2&a=1", "a=1&a=2"; "repeated_key_sorted_by_value")]
    #[test_case("size=10&from=0", "from=0&size=10"; "sorted_by_key")]
    #[test_case("pretty", "pretty="; "empty_value")]
    #[test_case("q=title:rust lang", "q=title%3Arust%20lang"; "encoded_value")]
    #[test_case("", ""; "empty")]
    fn test_canonical_query(input: &str, expected: &str) {
        assert_eq!(canonical_query(input), expected);
    }

    #[test]
    fn test_canonical_request_layout() -> Result<()> {
        let signer = signer();
        let req = signer.signable(&Method::GET, "/?a=2&a=1", Bytes::new());
        let headers = vec![
            ("host", HOST.to_string()),
            (X_AMZ_DATE, format_iso8601(req.time)),
        ];

        assert_eq!(
            canonical_request_string(&req, &headers)?,
            format!(
                "GET\n/\na=1&a=2\nhost:{HOST}\nx-amz-date:20240313T072004Z\n\nhost;x-amz-date\n\
                 e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            )
        );
        Ok(())
    }

    #[test]
    fn test_signable_splits_path_and_query() {
        let signer = signer();

        let req = signer.signable(&Method::GET, "", Bytes::new());
        assert_eq!(req.path, "/");
        assert_eq!(req.query, None);

        let req = signer.signable(&Method::GET, "/logs%2A/_search?", Bytes::new());
        assert_eq!(req.path, "/logs%2A/_search");
        assert_eq!(req.query, None);

        let req = signer.signable(&Method::GET, "/_search?q=a?b", Bytes::new());
        assert_eq!(req.path, "/_search");
        assert_eq!(req.query.as_deref(), Some("q=a?b"));
        assert_eq!(req.host, HOST);
        assert_eq!(req.service, ES_SERVICE);
    }

    #[test]
    fn test_different_time_gives_different_signature() {
        let cred = Credential::new("access_key_id", "secret_access_key");
        let first = signer();
        let second = RequestSigner::new(ES_SERVICE, "us-east-1", HOST)
            .with_time(fixed_time() + chrono::Duration::seconds(1));

        let a = first
            .sign(&first.signable(&Method::GET, "/", Bytes::new()), &cred)
            .expect("signing must succeed");
        let b = second
            .sign(&second.signable(&Method::GET, "/", Bytes::new()), &cred)
            .expect("signing must succeed");
        assert_ne!(a.authorization, b.authorization);
        assert_ne!(a.x_amz_date, b.x_amz_date);
    }

    #[test]
    fn test_invalid_credential_is_rejected() {
        let signer = signer();
        let req = signer.signable(&Method::GET, "/", Bytes::new());

        let err = signer
            .sign(&req, &Credential::new("", "secret"))
            .expect_err("empty access key must fail");
        assert_eq!(err.kind(), ErrorKind::CredentialInvalid);

        let err = signer
            .sign(
                &req,
                &Credential::new("ak", "sk").with_session_token("bad\ntoken"),
            )
            .expect_err("token with newline must fail");
        assert_eq!(err.kind(), ErrorKind::CredentialInvalid);
    }

    #[test]
    fn test_normalize_header_value() {
        assert_eq!(normalize_header_value("  a   b \t c  "), "a b c");
        assert_eq!(normalize_header_value("plain"), "plain");
    }

    #[test]
    fn test_apply_overwrites_and_drops_stale_token() {
        let signer = signer();
        let req = signer.signable(&Method::GET, "/", Bytes::new());

        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:9200"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        headers.insert(X_AMZ_SECURITY_TOKEN, HeaderValue::from_static("stale"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        signer
            .sign(&req, &Credential::new("ak", "sk"))
            .expect("signing must succeed")
            .apply(&mut headers);

        assert_eq!(headers[header::HOST], HOST);
        assert_eq!(headers[X_AMZ_DATE], "20240313T072004Z");
        assert!(headers[header::AUTHORIZATION]
            .to_str()
            .expect("must be valid")
            .starts_with("AWS4-HMAC-SHA256 Credential=ak/20240313/us-east-1/es/aws4_request"));
        assert!(headers.get(X_AMZ_SECURITY_TOKEN).is_none());
        assert_eq!(headers[header::ACCEPT], "application/json");
    }
}
