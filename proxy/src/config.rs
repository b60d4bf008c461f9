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

use crate::gate::BasicAuth;
use clap::Parser;
use esproxy_core::{Error, Result};
use http::uri::{Authority, Scheme};
use http::Uri;
use log::warn;
use std::time::Duration;

/// Command-line arguments, each with an environment fallback.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "esproxy",
    version,
    about = "Sign requests to an AWS Elasticsearch/OpenSearch domain on the fly"
)]
pub struct Args {
    /// Upstream endpoint, e.g. `https://search-logs-abc123.us-east-1.es.amazonaws.com`.
    #[arg(env = "ENDPOINT")]
    pub endpoint: Option<String>,

    /// The ip address or host name to bind to.
    #[arg(short, long, env = "BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: String,

    /// The port to bind to.
    #[arg(short, long, env = "PORT", default_value_t = 9200)]
    pub port: u16,

    /// Region of the domain. Falls back to `AWS_REGION`.
    #[arg(short, long, env = "REGION")]
    pub region: Option<String>,

    /// Username required to access the proxy.
    #[arg(short, long, env = "AUTH_USER")]
    pub user: Option<String>,

    /// Password required to access the proxy.
    #[arg(short = 'a', long, env = "AUTH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Path answering `200 ok` without touching the upstream.
    #[arg(short = 'H', long, env = "HEALTH_PATH")]
    pub health_path: Option<String>,

    /// Largest accepted request body, e.g. `10000kb` or `1.5mb`.
    #[arg(short, long, env = "LIMIT", default_value = "10000kb")]
    pub limit: String,

    /// Shared credentials profile used when the environment has no credential.
    #[arg(long, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// How often the credentials file is checked for changes.
    #[arg(long, value_name = "SECONDS", default_value_t = 2)]
    pub credential_poll_interval: u64,

    /// Timeout for a whole upstream exchange.
    #[arg(long, value_name = "SECONDS")]
    pub upstream_timeout: Option<u64>,

    /// Don't print the banner.
    #[arg(short, long)]
    pub silent: bool,
}

/// Validated configuration shared by every component.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Scheme of the upstream origin.
    pub scheme: Scheme,
    /// Host and optional port of the upstream origin.
    pub authority: Authority,
    /// Address to listen on.
    pub bind_address: String,
    /// Port to listen on, `0` picks an ephemeral port.
    pub port: u16,
    /// Signing region.
    pub region: String,
    /// Basic authentication gate, if enabled.
    pub auth: Option<BasicAuth>,
    /// Health check path, if enabled.
    pub health_path: Option<String>,
    /// Largest accepted request body in bytes.
    pub limit: u64,
    /// Shared credentials profile.
    pub profile: Option<String>,
    /// Credentials file poll interval.
    pub credential_poll_interval: Duration,
    /// Timeout for a whole upstream exchange.
    pub upstream_timeout: Option<Duration>,
    /// Don't print the banner.
    pub silent: bool,
}

impl ProxyConfig {
    /// Validate `args` into a config. Every failure is `ConfigInvalid`.
    pub fn new(args: Args) -> Result<Self> {
        let endpoint = non_empty(args.endpoint)
            .ok_or_else(|| Error::config_invalid("the upstream endpoint is required"))?;
        let (scheme, authority) = parse_endpoint(&endpoint)?;

        let region = non_empty(args.region).ok_or_else(|| {
            Error::config_invalid(
                "region must be provided either through --region or the AWS_REGION environment variable",
            )
        })?;

        let auth = match (non_empty(args.user), non_empty(args.password)) {
            (Some(user), Some(password)) => Some(BasicAuth::new(user, password)),
            (None, None) => None,
            _ => {
                return Err(Error::config_invalid(
                    "basic auth needs both a user and a password",
                ))
            }
        };

        let health_path = match non_empty(args.health_path) {
            Some(path) if !path.starts_with('/') => {
                return Err(Error::config_invalid(format!(
                    "health path {path} must start with /"
                )))
            }
            path => path,
        };

        if args.bind_address.trim().is_empty() {
            return Err(Error::config_invalid("bind address must not be empty"));
        }
        if args.credential_poll_interval == 0 {
            return Err(Error::config_invalid(
                "credential poll interval must be at least one second",
            ));
        }

        Ok(Self {
            scheme,
            authority,
            bind_address: args.bind_address,
            port: args.port,
            region,
            auth,
            health_path,
            limit: parse_size(&args.limit)?,
            profile: non_empty(args.profile),
            credential_poll_interval: Duration::from_secs(args.credential_poll_interval),
            upstream_timeout: args
                .upstream_timeout
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            silent: args.silent,
        })
    }

    /// Upstream origin as `scheme://authority`.
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.authority)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_endpoint(endpoint: &str) -> Result<(Scheme, Authority)> {
    let lower = endpoint.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Err(Error::config_invalid(format!(
            "endpoint {endpoint} must start with http:// or https://"
        )));
    }

    let uri: Uri = endpoint.parse().map_err(|e| {
        Error::config_invalid(format!("endpoint {endpoint} is not a valid uri")).with_source(e)
    })?;
    let parts = uri.into_parts();
    let (Some(scheme), Some(authority)) = (parts.scheme, parts.authority) else {
        return Err(Error::config_invalid(format!(
            "endpoint {endpoint} has no host"
        )));
    };
    if authority.host().is_empty() {
        return Err(Error::config_invalid(format!(
            "endpoint {endpoint} has no host"
        )));
    }
    if let Some(pq) = parts.path_and_query.filter(|pq| pq.as_str() != "/") {
        warn!("ignoring path {pq} of endpoint {endpoint}, requests keep their own path");
    }

    Ok((scheme, authority))
}

/// Parse a human readable size such as `10000kb` into bytes.
///
/// Units are `b`, `kb`, `mb`, `gb`, `tb` and `pb`, case-insensitive, with
/// 1024 multipliers. A bare number means bytes.
pub fn parse_size(input: &str) -> Result<u64> {
    let value = input.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let multiplier: u64 = match unit {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        "tb" => 1 << 40,
        "pb" => 1 << 50,
        _ => {
            return Err(Error::config_invalid(format!(
                "size {input} has an unknown unit"
            )))
        }
    };

    let number: f64 = number.trim().parse().map_err(|e| {
        Error::config_invalid(format!("size {input} is not a number")).with_source(e)
    })?;
    if !number.is_finite() || number < 0.0 {
        return Err(Error::config_invalid(format!(
            "size {input} must be a positive number"
        )));
    }

    Ok((number * multiplier as f64).floor() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use esproxy_core::ErrorKind;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn args() -> Args {
        Args {
            endpoint: Some("https://search-logs-abc123.us-east-1.es.amazonaws.com".to_string()),
            bind_address: "127.0.0.1".to_string(),
            port: 9200,
            region: Some("us-east-1".to_string()),
            limit: "10000kb".to_string(),
            credential_poll_interval: 2,
            ..Default::default()
        }
    }

    #[test_case("512", 512; "bare_number")]
    #[test_case("1kb", 1024; "kilobytes")]
    #[test_case("10000kb", 10_240_000; "default_limit")]
    #[test_case("1.5mb", 1_572_864; "fractional")]
    #[test_case("2GB", 2_147_483_648; "upper_case")]
    #[test_case(" 3 b ", 3; "spaces")]
    #[test_case("1pb", 1 << 50; "petabytes")]
    fn test_parse_size(input: &str, expected: u64) {
        assert_eq!(parse_size(input).expect("size must parse"), expected);
    }

    #[test_case("kb"; "missing_number")]
    #[test_case("10xb"; "unknown_unit")]
    #[test_case("-1kb"; "negative")]
    #[test_case(""; "empty")]
    fn test_parse_size_invalid(input: &str) {
        let err = parse_size(input).expect_err("size must be rejected");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_config_defaults() -> Result<()> {
        let config = ProxyConfig::new(args())?;
        assert_eq!(config.scheme, Scheme::HTTPS);
        assert_eq!(
            config.authority.as_str(),
            "search-logs-abc123.us-east-1.es.amazonaws.com"
        );
        assert_eq!(
            config.origin(),
            "https://search-logs-abc123.us-east-1.es.amazonaws.com"
        );
        assert_eq!(config.limit, 10_240_000);
        assert_eq!(config.credential_poll_interval, Duration::from_secs(2));
        assert!(config.auth.is_none());
        assert!(config.health_path.is_none());
        assert!(config.upstream_timeout.is_none());
        Ok(())
    }

    #[test]
    fn test_config_keeps_explicit_port() -> Result<()> {
        let config = ProxyConfig::new(Args {
            endpoint: Some("http://localhost:9201/".to_string()),
            ..args()
        })?;
        assert_eq!(config.scheme, Scheme::HTTP);
        assert_eq!(config.authority.as_str(), "localhost:9201");
        Ok(())
    }

    #[test_case(Args { endpoint: None, ..args() }; "missing_endpoint")]
    #[test_case(Args { endpoint: Some("search.example.com".to_string()), ..args() }; "endpoint_without_scheme")]
    #[test_case(Args { endpoint: Some("ftp://search.example.com".to_string()), ..args() }; "endpoint_wrong_scheme")]
    #[test_case(Args { region: None, ..args() }; "missing_region")]
    #[test_case(Args { region: Some(" ".to_string()), ..args() }; "blank_region")]
    #[test_case(Args { user: Some("admin".to_string()), ..args() }; "user_without_password")]
    #[test_case(Args { health_path: Some("health".to_string()), ..args() }; "relative_health_path")]
    #[test_case(Args { limit: "lots".to_string(), ..args() }; "malformed_limit")]
    #[test_case(Args { credential_poll_interval: 0, ..args() }; "zero_poll_interval")]
    fn test_config_invalid(args: Args) {
        let err = ProxyConfig::new(args).expect_err("config must be rejected");
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_config_with_gate_and_health() -> Result<()> {
        let config = ProxyConfig::new(Args {
            user: Some("admin".to_string()),
            password: Some("secret".to_string()),
            health_path: Some("/healthz".to_string()),
            upstream_timeout: Some(30),
            ..args()
        })?;
        assert!(config.auth.is_some());
        assert_eq!(config.health_path.as_deref(), Some("/healthz"));
        assert_eq!(config.upstream_timeout, Some(Duration::from_secs(30)));
        Ok(())
    }

    #[test]
    fn test_args_parse_flags() {
        let args = Args::try_parse_from([
            "esproxy",
            "-b",
            "0.0.0.0",
            "-p",
            "9300",
            "-r",
            "eu-west-1",
            "-H",
            "/health",
            "-l",
            "1mb",
            "-s",
            "https://search.example.com",
        ])
        .expect("args must parse");
        assert_eq!(args.endpoint.as_deref(), Some("https://search.example.com"));
        assert_eq!(args.bind_address, "0.0.0.0");
        assert_eq!(args.port, 9300);
        assert_eq!(args.region.as_deref(), Some("eu-west-1"));
        assert_eq!(args.health_path.as_deref(), Some("/health"));
        assert_eq!(args.limit, "1mb");
        assert!(args.silent);
    }
}
