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

use crate::constants::*;
use crate::Credential;
use async_trait::async_trait;
use esproxy_core::{Context, Error, ProvideCredential, Result};
use ini::{Ini, Properties};
use log::debug;

/// ProfileCredentialProvider loads AWS credentials from a named profile.
///
/// This provider loads credentials from:
/// - `~/.aws/credentials` (or the path specified by `AWS_SHARED_CREDENTIALS_FILE`)
/// - `~/.aws/config` (or the path specified by `AWS_CONFIG_FILE`)
///
/// The credentials file wins when both carry the profile.
#[derive(Debug, Clone)]
pub struct ProfileCredentialProvider {
    profile: String,
    config_file: Option<String>,
    credentials_file: Option<String>,
}

impl ProfileCredentialProvider {
    /// Create a new ProfileCredentialProvider for the given profile.
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            config_file: None,
            credentials_file: None,
        }
    }

    /// Set the path to the config file.
    pub fn with_config_file(mut self, path: impl Into<String>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Set the path to the credentials file.
    pub fn with_credentials_file(mut self, path: impl Into<String>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// The profile this provider reads.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Resolve the shared credentials file path, with `~` expanded.
    ///
    /// Returns `None` if the path needs a home dir and none is known.
    pub fn credentials_path(&self, ctx: &Context) -> Option<String> {
        let path = self
            .credentials_file
            .clone()
            .or_else(|| ctx.env_var(AWS_SHARED_CREDENTIALS_FILE))
            .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string());
        expand(ctx, &path)
    }

    /// Resolve the config file path, with `~` expanded.
    pub fn config_path(&self, ctx: &Context) -> Option<String> {
        let path = self
            .config_file
            .clone()
            .or_else(|| ctx.env_var(AWS_CONFIG_FILE))
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        expand(ctx, &path)
    }

    async fn load_from_credentials_file(&self, ctx: &Context) -> Result<Option<Credential>> {
        let Some(path) = self.credentials_path(ctx) else {
            return Ok(None);
        };
        let Some(conf) = load_ini(ctx, &path).await? else {
            return Ok(None);
        };

        match conf.section(Some(self.profile.as_str())) {
            Some(props) => Ok(credential_from(props)),
            None => {
                debug!("profile {} not found in credentials file {path}", self.profile);
                Ok(None)
            }
        }
    }

    async fn load_from_config_file(&self, ctx: &Context) -> Result<Option<Credential>> {
        let Some(path) = self.config_path(ctx) else {
            return Ok(None);
        };
        let Some(conf) = load_ini(ctx, &path).await? else {
            return Ok(None);
        };

        let section = match self.profile.as_str() {
            "default" => "default".to_string(),
            x => format!("profile {x}"),
        };

        match conf.section(Some(section.as_str())) {
            Some(props) => Ok(credential_from(props)),
            None => {
                debug!("section {section} not found in config file {path}");
                Ok(None)
            }
        }
    }
}

fn expand(ctx: &Context, path: &str) -> Option<String> {
    let expanded = ctx.expand_home_dir(path);
    if expanded.is_none() {
        debug!("failed to expand homedir for path: {path}");
    }
    expanded
}

async fn load_ini(ctx: &Context, path: &str) -> Result<Option<Ini>> {
    let content = match ctx.file_read(path).await {
        Ok(content) => content,
        Err(err) => {
            debug!("failed to read {path}: {err:?}");
            return Ok(None);
        }
    };

    let conf = Ini::load_from_str(&String::from_utf8_lossy(&content)).map_err(|e| {
        Error::config_invalid(format!("failed to parse {path}")).with_source(e)
    })?;
    Ok(Some(conf))
}

fn credential_from(props: &Properties) -> Option<Credential> {
    match (
        props.get("aws_access_key_id"),
        props.get("aws_secret_access_key"),
    ) {
        (Some(ak), Some(sk)) => Some(Credential {
            access_key_id: ak.to_string(),
            secret_access_key: sk.to_string(),
            session_token: props.get("aws_session_token").map(|s| s.to_string()),
        }),
        _ => None,
    }
}

#[async_trait]
impl ProvideCredential for ProfileCredentialProvider {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        if let Some(cred) = self.load_from_credentials_file(ctx).await? {
            return Ok(Some(cred));
        }

        self.load_from_config_file(ctx).await
    }
}
