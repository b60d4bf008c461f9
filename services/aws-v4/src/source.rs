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

use crate::{Credential, EnvCredentialProvider, ProfileCredentialProvider, ProvideCredentialChain};
use esproxy_core::hash::hex_sha256;
use esproxy_core::utils::Redact;
use esproxy_core::{Context, Error, ProvideCredential, Result, SigningCredential};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Options used to build a [`CredentialSource`].
#[derive(Debug, Clone, Default)]
pub struct CredentialSourceOptions {
    /// Named profile to fall back to when the environment has no credential.
    pub profile: Option<String>,
    /// Override of the shared credentials file path.
    pub credentials_file: Option<String>,
    /// Override of the config file path.
    pub config_file: Option<String>,
}

/// CredentialSource holds the credential every request is signed with.
///
/// The credential lives in a `watch` channel as an `Arc<Credential>`: readers
/// clone the `Arc` and a reload replaces it as a whole, so a reader sees
/// either the old credential or the new one, never a mix.
#[derive(Clone, Debug)]
pub struct CredentialSource {
    ctx: Context,
    chain: Arc<ProvideCredentialChain>,
    profile: Option<ProfileCredentialProvider>,
    current: Arc<watch::Sender<Arc<Credential>>>,
}

impl CredentialSource {
    /// Resolve the initial credential.
    ///
    /// The chain is the environment first, then the named profile if one is
    /// configured. Nothing found is a configuration error.
    pub async fn load(ctx: Context, opts: CredentialSourceOptions) -> Result<Self> {
        let profile = opts.profile.map(|name| {
            let mut provider = ProfileCredentialProvider::new(name);
            if let Some(path) = opts.credentials_file {
                provider = provider.with_credentials_file(path);
            }
            if let Some(path) = opts.config_file {
                provider = provider.with_config_file(path);
            }
            provider
        });

        let mut chain = ProvideCredentialChain::new().push(EnvCredentialProvider::new());
        if let Some(provider) = &profile {
            chain = chain.push(provider.clone());
        }

        let cred = chain.provide_credential(&ctx).await?.ok_or_else(|| {
            Error::config_invalid(
                "no credential found: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY or configure a profile",
            )
        })?;
        if !cred.is_valid() {
            return Err(Error::config_invalid(
                "resolved credential has an empty access key or secret key",
            ));
        }
        info!("loaded credential with access key {}", Redact::from(&cred.access_key_id));

        let (current, _) = watch::channel(Arc::new(cred));
        Ok(Self {
            ctx,
            chain: Arc::new(chain),
            profile,
            current: Arc::new(current),
        })
    }

    /// Build a source around a fixed credential, without provider or watcher.
    pub fn from_static(cred: Credential) -> Self {
        let (current, _) = watch::channel(Arc::new(cred));
        Self {
            ctx: Context::new(),
            chain: Arc::new(ProvideCredentialChain::new()),
            profile: None,
            current: Arc::new(current),
        }
    }

    /// The credential installed right now.
    pub fn current(&self) -> Arc<Credential> {
        self.current.borrow().clone()
    }

    /// Receiver notified every time a different credential is installed.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Credential>> {
        self.current.subscribe()
    }

    /// Install `cred` if it differs from the current one.
    ///
    /// Returns whether a swap happened.
    pub fn replace(&self, cred: Credential) -> bool {
        self.current.send_if_modified(|installed| {
            if installed.as_ref() == &cred {
                return false;
            }
            *installed = Arc::new(cred);
            true
        })
    }

    /// Resolve the provider chain again and install the result.
    ///
    /// On failure the installed credential stays in place.
    pub async fn reload(&self) -> Result<bool> {
        let cred = self
            .chain
            .provide_credential(&self.ctx)
            .await?
            .filter(|c| c.is_valid())
            .ok_or_else(|| Error::credential_invalid("no valid credential found during reload"))?;

        let access_key = cred.access_key_id.clone();
        let swapped = self.replace(cred);
        if swapped {
            info!("reloaded credential with access key {}", Redact::from(&access_key));
        } else {
            debug!("credential unchanged after reload");
        }
        Ok(swapped)
    }

    /// Poll the profile's credentials and config files and reload on change.
    ///
    /// Returns `None` when no profile is configured or neither file location
    /// can be resolved. Files that are unreadable at start are reported and
    /// polled anyway, so they are picked up once they appear.
    pub async fn watch(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let profile = self.profile.as_ref()?;
        let paths = [
            profile.credentials_path(&self.ctx),
            profile.config_path(&self.ctx),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
        if paths.is_empty() {
            warn!(
                "cannot watch credentials for profile {}: home directory is unknown",
                profile.profile()
            );
            return None;
        }

        let mut last = fingerprint(&self.ctx, &paths).await;
        if last.iter().all(Option::is_none) {
            warn!("cannot watch {} yet: no file is readable", paths.join(", "));
        }
        info!("watching {} for credential changes", paths.join(", "));

        let source = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let current = fingerprint(&source.ctx, &paths).await;
                if current == last {
                    continue;
                }
                last = current;

                info!("credential files changed, reloading credentials");
                if let Err(err) = source.reload().await {
                    warn!("failed to reload credentials, keeping current: {err}");
                }
            }
        }))
    }
}

/// Content hash of every path, `None` for the ones that can't be read.
async fn fingerprint(ctx: &Context, paths: &[String]) -> Vec<Option<String>> {
    let mut hashes = Vec::with_capacity(paths.len());
    for path in paths {
        match ctx.file_read(path).await {
            Ok(content) => hashes.push(Some(hex_sha256(&content))),
            Err(err) => {
                debug!("failed to read {path}: {err}");
                hashes.push(None);
            }
        }
    }
    hashes
}
