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

use crate::Credential;
use async_trait::async_trait;
use esproxy_core::{Context, ProvideCredential, Result};
use std::fmt::{self, Debug};

/// A chain of credential providers that will be tried in order.
pub struct ProvideCredentialChain {
    providers: Vec<Box<dyn ProvideCredential<Credential = Credential>>>,
}

impl ProvideCredentialChain {
    /// Create a new empty credential provider chain.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Add a credential provider to the chain.
    pub fn push(mut self, provider: impl ProvideCredential<Credential = Credential>) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain has no provider at all.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProvideCredentialChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ProvideCredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvideCredentialChain")
            .field("providers", &self.providers)
            .finish()
    }
}

#[async_trait]
impl ProvideCredential for ProvideCredentialChain {
    type Credential = Credential;

    async fn provide_credential(&self, ctx: &Context) -> Result<Option<Self::Credential>> {
        for provider in &self.providers {
            log::debug!("trying credential provider: {provider:?}");

            match provider.provide_credential(ctx).await {
                Ok(Some(cred)) => {
                    log::debug!("loaded credential from provider: {provider:?}");
                    return Ok(Some(cred));
                }
                Ok(None) => {
                    log::debug!("no credential found in provider: {provider:?}");
                }
                Err(e) => {
                    log::warn!("error loading credential from provider {provider:?}: {e:?}");
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esproxy_core::Error;

    #[derive(Debug)]
    struct MockSuccessProvider {
        access_key: String,
    }

    #[async_trait]
    impl ProvideCredential for MockSuccessProvider {
        type Credential = Credential;

        async fn provide_credential(&self, _ctx: &Context) -> Result<Option<Self::Credential>> {
            Ok(Some(Credential::new(self.access_key.clone(), "secret")))
        }
    }

    #[derive(Debug)]
    struct MockFailProvider;

    #[async_trait]
    impl ProvideCredential for MockFailProvider {
        type Credential = Credential;

        async fn provide_credential(&self, _ctx: &Context) -> Result<Option<Self::Credential>> {
            Err(Error::config_invalid("mock provider failed"))
        }
    }

    #[derive(Debug)]
    struct MockEmptyProvider;

    #[async_trait]
    impl ProvideCredential for MockEmptyProvider {
        type Credential = Credential;

        async fn provide_credential(&self, _ctx: &Context) -> Result<Option<Self::Credential>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_chain_returns_first_success() {
        let chain = ProvideCredentialChain::new()
            .push(MockFailProvider)
            .push(MockEmptyProvider)
            .push(MockSuccessProvider {
                access_key: "test_key".to_string(),
            })
            .push(MockSuccessProvider {
                access_key: "should_not_be_used".to_string(),
            });
        assert_eq!(chain.len(), 4);

        let cred = chain
            .provide_credential(&Context::new())
            .await
            .unwrap()
            .expect("third provider must win");
        assert_eq!(cred.access_key_id, "test_key");
    }

    #[tokio::test]
    async fn test_chain_returns_none_when_all_fail() {
        let chain = ProvideCredentialChain::new()
            .push(MockFailProvider)
            .push(MockEmptyProvider)
            .push(MockFailProvider);

        let result = chain.provide_credential(&Context::new()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_empty_chain_returns_none() {
        let chain = ProvideCredentialChain::default();
        assert!(chain.is_empty());

        let result = chain.provide_credential(&Context::new()).await.unwrap();
        assert!(result.is_none());
    }
}
