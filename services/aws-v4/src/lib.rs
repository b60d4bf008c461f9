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

//! AWS SigV4 signing for Elasticsearch/OpenSearch domains.
//!
//! - [`CredentialSource`] resolves a [`Credential`] through a provider chain
//!   and keeps it fresh when the shared credentials file changes.
//! - [`RequestSigner`] turns a [`SignableRequest`] into [`SignatureHeaders`].

mod constants;
pub use constants::ES_SERVICE;

mod credential;
pub use credential::Credential;

mod provide_credential;
pub use provide_credential::EnvCredentialProvider;
pub use provide_credential::ProfileCredentialProvider;
pub use provide_credential::ProvideCredentialChain;

mod source;
pub use source::CredentialSource;
pub use source::CredentialSourceOptions;

mod sign_request;
pub use sign_request::RequestSigner;
pub use sign_request::SignableRequest;
pub use sign_request::SignatureHeaders;
