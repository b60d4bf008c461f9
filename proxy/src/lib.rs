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

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod body;
pub use body::capture;

mod config;
pub use config::parse_size;
pub use config::Args;
pub use config::ProxyConfig;

pub mod forward;
pub use forward::Forwarder;
pub use forward::ProxyBody;
pub use forward::ProxyRequest;

mod gate;
pub use gate::BasicAuth;

mod service;
pub use service::error_response;
pub use service::ProxyService;

mod server;
pub use server::serve;
