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

use anyhow::Context as _;
use clap::Parser;
use esproxy::{serve, Args, ProxyConfig, ProxyService};
use esproxy_aws_v4::{CredentialSource, CredentialSourceOptions};
use esproxy_core::{Context, OsEnv};
use esproxy_file_read_tokio::TokioFileRead;
use log::info;
use tokio::net::TcpListener;

const BANNER: &str = r"
   ___ ___ _ __  _ __ _____  ___   _
  / _ \/ __| '_ \| '__/ _ \ \/ / | | |
 |  __/\__ \ |_) | | | (_) >  <| |_| |
  \___||___/ .__/|_|  \___/_/\_\\__, |
           |_|                  |___/
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = Args::parse();
    if args.region.is_none() {
        args.region = std::env::var("AWS_REGION").ok();
    }
    let config = ProxyConfig::new(args)?;

    let ctx = Context::new().with_file_read(TokioFileRead).with_env(OsEnv);
    let credentials = CredentialSource::load(
        ctx,
        CredentialSourceOptions {
            profile: config.profile.clone(),
            ..Default::default()
        },
    )
    .await?;
    // The watcher lives as long as the process.
    let _watcher = credentials.watch(config.credential_poll_interval).await;

    let listener = TcpListener::bind((config.bind_address.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind to {}:{}", config.bind_address, config.port))?;
    let addr = listener.local_addr()?;

    if !config.silent {
        println!("{BANNER}");
    }
    info!("AWS ES cluster available at http://{addr}");
    info!("Kibana available at http://{addr}/_plugin/kibana/");
    if let Some(path) = &config.health_path {
        info!("Health endpoint enabled at http://{addr}{path}");
    }

    let service = ProxyService::new(config, credentials)?;
    serve(listener, service, async {
        tokio::signal::ctrl_c().await.ok();
        info!("received SIGINT, draining connections");
    })
    .await
}
