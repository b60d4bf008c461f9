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

use crate::forward::BoxError;
use bytes::Bytes;
use esproxy_core::{Error, Result};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;

/// Read the whole request body into memory, refusing more than `limit` bytes.
///
/// A body whose declared length already exceeds `limit` is rejected before
/// any byte is read. The result is exactly the bytes the client sent, and an
/// empty body yields an empty [`Bytes`].
pub async fn capture<B>(body: B, limit: u64) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let declared = body.size_hint().lower();
    if declared > limit {
        return Err(Error::body_too_large(format!(
            "request body of {declared} bytes exceeds the limit of {limit} bytes"
        )));
    }

    let limit_usize = usize::try_from(limit).unwrap_or(usize::MAX);
    match Limited::new(body, limit_usize).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.is::<LengthLimitError>() => Err(Error::body_too_large(format!(
            "request body exceeds the limit of {limit} bytes"
        ))),
        Err(err) => Err(Error::request_invalid("failed to read request body")
            .with_source(anyhow::anyhow!(err))),
    }
}
