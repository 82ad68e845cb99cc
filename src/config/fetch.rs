/*
 *
 *  * Copyright (c) 2025 Couchbase, Inc.
 *  *
 *  * Licensed under the Apache License, Version 2.0 (the "License");
 *  * you may not use this file except in compliance with the License.
 *  * You may obtain a copy of the License at
 *  *
 *  *    http://www.apache.org/licenses/LICENSE-2.0
 *  *
 *  * Unless required by applicable law or agreed to in writing, software
 *  * distributed under the License is distributed on an "AS IS" BASIS,
 *  * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  * See the License for the specific language governing permissions and
 *  * limitations under the License.
 *
 */

use bytes::Buf;
use log::{debug, trace};
use tokio_stream::StreamExt;

use crate::config::parse::parse_bucket_config;
use crate::error::{Error, Result};
use crate::vbucketrouter::RoutingInfo;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Streams `/pools/default/bucketsStreaming/<bucket>`, parsing each
/// newline-delimited document and invoking `on_config` with routing info
/// derived from it. Runs until the connection drops or is cancelled; the
/// caller is expected to reconnect this call itself.
pub async fn stream_bucket_config(
    client: &reqwest::Client,
    opts: &FetchOptions,
    mut on_config: impl FnMut(RoutingInfo),
) -> Result<()> {
    let uri = format!(
        "http://{}:{}/pools/default/bucketsStreaming/{}",
        opts.host, opts.port, opts.bucket
    );

    debug!("fetching bucket config stream from {uri}");

    let mut builder = client.get(&uri);
    if let Some(username) = &opts.username {
        builder = builder.basic_auth(username, opts.password.as_ref());
    }

    let response = builder.send().await?;
    if !response.status().is_success() {
        return Err(Error::new_config_error(format!(
            "config stream request failed with status {}",
            response.status()
        )));
    }

    let mut buffered = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffered.extend_from_slice(chunk.chunk());

        while let Some(newline_at) = buffered.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffered.drain(..=newline_at).collect();
            let line = &line[..line.len() - 1];

            if line.is_empty() {
                continue;
            }

            let text = std::str::from_utf8(line)
                .map_err(|e| Error::new_config_error(format!("non-utf8 config document: {e}")))?;

            trace!("received bucket config document ({} bytes)", text.len());
            let info = parse_bucket_config(text, &opts.host)?;
            on_config(info);
        }
    }

    Ok(())
}
