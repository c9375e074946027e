// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-memory fetcher for deterministic tests of the engine and the
//! pipeline.

use super::client::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::model::{TlsSummary, TlsVersion};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

type Scripted = Result<FetchResponse, FetchError>;

#[derive(Default)]
struct Script {
    queues: HashMap<String, VecDeque<Scripted>>,
    calls: Vec<String>,
}

/// Answers each URL from its own queue. The last entry of a queue repeats;
/// unknown URLs fail name resolution.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<Script>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a response for `url`.
    pub fn respond(self, url: &str, response: FetchResponse) -> Self {
        self.push(url, Ok(response));
        self
    }

    /// Queue a transport failure for `url`.
    pub fn fail(self, url: &str, error: FetchError) -> Self {
        self.push(url, Err(error));
        self
    }

    pub fn push(&self, url: &str, entry: Scripted) {
        self.lock()
            .queues
            .entry(url.to_string())
            .or_default()
            .push_back(entry);
    }

    /// Every URL fetched, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let entry = {
            let mut script = self.lock();
            script.calls.push(request.url.clone());
            match script.queues.get_mut(&request.url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let mut response = match entry {
            Some(entry) => entry?,
            None => return Err(FetchError::Dns(format!("no such host: {}", request.url))),
        };

        if response.body.len() > request.max_body_bytes {
            response.body.truncate(request.max_body_bytes);
            response.truncated = true;
        }
        if response.tls.is_none() && request.url.starts_with("https://") {
            response.tls = Some(TlsSummary {
                protocol_version: Some(TlsVersion::Tls13),
                cipher_strength: Some(256),
                cert_valid: true,
            });
        }
        Ok(response)
    }
}
