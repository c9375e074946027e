// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ordered attempt plans for one target.
//!
//! The host-variant × path × scheme matrix is laid out up front as a queue
//! and pruned as feedback arrives, instead of being walked with nested
//! branches. The sequence can be inspected (`issued`, `pending`) without
//! touching the network.

use crate::model::Scheme;
use std::collections::{HashSet, VecDeque};

/// Which spelling of the host an attempt uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostVariant {
    Bare,
    Www,
}

/// One (host, scheme, path) combination to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptPlan {
    pub variant: HostVariant,
    pub host: String,
    pub scheme: Scheme,
    pub path: String,
}

impl AttemptPlan {
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme.as_str(), self.host, self.path)
    }
}

/// What an executed plan tells the sequence about its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFeedback {
    /// Some HTTP response came back, whatever its status.
    Answered,
    /// Name resolution failed: the whole host variant is dead.
    HostUnresolved,
    /// Connect or TLS failure: this scheme on this host variant is dead.
    OriginUnreachable,
    /// Timeout or I/O error on this path only.
    PathFailed,
}

/// Lazily evaluated plan queue for one domain.
#[derive(Debug, Clone)]
pub struct PlanSequence {
    domain: String,
    paths: Vec<String>,
    http_fallback: bool,
    try_www: bool,
    queue: VecDeque<AttemptPlan>,
    www_queued: bool,
    bare_answered: bool,
    dead_hosts: HashSet<HostVariant>,
    dead_origins: HashSet<(HostVariant, Scheme)>,
    https_failed: HashSet<(HostVariant, String)>,
    issued: Vec<AttemptPlan>,
}

impl PlanSequence {
    pub fn new(domain: &str, paths: &[String], http_fallback: bool, try_www: bool) -> Self {
        let mut seq = Self {
            domain: domain.to_string(),
            paths: paths.to_vec(),
            http_fallback,
            try_www,
            queue: VecDeque::new(),
            www_queued: false,
            bare_answered: false,
            dead_hosts: HashSet::new(),
            dead_origins: HashSet::new(),
            https_failed: HashSet::new(),
            issued: Vec::new(),
        };
        seq.queue_variant(HostVariant::Bare);
        seq
    }

    fn host_for(&self, variant: HostVariant) -> String {
        match variant {
            HostVariant::Bare => self.domain.clone(),
            HostVariant::Www => format!("www.{}", self.domain),
        }
    }

    fn queue_variant(&mut self, variant: HostVariant) {
        let host = self.host_for(variant);
        for path in &self.paths {
            self.queue.push_back(AttemptPlan {
                variant,
                host: host.clone(),
                scheme: Scheme::Https,
                path: path.clone(),
            });
            if self.http_fallback {
                self.queue.push_back(AttemptPlan {
                    variant,
                    host: host.clone(),
                    scheme: Scheme::Http,
                    path: path.clone(),
                });
            }
        }
    }

    fn should_escalate(&self) -> bool {
        self.try_www
            && !self.www_queued
            && !self.bare_answered
            && !self.domain.starts_with("www.")
            && self.issued.iter().any(|p| p.variant == HostVariant::Bare)
    }

    fn is_viable(&self, plan: &AttemptPlan) -> bool {
        if self.dead_hosts.contains(&plan.variant)
            || self.dead_origins.contains(&(plan.variant, plan.scheme))
        {
            return false;
        }
        match plan.scheme {
            Scheme::Https => true,
            // Plain HTTP only stands in for an HTTPS attempt that got no response.
            Scheme::Http => {
                self.https_failed
                    .contains(&(plan.variant, plan.path.clone()))
                    || self.dead_origins.contains(&(plan.variant, Scheme::Https))
            }
        }
    }

    /// Next plan to execute, or `None` when the matrix is exhausted.
    pub fn next_plan(&mut self) -> Option<AttemptPlan> {
        loop {
            let Some(plan) = self.queue.pop_front() else {
                if self.should_escalate() {
                    self.www_queued = true;
                    self.queue_variant(HostVariant::Www);
                    continue;
                }
                return None;
            };
            if self.is_viable(&plan) {
                self.issued.push(plan.clone());
                return Some(plan);
            }
        }
    }

    /// Feed back the result of an executed plan.
    pub fn record(&mut self, plan: &AttemptPlan, feedback: PlanFeedback) {
        match feedback {
            PlanFeedback::Answered => {
                if plan.variant == HostVariant::Bare {
                    self.bare_answered = true;
                }
                return;
            }
            PlanFeedback::HostUnresolved => {
                self.dead_hosts.insert(plan.variant);
            }
            PlanFeedback::OriginUnreachable => {
                self.dead_origins.insert((plan.variant, plan.scheme));
            }
            PlanFeedback::PathFailed => {}
        }
        if plan.scheme == Scheme::Https {
            self.https_failed.insert((plan.variant, plan.path.clone()));
        }
    }

    /// Plans handed out so far.
    pub fn issued(&self) -> &[AttemptPlan] {
        &self.issued
    }

    /// Plans still queued (before viability pruning).
    pub fn pending(&self) -> impl Iterator<Item = &AttemptPlan> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> Vec<String> {
        vec![
            "/.well-known/mcp.json".to_string(),
            "/.well-known/mcp/manifest.json".to_string(),
        ]
    }

    fn drain(seq: &mut PlanSequence, feedback: PlanFeedback) -> Vec<String> {
        let mut urls = Vec::new();
        while let Some(plan) = seq.next_plan() {
            urls.push(plan.url());
            seq.record(&plan, feedback);
        }
        urls
    }

    #[test]
    fn test_answered_bare_host_never_escalates() {
        let mut seq = PlanSequence::new("example.com", &paths(), false, true);
        let urls = drain(&mut seq, PlanFeedback::Answered);
        assert_eq!(
            urls,
            vec![
                "https://example.com/.well-known/mcp.json",
                "https://example.com/.well-known/mcp/manifest.json",
            ]
        );
    }

    #[test]
    fn test_dns_failure_escalates_to_www_once() {
        let mut seq = PlanSequence::new("parked-domain.test", &paths(), true, true);
        let urls = drain(&mut seq, PlanFeedback::HostUnresolved);
        assert_eq!(
            urls,
            vec![
                "https://parked-domain.test/.well-known/mcp.json",
                "https://www.parked-domain.test/.well-known/mcp.json",
            ]
        );
        assert_eq!(seq.issued().len(), 2);
    }

    #[test]
    fn test_http_fallback_only_after_transport_failure() {
        let mut seq = PlanSequence::new("a.test", &paths(), true, false);
        let first = seq.next_plan().unwrap();
        assert_eq!(first.scheme, Scheme::Https);
        seq.record(&first, PlanFeedback::OriginUnreachable);

        // HTTPS origin is dead: the remaining HTTPS plan is pruned and both
        // paths fall back to HTTP.
        let urls = drain(&mut seq, PlanFeedback::Answered);
        assert_eq!(
            urls,
            vec![
                "http://a.test/.well-known/mcp.json",
                "http://a.test/.well-known/mcp/manifest.json",
            ]
        );
    }

    #[test]
    fn test_http_fallback_skipped_when_https_answered() {
        let mut seq = PlanSequence::new("a.test", &paths(), true, true);
        let urls = drain(&mut seq, PlanFeedback::Answered);
        assert!(urls.iter().all(|u| u.starts_with("https://")));
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_path_failure_keeps_origin() {
        let mut seq = PlanSequence::new("a.test", &paths(), false, false);
        let urls = drain(&mut seq, PlanFeedback::PathFailed);
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_www_prefixed_domain_not_doubled() {
        let mut seq = PlanSequence::new("www.a.test", &paths(), false, true);
        let urls = drain(&mut seq, PlanFeedback::HostUnresolved);
        assert_eq!(urls, vec!["https://www.a.test/.well-known/mcp.json"]);
    }

    #[test]
    fn test_pending_is_inspectable() {
        let seq = PlanSequence::new("a.test", &paths(), true, true);
        let pending: Vec<String> = seq.pending().map(AttemptPlan::url).collect();
        assert_eq!(
            pending,
            vec![
                "https://a.test/.well-known/mcp.json",
                "http://a.test/.well-known/mcp.json",
                "https://a.test/.well-known/mcp/manifest.json",
                "http://a.test/.well-known/mcp/manifest.json",
            ]
        );
    }
}
