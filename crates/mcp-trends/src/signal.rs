// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run-wide cancellation and deadline.
//!
//! One `RunController` per run; every worker holds a cheap `RunSignal` clone.
//! Once stopped, no new probe attempts are issued and backoff sleeps wake up
//! early. Requests already in flight run to completion or their own timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Owner side: cancels the run.
#[derive(Clone)]
pub struct RunController {
    tx: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

impl RunController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            deadline: None,
        }
    }

    /// Controller whose signals also stop once `budget` has elapsed.
    pub fn with_deadline(budget: Duration) -> Self {
        let mut controller = Self::new();
        controller.deadline = Some(Instant::now() + budget);
        controller
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> RunSignal {
        RunSignal {
            rx: self.tx.subscribe(),
            deadline: self.deadline,
        }
    }
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side: checked before each attempt and during backoff.
#[derive(Clone)]
pub struct RunSignal {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl RunSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx, deadline: None }
    }

    /// Same signal, additionally stopping once `budget` has elapsed from now.
    /// An earlier existing deadline is kept.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        let candidate = Instant::now() + budget;
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(candidate),
            None => candidate,
        });
        self
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleep for `duration` unless the run stops first.
    ///
    /// Returns `true` when the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stopped() => false,
        }
    }

    /// Resolves once the run is cancelled or its deadline passes.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = wait_cancelled(&mut rx) => {}
            _ = wait_deadline(self.deadline) => {}
        }
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Controller gone without cancelling: never fires.
            std::future::pending::<()>().await;
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}
