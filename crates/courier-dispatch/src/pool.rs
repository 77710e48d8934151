// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fixed set of dispatch workers sharing one dispatcher.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;

pub struct WorkerPool {
    dispatcher: Dispatcher,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            tasks: JoinSet::new(),
        }
    }

    /// Spawn `count` workers (at least one) that run until `cancel` fires.
    pub fn spawn(&mut self, count: usize, cancel: &CancellationToken) {
        let count = count.max(1);
        for _ in 0..count {
            let id = self.tasks.len();
            let worker = self.dispatcher.worker(id);
            let cancel = cancel.clone();
            self.tasks.spawn(async move { worker.run(cancel).await });
        }
        info!(workers = self.tasks.len(), "worker pool running");
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every worker to exit. Call after cancelling the token.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "dispatch worker panicked");
            }
        }
        info!("worker pool drained");
    }
}
