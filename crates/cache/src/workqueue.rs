//! Deferred work for retrieval operations
//!
//! Waiter callbacks run in the context that unlocks a backing page and must
//! not block, so they only put the retrieval on this queue. A small pool of
//! tokio tasks drains it and runs the copier.

use crate::retrieval::{copier, Retrieval};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Arc<Retrieval>>,
}

impl WorkQueue {
    /// Create the queue and spawn `workers` tasks serving it on `runtime`
    pub fn start(runtime: &Handle, workers: usize) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::unbounded_channel::<Arc<Retrieval>>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                runtime.spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(op) = next else {
                            break;
                        };
                        copier::run(&op);
                    }
                    tracing::debug!("Copier worker {} stopped", worker);
                })
            })
            .collect();

        (Self { tx }, handles)
    }

    /// Queue `op` for the copier; never blocks
    ///
    /// Once the workers are gone the retrieval's woken monitors are failed
    /// on the spot.
    pub fn enqueue(&self, op: Arc<Retrieval>) {
        if let Err(e) = self.tx.send(op) {
            let op = e.0;
            tracing::warn!("Work queue closed, failing retrieval {}", op.debug_id());
            op.abandon();
        }
    }
}
