//! Simple stateless pub-sub event handler
//!
//! Components of the engine publish lifecycle events (a reservation changed status, a payment settled, a refund was
//! queued) after the corresponding transaction has committed. Subscribers receive the event itself and nothing
//! else; they have no access to the engine's state.
//!
//! Handlers are async, and each event is handled on its own task.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::{sync::mpsc, task::JoinSet};

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        Self { listener: receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Runs until every producer has been dropped, then waits for in-flight handlers to finish.
    pub async fn start_handler(mut self) {
        debug!("📬️ Starting event handler");
        // Without this the channel never closes.
        drop(self.sender);
        let mut jobs = JoinSet::new();
        while let Some(ev) = self.listener.recv().await {
            trace!("📬️ Handling event");
            let handler = Arc::clone(&self.handler);
            jobs.spawn(async move { (handler)(ev).await });
            // Reap whatever has already finished so the set does not grow without bound.
            while let Some(res) = jobs.try_join_next() {
                log_join_result(res);
            }
        }
        if !jobs.is_empty() {
            debug!("📬️ Waiting for {} event handlers to complete", jobs.len());
        }
        while let Some(res) = jobs.join_next().await {
            log_join_result(res);
        }
        debug!("📬️ Event handler has shut down");
    }
}

fn log_join_result(res: Result<(), tokio::task::JoinError>) {
    match res {
        Ok(()) => trace!("📬️ Event handled"),
        Err(e) => warn!("📬️ An event handler panicked or was cancelled: {e}"),
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📬️ Failed to send event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    #[tokio::test]
    async fn handler_drains_all_producers() {
        let _ = env_logger::try_init();
        let total = Arc::new(AtomicI64::new(0));
        let t2 = total.clone();
        let handler: Handler<i64> = Arc::new(move |v| {
            let total = total.clone();
            Box::pin(async move {
                tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
                total.fetch_add(v, Ordering::SeqCst);
            })
        });
        let event_handler = EventHandler::new(2, handler);
        let deposits = event_handler.subscribe();
        let refunds = event_handler.subscribe();
        tokio::spawn(async move {
            for amount in [10_000, 20_000, 30_000] {
                deposits.publish_event(amount).await;
            }
        });
        tokio::spawn(async move {
            for amount in [-5_000, -1_000] {
                refunds.publish_event(amount).await;
            }
        });
        event_handler.start_handler().await;
        assert_eq!(t2.load(Ordering::SeqCst), 54_000);
    }
}
