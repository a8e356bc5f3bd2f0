//! Stateless pub-sub plumbing for engine events.
//!
//! An [`EventHandler`] owns the receiving end of a channel and a single handler function.
//! Producers are cheap clones of the sending end. Each received event is dispatched on its own
//! task, and the handler loop drains outstanding jobs before shutting down, which happens
//! automatically once every producer has been dropped.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, listener) = mpsc::channel(buffer_size);
        Self { listener, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    pub async fn start_handler(mut self) {
        debug!("📬️ Starting event handler");
        // The internal sender must go, or the loop below would never see the channel close.
        drop(self.sender);
        let jobs = Arc::new(AtomicI64::new(0));
        while let Some(event) = self.listener.recv().await {
            let handler = Arc::clone(&self.handler);
            let job = Arc::clone(&jobs);
            job.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                (handler)(event).await;
                job.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while jobs.load(Ordering::SeqCst) > 0 {
            debug!("📬️ Waiting for in-flight event handlers to finish");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
        debug!("📬️ Event handler has shut down");
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
            error!("📬️ Failed to publish event: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicU64;

    use super::*;

    #[tokio::test]
    async fn all_published_events_are_handled() {
        let _ = env_logger::try_init();
        let total = Arc::new(AtomicU64::new(0));
        let tally = Arc::clone(&total);
        let handler = Arc::new(move |v: u64| {
            let tally = Arc::clone(&tally);
            Box::pin(async move {
                tally.fetch_add(v, Ordering::SeqCst);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        let event_handler = EventHandler::new(4, handler);
        let producer_1 = event_handler.subscribe();
        let producer_2 = event_handler.subscribe();
        tokio::spawn(async move {
            for i in 0..5u64 {
                producer_1.publish_event(i * 2 + 1).await;
            }
        });
        tokio::spawn(async move {
            for i in 0..5u64 {
                producer_2.publish_event(i * 2).await;
            }
        });
        event_handler.start_handler().await;
        assert_eq!(total.load(Ordering::SeqCst), 45);
    }
}
