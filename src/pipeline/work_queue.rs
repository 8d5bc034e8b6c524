use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// A crawled chapter, by index.
    Chapter(u32),
    /// Tells exactly one consumer to stop.
    Shutdown,
}

/// FIFO between the crawl producer and the translation consumers.
///
/// Unbounded: the producer never waits on translators. Queue contents are not
/// persisted; a restart re-enqueues every chapter still `crawled`.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    pills: Arc<AtomicUsize>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pills: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, index: u32) {
        // The queue owns a receiver, so sending cannot fail while `self` lives.
        let _ = self.tx.send(WorkItem::Chapter(index));
    }

    /// Enqueues one shutdown pill per consumer.
    pub fn close(&self, consumers: usize) {
        for _ in 0..consumers {
            let _ = self.tx.send(WorkItem::Shutdown);
            self.pills.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Next item, or `None` if every sender is gone and the queue is empty.
    pub async fn recv(&self) -> Option<WorkItem> {
        self.rx.lock().await.recv().await
    }

    pub fn pills_sent(&self) -> usize {
        self.pills.load(Ordering::SeqCst)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends the shutdown pills when dropped, so they go out on every exit path
/// of the producer, including panics and task aborts.
#[derive(Debug)]
pub struct CloseOnDrop {
    queue: WorkQueue,
    consumers: usize,
}

impl CloseOnDrop {
    pub fn new(queue: WorkQueue, consumers: usize) -> Self {
        Self { queue, consumers }
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.queue.close(self.consumers);
    }
}
