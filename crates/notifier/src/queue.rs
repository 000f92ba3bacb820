//! Bounded queues that can report their own occupancy.

use tokio::sync::mpsc;

/// Introspection capability shared by every named queue.
pub trait QueueDepth: Send + Sync {
    fn name(&self) -> &str;

    /// Items currently buffered. Zero once every sender is gone.
    fn depth(&self) -> usize;

    fn capacity(&self) -> usize;
}

/// Display handle for a bounded mpsc channel.
///
/// Holds only a weak sender so it never keeps the channel open.
#[derive(Debug)]
pub struct NamedQueue<T> {
    name: String,
    capacity: usize,
    sender: mpsc::WeakSender<T>,
}

impl<T> NamedQueue<T> {
    pub fn new(name: impl Into<String>, sender: &mpsc::Sender<T>) -> Self {
        Self {
            name: name.into(),
            capacity: sender.max_capacity(),
            sender: sender.downgrade(),
        }
    }
}

impl<T> Clone for NamedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            capacity: self.capacity,
            sender: self.sender.clone(),
        }
    }
}

impl<T: Send + 'static> QueueDepth for NamedQueue<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn depth(&self) -> usize {
        match self.sender.upgrade() {
            Some(sender) => sender.max_capacity() - sender.capacity(),
            None => 0,
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Create a bounded channel together with its named display handle.
pub fn named_channel<T>(
    name: impl Into<String>,
    capacity: usize,
) -> (mpsc::Sender<T>, mpsc::Receiver<T>, NamedQueue<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let queue = NamedQueue::new(name, &tx);
    (tx, rx, queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_depth_tracks_buffered_items() {
        let (tx, mut rx, queue) = named_channel::<u32>("inbound", 5);
        assert_eq!(queue.name(), "inbound");
        assert_eq!(queue.capacity(), 5);
        assert_eq!(queue.depth(), 0);

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(queue.depth(), 2);

        rx.recv().await.unwrap();
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_handle_does_not_keep_channel_open() {
        let (tx, mut rx, queue) = named_channel::<u32>("results", 2);
        drop(tx);
        assert_eq!(rx.recv().await, None);
        assert_eq!(queue.depth(), 0);
    }
}
