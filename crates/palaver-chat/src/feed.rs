//! Cancellable live feeds handed to UI consumers.
//!
//! A feed is the consumer half of a repository subscription: a background
//! task reads store snapshots, applies the repository's filtering and
//! sorting, and forwards complete result lists over a channel.  Dropping
//! the feed (or calling [`Feed::unsubscribe`]) aborts the task.  One
//! snapshot already in flight may still be buffered at that point; nothing
//! is delivered once the handle is gone.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use palaver_store::{Chat, Message};

use crate::error::Result;

/// Live feed of chat-list snapshots, newest activity first.
pub type ChatFeed = Feed<Vec<Chat>>;

/// Live feed of a chat's visible messages in ascending timestamp order.
pub type MessageFeed = Feed<Vec<Message>>;

/// Receiving handle for a live query owned by a background task.
///
/// Every item is a full, re-sorted result list, never a diff; errors are
/// delivered in-band so consumers can resubscribe or surface them instead
/// of watching a stream that silently went quiet.
#[derive(Debug)]
pub struct Feed<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
    task: JoinHandle<()>,
}

impl<T> Feed<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<T>>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Wait for the next snapshot or error.  Returns `None` once the feed
    /// has been shut down on the producing side.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// Cancel the feed.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T> futures::Stream for Feed<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
