//! Time-ordered, single-consumer await-list.
//!
//! Producers [`AwaitList::add`] tokens for a future instant; the one
//! consumer drives [`AwaitList::wait_next`] in a loop, which sleeps until
//! the earliest pending token is due and yields it. A fresh insert or
//! cancellation that changes the earliest token wakes the sleeper early via
//! [`tokio::sync::Notify`], mirroring the `asyncio.Condition`-based queue
//! this module is translated from.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// Stable identifier for a pending await-list entry.
pub type TaskId = Uuid;

/// Errors raised by await-list operations.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum AwaitListError {
    /// `add` was called with an identifier already pending.
    #[error("duplicate await-list identifier {id}")]
    #[diagnostic(code(labsched::awaitlist::duplicate_identifier))]
    DuplicateIdentifier { id: TaskId },
}

/// A pending token: an instant at which `content` (a `Protocol` identifier,
/// as a string) becomes due.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub execution_time: DateTime<Utc>,
    pub content: String,
    seq: u64,
}

struct Inner {
    tasks: Vec<Task>,
    next_seq: u64,
}

impl Inner {
    fn sort_key(t: &Task) -> (DateTime<Utc>, u64) {
        (t.execution_time, t.seq)
    }

    fn earliest_index(&self) -> Option<usize> {
        self.tasks
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                Self::sort_key(a)
                    .partial_cmp(&Self::sort_key(b))
                    .unwrap_or(Ordering::Equal)
            })
            .map(|(i, _)| i)
    }
}

/// A single-consumer, multi-producer time queue of pending tasks.
pub struct AwaitList {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl AwaitList {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: Vec::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Insert a new pending token, waking the consumer if it changes the
    /// earliest due instant.
    pub async fn add(
        &self,
        execution_time: DateTime<Utc>,
        content: String,
        id: Option<TaskId>,
    ) -> Result<TaskId, AwaitListError> {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let mut inner = self.inner.lock().await;
        if inner.tasks.iter().any(|t| t.id == id) {
            return Err(AwaitListError::DuplicateIdentifier { id });
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.push(Task {
            id,
            execution_time,
            content,
            seq,
        });
        drop(inner);
        self.notify.notify_one();
        Ok(id)
    }

    /// Remove a pending token by identifier. Returns `true` if it was
    /// present.
    pub async fn cancel(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.tasks.len();
        inner.tasks.retain(|t| t.id != id);
        let removed = inner.tasks.len() != before;
        drop(inner);
        if removed {
            self.notify.notify_one();
        }
        removed
    }

    /// Cancel every pending token. Used by the executor at the start of
    /// each re-optimize.
    pub async fn cancel_all(&self) {
        let mut inner = self.inner.lock().await;
        let had_any = !inner.tasks.is_empty();
        inner.tasks.clear();
        drop(inner);
        if had_any {
            self.notify.notify_one();
        }
    }

    /// Snapshot of pending tokens in scheduled order.
    pub async fn get_tasks(&self) -> Vec<Task> {
        let inner = self.inner.lock().await;
        let mut tasks = inner.tasks.clone();
        tasks.sort_by(|a, b| Inner::sort_key(a).cmp(&Inner::sort_key(b)).then(Ordering::Equal));
        tasks
    }

    /// Wait for, remove, and return the earliest due token. Sleeps while
    /// the queue is non-empty but nothing is due yet; waits indefinitely on
    /// an empty queue. A concurrent `add`/`cancel` that changes the target
    /// instant cuts the sleep short and re-evaluates.
    pub async fn wait_next(&self) -> Task {
        loop {
            let sleep_for = {
                let mut inner = self.inner.lock().await;
                match inner.earliest_index() {
                    Some(idx) => {
                        let now = Utc::now();
                        if inner.tasks[idx].execution_time <= now {
                            return inner.tasks.remove(idx);
                        }
                        (inner.tasks[idx].execution_time - now)
                            .to_std()
                            .unwrap_or(std::time::Duration::ZERO)
                    }
                    None => {
                        drop(inner);
                        self.notify.notified().await;
                        continue;
                    }
                }
            };

            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

impl Default for AwaitList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn yields_in_execution_time_order_regardless_of_insertion_order() {
        let list = AwaitList::new();
        let now = Utc::now() - Duration::seconds(1);
        list.add(now + Duration::seconds(10), "late".to_string(), None)
            .await
            .unwrap();
        list.add(now + Duration::seconds(2), "early".to_string(), None)
            .await
            .unwrap();

        let first = list.wait_next().await;
        assert_eq!(first.content, "early");
    }

    #[tokio::test]
    async fn rejects_duplicate_identifiers() {
        let list = AwaitList::new();
        let id = Uuid::new_v4();
        list.add(Utc::now(), "a".to_string(), Some(id)).await.unwrap();
        let err = list.add(Utc::now(), "b".to_string(), Some(id)).await.unwrap_err();
        assert_eq!(err, AwaitListError::DuplicateIdentifier { id });
    }

    #[tokio::test]
    async fn cancel_removes_pending_token() {
        let list = AwaitList::new();
        let id = list
            .add(Utc::now() + Duration::seconds(5), "x".to_string(), None)
            .await
            .unwrap();
        assert!(list.cancel(id).await);
        assert!(list.get_tasks().await.is_empty());
        assert!(!list.cancel(id).await);
    }
}
