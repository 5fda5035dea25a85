//! Two-lane queue of job identifiers.
//!
//! Each lane is FIFO. The queue only ever holds ids: losing it loses ordering,
//! never job content, and it can be rebuilt from records with
//! `status=queued`.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::types::job::JobId;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Priority,
    Default,
}

impl Lane {
    /// Jobs with a strictly positive priority go to the priority lane.
    pub fn for_priority(priority: i32) -> Self {
        if priority > 0 {
            Lane::Priority
        } else {
            Lane::Default
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueueEntry {
    pub id: JobId,
    pub lane: Lane,
}

#[derive(Debug, Default)]
struct LaneQueue {
    entries: Mutex<VecDeque<JobId>>,
    /// Signalled once per push.
    pushed: Notify,
}

#[derive(Debug, Default)]
pub struct Queue {
    priority: LaneQueue,
    default: LaneQueue,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, lane: Lane) -> &LaneQueue {
        match lane {
            Lane::Priority => &self.priority,
            Lane::Default => &self.default,
        }
    }

    /// Appends `id` to the tail of `lane`. Never blocks on consumers.
    pub fn push(&self, lane: Lane, id: JobId) {
        let queue = self.lane(lane);
        queue.entries.lock().push_back(id);
        queue.pushed.notify_one();
    }

    pub fn try_take(&self, lane: Lane) -> Option<QueueEntry> {
        let id = self.lane(lane).entries.lock().pop_front()?;
        Some(QueueEntry { id, lane })
    }

    /// Takes the head of `lane`, waiting up to `wait` for one to arrive.
    ///
    /// Cancel-safe: an entry is only removed in the same poll that returns it.
    pub async fn take(&self, lane: Lane, wait: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now() + wait;
        let queue = self.lane(lane);

        loop {
            // Register interest before checking, so a push landing between the
            // check and the wait still wakes us.
            let pushed = queue.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(entry) = self.try_take(lane) {
                return Some(entry);
            }

            if timeout_at(deadline, pushed).await.is_err() {
                return None;
            }
        }
    }

    /// Takes the next entry, always preferring the priority lane: the default
    /// lane is only consulted once a bounded wait on the priority lane has
    /// come up empty.
    pub async fn next(&self, wait: Duration) -> Option<QueueEntry> {
        if let Some(entry) = self.take(Lane::Priority, wait).await {
            return Some(entry);
        }

        self.take(Lane::Default, wait).await
    }

    pub fn len(&self, lane: Lane) -> usize {
        self.lane(lane).entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len(Lane::Priority) == 0 && self.len(Lane::Default) == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_millis(50);

    #[test]
    fn test_lane_for_priority() {
        assert_eq!(Lane::for_priority(1), Lane::Priority);
        assert_eq!(Lane::for_priority(i32::MAX), Lane::Priority);
        assert_eq!(Lane::for_priority(0), Lane::Default);
        assert_eq!(Lane::for_priority(-1), Lane::Default);
    }

    #[tokio::test]
    async fn test_fifo_within_lane() {
        let q = Queue::new();
        let ids: Vec<_> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            q.push(Lane::Default, *id);
        }
        assert_eq!(q.len(Lane::Default), 5);

        for id in &ids {
            assert_eq!(
                q.take(Lane::Default, WAIT).await,
                Some(QueueEntry {
                    id: *id,
                    lane: Lane::Default,
                })
            );
        }
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_priority_lane_first() {
        let q = Queue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        q.push(Lane::Default, a);
        q.push(Lane::Priority, b);
        q.push(Lane::Priority, c);

        let order: Vec<_> = [
            q.next(WAIT).await.unwrap(),
            q.next(WAIT).await.unwrap(),
            q.next(WAIT).await.unwrap(),
        ]
        .iter()
        .map(|e| (e.id, e.lane))
        .collect();

        assert_eq!(
            order,
            vec![(b, Lane::Priority), (c, Lane::Priority), (a, Lane::Default)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_times_out() {
        let q = Queue::new();
        let started = Instant::now();

        assert_eq!(q.take(Lane::Priority, WAIT).await, None);
        assert_eq!(started.elapsed(), WAIT);

        assert_eq!(q.next(WAIT).await, None);
        assert_eq!(started.elapsed(), WAIT * 3);
    }

    #[tokio::test]
    async fn test_take_wakes_on_push() {
        let q = Arc::new(Queue::new());
        let id = Uuid::new_v4();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move {
                q.take(Lane::Default, Duration::from_secs(10)).await
            })
        };

        tokio::task::yield_now().await;
        q.push(Lane::Default, id);

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.id, id);
    }

    #[tokio::test]
    async fn test_concurrent_takers_never_share() {
        let q = Arc::new(Queue::new());
        let ids: Vec<_> = (0..64).map(|_| Uuid::new_v4()).collect();

        let takers: Vec<_> = (0..8)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move {
                    let mut got = Vec::new();
                    while let Some(entry) = q.take(Lane::Default, WAIT).await {
                        got.push(entry.id);
                    }
                    got
                })
            })
            .collect();

        for id in &ids {
            q.push(Lane::Default, *id);
        }

        let mut seen = Vec::new();
        for taker in takers {
            seen.extend(taker.await.unwrap());
        }

        seen.sort();
        let mut expected = ids;
        expected.sort();
        assert_eq!(seen, expected);
    }
}
