//! Cooperative single-threaded task queue on a virtual clock.
//!
//! Timers fire in `(due, insertion)` order. Idle tasks only run once no timer
//! is due at the current instant. Nothing here blocks; callers pull tasks with
//! [`Scheduler::next_task`] and dispatch them.

use std::collections::{BTreeMap, VecDeque};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

#[derive(Debug)]
pub struct Scheduler<T> {
    now_ms: u64,
    next_seq: u64,
    timers: BTreeMap<(u64, u64), (TaskId, T)>,
    idle: VecDeque<(TaskId, T)>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            next_seq: 0,
            timers: BTreeMap::new(),
            idle: VecDeque::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next_seq);
        self.next_seq += 1;
        id
    }

    pub fn schedule(&mut self, delay: Duration, task: T) -> TaskId {
        let id = self.next_id();
        let due = self.now_ms.saturating_add(delay.as_millis() as u64);
        self.timers.insert((due, id.0), (id, task));
        id
    }

    pub fn schedule_idle(&mut self, task: T) -> TaskId {
        let id = self.next_id();
        self.idle.push_back((id, task));
        id
    }

    /// Returns false when the task already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let key = self
            .timers
            .iter()
            .find(|(_, (task_id, _))| *task_id == id)
            .map(|(key, _)| *key);
        if let Some(key) = key {
            self.timers.remove(&key);
            return true;
        }
        if let Some(pos) = self.idle.iter().position(|(task_id, _)| *task_id == id) {
            self.idle.remove(pos);
            return true;
        }
        false
    }

    pub fn pending(&self) -> usize {
        self.timers.len() + self.idle.len()
    }

    /// Due time of the earliest timer.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.timers.keys().next().map(|(due, _)| *due)
    }

    /// Pops the next runnable task, advancing the clock to its due time.
    pub fn next_task(&mut self) -> Option<(TaskId, T)> {
        let due_now = self
            .timers
            .keys()
            .next()
            .is_some_and(|(due, _)| *due <= self.now_ms);
        if !due_now {
            if let Some(task) = self.idle.pop_front() {
                return Some(task);
            }
        }
        let ((due, _), task) = self.timers.pop_first()?;
        self.now_ms = self.now_ms.max(due);
        Some(task)
    }

    /// Advances the clock without running anything.
    pub fn advance(&mut self, delay: Duration) {
        self.now_ms = self.now_ms.saturating_add(delay.as_millis() as u64);
    }
}

/// Yields control between units of cooperative work.
pub trait Pacer {
    fn pause(&mut self, delay: Duration);
}

/// Real-time pacing for the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl<T> Pacer for Scheduler<T> {
    fn pause(&mut self, delay: Duration) {
        self.advance(delay);
    }
}
