//! Residency states and the LRU eviction engine.
//!
//! The tracker owns the recency queue: an ordered sequence of resident
//! model names, head oldest, tail most recent. It holds exactly the set
//! of resident models, no duplicates, and never selects the active model
//! for eviction.

use std::collections::VecDeque;

/// Where a resident model's state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// On the execution device, selected for computation. At most one
    /// model is active at a time.
    Active,
    /// In the holding area (host RAM), counted against the slot budget.
    Idle,
}

/// LRU recency queue with a fixed slot budget.
#[derive(Debug)]
pub struct ResidencyTracker {
    queue: VecDeque<String>,
    budget: usize,
}

impl ResidencyTracker {
    pub fn new(budget: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            budget,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn resident_count(&self) -> usize {
        self.queue.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queue.iter().any(|n| n == name)
    }

    /// Oldest-first recency order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    /// Move `name` to the most-recently-used end, inserting it if it is
    /// not yet tracked.
    pub fn mark_used(&mut self, name: &str) {
        self.remove(name);
        self.queue.push_back(name.to_string());
    }

    /// Remove `name` from the queue. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        if let Some(idx) = self.queue.iter().position(|n| n == name) {
            self.queue.remove(idx);
            true
        } else {
            false
        }
    }

    /// Remove and return the head (least recently used) of the queue.
    pub fn pop_oldest(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    /// If the resident count is at or above the slot budget, select the
    /// least-recently-used entry that is not the active model, remove it
    /// from the queue, and return it for eviction. Recency order is the
    /// sole tie-break.
    pub fn ensure_capacity(&mut self, active: Option<&str>) -> Option<String> {
        if self.queue.len() < self.budget {
            return None;
        }
        let idx = self
            .queue
            .iter()
            .position(|name| Some(name.as_str()) != active)?;
        self.queue.remove(idx)
    }
}
