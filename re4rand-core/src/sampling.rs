use std::collections::VecDeque;

use crate::rng::RandomStream;
use crate::{RandomiserError, Result};

/// Discrete weighted choice over an insertion-ordered list of options.
///
/// Zero (or non-positive) weights are never stored, which is how disabled
/// options drop out of a pool.
#[derive(Clone, Debug)]
pub struct WeightedTable<T> {
    entries: Vec<(T, f64)>,
    total: f64,
}

impl<T> Default for WeightedTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            total: 0.0,
        }
    }
}

impl<T> WeightedTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: T, weight: f64) {
        if !weight.is_finite() || weight <= 0.0 {
            return;
        }
        self.entries.push((value, weight));
        self.total += weight;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_weight(&self) -> f64 {
        self.total
    }

    pub fn entries(&self) -> &[(T, f64)] {
        &self.entries
    }

    /// Cumulative-weight selection. The last entry absorbs any floating
    /// point edge mass.
    pub fn next(&self, rng: &mut RandomStream) -> Result<&T> {
        let Some((last, _)) = self.entries.last() else {
            return Err(RandomiserError::PreconditionViolation(
                "draw from an empty weighted table".to_string(),
            ));
        };

        let u = rng.next_f64() * self.total;
        let mut acc = 0.0;
        for (value, weight) in &self.entries {
            acc += weight;
            if acc > u {
                return Ok(value);
            }
        }
        Ok(last)
    }
}

impl<T> FromIterator<(T, f64)> for WeightedTable<T> {
    fn from_iter<I: IntoIterator<Item = (T, f64)>>(iter: I) -> Self {
        let mut table = WeightedTable::new();
        for (value, weight) in iter {
            table.add(value, weight);
        }
        table
    }
}

/// Shuffled-cycle sampler: every backing element is handed out once before
/// any element repeats.
#[derive(Clone, Debug)]
pub struct ResamplingBag<T> {
    backing: Vec<T>,
    queue: VecDeque<T>,
}

impl<T: Clone> ResamplingBag<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            backing: items.into_iter().collect(),
            queue: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.backing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backing.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Adds items to the backing set and reshuffles them together with the
    /// not yet drawn part of the current cycle.
    pub fn add_range(&mut self, items: impl IntoIterator<Item = T>, rng: &mut RandomStream) {
        let added: Vec<T> = items.into_iter().collect();
        if added.is_empty() {
            return;
        }
        self.backing.extend(added.iter().cloned());

        let mut pending: Vec<T> = self.queue.drain(..).collect();
        pending.extend(added);
        rng.shuffle(&mut pending);
        self.queue.extend(pending);
    }

    pub fn next(&mut self, rng: &mut RandomStream) -> Result<T> {
        if self.backing.is_empty() {
            return Err(RandomiserError::PreconditionViolation(
                "draw from an empty resampling bag".to_string(),
            ));
        }
        if self.queue.is_empty() {
            let mut cycle = self.backing.clone();
            rng.shuffle(&mut cycle);
            self.queue.extend(cycle);
        }
        self.queue.pop_front().ok_or_else(|| {
            RandomiserError::PreconditionViolation(
                "resampling bag refill produced nothing".to_string(),
            )
        })
    }
}
