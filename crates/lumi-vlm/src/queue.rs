use std::collections::VecDeque;

use crate::fragment::{Fragment, FragmentKind};
use crate::state::SessionError;

/// Pending session input, in prompt order.
///
/// The queue only grows until the generation driver drains it front to back.
/// Appends are atomic: either every fragment is enqueued or none is.
#[derive(Debug, Default)]
pub struct InputQueue {
    fragments: VecDeque<Fragment>,
    positions: usize,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a single fragment.
    pub fn push(&mut self, fragment: Fragment) -> Result<(), SessionError> {
        self.fragments
            .try_reserve(1)
            .map_err(|_| SessionError::Allocation(1))?;

        self.positions += fragment.positions();
        self.fragments.push_back(fragment);
        Ok(())
    }

    /// Enqueue a batch of fragments; on failure the queue is left unchanged.
    pub fn extend(&mut self, fragments: Vec<Fragment>) -> Result<(), SessionError> {
        let n = fragments.len();
        self.fragments
            .try_reserve(n)
            .map_err(|_| SessionError::Allocation(n))?;

        for fragment in fragments {
            self.positions += fragment.positions();
            self.fragments.push_back(fragment);
        }
        Ok(())
    }

    /// Take the oldest fragment; `None` once the queue is empty.
    pub fn drain_next(&mut self) -> Option<Fragment> {
        let fragment = self.fragments.pop_front()?;
        self.positions -= fragment.positions();
        Some(fragment)
    }

    /// Take every fragment in FIFO order.
    pub fn drain_all(&mut self) -> Vec<Fragment> {
        self.positions = 0;
        self.fragments.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Context positions the queued fragments will occupy once folded.
    pub fn pending_positions(&self) -> usize {
        self.positions
    }

    pub fn kinds(&self) -> Vec<FragmentKind> {
        self.fragments.iter().map(Fragment::kind).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    /// Release every pending fragment.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.fragments.shrink_to_fit();
        self.positions = 0;
    }
}
