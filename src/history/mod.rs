//! Edit History
//! Per-diagram undo stacks drawing on one shared snapshot budget
//!
//! Every diagram gets an [`EditHistory`] from the same [`HistoryPool`]. The pool orders all
//! snapshots of all diagrams in one queue; when the total exceeds the ceiling the globally
//! oldest snapshot is dropped, whichever diagram owns it. Positions inside a stack are tracked
//! by snapshot sequence number, so eviction from the front never shifts a cursor.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;


/// Snapshots retained across all diagrams unless configured otherwise.
pub const DEFAULT_CEILING: usize = 15;

type OwnerId = u64;
type Seq = u64;

struct PoolInner<S> {
    ceiling: usize,
    next_owner: OwnerId,
    next_seq: Seq,
    stacks: BTreeMap<OwnerId, VecDeque<(Seq, S)>>,
    /// Every retained snapshot, oldest first
    order: VecDeque<(OwnerId, Seq)>,
}

impl<S> PoolInner<S> {
    fn push(&mut self, owner: OwnerId, snapshot: S) -> Seq {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stacks.entry(owner).or_default().push_back((seq, snapshot));
        self.order.push_back((owner, seq));
        while self.order.len() > self.ceiling {
            let Some((victim, victim_seq)) = self.order.pop_front() else {
                break;
            };
            log::debug!("evicting snapshot {} of history {}", victim_seq, victim);
            if let Some(stack) = self.stacks.get_mut(&victim) {
                stack.retain(|(s, _)| *s != victim_seq);
            }
        }
        seq
    }

    fn remove(&mut self, owner: OwnerId, seq: Seq) {
        if let Some(stack) = self.stacks.get_mut(&owner) {
            stack.retain(|(s, _)| *s != seq);
        }
        self.order.retain(|entry| *entry != (owner, seq));
    }

    /// Drop every snapshot of `owner` from `from` on.
    fn truncate(&mut self, owner: OwnerId, from: Seq) {
        if let Some(stack) = self.stacks.get_mut(&owner) {
            stack.retain(|(s, _)| *s < from);
        }
        self.order.retain(|(o, s)| *o != owner || *s < from);
    }

    fn release(&mut self, owner: OwnerId) {
        self.stacks.remove(&owner);
        self.order.retain(|(o, _)| *o != owner);
    }

    fn stack(&self, owner: OwnerId) -> Option<&VecDeque<(Seq, S)>> {
        self.stacks.get(&owner)
    }
}

/// Shared snapshot budget. Cloning yields another handle to the same pool.
pub struct HistoryPool<S> {
    inner: Rc<RefCell<PoolInner<S>>>,
}

impl<S> Clone for HistoryPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: Clone> Default for HistoryPool<S> {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING)
    }
}

impl<S: Clone> HistoryPool<S> {
    pub fn new(ceiling: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                ceiling: ceiling.max(1),
                next_owner: 1,
                next_seq: 1,
                stacks: BTreeMap::new(),
                order: VecDeque::new(),
            })),
        }
    }

    /// A fresh, empty history drawing on this pool.
    pub fn history(&self) -> EditHistory<S> {
        let owner = {
            let mut inner = self.inner.borrow_mut();
            let owner = inner.next_owner;
            inner.next_owner += 1;
            owner
        };
        EditHistory {
            pool: Rc::clone(&self.inner),
            owner,
            depth: 0,
            cursor: None,
            pending: None,
        }
    }

    /// Snapshots currently retained across every history.
    pub fn total(&self) -> usize {
        self.inner.borrow().order.len()
    }

    pub fn ceiling(&self) -> usize {
        self.inner.borrow().ceiling
    }
}

/// Undo stack of one diagram.
///
/// Edits are bracketed by [`begin_edit`](Self::begin_edit) and [`end_edit`](Self::end_edit)
/// (or [`cancel_edit`](Self::cancel_edit)); brackets nest and only the outermost one records
/// a snapshot of the state before the edit.
pub struct EditHistory<S> {
    pool: Rc<RefCell<PoolInner<S>>>,
    owner: OwnerId,
    depth: u32,
    /// Snapshot matching the current state while undoing
    cursor: Option<Seq>,
    /// Snapshot pushed by the outermost open bracket
    pending: Option<Seq>,
}

impl<S: Clone> EditHistory<S> {
    /// Open an edit bracket. The outermost bracket captures the pre-edit state and discards
    /// anything that could still be redone.
    pub fn begin_edit(&mut self, capture: impl FnOnce() -> S) {
        self.depth += 1;
        if self.depth > 1 {
            return;
        }
        let mut pool = self.pool.borrow_mut();
        if let Some(cursor) = self.cursor.take() {
            pool.truncate(self.owner, cursor);
        }
        self.pending = Some(pool.push(self.owner, capture()));
    }

    /// Close an edit bracket; the outermost close commits the snapshot.
    pub fn end_edit(&mut self) {
        if self.depth == 0 {
            log::debug!("end_edit without begin_edit");
            return;
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.pending = None;
        }
    }

    /// Close an edit bracket; if this unwinds the nesting, the recorded snapshot is discarded.
    pub fn cancel_edit(&mut self) {
        if self.depth == 0 {
            log::debug!("cancel_edit without begin_edit");
            return;
        }
        self.depth -= 1;
        if self.depth == 0 {
            if let Some(seq) = self.pending.take() {
                self.pool.borrow_mut().remove(self.owner, seq);
            }
        }
    }

    /// Step back. `current` is the live state; it is recorded on the first undo so that redo
    /// can return to it. Returns the state to restore.
    pub fn undo(&mut self, current: S) -> Option<S> {
        if self.depth > 0 {
            return None;
        }
        let mut pool = self.pool.borrow_mut();
        let cursor = match self.cursor {
            Some(c) => c,
            None => {
                let has_entries = pool.stack(self.owner).is_some_and(|s| !s.is_empty());
                if !has_entries {
                    return None;
                }
                pool.push(self.owner, current)
            }
        };
        let previous = pool
            .stack(self.owner)
            .and_then(|s| s.iter().rev().find(|(seq, _)| *seq < cursor).cloned());
        match previous {
            Some((seq, snapshot)) => {
                self.cursor = Some(seq);
                Some(snapshot)
            }
            None => {
                if self.cursor.is_none() {
                    // the recorded live state evicted everything before it
                    pool.remove(self.owner, cursor);
                }
                None
            }
        }
    }

    /// Step forward after [`undo`](Self::undo).
    pub fn redo(&mut self) -> Option<S> {
        if self.depth > 0 {
            return None;
        }
        let cursor = self.cursor?;
        let pool = self.pool.borrow();
        let (seq, snapshot) = pool
            .stack(self.owner)?
            .iter()
            .find(|(seq, _)| *seq > cursor)
            .cloned()?;
        self.cursor = Some(seq);
        Some(snapshot)
    }

    pub fn can_undo(&self) -> bool {
        if self.depth > 0 {
            return false;
        }
        let pool = self.pool.borrow();
        let Some(stack) = pool.stack(self.owner) else {
            return false;
        };
        match self.cursor {
            Some(c) => stack.iter().any(|(seq, _)| *seq < c),
            None => !stack.is_empty(),
        }
    }

    pub fn can_redo(&self) -> bool {
        let Some(c) = self.cursor else {
            return false;
        };
        self.depth == 0
            && self
                .pool
                .borrow()
                .stack(self.owner)
                .is_some_and(|s| s.iter().any(|(seq, _)| *seq > c))
    }

    pub fn is_undoing(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Snapshots this history currently holds.
    pub fn len(&self) -> usize {
        self.pool
            .borrow()
            .stack(self.owner)
            .map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything, e.g. after loading a different drawing.
    pub fn clear(&mut self) {
        self.pool.borrow_mut().release(self.owner);
        self.cursor = None;
        self.pending = None;
        self.depth = 0;
    }
}

impl<S> Drop for EditHistory<S> {
    fn drop(&mut self) {
        if let Ok(mut pool) = self.pool.try_borrow_mut() {
            pool.release(self.owner);
        }
    }
}
