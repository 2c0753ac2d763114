//! The feed: the evaluator's input cursor.
//!
//! A feed walks an array one cell at a time with single-cell lookahead.
//! While a feed is live on an array it takes a *hold*, locking the array
//! against length-changing mutation so enumeration stays safe; holds are
//! released when the feed is freed. A splice pushes another array in
//! front of the current one; the feed drains the splice and resumes.
//!
//! The `gotten` slot caches the resolution of the pending word so the
//! evaluator's enfix lookahead can peek without paying the context walk
//! twice.

use smallvec::SmallVec;

use crate::{
    cell::Cell,
    heap::{Heap, SeriesId},
    resource::ResourceTracker,
};

/// Index of a feed in the machine's feed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FeedIx(pub u32);

/// A cursor over an array (plus any spliced arrays).
#[derive(Debug)]
pub(crate) struct Feed {
    array: SeriesId,
    index: u32,
    /// Outer (array, index) pairs to resume once the current array is
    /// drained. The top of this stack is the most recent splice's parent.
    resume: SmallVec<[(SeriesId, u32); 2]>,
    /// Cached resolution of the cell at the current position, filled by
    /// the evaluator's lookahead. Invalidated on any advance.
    gotten: Option<Cell>,
    /// The most recently fetched cell.
    lookback: Option<Cell>,
    /// A deferring enfix word at the current position was already passed
    /// over once while fulfilling an argument; the next lookahead that
    /// sees it must take it. Cleared on any advance.
    deferred_once: bool,
}

impl Feed {
    /// Opens a feed; takes a hold on the array.
    pub fn new<T: ResourceTracker>(heap: &mut Heap<T>, array: SeriesId, index: u32) -> Self {
        heap.add_hold(array);
        let mut feed = Self {
            array,
            index,
            resume: SmallVec::new(),
            gotten: None,
            lookback: None,
            deferred_once: false,
        };
        feed.normalize(heap);
        feed
    }

    /// Pops drained splices so `array`/`index` always denote a real
    /// position (or the true end).
    fn normalize<T: ResourceTracker>(&mut self, heap: &mut Heap<T>) {
        while self.index as usize >= heap.array(self.array).len() {
            match self.resume.pop() {
                Some((outer, outer_index)) => {
                    heap.release_hold(self.array);
                    self.array = outer;
                    self.index = outer_index;
                }
                None => return,
            }
        }
    }

    /// The cell at the current position, or `None` at the end.
    pub fn at<'h, T: ResourceTracker>(&self, heap: &'h Heap<T>) -> Option<&'h Cell> {
        heap.array(self.array).get(self.index as usize)
    }

    pub fn is_at_end<T: ResourceTracker>(&self, heap: &Heap<T>) -> bool {
        self.index as usize >= heap.array(self.array).len()
    }

    /// Fetches the current cell and advances.
    pub fn fetch_next<T: ResourceTracker>(&mut self, heap: &mut Heap<T>) -> Option<Cell> {
        let cell = self.at(heap)?.clone();
        self.index += 1;
        self.normalize(heap);
        self.gotten = None;
        self.deferred_once = false;
        self.lookback = Some(cell.clone());
        Some(cell)
    }

    /// Records that a deferring enfix at the current position was passed
    /// over once.
    pub fn set_deferred_once(&mut self) {
        self.deferred_once = true;
    }

    pub fn deferred_once(&self) -> bool {
        self.deferred_once
    }

    /// The cell that was at the prior position.
    pub fn lookback(&self) -> Option<&Cell> {
        self.lookback.as_ref()
    }

    /// Pushes an array in front of the current position; the feed drains
    /// it, then resumes here.
    pub fn splice<T: ResourceTracker>(&mut self, heap: &mut Heap<T>, array: SeriesId) {
        heap.add_hold(array);
        self.resume.push((self.array, self.index));
        self.array = array;
        self.index = 0;
        self.gotten = None;
        self.normalize(heap);
    }

    /// Caches the resolution of the pending cell.
    pub fn set_gotten(&mut self, cell: Cell) {
        self.gotten = Some(cell);
    }

    /// Takes the cached resolution, if the lookahead stored one.
    pub fn take_gotten(&mut self) -> Option<Cell> {
        self.gotten.take()
    }

    /// The array and position of the current cell, for error excerpts.
    pub fn position(&self) -> (SeriesId, u32) {
        (self.array, self.index)
    }

    /// Releases all holds. Must be called exactly once before the feed
    /// is dropped.
    pub fn release<T: ResourceTracker>(&mut self, heap: &mut Heap<T>) {
        heap.release_hold(self.array);
        for (outer, _) in self.resume.drain(..) {
            heap.release_hold(outer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cell::Heart, resource::NoLimitTracker};

    #[test]
    fn fetch_and_lookback() {
        let mut heap = Heap::new(NoLimitTracker);
        let id = heap.alloc_array(vec![Cell::integer(1), Cell::integer(2)]).unwrap();
        let mut feed = Feed::new(&mut heap, id, 0);
        assert_eq!(feed.at(&heap).unwrap().as_integer(), Some(1));
        assert_eq!(feed.fetch_next(&mut heap).unwrap().as_integer(), Some(1));
        assert_eq!(feed.lookback().unwrap().as_integer(), Some(1));
        assert_eq!(feed.fetch_next(&mut heap).unwrap().as_integer(), Some(2));
        assert!(feed.is_at_end(&heap));
        assert!(feed.fetch_next(&mut heap).is_none());
        feed.release(&mut heap);
    }

    #[test]
    fn hold_taken_and_released() {
        let mut heap = Heap::new(NoLimitTracker);
        let id = heap.alloc_array(vec![Cell::integer(1)]).unwrap();
        assert_eq!(heap.hold_count(id), 0);
        let mut feed = Feed::new(&mut heap, id, 0);
        assert_eq!(heap.hold_count(id), 1);
        assert!(heap.array_mut(id).is_err());
        feed.release(&mut heap);
        assert_eq!(heap.hold_count(id), 0);
        assert!(heap.array_mut(id).is_ok());
    }

    #[test]
    fn splice_drains_then_resumes() {
        let mut heap = Heap::new(NoLimitTracker);
        let base = heap.alloc_array(vec![Cell::integer(1), Cell::integer(2)]).unwrap();
        let extra = heap.alloc_array(vec![Cell::integer(10)]).unwrap();
        let mut feed = Feed::new(&mut heap, base, 0);
        feed.fetch_next(&mut heap).unwrap();
        feed.splice(&mut heap, extra);
        assert_eq!(feed.fetch_next(&mut heap).unwrap().as_integer(), Some(10));
        assert_eq!(feed.fetch_next(&mut heap).unwrap().as_integer(), Some(2));
        assert!(feed.is_at_end(&heap));
        feed.release(&mut heap);
        assert_eq!(heap.hold_count(base), 0);
        assert_eq!(heap.hold_count(extra), 0);
    }

    #[test]
    fn empty_splice_is_transparent() {
        let mut heap = Heap::new(NoLimitTracker);
        let base = heap.alloc_array(vec![Cell::word(Heart::Word, crate::intern::KnownSymbol::True.id())]).unwrap();
        let empty = heap.alloc_array(vec![]).unwrap();
        let mut feed = Feed::new(&mut heap, base, 0);
        feed.splice(&mut heap, empty);
        assert_eq!(feed.at(&heap).unwrap().heart(), Heart::Word);
        feed.release(&mut heap);
    }
}
