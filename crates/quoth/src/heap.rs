//! The series arena: every heap-backed runtime object lives here.
//!
//! A *series* is one arena entry: an array of cells, a text or binary
//! buffer, a context (keylist + varlist), or an action's details. Cells
//! reference series by [`SeriesId`]; nothing is reference counted.
//! Reclamation is a mark-sweep pass over the arena from the root set
//! (frames, feeds, data stack, modules, API handles), switching on the
//! series flavor to trace the right edges.
//!
//! Uses a free list to reuse slots from swept series, keeping memory
//! usage constant for long-running loops that repeatedly allocate.
//!
//! Generic over `T: ResourceTracker`; with `NoLimitTracker` all resource
//! checks compile away.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::{
    action::ActionDetails,
    cell::{Cell, Payload},
    context::ContextData,
    error::{ErrorKind, RunError, RunResult},
    resource::ResourceTracker,
};

/// Unique identifier of a series in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesId(u32);

impl SeriesId {
    /// Returns the raw slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Per-series header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SeriesFlags: u8 {
        /// Deep-frozen; all mutation refused, forever.
        const FROZEN = 1 << 0;
        /// Tombstone: a context whose frame has exited. Variable access
        /// through it raises; the arena still sweeps it normally.
        const INACCESSIBLE = 1 << 1;
        /// GC mark bit; only meaningful during a collection pass.
        const MARK = 1 << 2;
    }
}

/// Flavor-specific payload of a series.
#[derive(Debug)]
pub(crate) enum SeriesData {
    Array(Vec<Cell>),
    Text(String),
    Binary(Vec<u8>),
    Context(ContextData),
    Details(ActionDetails),
}

impl SeriesData {
    /// Static flavor name, for stats and diagnostics.
    pub fn flavor(&self) -> &'static str {
        match self {
            Self::Array(_) => "array",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Context(_) => "context",
            Self::Details(_) => "details",
        }
    }

    /// Rough byte estimate for resource tracking.
    fn estimate_size(&self) -> usize {
        const HEADER: usize = 64;
        HEADER
            + match self {
                Self::Array(cells) => cells.len() * size_of::<Cell>(),
                Self::Text(s) => s.len(),
                Self::Binary(b) => b.len(),
                Self::Context(ctx) => ctx.estimate_size(),
                Self::Details(details) => details.estimate_size(),
            }
    }
}

/// One arena entry: flags, enumerator holds, and the flavored payload.
#[derive(Debug)]
pub(crate) struct Series {
    pub flags: SeriesFlags,
    /// Number of live feeds/enumerators locked onto this series. While
    /// nonzero, length-changing mutation raises.
    holds: u32,
    pub data: SeriesData,
}

/// Snapshot of arena state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live series.
    pub live_series: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live series by flavor name.
    pub series_by_flavor: BTreeMap<&'static str, usize>,
}

/// The arena.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<Series>>,
    /// Slots available for reuse. Populated by the sweep phase, consumed
    /// by `alloc`.
    free_list: Vec<SeriesId>,
    tracker: T,
    /// Allocations since the last collection; drives the GC cadence.
    allocations_since_gc: u32,
}

/// Collect once this many allocations have happened since the last pass.
const GC_ALLOCATION_CADENCE: u32 = 4_096;

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::with_capacity(64),
            free_list: Vec::new(),
            tracker,
            allocations_since_gc: 0,
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a series, reusing a swept slot when one is available.
    pub fn alloc(&mut self, data: SeriesData) -> RunResult<SeriesId> {
        self.tracker.on_allocate(|| data.estimate_size())?;
        self.allocations_since_gc += 1;
        let series = Series {
            flags: SeriesFlags::empty(),
            holds: 0,
            data,
        };
        if let Some(id) = self.free_list.pop() {
            debug_assert!(self.entries[id.index()].is_none());
            self.entries[id.index()] = Some(series);
            Ok(id)
        } else {
            let id = SeriesId(self.entries.len() as u32);
            self.entries.push(Some(series));
            Ok(id)
        }
    }

    pub fn alloc_array(&mut self, cells: Vec<Cell>) -> RunResult<SeriesId> {
        debug_assert!(
            !cells.iter().any(Cell::is_isotope),
            "isotopes are prohibited inside arrays"
        );
        self.alloc(SeriesData::Array(cells))
    }

    pub fn alloc_text(&mut self, text: String) -> RunResult<SeriesId> {
        self.alloc(SeriesData::Text(text))
    }

    pub fn alloc_context(&mut self, ctx: ContextData) -> RunResult<SeriesId> {
        self.alloc(SeriesData::Context(ctx))
    }

    pub fn alloc_details(&mut self, details: ActionDetails) -> RunResult<SeriesId> {
        self.alloc(SeriesData::Details(details))
    }

    /// Borrows a series.
    ///
    /// # Panics
    /// Panics on a vacant slot: a `SeriesId` outliving its series means a
    /// GC root was missed, which is a bug, not a user-reachable state.
    pub fn get(&self, id: SeriesId) -> &Series {
        self.entries[id.index()].as_ref().expect("series id points at vacant slot")
    }

    pub fn get_mut(&mut self, id: SeriesId) -> &mut Series {
        self.entries[id.index()].as_mut().expect("series id points at vacant slot")
    }

    /// Borrows an array's cells.
    ///
    /// # Panics
    /// Panics when the series is not an array; heart/payload pairing
    /// guarantees callers only reach this through array-heart cells.
    pub fn array(&self, id: SeriesId) -> &[Cell] {
        match &self.get(id).data {
            SeriesData::Array(cells) => cells,
            other => unreachable!("expected array, found {}", other.flavor()),
        }
    }

    pub fn text(&self, id: SeriesId) -> &str {
        match &self.get(id).data {
            SeriesData::Text(s) => s,
            other => unreachable!("expected text, found {}", other.flavor()),
        }
    }

    /// Borrows an array's context.
    ///
    /// Raises when the context is a tombstone left by an exited frame.
    pub fn context(&self, id: SeriesId) -> RunResult<&ContextData> {
        let series = self.get(id);
        if series.flags.contains(SeriesFlags::INACCESSIBLE) {
            return Err(RunError::fail(
                ErrorKind::InaccessibleContext,
                "context's frame has already exited",
            ));
        }
        match &series.data {
            SeriesData::Context(ctx) => Ok(ctx),
            other => unreachable!("expected context, found {}", other.flavor()),
        }
    }

    pub fn context_mut(&mut self, id: SeriesId) -> RunResult<&mut ContextData> {
        let series = self.get_mut(id);
        if series.flags.contains(SeriesFlags::INACCESSIBLE) {
            return Err(RunError::fail(
                ErrorKind::InaccessibleContext,
                "context's frame has already exited",
            ));
        }
        if series.flags.contains(SeriesFlags::FROZEN) {
            return Err(RunError::fail(ErrorKind::FrozenSeries, "context is frozen"));
        }
        match &mut series.data {
            SeriesData::Context(ctx) => Ok(ctx),
            other => unreachable!("expected context, found {}", other.flavor()),
        }
    }

    /// Borrows a context even when it is a tombstone (for molding and GC).
    pub fn context_raw(&self, id: SeriesId) -> &ContextData {
        match &self.get(id).data {
            SeriesData::Context(ctx) => ctx,
            other => unreachable!("expected context, found {}", other.flavor()),
        }
    }

    pub fn details(&self, id: SeriesId) -> &ActionDetails {
        match &self.get(id).data {
            SeriesData::Details(details) => details,
            other => unreachable!("expected details, found {}", other.flavor()),
        }
    }

    /// Mutable array access for length-changing operations; checks the
    /// freeze and hold invariants.
    pub fn array_mut(&mut self, id: SeriesId) -> RunResult<&mut Vec<Cell>> {
        let series = self.get_mut(id);
        if series.flags.contains(SeriesFlags::FROZEN) {
            return Err(RunError::fail(ErrorKind::FrozenSeries, "series is frozen"));
        }
        if series.holds > 0 {
            return Err(RunError::fail(
                ErrorKind::SeriesHeld,
                "series is held by a live enumerator",
            ));
        }
        match &mut series.data {
            SeriesData::Array(cells) => Ok(cells),
            other => unreachable!("expected array, found {}", other.flavor()),
        }
    }

    /// Mutable array access that bypasses hold checks, for in-place cell
    /// updates that cannot change the length (binding, poke).
    pub fn array_cells_mut(&mut self, id: SeriesId) -> RunResult<&mut [Cell]> {
        let series = self.get_mut(id);
        if series.flags.contains(SeriesFlags::FROZEN) {
            return Err(RunError::fail(ErrorKind::FrozenSeries, "series is frozen"));
        }
        match &mut series.data {
            SeriesData::Array(cells) => Ok(cells),
            other => unreachable!("expected array, found {}", other.flavor()),
        }
    }

    /// Appends a cell to an array, enforcing the no-isotopes invariant.
    pub fn push_cell(&mut self, id: SeriesId, cell: Cell) -> RunResult<()> {
        if cell.is_isotope() {
            return Err(RunError::fail(
                ErrorKind::BadIsotope,
                "isotopes are prohibited inside arrays",
            ));
        }
        self.array_mut(id)?.push(cell);
        Ok(())
    }

    /// Takes a hold on a series, locking out length-changing mutation
    /// while an enumerator (feed) is live on it.
    pub fn add_hold(&mut self, id: SeriesId) {
        self.get_mut(id).holds += 1;
    }

    pub fn release_hold(&mut self, id: SeriesId) {
        let series = self.get_mut(id);
        debug_assert!(series.holds > 0, "unbalanced hold release");
        series.holds = series.holds.saturating_sub(1);
    }

    pub fn hold_count(&self, id: SeriesId) -> u32 {
        self.get(id).holds
    }

    /// Freezes a series and (for arrays and contexts) everything it
    /// transitively references. Irrevocable.
    pub fn freeze_deep(&mut self, id: SeriesId) {
        let mut work = vec![id];
        while let Some(id) = work.pop() {
            let series = self.get_mut(id);
            if series.flags.contains(SeriesFlags::FROZEN) {
                continue;
            }
            series.flags |= SeriesFlags::FROZEN;
            match &series.data {
                SeriesData::Array(cells) => {
                    for cell in cells {
                        if let Payload::Series { id, .. } = cell.payload() {
                            work.push(*id);
                        }
                    }
                }
                SeriesData::Context(ctx) => {
                    for cell in ctx.vars() {
                        if let Payload::Series { id, .. } = cell.payload() {
                            work.push(*id);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn is_frozen(&self, id: SeriesId) -> bool {
        self.get(id).flags.contains(SeriesFlags::FROZEN)
    }

    /// Marks a context as a tombstone; all later variable access raises.
    pub fn tombstone(&mut self, id: SeriesId) {
        self.get_mut(id).flags |= SeriesFlags::INACCESSIBLE;
    }

    /// Deep-copies an array (used for function bodies, `copy/deep`).
    /// Sub-arrays are copied; other series are shared.
    pub fn deep_copy_array(&mut self, id: SeriesId) -> RunResult<SeriesId> {
        let cells = self.array(id).to_vec();
        let mut copied = Vec::with_capacity(cells.len());
        for mut cell in cells {
            if cell.heart().is_array() {
                let inner = self.deep_copy_array(cell.series_id())?;
                cell = Cell::series(cell.heart(), inner);
            }
            copied.push(cell);
        }
        self.alloc(SeriesData::Array(copied))
    }

    /// True once enough allocation has happened to warrant a pass.
    pub fn wants_collection(&self) -> bool {
        self.allocations_since_gc >= GC_ALLOCATION_CADENCE
    }

    /// Mark-sweep collection from the given roots. Returns the number of
    /// series swept.
    pub fn collect<'a>(
        &mut self,
        series_roots: impl IntoIterator<Item = SeriesId>,
        cell_roots: impl IntoIterator<Item = &'a Cell>,
    ) -> usize {
        let mut work: Vec<SeriesId> = series_roots.into_iter().collect();
        for cell in cell_roots {
            push_cell_edges(cell, &mut work);
        }

        // mark
        while let Some(id) = work.pop() {
            let series = match self.entries[id.index()].as_mut() {
                Some(series) => series,
                None => continue,
            };
            if series.flags.contains(SeriesFlags::MARK) {
                continue;
            }
            series.flags |= SeriesFlags::MARK;
            match &series.data {
                SeriesData::Array(cells) => {
                    for cell in cells {
                        push_cell_edges(cell, &mut work);
                    }
                }
                SeriesData::Context(ctx) => {
                    for cell in ctx.vars() {
                        push_cell_edges(cell, &mut work);
                    }
                    if let Some(ancestor) = ctx.ancestor() {
                        work.push(ancestor);
                    }
                }
                SeriesData::Details(details) => {
                    details.push_edges(&mut work);
                }
                SeriesData::Text(_) | SeriesData::Binary(_) => {}
            }
        }

        // sweep
        let mut swept = 0;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            match entry {
                Some(series) if series.flags.contains(SeriesFlags::MARK) => {
                    series.flags &= !SeriesFlags::MARK;
                }
                Some(series) => {
                    let size = series.data.estimate_size();
                    self.tracker.on_free(|| size);
                    *entry = None;
                    self.free_list.push(SeriesId(index as u32));
                    swept += 1;
                }
                None => {}
            }
        }
        self.allocations_since_gc = 0;
        swept
    }

    pub fn stats(&self) -> HeapStats {
        let mut series_by_flavor = BTreeMap::new();
        let mut live_series = 0;
        for entry in self.entries.iter().flatten() {
            live_series += 1;
            *series_by_flavor.entry(entry.data.flavor()).or_insert(0) += 1;
        }
        HeapStats {
            live_series,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            series_by_flavor,
        }
    }
}

/// Pushes the series ids a cell references (payload and binding).
fn push_cell_edges(cell: &Cell, work: &mut Vec<SeriesId>) {
    match cell.payload() {
        Payload::Series { id, .. } | Payload::Context(id) | Payload::Action(id) => work.push(*id),
        _ => {}
    }
    if let Some(binding) = cell.binding() {
        work.push(binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    #[test]
    fn alloc_reuses_swept_slots() {
        let mut heap = Heap::new(NoLimitTracker);
        let a = heap.alloc_array(vec![Cell::integer(1)]).unwrap();
        let b = heap.alloc_array(vec![Cell::integer(2)]).unwrap();
        // only `b` is rooted
        let keep = Cell::series(crate::cell::Heart::Block, b);
        let swept = heap.collect([], [&keep]);
        assert_eq!(swept, 1);
        let c = heap.alloc_array(vec![Cell::integer(3)]).unwrap();
        assert_eq!(c, a, "swept slot should be recycled");
    }

    #[test]
    fn holds_block_mutation() {
        let mut heap = Heap::new(NoLimitTracker);
        let id = heap.alloc_array(vec![Cell::integer(1)]).unwrap();
        heap.add_hold(id);
        assert!(heap.push_cell(id, Cell::integer(2)).is_err());
        heap.release_hold(id);
        assert!(heap.push_cell(id, Cell::integer(2)).is_ok());
    }

    #[test]
    fn freeze_is_transitive() {
        let mut heap = Heap::new(NoLimitTracker);
        let inner = heap.alloc_array(vec![Cell::integer(1)]).unwrap();
        let outer = heap
            .alloc_array(vec![Cell::series(crate::cell::Heart::Block, inner)])
            .unwrap();
        heap.freeze_deep(outer);
        assert!(heap.is_frozen(inner));
        assert!(heap.array_mut(inner).is_err());
    }

    #[test]
    fn isotopes_rejected_in_arrays() {
        let mut heap = Heap::new(NoLimitTracker);
        let id = heap.alloc_array(vec![]).unwrap();
        assert!(heap.push_cell(id, Cell::unset()).is_err());
    }

    #[test]
    fn mark_traverses_nested_arrays() {
        let mut heap = Heap::new(NoLimitTracker);
        let inner = heap.alloc_array(vec![Cell::integer(1)]).unwrap();
        let outer = heap
            .alloc_array(vec![Cell::series(crate::cell::Heart::Block, inner)])
            .unwrap();
        let keep = Cell::series(crate::cell::Heart::Block, outer);
        let swept = heap.collect([], [&keep]);
        assert_eq!(swept, 0);
        assert_eq!(heap.stats().live_series, 2);
    }
}
