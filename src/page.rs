//! Paged row storage: the grid's backing store and scrollback history.
//!
//! Rows live in pages; pages form a doubly linked list of arena slots with
//! explicit prev/next indices. The screen's active area is the tail of the
//! list, everything above it is scrollback. A `Pin` is the only stable
//! reference into this structure: it names a page slot (generation-checked
//! so pruning invalidates it), a row within the page, and a column.
//!
//! Each page owns its rows and its own style table, so pruning a page frees
//! every style its cells reference in one step.

use rustc_hash::FxHashMap;

use crate::cell::{Cell, CellFlags};
use crate::style::StyleTable;

/// Stable identity of a row, used as a render-cache key. Assigned when the
/// row is allocated or recycled and preserved while its content scrolls.
pub type RowId = u64;

/// Rows per page. Pages are the unit of scrollback allocation and pruning.
pub const PAGE_ROW_CAP: usize = 256;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct RowFlags: u8 {
        /// Content changed since the renderer last looked.
        const DIRTY = 1 << 0;
        /// The line soft-wrapped into the next row.
        const WRAP = 1 << 1;
    }
}

/// Shell-integration marker for a row (OSC 133).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SemanticPrompt {
    #[default]
    None = 0,
    /// OSC 133;A — start of a prompt.
    PromptStart = 1,
    /// OSC 133;B — start of user input.
    CommandStart = 2,
    /// OSC 133;C — start of command output.
    Output = 3,
}

/// A fixed-width sequence of cells plus row-level flags and side tables.
#[derive(Clone, Debug, Default)]
pub struct Row {
    pub cells: Vec<Cell>,
    pub id: RowId,
    pub flags: RowFlags,
    pub prompt: SemanticPrompt,
    /// Extra scalars for grapheme-extended cells, keyed by column.
    graphemes: Option<Box<FxHashMap<u16, Vec<char>>>>,
    /// Hyperlink ids (OSC 8) keyed by column.
    hyperlinks: Option<Box<FxHashMap<u16, u32>>>,
}

impl Row {
    pub fn new(cols: usize, id: RowId) -> Self {
        Self {
            cells: vec![Cell::default(); cols],
            id,
            flags: RowFlags::DIRTY,
            prompt: SemanticPrompt::None,
            graphemes: None,
            hyperlinks: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(RowFlags::DIRTY)
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.flags.insert(RowFlags::DIRTY);
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.flags.remove(RowFlags::DIRTY);
    }

    #[inline]
    pub fn set_wrapped(&mut self, wrapped: bool) {
        self.flags.set(RowFlags::WRAP, wrapped);
    }

    #[inline]
    pub fn is_wrapped(&self) -> bool {
        self.flags.contains(RowFlags::WRAP)
    }

    /// Append a combining scalar to the cluster at `col` and flag the cell.
    pub fn attach_grapheme(&mut self, col: usize, ch: char) {
        let map = self
            .graphemes
            .get_or_insert_with(|| Box::new(FxHashMap::default()));
        map.entry(col as u16).or_default().push(ch);
        if let Some(cell) = self.cells.get_mut(col) {
            cell.flags.insert(CellFlags::GRAPHEME);
        }
        self.mark_dirty();
    }

    /// Combining scalars attached to the cell at `col`.
    pub fn grapheme(&self, col: usize) -> Option<&[char]> {
        self.graphemes
            .as_ref()
            .and_then(|m| m.get(&(col as u16)))
            .map(|v| v.as_slice())
    }

    /// Drop the grapheme cluster attached at `col` (the cell was overwritten).
    pub fn detach_grapheme(&mut self, col: usize) {
        if let Some(map) = self.graphemes.as_mut() {
            map.remove(&(col as u16));
            if map.is_empty() {
                self.graphemes = None;
            }
        }
    }

    pub fn set_hyperlink(&mut self, col: usize, link: u32) {
        let map = self
            .hyperlinks
            .get_or_insert_with(|| Box::new(FxHashMap::default()));
        map.insert(col as u16, link);
    }

    pub fn hyperlink(&self, col: usize) -> Option<u32> {
        self.hyperlinks.as_ref().and_then(|m| m.get(&(col as u16))).copied()
    }

    /// Reset the row to blanks under a fresh identity, releasing every style
    /// its cells held.
    pub fn recycle(&mut self, id: RowId, styles: &mut StyleTable) {
        for cell in &self.cells {
            styles.release(cell.style_id);
        }
        self.cells.fill(Cell::default());
        self.id = id;
        self.flags = RowFlags::DIRTY;
        self.prompt = SemanticPrompt::None;
        self.graphemes = None;
        self.hyperlinks = None;
    }

    /// Truncate or pad the row to `cols`, releasing styles of dropped cells.
    pub fn set_width(&mut self, cols: usize, styles: &mut StyleTable) {
        if self.cells.len() > cols {
            for cell in &self.cells[cols..] {
                styles.release(cell.style_id);
            }
            if let Some(map) = self.graphemes.as_mut() {
                map.retain(|&c, _| (c as usize) < cols);
            }
            if let Some(map) = self.hyperlinks.as_mut() {
                map.retain(|&c, _| (c as usize) < cols);
            }
        }
        self.cells.resize(cols, Cell::default());
        self.mark_dirty();
    }
}

/// Arena index of a page slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageId(pub u32);

/// A contiguous block of rows with its own style table.
pub struct Page {
    pub rows: Vec<Row>,
    pub styles: StyleTable,
    /// Absolute index of this page's first row within the whole list.
    pub base: u64,
    prev: Option<PageId>,
    next: Option<PageId>,
}

impl Page {
    fn new(base: u64) -> Self {
        Self {
            rows: Vec::new(),
            styles: StyleTable::new(),
            base,
            prev: None,
            next: None,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.rows.len() >= PAGE_ROW_CAP
    }

    /// Intern a style into this page's table, degrading to the default style
    /// when the table is full.
    pub fn intern_style(&mut self, style: crate::style::Style) -> crate::style::StyleId {
        match self.styles.intern(style) {
            Some(id) => id,
            None => {
                log::warn!("page style table full, writing with default style");
                crate::style::StyleId::DEFAULT
            }
        }
    }

    /// Overwrite a cell, releasing the style and grapheme data of whatever
    /// was there. The new cell's style reference must already be claimed
    /// (via [`Page::intern_style`] or `styles.add_ref`).
    pub fn set_cell(&mut self, y: usize, x: usize, cell: Cell) {
        let Some(row) = self.rows.get_mut(y) else {
            return;
        };
        let Some(slot) = row.cells.get_mut(x) else {
            return;
        };
        let old = *slot;
        *slot = cell;
        if old.flags.contains(CellFlags::GRAPHEME) {
            row.detach_grapheme(x);
        }
        row.mark_dirty();
        self.styles.release(old.style_id);
    }

    /// Reset a row to blanks under a fresh identity.
    pub fn recycle_row(&mut self, y: usize, id: RowId) {
        if let Some(row) = self.rows.get_mut(y) {
            row.recycle(id, &mut self.styles);
        }
    }

    /// Fill a cell range with copies of `blank`, releasing overwritten
    /// styles. When `skip_protected` is set, DECSCA-protected cells are left
    /// alone. `blank` must carry the default style (erase colors travel in
    /// the content tag, not the style table).
    pub fn fill_cells(
        &mut self,
        y: usize,
        x0: usize,
        x1: usize,
        blank: Cell,
        skip_protected: bool,
    ) {
        debug_assert!(blank.style_id.is_default());
        let Some(row) = self.rows.get_mut(y) else {
            return;
        };
        let x1 = x1.min(row.cells.len());
        if x0 >= x1 {
            return;
        }
        for x in x0..x1 {
            let old = row.cells[x];
            if skip_protected && old.is_protected() {
                continue;
            }
            row.cells[x] = blank;
            if old.flags.contains(CellFlags::GRAPHEME) {
                row.detach_grapheme(x);
            }
            self.styles.release(old.style_id);
        }
        row.mark_dirty();
    }
}

/// A stable reference into the page list: (page slot + generation, row, col).
///
/// Pins are non-owning observers; `PageList::pin_valid` reports whether the
/// referenced page is still alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pin {
    pub page: PageId,
    pub generation: u32,
    pub y: u16,
    pub x: u16,
}

struct PageSlot {
    page: Option<Page>,
    generation: u32,
}

/// Doubly linked list of pages over an arena of slots.
///
/// Pages are appended at the tail as rows are allocated and pruned from the
/// head as scrollback is trimmed. Slot reuse bumps a generation counter so
/// stale pins are detectable.
pub struct PageList {
    slots: Vec<PageSlot>,
    free: Vec<u32>,
    head: Option<PageId>,
    tail: Option<PageId>,
    /// When set, the next `push_row` opens a fresh page even if the tail
    /// has room. Used when old pages must become prunable wholesale.
    tail_sealed: bool,
    total_rows: usize,
    /// Absolute index one past the newest row.
    abs_end: u64,
    next_row_id: RowId,
    pub cols: usize,
}

impl PageList {
    pub fn new(cols: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            tail_sealed: false,
            total_rows: 0,
            abs_end: 0,
            next_row_id: 1,
            cols,
        }
    }

    #[inline]
    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    #[inline]
    pub fn head(&self) -> Option<PageId> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<PageId> {
        self.tail
    }

    /// Allocate a fresh row identity.
    #[inline]
    pub fn fresh_row_id(&mut self) -> RowId {
        let id = self.next_row_id;
        self.next_row_id += 1;
        id
    }

    #[inline]
    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.slots.get(id.0 as usize).and_then(|s| s.page.as_ref())
    }

    #[inline]
    pub fn page_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.slots.get_mut(id.0 as usize).and_then(|s| s.page.as_mut())
    }

    pub fn next_page(&self, id: PageId) -> Option<PageId> {
        self.page(id).and_then(|p| p.next)
    }

    pub fn prev_page(&self, id: PageId) -> Option<PageId> {
        self.page(id).and_then(|p| p.prev)
    }

    /// Build a pin for a location, capturing the slot generation.
    pub fn pin(&self, page: PageId, y: u16, x: u16) -> Pin {
        let generation = self
            .slots
            .get(page.0 as usize)
            .map(|s| s.generation)
            .unwrap_or(0);
        Pin {
            page,
            generation,
            y,
            x,
        }
    }

    /// Whether a pin still points at a live page.
    pub fn pin_valid(&self, pin: &Pin) -> bool {
        match self.slots.get(pin.page.0 as usize) {
            Some(slot) => slot.page.is_some() && slot.generation == pin.generation,
            None => false,
        }
    }

    /// Absolute row index a pin refers to, if the pin is live.
    pub fn pin_abs(&self, pin: &Pin) -> Option<u64> {
        if !self.pin_valid(pin) {
            return None;
        }
        self.page(pin.page).map(|p| p.base + pin.y as u64)
    }

    /// Append a blank row at the tail, allocating a page when needed.
    ///
    /// Returns `None` only when the allocator refuses to grow the arena; the
    /// caller treats that as resource exhaustion, not corruption.
    pub fn push_row(&mut self) -> Option<(PageId, u16)> {
        let tail = match self.tail {
            Some(tail)
                if !self.tail_sealed && !self.page(tail).map(Page::is_full).unwrap_or(true) =>
            {
                tail
            }
            _ => self.alloc_page()?,
        };
        let id = self.fresh_row_id();
        let cols = self.cols;
        let page = self.page_mut(tail)?;
        let mut cells = Vec::new();
        if cells.try_reserve_exact(cols).is_err() {
            return None;
        }
        cells.resize(cols, Cell::default());
        let y = page.rows.len() as u16;
        page.rows.push(Row {
            cells,
            id,
            flags: RowFlags::DIRTY,
            prompt: SemanticPrompt::None,
            graphemes: None,
            hyperlinks: None,
        });
        self.total_rows += 1;
        self.abs_end += 1;
        Some((tail, y))
    }

    fn alloc_page(&mut self) -> Option<PageId> {
        let base = self.abs_end;
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx as usize].page = Some(Page::new(base));
            idx
        } else {
            if self.slots.try_reserve(1).is_err() {
                return None;
            }
            self.slots.push(PageSlot {
                page: Some(Page::new(base)),
                generation: 0,
            });
            (self.slots.len() - 1) as u32
        };
        let id = PageId(idx);

        match self.tail {
            Some(tail) => {
                self.page_mut(tail).unwrap().next = Some(id);
                self.page_mut(id).unwrap().prev = Some(tail);
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.tail_sealed = false;
        Some(id)
    }

    /// Force the next row allocation onto a fresh page.
    pub fn seal_tail(&mut self) {
        self.tail_sealed = true;
    }

    /// Drop the oldest page, invalidating pins into it. Returns the freed id.
    pub fn prune_head(&mut self) -> Option<PageId> {
        let head = self.head?;
        let page = self.slots[head.0 as usize].page.take()?;
        self.slots[head.0 as usize].generation = self.slots[head.0 as usize].generation.wrapping_add(1);
        self.free.push(head.0);
        self.total_rows -= page.rows.len();

        self.head = page.next;
        match self.head {
            Some(next) => self.page_mut(next).unwrap().prev = None,
            None => self.tail = None,
        }
        Some(head)
    }

    /// Locate the `n`-th row counting back from the newest (0 = newest).
    pub fn nth_from_end(&self, n: usize) -> Option<(PageId, u16)> {
        if n >= self.total_rows {
            return None;
        }
        let mut remaining = n;
        let mut cursor = self.tail;
        while let Some(id) = cursor {
            let page = self.page(id)?;
            if remaining < page.rows.len() {
                let y = page.rows.len() - 1 - remaining;
                return Some((id, y as u16));
            }
            remaining -= page.rows.len();
            cursor = page.prev;
        }
        None
    }

    /// Locate a row by absolute index.
    pub fn find_abs(&self, abs: u64) -> Option<(PageId, u16)> {
        if abs >= self.abs_end {
            return None;
        }
        let back = (self.abs_end - 1 - abs) as usize;
        self.nth_from_end(back)
    }

    #[inline]
    pub fn row(&self, loc: (PageId, u16)) -> Option<&Row> {
        self.page(loc.0).and_then(|p| p.rows.get(loc.1 as usize))
    }

    #[inline]
    pub fn row_mut(&mut self, loc: (PageId, u16)) -> Option<&mut Row> {
        self.page_mut(loc.0).and_then(|p| p.rows.get_mut(loc.1 as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_span_pages() {
        let mut list = PageList::new(4);
        let mut last = None;
        for _ in 0..PAGE_ROW_CAP + 3 {
            last = list.push_row();
        }
        assert_eq!(list.total_rows(), PAGE_ROW_CAP + 3);
        assert_ne!(list.head(), list.tail());

        let (page, y) = last.unwrap();
        assert_eq!(Some(page), list.tail());
        assert_eq!(y, 2);
    }

    #[test]
    fn row_ids_are_unique() {
        let mut list = PageList::new(2);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..600 {
            let loc = list.push_row().unwrap();
            let id = list.row(loc).unwrap().id;
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn nth_from_end_walks_backwards() {
        let mut list = PageList::new(2);
        for _ in 0..PAGE_ROW_CAP + 10 {
            list.push_row();
        }
        let newest = list.nth_from_end(0).unwrap();
        assert_eq!(Some(newest.0), list.tail());

        let oldest = list.nth_from_end(list.total_rows() - 1).unwrap();
        assert_eq!(Some(oldest.0), list.head());
        assert_eq!(oldest.1, 0);
    }

    #[test]
    fn prune_invalidates_pins() {
        let mut list = PageList::new(2);
        for _ in 0..PAGE_ROW_CAP + 1 {
            list.push_row();
        }
        let head = list.head().unwrap();
        let pin = list.pin(head, 0, 0);
        assert!(list.pin_valid(&pin));

        list.prune_head();
        assert!(!list.pin_valid(&pin));

        // The freed slot is reused with a bumped generation, so the stale
        // pin stays invalid.
        for _ in 0..PAGE_ROW_CAP {
            list.push_row();
        }
        assert!(!list.pin_valid(&pin));
    }

    #[test]
    fn abs_indices_survive_pruning() {
        let mut list = PageList::new(2);
        for _ in 0..PAGE_ROW_CAP * 2 {
            list.push_row();
        }
        let (page, y) = list.find_abs(PAGE_ROW_CAP as u64).unwrap();
        let pin = list.pin(page, y, 0);
        assert_eq!(list.pin_abs(&pin), Some(PAGE_ROW_CAP as u64));

        list.prune_head();
        // Row still reachable, same absolute index.
        assert_eq!(list.pin_abs(&pin), Some(PAGE_ROW_CAP as u64));
        assert!(list.find_abs(0).is_none());
    }

    #[test]
    fn recycle_resets_identity_and_styles() {
        let mut list = PageList::new(3);
        let loc = list.push_row().unwrap();
        let fresh = list.fresh_row_id();

        let page = list.page_mut(loc.0).unwrap();
        let style = page
            .styles
            .intern(crate::style::Style {
                fg: crate::color::Color::Indexed(2),
                ..Default::default()
            })
            .unwrap();
        page.rows[0].cells[1] = Cell::blank(style);
        let old_id = page.rows[0].id;

        let (rows, styles) = (&mut page.rows, &mut page.styles);
        rows[0].recycle(fresh, styles);
        assert_ne!(rows[0].id, old_id);
        assert!(rows[0].cells.iter().all(|c| c.is_blank()));
        assert_eq!(styles.ref_count(style), 0);
    }
}
