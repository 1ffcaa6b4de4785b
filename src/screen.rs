//! A screen: the active grid view over a page list, plus cursor, margins,
//! tab stops, charsets, and selection.
//!
//! The primary screen keeps scrollback (rows that leave the top of the
//! active area stay in their pages); the alt screen runs with scrollback
//! disabled and is cleared on resize. The active area is always the tail
//! of the page list, tracked by a per-visual-row location map so the hot
//! write path never walks pages.

use crate::cell::{Cell, CellContent};
use crate::charset::CharsetState;
use crate::color::Color;
use crate::page::{PageId, PageList, Pin, Row, RowFlags, SemanticPrompt};
use crate::selection::Selection;
use crate::style::{Style, StyleId};

/// Which screen a row belongs to; part of the render-cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScreenKind {
    Primary,
    Alt,
}

/// Cursor state. `x` may equal `cols` only while a wrap is pending.
#[derive(Clone, Debug)]
pub struct Cursor {
    pub x: usize,
    pub y: usize,
    pub pending_wrap: bool,
    /// Style applied to newly written cells; interned per page on write.
    pub style: Style,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            pending_wrap: false,
            style: Style::default(),
        }
    }
}

/// DECSC/DECRC snapshot: position, style, wrap, origin flag, charsets.
#[derive(Clone, Debug)]
pub struct SavedCursor {
    pub x: usize,
    pub y: usize,
    pub pending_wrap: bool,
    pub style: Style,
    pub origin: bool,
    pub charsets: CharsetState,
}

/// One screen buffer.
pub struct Screen {
    pages: PageList,
    /// Visual row -> page location. The authoritative active-area map.
    active: Vec<(PageId, u16)>,
    pub rows: usize,
    pub cols: usize,
    pub cursor: Cursor,
    pub saved_cursor: Option<SavedCursor>,
    /// Scroll region, inclusive rows.
    pub scroll_top: usize,
    pub scroll_bottom: usize,
    /// Left/right margins, inclusive columns. Only consulted when DECLRMM
    /// is enabled (the terminal passes margins explicitly).
    pub left_margin: usize,
    pub right_margin: usize,
    /// Tab stops, one bit per column.
    tabs: Vec<u64>,
    pub charsets: CharsetState,
    selection: Option<Selection>,
    /// Viewport displacement into scrollback (0 = live).
    pub scroll_offset: usize,
    max_scrollback: usize,
    pub kind: ScreenKind,
    /// Latched when page growth failed; the IO loop treats this as fatal.
    pub alloc_failed: bool,
}

impl Screen {
    pub fn new(cols: usize, rows: usize, max_scrollback: usize, kind: ScreenKind) -> Self {
        let mut pages = PageList::new(cols);
        let mut active = Vec::with_capacity(rows);
        for _ in 0..rows {
            // Initial allocation: treat failure as a hard error, there is
            // no terminal without an active area.
            let loc = pages.push_row().expect("initial screen allocation");
            active.push(loc);
        }
        let mut screen = Self {
            pages,
            active,
            rows,
            cols,
            cursor: Cursor::default(),
            saved_cursor: None,
            scroll_top: 0,
            scroll_bottom: rows.saturating_sub(1),
            left_margin: 0,
            right_margin: cols.saturating_sub(1),
            tabs: Vec::new(),
            charsets: CharsetState::default(),
            selection: None,
            scroll_offset: 0,
            max_scrollback,
            kind,
            alloc_failed: false,
        };
        screen.default_tabs();
        screen
    }

    // ------------------------------------------------------------------
    // Row access

    #[inline]
    pub fn row_loc(&self, y: usize) -> (PageId, u16) {
        self.active[y]
    }

    #[inline]
    pub fn row(&self, y: usize) -> &Row {
        let loc = self.active[y];
        self.pages.row(loc).expect("active row location")
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut Row {
        let loc = self.active[y];
        self.pages.row_mut(loc).expect("active row location")
    }

    #[inline]
    pub fn pages(&self) -> &PageList {
        &self.pages
    }

    /// Absolute row index of active row `y`.
    pub fn abs_of(&self, y: usize) -> u64 {
        let (page, ry) = self.active[y];
        self.pages.page(page).map(|p| p.base + ry as u64).unwrap_or(0)
    }

    /// Pin the cell at active position (x, y).
    pub fn pin_at(&self, y: usize, x: usize) -> Pin {
        let (page, ry) = self.active[y.min(self.rows - 1)];
        self.pages.pin(page, ry, x.min(self.cols.saturating_sub(1)) as u16)
    }

    /// Rows of scrollback above the active area.
    #[inline]
    pub fn scrollback_len(&self) -> usize {
        self.pages.total_rows() - self.rows
    }

    /// Location of viewport row `i`, honoring the scroll offset.
    pub fn viewport_row_loc(&self, i: usize) -> Option<(PageId, u16)> {
        if i >= self.rows {
            return None;
        }
        let offset = self.scroll_offset.min(self.scrollback_len());
        let from_end = (self.rows - 1 - i) + offset;
        self.pages.nth_from_end(from_end)
    }

    /// The row shown at viewport position `i`.
    pub fn viewport_row(&self, i: usize) -> Option<&Row> {
        self.viewport_row_loc(i).and_then(|loc| self.pages.row(loc))
    }

    // ------------------------------------------------------------------
    // Cell writes

    /// A blank cell under `style`: erase colors ride in the content tag so
    /// erase never touches the style table.
    pub fn blank_cell(style: &Style) -> Cell {
        match style.bg {
            Color::Default => Cell::default(),
            Color::Indexed(i) => Cell {
                content: CellContent::BgPalette(i),
                ..Cell::default()
            },
            Color::Rgb(r, g, b) => Cell {
                content: CellContent::BgRgb(r, g, b),
                ..Cell::default()
            },
        }
    }

    /// Intern a style into the page backing active row `y`.
    pub fn intern_style(&mut self, y: usize, style: &Style) -> StyleId {
        let (page, _) = self.active[y];
        match self.pages.page_mut(page) {
            Some(page) => page.intern_style(*style),
            None => StyleId::DEFAULT,
        }
    }

    /// Write a cell at (x, y). The cell's style reference must have been
    /// claimed against the same row's page.
    pub fn set_cell(&mut self, y: usize, x: usize, cell: Cell) {
        let (page, ry) = self.active[y];
        if let Some(page) = self.pages.page_mut(page) {
            page.set_cell(ry as usize, x, cell);
        }
    }

    #[inline]
    pub fn cell(&self, y: usize, x: usize) -> &Cell {
        &self.row(y).cells[x]
    }

    /// Fill `[x0, x1)` on row `y` with `blank`.
    pub fn fill_row(&mut self, y: usize, x0: usize, x1: usize, blank: Cell, skip_protected: bool) {
        let (page, ry) = self.active[y];
        if let Some(page) = self.pages.page_mut(page) {
            page.fill_cells(ry as usize, x0, x1, blank, skip_protected);
        }
    }

    /// Resolve the style of a cell on active row `y`.
    pub fn style_of(&self, y: usize, id: StyleId) -> Style {
        let (page, _) = self.active[y];
        self.pages
            .page(page)
            .map(|p| p.styles.get(id))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Scrolling

    /// Scroll the whole screen up by `n`, feeding evicted rows to
    /// scrollback. Only valid when the scroll region covers the full
    /// screen; callers fall back to [`Screen::scroll_region_up`] otherwise.
    pub fn scroll_up_with_history(&mut self, n: usize) {
        for _ in 0..n {
            match self.pages.push_row() {
                Some(loc) => {
                    self.active.remove(0);
                    self.active.push(loc);
                }
                None => {
                    log::warn!("page allocation failed, scroll dropped");
                    self.alloc_failed = true;
                    return;
                }
            }
        }
        self.prune_to_limit();
        // Keep the viewport anchored on content the user was reading.
        if self.scroll_offset > 0 {
            self.scroll_offset = (self.scroll_offset + n).min(self.scrollback_len());
        }
    }

    /// Scroll rows `top..=bot` up by `n` in place (no history).
    pub fn scroll_region_up(&mut self, top: usize, bot: usize, n: usize) {
        let span = bot - top + 1;
        let n = n.min(span);
        if n == 0 {
            return;
        }
        let (left, right) = (self.left_margin, self.right_margin);
        let full_width = left == 0 && right == self.cols.saturating_sub(1);
        if n < span {
            for y in top..=bot - n {
                if full_width {
                    self.transfer_row(y + n, y);
                } else {
                    self.transfer_span(y + n, y, left, right + 1);
                }
            }
        }
        for y in (bot + 1 - n)..=bot {
            if full_width {
                self.recycle_row(y);
            } else {
                self.fill_row(y, left, right + 1, Cell::default(), false);
            }
        }
    }

    /// Scroll rows `top..=bot` down by `n` in place.
    pub fn scroll_region_down(&mut self, top: usize, bot: usize, n: usize) {
        let span = bot - top + 1;
        let n = n.min(span);
        if n == 0 {
            return;
        }
        let (left, right) = (self.left_margin, self.right_margin);
        let full_width = left == 0 && right == self.cols.saturating_sub(1);
        for y in (top + n..=bot).rev() {
            if full_width {
                self.transfer_row(y - n, y);
            } else {
                self.transfer_span(y - n, y, left, right + 1);
            }
        }
        for y in top..top + n {
            if full_width {
                self.recycle_row(y);
            } else {
                self.fill_row(y, left, right + 1, Cell::default(), false);
            }
        }
    }

    /// Reset active row `y` to blanks under a fresh identity.
    pub fn recycle_row(&mut self, y: usize) {
        let id = self.pages.fresh_row_id();
        let (page, ry) = self.active[y];
        if let Some(page) = self.pages.page_mut(page) {
            page.recycle_row(ry as usize, id);
        }
    }

    /// Move the content of active row `src` into active row `dst`.
    ///
    /// Same-page rows swap in place (style ids stay valid); cross-page rows
    /// re-intern every styled cell into the destination page's table.
    fn transfer_row(&mut self, src: usize, dst: usize) {
        if src == dst {
            return;
        }
        let src_loc = self.active[src];
        let dst_loc = self.active[dst];
        self.transfer_loc(src_loc, dst_loc);
    }

    /// Move row content between two page locations.
    fn transfer_loc(&mut self, (src_page, src_y): (PageId, u16), (dst_page, dst_y): (PageId, u16)) {
        if src_page == dst_page {
            let page = self.pages.page_mut(src_page).unwrap();
            page.rows.swap(src_y as usize, dst_y as usize);
            page.rows[src_y as usize].mark_dirty();
            page.rows[dst_y as usize].mark_dirty();
            return;
        }

        // Snapshot the source row with resolved styles.
        let (cells, flags, prompt, id, graphemes, hyperlinks) = {
            let page = self.pages.page(src_page).unwrap();
            let row = &page.rows[src_y as usize];
            let cells: Vec<(Cell, Style)> = row
                .cells
                .iter()
                .map(|c| (*c, page.styles.get(c.style_id)))
                .collect();
            let graphemes: Vec<(usize, Vec<char>)> = (0..row.cells.len())
                .filter_map(|x| row.grapheme(x).map(|g| (x, g.to_vec())))
                .collect();
            let hyperlinks: Vec<(usize, u32)> = (0..row.cells.len())
                .filter_map(|x| row.hyperlink(x).map(|l| (x, l)))
                .collect();
            (cells, row.flags, row.prompt, row.id, graphemes, hyperlinks)
        };

        let page = self.pages.page_mut(dst_page).unwrap();
        page.recycle_row(dst_y as usize, id);
        for (x, (mut cell, style)) in cells.into_iter().enumerate() {
            cell.style_id = if style.is_default() {
                StyleId::DEFAULT
            } else {
                page.intern_style(style)
            };
            page.set_cell(dst_y as usize, x, cell);
        }
        let row = &mut page.rows[dst_y as usize];
        row.flags = flags | RowFlags::DIRTY;
        row.prompt = prompt;
        for (x, cluster) in graphemes {
            for ch in cluster {
                row.attach_grapheme(x, ch);
            }
        }
        for (x, link) in hyperlinks {
            row.set_hyperlink(x, link);
        }
    }

    /// Move a column span between two active rows, re-interning styles.
    fn transfer_span(&mut self, src: usize, dst: usize, x0: usize, x1: usize) {
        let (src_page, src_y) = self.active[src];
        let (dst_page, dst_y) = self.active[dst];
        let span: Vec<(Cell, Style)> = {
            let page = self.pages.page(src_page).unwrap();
            let row = &page.rows[src_y as usize];
            row.cells[x0..x1.min(row.cells.len())]
                .iter()
                .map(|c| (*c, page.styles.get(c.style_id)))
                .collect()
        };
        let page = self.pages.page_mut(dst_page).unwrap();
        for (i, (mut cell, style)) in span.into_iter().enumerate() {
            cell.style_id = if style.is_default() {
                StyleId::DEFAULT
            } else {
                page.intern_style(style)
            };
            page.set_cell(dst_y as usize, x0 + i, cell);
        }
    }

    /// Shift cells right from `x` within the margins (ICH).
    pub fn insert_cells(&mut self, y: usize, x: usize, n: usize, blank: Cell) {
        let right = self.right_margin.min(self.cols - 1);
        if x > right {
            return;
        }
        let n = n.min(right - x + 1);
        let (page, ry) = self.active[y];
        let Some(page) = self.pages.page_mut(page) else {
            return;
        };
        let row = &mut page.rows[ry as usize];
        // Cells pushed past the right margin are dropped.
        for out in (right + 1 - n)..=right {
            page.styles.release(row.cells[out].style_id);
        }
        if n <= right - x {
            row.cells.copy_within(x..=right - n, x + n);
        }
        row.cells[x..x + n].fill(blank);
        row.mark_dirty();
    }

    /// Shift cells left onto `x` within the margins (DCH).
    pub fn delete_cells(&mut self, y: usize, x: usize, n: usize, blank: Cell) {
        let right = self.right_margin.min(self.cols - 1);
        if x > right {
            return;
        }
        let n = n.min(right - x + 1);
        let (page, ry) = self.active[y];
        let Some(page) = self.pages.page_mut(page) else {
            return;
        };
        let row = &mut page.rows[ry as usize];
        for out in x..x + n {
            page.styles.release(row.cells[out].style_id);
        }
        row.cells.copy_within(x + n..=right, x);
        row.cells[(right + 1 - n)..=right].fill(blank);
        row.mark_dirty();
    }

    // ------------------------------------------------------------------
    // Scrollback maintenance

    /// Prune whole head pages while scrollback exceeds the limit.
    fn prune_to_limit(&mut self) {
        loop {
            if self.scrollback_len() <= self.max_scrollback {
                break;
            }
            let Some(head) = self.pages.head() else { break };
            let head_rows = self.pages.page(head).map(|p| p.rows.len()).unwrap_or(0);
            // Never prune into the active area.
            if head_rows > self.scrollback_len() {
                break;
            }
            self.pages.prune_head();
            self.drop_dead_selection();
            self.scroll_offset = self.scroll_offset.min(self.scrollback_len());
        }
    }

    /// Drop all scrollback, keeping the active area intact (ED 3).
    ///
    /// The active rows migrate onto fresh tail pages, which turns every
    /// old page into pure scrollback; those are then pruned wholesale.
    /// Going through the normal prune path keeps stale pins detectable.
    pub fn clear_history(&mut self) {
        if self.scrollback_len() == 0 {
            return;
        }
        self.pages.seal_tail();
        let mut new_active = Vec::with_capacity(self.rows);
        for _ in 0..self.rows {
            match self.pages.push_row() {
                Some(loc) => new_active.push(loc),
                None => {
                    log::warn!("page allocation failed, scrollback kept");
                    self.alloc_failed = true;
                    return;
                }
            }
        }
        for y in 0..self.rows {
            self.transfer_loc(self.active[y], new_active[y]);
        }
        self.active = new_active;
        while self.scrollback_len() > 0 {
            let Some(head) = self.pages.head() else { break };
            let head_rows = self.pages.page(head).map(|p| p.rows.len()).unwrap_or(0);
            if head_rows > self.scrollback_len() {
                break;
            }
            self.pages.prune_head();
        }
        self.selection = None;
        self.scroll_offset = 0;
    }

    // ------------------------------------------------------------------
    // Selection

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
        self.drop_dead_selection();
    }

    fn drop_dead_selection(&mut self) {
        if let Some(sel) = &self.selection {
            if !sel.is_live(&self.pages) {
                self.selection = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Tab stops

    /// Default stops every 8 columns.
    pub fn default_tabs(&mut self) {
        self.tabs = vec![0; self.cols.div_ceil(64).max(1)];
        let mut x = 8;
        while x < self.cols {
            self.set_tab(x);
            x += 8;
        }
    }

    pub fn set_tab(&mut self, x: usize) {
        if x < self.cols {
            self.tabs[x / 64] |= 1 << (x % 64);
        }
    }

    pub fn clear_tab(&mut self, x: usize) {
        if x < self.cols {
            self.tabs[x / 64] &= !(1 << (x % 64));
        }
    }

    pub fn clear_all_tabs(&mut self) {
        self.tabs.fill(0);
    }

    fn is_tab(&self, x: usize) -> bool {
        x < self.cols && self.tabs[x / 64] & (1 << (x % 64)) != 0
    }

    /// Next stop strictly right of `x`, saturating at the right margin.
    pub fn next_tab(&self, x: usize) -> usize {
        let limit = self.right_margin.min(self.cols - 1);
        for cand in (x + 1)..=limit {
            if self.is_tab(cand) {
                return cand;
            }
        }
        limit
    }

    /// Previous stop strictly left of `x`, saturating at the left margin.
    pub fn prev_tab(&self, x: usize) -> usize {
        let limit = self.left_margin;
        for cand in (limit..x).rev() {
            if self.is_tab(cand) {
                return cand;
            }
        }
        limit
    }

    // ------------------------------------------------------------------
    // Resize

    /// Resize to `cols` x `rows`. The primary screen keeps content: extra
    /// rows are pulled back from scrollback before fresh rows are
    /// allocated, and shrinking pushes top rows into scrollback. No reflow.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        if cols == self.cols && rows == self.rows {
            return;
        }
        log::info!(
            "screen resize {}x{} -> {}x{}",
            self.cols,
            self.rows,
            cols,
            rows
        );

        if cols != self.cols {
            // Re-width every live row, history included, releasing styles
            // of truncated cells.
            let mut cursor = self.pages.head();
            while let Some(id) = cursor {
                let page = self.pages.page_mut(id).unwrap();
                let n = page.rows.len();
                for y in 0..n {
                    // Split borrow: rows and styles live on the same page.
                    let (rows_part, styles) = {
                        let p = &mut *page;
                        (&mut p.rows, &mut p.styles)
                    };
                    rows_part[y].set_width(cols, styles);
                }
                cursor = self.pages.next_page(id);
            }
            self.pages.cols = cols;
            self.cols = cols;
        }

        if rows > self.rows {
            let mut needed = rows - self.rows;
            // Reclaim rows from scrollback first.
            let reclaim = needed.min(self.scrollback_len());
            for k in 1..=reclaim {
                let loc = self
                    .pages
                    .nth_from_end(self.rows + k - 1)
                    .expect("scrollback row");
                self.active.insert(0, loc);
                self.cursor.y += 1;
            }
            needed -= reclaim;
            for _ in 0..needed {
                match self.pages.push_row() {
                    Some(loc) => self.active.push(loc),
                    None => {
                        log::warn!("page allocation failed during resize");
                        self.alloc_failed = true;
                        break;
                    }
                }
            }
        } else if rows < self.rows {
            // Top rows slide into scrollback (or are recycled on the alt
            // screen, which has none).
            let excess = self.rows - rows;
            if self.max_scrollback == 0 {
                for y in 0..excess {
                    self.recycle_row(y);
                }
            }
            self.active.drain(..excess);
            self.cursor.y = self.cursor.y.saturating_sub(excess);
        }
        self.rows = self.active.len();

        self.scroll_top = 0;
        self.scroll_bottom = self.rows.saturating_sub(1);
        self.left_margin = 0;
        self.right_margin = self.cols.saturating_sub(1);
        self.cursor.x = self.cursor.x.min(self.cols.saturating_sub(1));
        self.cursor.y = self.cursor.y.min(self.rows.saturating_sub(1));
        self.cursor.pending_wrap = false;
        self.scroll_offset = 0;
        self.default_tabs();
        self.drop_dead_selection();
        self.prune_to_limit();
        for y in 0..self.rows {
            self.row_mut(y).mark_dirty();
        }
    }

    /// Mark every active row dirty.
    pub fn mark_all_dirty(&mut self) {
        for y in 0..self.rows {
            self.row_mut(y).mark_dirty();
        }
    }

    /// Record a semantic prompt marker on the cursor row.
    pub fn mark_prompt(&mut self, marker: SemanticPrompt) {
        let y = self.cursor.y.min(self.rows - 1);
        let row = self.row_mut(y);
        row.prompt = marker;
        row.mark_dirty();
    }

    /// Absolute row of the `n`-th prompt-start above (negative) or below
    /// (positive) the viewport top. Used by prompt jumping.
    pub fn find_prompt(&self, from_abs: u64, dir: i32) -> Option<u64> {
        let total = self.pages.total_rows() as u64;
        if dir < 0 {
            (0..from_abs).rev().find(|&abs| {
                self.pages
                    .find_abs(abs)
                    .and_then(|loc| self.pages.row(loc))
                    .map(|r| r.prompt == SemanticPrompt::PromptStart)
                    .unwrap_or(false)
            })
        } else {
            ((from_abs + 1)..total).find(|&abs| {
                self.pages
                    .find_abs(abs)
                    .and_then(|loc| self.pages.row(loc))
                    .map(|r| r.prompt == SemanticPrompt::PromptStart)
                    .unwrap_or(false)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Wide;
    use crate::style::StyleFlags;

    fn write_char(screen: &mut Screen, y: usize, x: usize, c: char, style: Style) {
        let id = screen.intern_style(y, &style);
        screen.set_cell(
            y,
            x,
            Cell {
                content: CellContent::Codepoint(c),
                style_id: id,
                wide: Wide::Narrow,
                flags: Default::default(),
            },
        );
    }

    fn row_text(screen: &Screen, y: usize) -> String {
        screen
            .row(y)
            .cells
            .iter()
            .map(|c| c.codepoint().unwrap_or(' '))
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn scroll_up_feeds_history() {
        let mut s = Screen::new(10, 3, 100, ScreenKind::Primary);
        write_char(&mut s, 0, 0, 'a', Style::default());
        write_char(&mut s, 1, 0, 'b', Style::default());
        write_char(&mut s, 2, 0, 'c', Style::default());

        s.scroll_up_with_history(1);
        assert_eq!(s.scrollback_len(), 1);
        assert_eq!(row_text(&s, 0), "b");
        assert_eq!(row_text(&s, 1), "c");
        assert_eq!(row_text(&s, 2), "");

        // The evicted row is reachable through the viewport with an offset.
        s.scroll_offset = 1;
        let top = s.viewport_row(0).unwrap();
        assert_eq!(top.cells[0].codepoint(), Some('a'));
    }

    #[test]
    fn row_ids_travel_with_content() {
        let mut s = Screen::new(10, 3, 100, ScreenKind::Primary);
        write_char(&mut s, 1, 0, 'x', Style::default());
        let id_before = s.row(1).id;
        s.scroll_up_with_history(1);
        assert_eq!(s.row(0).id, id_before);
    }

    #[test]
    fn region_scroll_rotates_in_place() {
        let mut s = Screen::new(10, 4, 100, ScreenKind::Primary);
        for (y, c) in ['a', 'b', 'c', 'd'].into_iter().enumerate() {
            write_char(&mut s, y, 0, c, Style::default());
        }
        // Scroll rows 1..=2 up by one; row 0 and 3 untouched, no history.
        s.scroll_region_up(1, 2, 1);
        assert_eq!(s.scrollback_len(), 0);
        assert_eq!(row_text(&s, 0), "a");
        assert_eq!(row_text(&s, 1), "c");
        assert_eq!(row_text(&s, 2), "");
        assert_eq!(row_text(&s, 3), "d");
    }

    #[test]
    fn region_scroll_down() {
        let mut s = Screen::new(10, 4, 100, ScreenKind::Primary);
        for (y, c) in ['a', 'b', 'c', 'd'].into_iter().enumerate() {
            write_char(&mut s, y, 0, c, Style::default());
        }
        s.scroll_region_down(1, 3, 1);
        assert_eq!(row_text(&s, 0), "a");
        assert_eq!(row_text(&s, 1), "");
        assert_eq!(row_text(&s, 2), "b");
        assert_eq!(row_text(&s, 3), "c");
    }

    #[test]
    fn styles_survive_cross_page_transfer() {
        let mut s = Screen::new(4, 3, 10_000, ScreenKind::Primary);
        let style = Style {
            fg: Color::Indexed(2),
            flags: StyleFlags::BOLD,
            ..Style::default()
        };
        // Push the active area across a page boundary.
        s.scroll_up_with_history(crate::page::PAGE_ROW_CAP - 2);
        write_char(&mut s, 2, 1, 'z', style);

        // Rows 1 and 2 now straddle pages; rotating them exercises the
        // re-intern path.
        s.scroll_region_up(0, 2, 1);
        let y = 1;
        let cell = *s.cell(y, 1);
        assert_eq!(cell.codepoint(), Some('z'));
        assert_eq!(s.style_of(y, cell.style_id), style);
    }

    #[test]
    fn insert_and_delete_cells() {
        let mut s = Screen::new(6, 1, 0, ScreenKind::Alt);
        for (x, c) in "abcdef".chars().enumerate() {
            write_char(&mut s, 0, x, c, Style::default());
        }
        s.insert_cells(0, 1, 2, Cell::default());
        assert_eq!(row_text(&s, 0), "a  bcd");
        s.delete_cells(0, 0, 3, Cell::default());
        assert_eq!(row_text(&s, 0), "bcd");
    }

    #[test]
    fn scrollback_prunes_at_limit() {
        let mut s = Screen::new(4, 2, 10, ScreenKind::Primary);
        // Push far beyond the limit; whole pages drop once they are fully
        // in scrollback.
        s.scroll_up_with_history(crate::page::PAGE_ROW_CAP * 2);
        assert!(s.scrollback_len() <= crate::page::PAGE_ROW_CAP + 10);
        assert!(!s.alloc_failed);
    }

    #[test]
    fn selection_dropped_when_page_pruned() {
        let mut s = Screen::new(4, 2, 10, ScreenKind::Primary);
        let pin = s.pin_at(0, 0);
        s.set_selection(Some(Selection::new(pin, pin, false)));
        assert!(s.selection().is_some());
        s.scroll_up_with_history(crate::page::PAGE_ROW_CAP * 2);
        assert!(s.selection().is_none());
    }

    #[test]
    fn clear_history_keeps_active_rows() {
        let mut s = Screen::new(6, 2, 10_000, ScreenKind::Primary);
        s.scroll_up_with_history(20);
        write_char(&mut s, 0, 0, 'k', Style::default());
        let pin = s.pin_at(1, 0);

        s.clear_history();
        assert_eq!(s.scrollback_len(), 0);
        assert_eq!(row_text(&s, 0), "k");
        // The pin referenced a pre-clear page and must read as dead.
        assert!(!s.pages().pin_valid(&pin));
    }

    #[test]
    fn tabs_default_every_eight() {
        let s = Screen::new(20, 2, 0, ScreenKind::Primary);
        assert_eq!(s.next_tab(0), 8);
        assert_eq!(s.next_tab(8), 16);
        assert_eq!(s.next_tab(16), 19);
        assert_eq!(s.prev_tab(10), 8);
        assert_eq!(s.prev_tab(3), 0);
    }

    #[test]
    fn resize_grow_reclaims_scrollback() {
        let mut s = Screen::new(10, 3, 100, ScreenKind::Primary);
        write_char(&mut s, 0, 0, 'a', Style::default());
        s.scroll_up_with_history(1); // 'a' row into history
        assert_eq!(s.scrollback_len(), 1);

        s.resize(10, 4);
        assert_eq!(s.rows, 4);
        assert_eq!(s.scrollback_len(), 0);
        assert_eq!(row_text(&s, 0), "a");
    }

    #[test]
    fn resize_narrower_releases_styles() {
        let mut s = Screen::new(8, 2, 100, ScreenKind::Primary);
        let style = Style {
            fg: Color::Indexed(5),
            ..Style::default()
        };
        write_char(&mut s, 0, 7, 'w', style);
        let id = s.cell(0, 7).style_id;
        let (page, _) = s.row_loc(0);
        s.resize(4, 2);
        assert_eq!(s.pages().page(page).unwrap().styles.ref_count(id), 0);
    }

    #[test]
    fn invariant_row_width_and_unique_ids() {
        let mut s = Screen::new(7, 4, 50, ScreenKind::Primary);
        s.scroll_up_with_history(5);
        s.scroll_region_up(1, 3, 2);
        s.resize(5, 6);

        let mut seen = std::collections::HashSet::new();
        for y in 0..s.rows {
            let row = s.row(y);
            assert_eq!(row.len(), s.cols);
            assert!(seen.insert(row.id), "duplicate row id");
        }
    }
}
