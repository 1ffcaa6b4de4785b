//! Terminal state and the semantic operations behind escape sequences.
//!
//! `Terminal` owns the primary and alt screens and applies every mutation
//! the stream handler dispatches: printing (including wide characters and
//! deferred autowrap), cursor motion, erasing, scrolling, SGR, modes, and
//! screen switching. Responses to queries are formatted by the stream
//! handler; this type only mutates state.

use unicode_width::UnicodeWidthChar;

use crate::cell::{Cell, CellContent, CellFlags, Wide};
use crate::charset::{Charset, CharsetState};
use crate::color::{Color, Palette};
use crate::graphics::ImageStorage;
use crate::page::SemanticPrompt;
use crate::screen::{SavedCursor, Screen, ScreenKind};
use crate::selection::Selection;
use crate::style::{Style, StyleFlags, StyleId, Underline};
use crate::vt_parser::CsiParams;

/// Cursor shape set by DECSCUSR.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum CursorShape {
    #[default]
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

/// What mouse events get reported to the application.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum MouseTracking {
    #[default]
    None,
    /// Press only (mode 9).
    X10,
    /// Press and release (mode 1000).
    Normal,
    /// Press, release, drag motion (mode 1002).
    ButtonEvent,
    /// All motion (mode 1003).
    AnyEvent,
}

/// How mouse events are encoded on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum MouseEncoding {
    #[default]
    X10,
    /// Mode 1005, deprecated.
    Utf8,
    /// Mode 1006, the modern form.
    Sgr,
    /// Mode 1015.
    Urxvt,
}

bitflags::bitflags! {
    /// DEC private and ANSI mode bits (the grid-affecting subset; mouse
    /// state lives in its own enums).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct Modes: u32 {
        /// DECCKM: application cursor keys.
        const APP_CURSOR      = 1 << 0;
        /// DECOM: origin mode.
        const ORIGIN          = 1 << 1;
        /// DECAWM: autowrap.
        const AUTOWRAP        = 1 << 2;
        /// DECTCEM: cursor visible.
        const CURSOR_VISIBLE  = 1 << 3;
        /// Mode 12: blinking cursor.
        const CURSOR_BLINK    = 1 << 4;
        /// Mode 45: reverse wraparound for backspace.
        const REVERSE_WRAP    = 1 << 5;
        /// DECNKM / DECKPAM: application keypad.
        const APP_KEYPAD      = 1 << 6;
        /// DECLRMM (mode 69): left/right margins enabled.
        const LR_MARGINS      = 1 << 7;
        /// Mode 80: sixel scrolling.
        const SIXEL_SCROLL    = 1 << 8;
        /// Mode 1004: focus event reporting.
        const FOCUS_EVENTS    = 1 << 9;
        /// Mode 2004: bracketed paste.
        const BRACKETED_PASTE = 1 << 10;
        /// Mode 2026: synchronized update (renderer holds frames).
        const SYNCHRONIZED    = 1 << 11;
    }
}

impl Default for Modes {
    fn default() -> Self {
        Modes::AUTOWRAP | Modes::CURSOR_VISIBLE | Modes::CURSOR_BLINK
    }
}

/// Out-of-band events for the surface layer, drained after each batch.
#[derive(Clone, Debug, PartialEq)]
pub enum TerminalEvent {
    Bell,
    TitleChanged(String),
    CwdChanged(String),
    /// OSC 52 write that passed the clipboard policy.
    SetClipboard { target: u8, text: String },
    /// OSC 52 write refused by policy.
    ClipboardDenied,
    ColorsChanged,
}

/// Hyperlink registry for OSC 8. Cells reference links by id through the
/// row side table.
#[derive(Default)]
pub struct Hyperlinks {
    entries: Vec<(Option<String>, String)>,
}

impl Hyperlinks {
    /// Intern a (params id, uri) pair, reusing ids for repeated targets.
    pub fn intern(&mut self, id: Option<&str>, uri: &str) -> u32 {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|(i, u)| i.as_deref() == id && u == uri)
        {
            return pos as u32 + 1;
        }
        self.entries.push((id.map(str::to_owned), uri.to_owned()));
        self.entries.len() as u32
    }

    pub fn uri(&self, link: u32) -> Option<&str> {
        self.entries
            .get(link.checked_sub(1)? as usize)
            .map(|(_, u)| u.as_str())
    }
}

/// The terminal model: screens, modes, palette, images, and the operations
/// the stream handler invokes.
pub struct Terminal {
    primary: Screen,
    alt: Screen,
    active_is_alt: bool,
    pub modes: Modes,
    /// XTSAVE/XTRESTORE (CSI ? Ps s / r) snapshots, keyed by mode number.
    saved_modes: rustc_hash::FxHashMap<u16, bool>,
    pub mouse_tracking: MouseTracking,
    pub mouse_encoding: MouseEncoding,
    pub cursor_shape: CursorShape,
    pub palette: Palette,
    pub title: String,
    title_stack: Vec<String>,
    pub images: ImageStorage,
    pub hyperlinks: Hyperlinks,
    /// Active OSC 8 hyperlink applied to printed cells.
    current_hyperlink: Option<u32>,
    /// DECSCA: newly printed cells get the protected bit.
    protect_cells: bool,
    /// Last printed scalar, for REP.
    last_char: Option<char>,
    /// Cell size in pixels, for XTWINOPS reports and image placement.
    pub cell_width: f32,
    pub cell_height: f32,
    events: Vec<TerminalEvent>,
    /// Coarse "anything changed" flag consumed by the IO loop's wakeup.
    pub dirty: bool,
}

impl Terminal {
    /// Default scrollback limit in rows.
    pub const DEFAULT_SCROLLBACK: usize = 10_000;

    pub fn new(cols: usize, rows: usize, max_scrollback: usize) -> Self {
        Self {
            primary: Screen::new(cols, rows, max_scrollback, ScreenKind::Primary),
            alt: Screen::new(cols, rows, 0, ScreenKind::Alt),
            active_is_alt: false,
            modes: Modes::default(),
            saved_modes: Default::default(),
            mouse_tracking: MouseTracking::default(),
            mouse_encoding: MouseEncoding::default(),
            cursor_shape: CursorShape::default(),
            palette: Palette::default(),
            title: String::new(),
            title_stack: Vec::new(),
            images: ImageStorage::new(),
            hyperlinks: Hyperlinks::default(),
            current_hyperlink: None,
            protect_cells: false,
            last_char: None,
            cell_width: 10.0,
            cell_height: 20.0,
            events: Vec::new(),
            dirty: true,
        }
    }

    // ------------------------------------------------------------------
    // Accessors

    #[inline]
    pub fn screen(&self) -> &Screen {
        if self.active_is_alt {
            &self.alt
        } else {
            &self.primary
        }
    }

    #[inline]
    pub fn screen_mut(&mut self) -> &mut Screen {
        self.dirty = true;
        if self.active_is_alt {
            &mut self.alt
        } else {
            &mut self.primary
        }
    }

    #[inline]
    pub fn is_alt_screen(&self) -> bool {
        self.active_is_alt
    }

    pub fn rows(&self) -> usize {
        self.screen().rows
    }

    pub fn cols(&self) -> usize {
        self.screen().cols
    }

    #[inline]
    pub fn is_synchronized(&self) -> bool {
        self.modes.contains(Modes::SYNCHRONIZED)
    }

    /// Page growth failed somewhere; the IO loop stops feeding input.
    pub fn alloc_failed(&self) -> bool {
        self.primary.alloc_failed || self.alt.alloc_failed
    }

    /// Drain surface events queued by the last batch.
    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn push_event(&mut self, event: TerminalEvent) {
        self.events.push(event);
    }

    /// Effective right print limit (margin-aware).
    fn right_limit(&self) -> usize {
        if self.modes.contains(Modes::LR_MARGINS) {
            self.screen().right_margin
        } else {
            self.screen().cols - 1
        }
    }

    fn left_limit(&self) -> usize {
        if self.modes.contains(Modes::LR_MARGINS) {
            self.screen().left_margin
        } else {
            0
        }
    }

    // ------------------------------------------------------------------
    // Text input

    /// Feed a run of decoded scalars. C0 controls ride along and are
    /// handled inline; ESC never appears here.
    pub fn input_text(&mut self, codepoints: &[u32]) {
        for &cp in codepoints {
            match cp {
                0x07 => self.events.push(TerminalEvent::Bell),
                0x08 => self.backspace(),
                0x09 => self.tab_forward(1),
                0x0a | 0x0b | 0x0c => self.linefeed(),
                0x0d => self.carriage_return(),
                0x0e => self.screen_mut().charsets.invoke(1, false), // SO
                0x0f => self.screen_mut().charsets.invoke(0, false), // SI
                0x00..=0x1f => {}
                0x7f => {} // DEL is ignored in ground
                cp => {
                    let c = char::from_u32(cp).unwrap_or('\u{FFFD}');
                    self.print(c);
                }
            }
        }
    }

    /// A C0 control that arrived inside an escape sequence.
    pub fn control(&mut self, byte: u8) {
        match byte {
            0x07 => self.events.push(TerminalEvent::Bell),
            0x08 => self.backspace(),
            0x09 => self.tab_forward(1),
            0x0a | 0x0b | 0x0c => self.linefeed(),
            0x0d => self.carriage_return(),
            0x0e => self.screen_mut().charsets.invoke(1, false),
            0x0f => self.screen_mut().charsets.invoke(0, false),
            _ => {}
        }
    }

    /// Print one scalar at the cursor, handling width, charsets, deferred
    /// wrap, and wide-pair bookkeeping.
    pub fn print(&mut self, c: char) {
        let c = self.screen_mut().charsets.map(c);
        let width = c.width().unwrap_or(1);

        if width == 0 {
            self.attach_combining(c);
            return;
        }

        let right = self.right_limit();
        let autowrap = self.modes.contains(Modes::AUTOWRAP);

        // Deferred wrap: the previous print filled the last column; this
        // scalar is what actually triggers the wrap.
        if self.screen().cursor.pending_wrap {
            if autowrap {
                let y = self.screen().cursor.y;
                self.screen_mut().row_mut(y).set_wrapped(true);
                let left = self.left_limit();
                let s = self.screen_mut();
                s.cursor.x = left;
                s.cursor.pending_wrap = false;
                self.advance_row();
            } else {
                let s = self.screen_mut();
                s.cursor.x = right;
                s.cursor.pending_wrap = false;
            }
        }

        // A wide scalar that would straddle the right edge: pad the last
        // column with a spacer head and wrap first.
        if width == 2 && self.screen().cursor.x == right {
            let (y, x) = {
                let c = &self.screen().cursor;
                (c.y, c.x)
            };
            if autowrap {
                self.clean_wide_overwrite(y, x);
                self.screen_mut().set_cell(
                    y,
                    x,
                    Cell {
                        content: CellContent::Empty,
                        style_id: StyleId::DEFAULT,
                        wide: Wide::SpacerHead,
                        flags: CellFlags::empty(),
                    },
                );
                self.screen_mut().row_mut(y).set_wrapped(true);
                let left = self.left_limit();
                self.screen_mut().cursor.x = left;
                self.advance_row();
            } else {
                // No room and no wrap: the scalar is dropped.
                return;
            }
        }

        let (y, x) = {
            let c = &self.screen().cursor;
            (c.y, c.x)
        };

        self.clean_wide_overwrite(y, x);
        if width == 2 {
            self.clean_wide_overwrite(y, x + 1);
        }

        let style = self.screen().cursor.style;
        let style_id = self.screen_mut().intern_style(y, &style);
        let mut flags = CellFlags::empty();
        if self.protect_cells {
            flags.insert(CellFlags::PROTECTED);
        }
        self.screen_mut().set_cell(
            y,
            x,
            Cell {
                content: CellContent::Codepoint(c),
                style_id,
                wide: if width == 2 { Wide::WideHead } else { Wide::Narrow },
                flags,
            },
        );
        if let Some(link) = self.current_hyperlink {
            self.screen_mut().row_mut(y).set_hyperlink(x, link);
        }

        if width == 2 {
            // The tail mirrors the head's style so background draws span
            // the full double cell.
            let tail_id = self.screen_mut().intern_style(y, &style);
            self.screen_mut().set_cell(
                y,
                x + 1,
                Cell {
                    content: CellContent::Empty,
                    style_id: tail_id,
                    wide: Wide::WideTail,
                    flags,
                },
            );
        }

        let new_x = x + width;
        let s = self.screen_mut();
        if new_x > right {
            s.cursor.x = right + 1;
            s.cursor.pending_wrap = true;
        } else {
            s.cursor.x = new_x;
        }
        self.last_char = Some(c);
    }

    /// Attach a zero-width scalar to the previously printed cell.
    fn attach_combining(&mut self, c: char) {
        let (y, x) = {
            let cur = &self.screen().cursor;
            (cur.y, cur.x)
        };
        let right = self.right_limit();
        let target = if self.screen().cursor.pending_wrap {
            right
        } else if x > 0 {
            x - 1
        } else {
            return;
        };
        // Attach to the head of a wide pair.
        let target = if self.screen().cell(y, target).is_wide_tail() && target > 0 {
            target - 1
        } else {
            target
        };
        if self.screen().cell(y, target).codepoint().is_some() {
            self.screen_mut().row_mut(y).attach_grapheme(target, c);
        }
    }

    /// Writing over half of a wide pair clears the other half.
    fn clean_wide_overwrite(&mut self, y: usize, x: usize) {
        if x >= self.cols() {
            return;
        }
        let wide = self.screen().cell(y, x).wide;
        match wide {
            Wide::WideTail => {
                if x > 0 {
                    self.screen_mut().set_cell(y, x - 1, Cell::default());
                }
            }
            Wide::WideHead => {
                if x + 1 < self.cols() {
                    self.screen_mut().set_cell(y, x + 1, Cell::default());
                }
            }
            _ => {}
        }
    }

    /// REP: repeat the last printed scalar `n` times.
    pub fn repeat_last(&mut self, n: usize) {
        if let Some(c) = self.last_char {
            // Matches XTerm's repetition cap.
            for _ in 0..n.min(65535) {
                self.print(c);
            }
        }
    }

    // ------------------------------------------------------------------
    // Cursor motion

    pub fn backspace(&mut self) {
        let left = self.left_limit();
        let reverse_wrap = self.modes.contains(Modes::REVERSE_WRAP);
        let s = self.screen_mut();
        s.cursor.pending_wrap = false;
        if s.cursor.x > left {
            s.cursor.x -= 1;
        } else if reverse_wrap && s.cursor.y > 0 {
            // Mode 45: backspace at the left edge climbs to the previous
            // row's last column if that row soft-wrapped.
            let prev = s.cursor.y - 1;
            if s.row(prev).is_wrapped() {
                s.cursor.y = prev;
                s.cursor.x = s.cols - 1;
            }
        }
    }

    pub fn tab_forward(&mut self, n: usize) {
        let s = self.screen_mut();
        s.cursor.pending_wrap = false;
        for _ in 0..n.max(1) {
            s.cursor.x = s.next_tab(s.cursor.x);
        }
    }

    pub fn tab_backward(&mut self, n: usize) {
        let s = self.screen_mut();
        s.cursor.pending_wrap = false;
        for _ in 0..n.max(1) {
            s.cursor.x = s.prev_tab(s.cursor.x);
        }
    }

    pub fn carriage_return(&mut self) {
        let left = self.left_limit();
        let s = self.screen_mut();
        s.cursor.x = left;
        s.cursor.pending_wrap = false;
    }

    pub fn linefeed(&mut self) {
        self.advance_row();
    }

    /// IND / LF: move down one row, scrolling at the region bottom.
    fn advance_row(&mut self) {
        let (bottom, rows, y) = {
            let s = self.screen();
            (s.scroll_bottom, s.rows, s.cursor.y)
        };
        if y == bottom {
            self.scroll_up(1);
        } else if y + 1 < rows {
            self.screen_mut().cursor.y += 1;
        }
    }

    pub fn index(&mut self) {
        self.advance_row();
    }

    pub fn next_line(&mut self) {
        self.carriage_return();
        self.advance_row();
    }

    /// RI: move up one row, scrolling down at the region top.
    pub fn reverse_index(&mut self) {
        let top = self.screen().scroll_top;
        let s = self.screen_mut();
        if s.cursor.y == top {
            let (t, b) = (s.scroll_top, s.scroll_bottom);
            s.scroll_region_down(t, b, 1);
        } else if s.cursor.y > 0 {
            s.cursor.y -= 1;
        }
        self.screen_mut().cursor.pending_wrap = false;
    }

    /// CUP/HVP: 1-based row/col, origin-relative when DECOM is set.
    pub fn cursor_to(&mut self, row: i32, col: i32) {
        let origin = self.modes.contains(Modes::ORIGIN);
        let rows = self.rows();
        let cols = self.cols();
        let s = self.screen_mut();
        let row = row.max(1) as usize - 1;
        let col = col.max(1) as usize - 1;
        if origin {
            s.cursor.y = (s.scroll_top + row).min(s.scroll_bottom);
            s.cursor.x = (s.left_margin + col).min(s.right_margin);
        } else {
            s.cursor.y = row.min(rows - 1);
            s.cursor.x = col.min(cols - 1);
        }
        s.cursor.pending_wrap = false;
    }

    pub fn cursor_up(&mut self, n: usize) {
        let s = self.screen_mut();
        // Stop at the region top when starting inside the region.
        let floor = if s.cursor.y >= s.scroll_top {
            s.scroll_top
        } else {
            0
        };
        s.cursor.y = s.cursor.y.saturating_sub(n.max(1)).max(floor);
        s.cursor.pending_wrap = false;
    }

    pub fn cursor_down(&mut self, n: usize) {
        let rows = self.rows();
        let s = self.screen_mut();
        let ceil = if s.cursor.y <= s.scroll_bottom {
            s.scroll_bottom
        } else {
            rows - 1
        };
        s.cursor.y = (s.cursor.y + n.max(1)).min(ceil);
        s.cursor.pending_wrap = false;
    }

    pub fn cursor_forward(&mut self, n: usize) {
        let right = self.right_limit();
        let s = self.screen_mut();
        s.cursor.x = (s.cursor.x + n.max(1)).min(right);
        s.cursor.pending_wrap = false;
    }

    pub fn cursor_back(&mut self, n: usize) {
        let left = self.left_limit();
        let s = self.screen_mut();
        let x = s.cursor.x.min(s.cols - 1); // collapse a pending wrap first
        s.cursor.x = x.saturating_sub(n.max(1)).max(left.min(x));
        s.cursor.pending_wrap = false;
    }

    /// CNL: next line, column to the left margin.
    pub fn cursor_next_line(&mut self, n: usize) {
        self.cursor_down(n);
        self.carriage_return();
    }

    /// CPL: previous line, column to the left margin.
    pub fn cursor_prev_line(&mut self, n: usize) {
        self.cursor_up(n);
        self.carriage_return();
    }

    /// CHA/HPA: absolute column, 1-based.
    pub fn cursor_col(&mut self, col: i32) {
        let cols = self.cols();
        let s = self.screen_mut();
        s.cursor.x = (col.max(1) as usize - 1).min(cols - 1);
        s.cursor.pending_wrap = false;
    }

    /// VPA: absolute row, 1-based, origin-relative under DECOM.
    pub fn cursor_row(&mut self, row: i32) {
        let origin = self.modes.contains(Modes::ORIGIN);
        let rows = self.rows();
        let s = self.screen_mut();
        let row = row.max(1) as usize - 1;
        s.cursor.y = if origin {
            (s.scroll_top + row).min(s.scroll_bottom)
        } else {
            row.min(rows - 1)
        };
        s.cursor.pending_wrap = false;
    }

    // ------------------------------------------------------------------
    // Erase operations

    fn blank(&self) -> Cell {
        Screen::blank_cell(&self.screen().cursor.style)
    }

    /// EL / DECSEL. `selective` skips DECSCA-protected cells.
    pub fn erase_line(&mut self, mode: i32, selective: bool) {
        let blank = self.blank();
        let cols = self.cols();
        let (y, x) = {
            let c = &self.screen().cursor;
            (c.y, c.x.min(cols - 1))
        };
        match mode {
            0 => self.screen_mut().fill_row(y, x, cols, blank, selective),
            1 => self.screen_mut().fill_row(y, 0, x + 1, blank, selective),
            2 => self.screen_mut().fill_row(y, 0, cols, blank, selective),
            _ => {}
        }
        // Erasing the line breaks its soft-wrap continuity.
        if mode == 2 || mode == 0 {
            self.screen_mut().row_mut(y).set_wrapped(false);
        }
    }

    /// ED / DECSED. Mode 2 clears the screen, mode 3 drops scrollback.
    pub fn erase_display(&mut self, mode: i32, selective: bool) {
        let blank = self.blank();
        let cols = self.cols();
        let rows = self.rows();
        match mode {
            0 => {
                let (y, x) = {
                    let c = &self.screen().cursor;
                    (c.y, c.x.min(cols - 1))
                };
                self.screen_mut().fill_row(y, x, cols, blank, selective);
                for row in y + 1..rows {
                    self.screen_mut().fill_row(row, 0, cols, blank, selective);
                }
            }
            1 => {
                let (y, x) = {
                    let c = &self.screen().cursor;
                    (c.y, c.x.min(cols - 1))
                };
                for row in 0..y {
                    self.screen_mut().fill_row(row, 0, cols, blank, selective);
                }
                self.screen_mut().fill_row(y, 0, x + 1, blank, selective);
            }
            2 => {
                for row in 0..rows {
                    self.screen_mut().fill_row(row, 0, cols, blank, selective);
                    self.screen_mut().row_mut(row).set_wrapped(false);
                }
                // ED 2 snaps the viewport back to the live grid.
                self.screen_mut().scroll_offset = 0;
            }
            3 => {
                self.screen_mut().clear_history();
            }
            _ => {}
        }
    }

    /// ECH: blank `n` cells in place, clearing styles.
    pub fn erase_chars(&mut self, n: usize) {
        let blank = self.blank();
        let cols = self.cols();
        let (y, x) = {
            let c = &self.screen().cursor;
            (c.y, c.x.min(cols - 1))
        };
        let n = n.max(1).min(cols - x);
        self.clean_wide_overwrite(y, x);
        self.clean_wide_overwrite(y, x + n - 1);
        self.screen_mut().fill_row(y, x, x + n, blank, false);
        self.screen_mut().cursor.pending_wrap = false;
    }

    // ------------------------------------------------------------------
    // Line and character editing

    /// IL: insert blank lines at the cursor, pushing the rest down.
    pub fn insert_lines(&mut self, n: usize) {
        let s = self.screen_mut();
        let y = s.cursor.y;
        if y < s.scroll_top || y > s.scroll_bottom {
            return;
        }
        let (bot, left) = (s.scroll_bottom, s.left_margin);
        s.scroll_region_down(y, bot, n.max(1));
        s.cursor.x = left;
        s.cursor.pending_wrap = false;
    }

    /// DL: delete lines at the cursor, pulling the rest up.
    pub fn delete_lines(&mut self, n: usize) {
        let s = self.screen_mut();
        let y = s.cursor.y;
        if y < s.scroll_top || y > s.scroll_bottom {
            return;
        }
        let (bot, left) = (s.scroll_bottom, s.left_margin);
        s.scroll_region_up(y, bot, n.max(1));
        s.cursor.x = left;
        s.cursor.pending_wrap = false;
    }

    /// ICH: insert blank cells, shifting the tail right.
    pub fn insert_chars(&mut self, n: usize) {
        let blank = self.blank();
        let cols = self.cols();
        let (y, x) = {
            let c = &self.screen().cursor;
            (c.y, c.x.min(cols - 1))
        };
        self.clean_wide_overwrite(y, x);
        self.screen_mut().insert_cells(y, x, n.max(1), blank);
        self.screen_mut().cursor.pending_wrap = false;
    }

    /// DCH: delete cells, shifting the tail left.
    pub fn delete_chars(&mut self, n: usize) {
        let blank = self.blank();
        let cols = self.cols();
        let (y, x) = {
            let c = &self.screen().cursor;
            (c.y, c.x.min(cols - 1))
        };
        self.clean_wide_overwrite(y, x);
        self.screen_mut().delete_cells(y, x, n.max(1), blank);
        self.screen_mut().cursor.pending_wrap = false;
    }

    // ------------------------------------------------------------------
    // Scrolling

    /// SU, and the LF-at-bottom path. Evicted rows reach scrollback only
    /// when the region spans the whole screen on the primary screen.
    pub fn scroll_up(&mut self, n: usize) {
        let n = n.max(1);
        let full_region = {
            let s = self.screen();
            s.scroll_top == 0
                && s.scroll_bottom == s.rows - 1
                && s.left_margin == 0
                && s.right_margin == s.cols - 1
        };
        if full_region && !self.active_is_alt {
            self.screen_mut().scroll_up_with_history(n);
        } else {
            let s = self.screen_mut();
            let (t, b) = (s.scroll_top, s.scroll_bottom);
            s.scroll_region_up(t, b, n);
        }
    }

    /// SD.
    pub fn scroll_down(&mut self, n: usize) {
        let s = self.screen_mut();
        let (t, b) = (s.scroll_top, s.scroll_bottom);
        s.scroll_region_down(t, b, n.max(1));
    }

    // ------------------------------------------------------------------
    // SGR

    /// Apply SGR parameters to the cursor style. Handles both semicolon
    /// and ITU T.416 colon-subparameter forms.
    pub fn sgr(&mut self, params: &CsiParams) {
        if params.len == 0 {
            self.screen_mut().cursor.style = Style::default();
            return;
        }

        let mut style = self.screen().cursor.style;
        let mut i = 0;
        while i < params.len {
            let code = params.params[i];
            match code {
                0 => style = Style::default(),
                1 => style.flags.insert(StyleFlags::BOLD),
                2 => style.flags.insert(StyleFlags::FAINT),
                3 => style.flags.insert(StyleFlags::ITALIC),
                4 => {
                    if i + 1 < params.len && params.is_sub[i + 1] {
                        style.underline = Underline::from_sgr(params.params[i + 1]);
                        i += 1;
                    } else {
                        style.underline = Underline::Single;
                    }
                }
                5 | 6 => style.flags.insert(StyleFlags::BLINK),
                7 => style.flags.insert(StyleFlags::INVERSE),
                8 => style.flags.insert(StyleFlags::INVISIBLE),
                9 => style.flags.insert(StyleFlags::STRIKETHROUGH),
                21 => style.underline = Underline::Double,
                22 => style.flags.remove(StyleFlags::BOLD | StyleFlags::FAINT),
                23 => style.flags.remove(StyleFlags::ITALIC),
                24 => style.underline = Underline::None,
                25 => style.flags.remove(StyleFlags::BLINK),
                27 => style.flags.remove(StyleFlags::INVERSE),
                28 => style.flags.remove(StyleFlags::INVISIBLE),
                29 => style.flags.remove(StyleFlags::STRIKETHROUGH),
                30..=37 => style.fg = Color::Indexed((code - 30) as u8),
                38 => {
                    if let Some((color, consumed)) = Self::parse_extended_color(params, i) {
                        style.fg = color;
                        i += consumed;
                    }
                }
                39 => style.fg = Color::Default,
                40..=47 => style.bg = Color::Indexed((code - 40) as u8),
                48 => {
                    if let Some((color, consumed)) = Self::parse_extended_color(params, i) {
                        style.bg = color;
                        i += consumed;
                    }
                }
                49 => style.bg = Color::Default,
                58 => {
                    if let Some((color, consumed)) = Self::parse_extended_color(params, i) {
                        style.underline_color = color;
                        i += consumed;
                    }
                }
                59 => style.underline_color = Color::Default,
                90..=97 => style.fg = Color::Indexed((code - 90 + 8) as u8),
                100..=107 => style.bg = Color::Indexed((code - 100 + 8) as u8),
                _ => {}
            }
            i += 1;
        }
        self.screen_mut().cursor.style = style;
    }

    /// Parse SGR 38/48/58 color forms, returning the color and how many
    /// extra parameters were consumed. Both `38;2;r;g;b` and the ITU T.416
    /// colon forms arrive as a flat parameter list (colon entries tagged in
    /// `is_sub`); the colon form may carry a color-space id before the
    /// channels.
    fn parse_extended_color(params: &CsiParams, i: usize) -> Option<(Color, usize)> {
        let p = &params.params;
        let n = params.len;
        if i + 1 >= n {
            return None;
        }
        match p[i + 1] {
            5 if i + 2 < n => Some((Color::Indexed(p[i + 2].clamp(0, 255) as u8), 2)),
            2 => {
                // Count the colon-subparameter run to spot the
                // 38:2:colorspace:r:g:b variant.
                let subs = (i + 1..n).take_while(|&j| params.is_sub[j]).count();
                let (first, consumed) = if params.is_sub[i + 1] && subs >= 5 {
                    (i + 3, 5)
                } else {
                    (i + 2, 4)
                };
                if first + 3 > n {
                    return None;
                }
                Some((
                    Color::Rgb(
                        p[first].clamp(0, 255) as u8,
                        p[first + 1].clamp(0, 255) as u8,
                        p[first + 2].clamp(0, 255) as u8,
                    ),
                    consumed,
                ))
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Modes

    /// DECSET/DECRST dispatch for one mode number.
    pub fn set_private_mode(&mut self, mode: i32, enabled: bool) {
        match mode {
            1 => self.modes.set(Modes::APP_CURSOR, enabled),
            3 => self.set_deccolm(enabled),
            6 => {
                self.modes.set(Modes::ORIGIN, enabled);
                self.cursor_to(1, 1);
            }
            7 => {
                self.modes.set(Modes::AUTOWRAP, enabled);
                if !enabled {
                    self.screen_mut().cursor.pending_wrap = false;
                }
            }
            9 => {
                self.mouse_tracking = if enabled {
                    MouseTracking::X10
                } else {
                    MouseTracking::None
                }
            }
            12 => self.modes.set(Modes::CURSOR_BLINK, enabled),
            25 => self.modes.set(Modes::CURSOR_VISIBLE, enabled),
            45 => self.modes.set(Modes::REVERSE_WRAP, enabled),
            47 => {
                if enabled {
                    self.enter_alt_screen(false, false);
                } else {
                    self.exit_alt_screen(false);
                }
            }
            66 => self.modes.set(Modes::APP_KEYPAD, enabled),
            69 => {
                self.modes.set(Modes::LR_MARGINS, enabled);
                if !enabled {
                    let s = self.screen_mut();
                    s.left_margin = 0;
                    s.right_margin = s.cols - 1;
                }
            }
            80 => self.modes.set(Modes::SIXEL_SCROLL, enabled),
            1000 => {
                self.mouse_tracking = if enabled {
                    MouseTracking::Normal
                } else {
                    MouseTracking::None
                }
            }
            1002 => {
                self.mouse_tracking = if enabled {
                    MouseTracking::ButtonEvent
                } else {
                    MouseTracking::None
                }
            }
            1003 => {
                self.mouse_tracking = if enabled {
                    MouseTracking::AnyEvent
                } else {
                    MouseTracking::None
                }
            }
            1004 => self.modes.set(Modes::FOCUS_EVENTS, enabled),
            1005 => {
                self.mouse_encoding = if enabled {
                    MouseEncoding::Utf8
                } else {
                    MouseEncoding::X10
                }
            }
            1006 => {
                self.mouse_encoding = if enabled {
                    MouseEncoding::Sgr
                } else {
                    MouseEncoding::X10
                }
            }
            1015 => {
                self.mouse_encoding = if enabled {
                    MouseEncoding::Urxvt
                } else {
                    MouseEncoding::X10
                }
            }
            1047 => {
                if enabled {
                    self.enter_alt_screen(false, true);
                } else {
                    self.exit_alt_screen(false);
                }
            }
            1048 => {
                if enabled {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enabled {
                    self.enter_alt_screen(true, true);
                } else {
                    self.exit_alt_screen(true);
                }
            }
            2004 => self.modes.set(Modes::BRACKETED_PASTE, enabled),
            2026 => self.modes.set(Modes::SYNCHRONIZED, enabled),
            _ => log::debug!(
                "unhandled private mode {} {}",
                mode,
                if enabled { "set" } else { "reset" }
            ),
        }
        self.dirty = true;
    }

    /// Current value of a private mode, for XTSAVE and DECRQM-style uses.
    pub fn private_mode(&self, mode: i32) -> bool {
        match mode {
            1 => self.modes.contains(Modes::APP_CURSOR),
            6 => self.modes.contains(Modes::ORIGIN),
            7 => self.modes.contains(Modes::AUTOWRAP),
            9 => self.mouse_tracking == MouseTracking::X10,
            12 => self.modes.contains(Modes::CURSOR_BLINK),
            25 => self.modes.contains(Modes::CURSOR_VISIBLE),
            45 => self.modes.contains(Modes::REVERSE_WRAP),
            47 | 1047 | 1049 => self.active_is_alt,
            66 => self.modes.contains(Modes::APP_KEYPAD),
            69 => self.modes.contains(Modes::LR_MARGINS),
            80 => self.modes.contains(Modes::SIXEL_SCROLL),
            1000 => self.mouse_tracking == MouseTracking::Normal,
            1002 => self.mouse_tracking == MouseTracking::ButtonEvent,
            1003 => self.mouse_tracking == MouseTracking::AnyEvent,
            1004 => self.modes.contains(Modes::FOCUS_EVENTS),
            1005 => self.mouse_encoding == MouseEncoding::Utf8,
            1006 => self.mouse_encoding == MouseEncoding::Sgr,
            1015 => self.mouse_encoding == MouseEncoding::Urxvt,
            2004 => self.modes.contains(Modes::BRACKETED_PASTE),
            2026 => self.modes.contains(Modes::SYNCHRONIZED),
            _ => false,
        }
    }

    /// XTSAVE (CSI ? Ps s).
    pub fn save_private_mode(&mut self, mode: i32) {
        let value = self.private_mode(mode);
        self.saved_modes.insert(mode as u16, value);
    }

    /// XTRESTORE (CSI ? Ps r).
    pub fn restore_private_mode(&mut self, mode: i32) {
        if let Some(&value) = self.saved_modes.get(&(mode as u16)) {
            self.set_private_mode(mode, value);
        }
    }

    /// DECCOLM: 132/80 column switch; clears the screen and resets the
    /// scroll region as the hardware did.
    fn set_deccolm(&mut self, wide: bool) {
        let cols = if wide { 132 } else { 80 };
        let rows = self.rows();
        self.primary.resize(cols, rows);
        self.alt.resize(cols, rows);
        self.erase_display(2, false);
        let s = self.screen_mut();
        s.scroll_top = 0;
        s.scroll_bottom = s.rows - 1;
        s.cursor.x = 0;
        s.cursor.y = 0;
        s.cursor.pending_wrap = false;
    }

    // ------------------------------------------------------------------
    // Save/restore cursor, regions, charsets

    /// DECSC.
    pub fn save_cursor(&mut self) {
        let origin = self.modes.contains(Modes::ORIGIN);
        let s = self.screen_mut();
        s.saved_cursor = Some(SavedCursor {
            x: s.cursor.x,
            y: s.cursor.y,
            pending_wrap: s.cursor.pending_wrap,
            style: s.cursor.style,
            origin,
            charsets: s.charsets,
        });
    }

    /// DECRC. Restoring with no prior save resets to defaults, like XTerm.
    pub fn restore_cursor(&mut self) {
        let saved = self.screen().saved_cursor.clone().unwrap_or(SavedCursor {
            x: 0,
            y: 0,
            pending_wrap: false,
            style: Style::default(),
            origin: false,
            charsets: CharsetState::default(),
        });
        self.modes.set(Modes::ORIGIN, saved.origin);
        let s = self.screen_mut();
        s.cursor.y = saved.y.min(s.rows - 1);
        if saved.pending_wrap {
            // A pending wrap parks the cursor one past the wrap column,
            // which is right_margin + 1 under DECSLRM and may be well
            // short of cols. Keep the saved representation, clamped to
            // the current width.
            s.cursor.x = saved.x.min(s.cols);
            s.cursor.pending_wrap = true;
        } else {
            s.cursor.x = saved.x.min(s.cols - 1);
            s.cursor.pending_wrap = false;
        }
        s.cursor.style = saved.style;
        s.charsets = saved.charsets;
    }

    /// DECSTBM. Parameters are 1-based; 0 means default.
    pub fn set_scroll_region(&mut self, top: i32, bottom: i32) {
        let rows = self.rows();
        let origin = self.modes.contains(Modes::ORIGIN);
        let s = self.screen_mut();
        let top = (top.max(1) as usize - 1).min(rows - 1);
        let bottom = if bottom <= 0 {
            rows - 1
        } else {
            (bottom as usize - 1).min(rows - 1)
        };
        // A degenerate region is ignored.
        if top >= bottom {
            return;
        }
        s.scroll_top = top;
        s.scroll_bottom = bottom;
        s.cursor.y = if origin { s.scroll_top } else { 0 };
        s.cursor.x = if origin { s.left_margin } else { 0 };
        s.cursor.pending_wrap = false;
    }

    /// DECSLRM, only honored while DECLRMM is enabled.
    pub fn set_lr_margins(&mut self, left: i32, right: i32) {
        if !self.modes.contains(Modes::LR_MARGINS) {
            return;
        }
        let cols = self.cols();
        let origin = self.modes.contains(Modes::ORIGIN);
        let s = self.screen_mut();
        let left = (left.max(1) as usize - 1).min(cols - 1);
        let right = if right <= 0 {
            cols - 1
        } else {
            (right as usize - 1).min(cols - 1)
        };
        if left >= right {
            return;
        }
        s.left_margin = left;
        s.right_margin = right;
        s.cursor.y = if origin { s.scroll_top } else { 0 };
        s.cursor.x = if origin { s.left_margin } else { 0 };
        s.cursor.pending_wrap = false;
    }

    pub fn designate_charset(&mut self, slot: u8, final_byte: u8) {
        self.screen_mut()
            .charsets
            .designate(slot, Charset::from_final(final_byte));
    }

    pub fn invoke_charset(&mut self, slot: u8, gr: bool) {
        self.screen_mut().charsets.invoke(slot, gr);
    }

    pub fn single_shift(&mut self, slot: u8) {
        self.screen_mut().charsets.single_shift(slot);
    }

    /// HTS.
    pub fn set_tab_stop(&mut self) {
        let s = self.screen_mut();
        let x = s.cursor.x.min(s.cols - 1);
        s.set_tab(x);
    }

    /// TBC: 0 clears at the cursor, 3 clears all.
    pub fn clear_tabs(&mut self, mode: i32) {
        let s = self.screen_mut();
        match mode {
            0 => {
                let x = s.cursor.x.min(s.cols - 1);
                s.clear_tab(x);
            }
            3 => s.clear_all_tabs(),
            _ => {}
        }
    }

    /// DECSCA: set/clear the protection attribute for new cells.
    pub fn set_protection(&mut self, protect: bool) {
        self.protect_cells = protect;
    }

    /// DECALN: fill the screen with 'E' and reset margins.
    pub fn screen_alignment(&mut self) {
        let rows = self.rows();
        let cols = self.cols();
        {
            let s = self.screen_mut();
            s.scroll_top = 0;
            s.scroll_bottom = rows - 1;
            s.left_margin = 0;
            s.right_margin = cols - 1;
            s.cursor.x = 0;
            s.cursor.y = 0;
            s.cursor.pending_wrap = false;
        }
        for y in 0..rows {
            for x in 0..cols {
                self.screen_mut().set_cell(
                    y,
                    x,
                    Cell {
                        content: CellContent::Codepoint('E'),
                        style_id: StyleId::DEFAULT,
                        wide: Wide::Narrow,
                        flags: CellFlags::empty(),
                    },
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Alt screen

    /// DECSET 47/1047/1049 variants.
    pub fn enter_alt_screen(&mut self, save_cursor: bool, clear: bool) {
        if self.active_is_alt {
            return;
        }
        if save_cursor {
            self.save_cursor();
        }
        // The alt screen starts from the primary cursor so apps that skip
        // homing render where they expect.
        self.alt.cursor = self.primary.cursor.clone();
        self.alt.charsets = self.primary.charsets;
        self.active_is_alt = true;
        if clear {
            self.erase_display(2, false);
        }
        self.screen_mut().mark_all_dirty();
        log::debug!("entered alt screen (save={} clear={})", save_cursor, clear);
    }

    pub fn exit_alt_screen(&mut self, restore_cursor: bool) {
        if !self.active_is_alt {
            return;
        }
        self.active_is_alt = false;
        if restore_cursor {
            self.restore_cursor();
        }
        self.screen_mut().mark_all_dirty();
        log::debug!("left alt screen");
    }

    // ------------------------------------------------------------------
    // Reset

    /// DECSTR: soft reset.
    pub fn soft_reset(&mut self) {
        self.modes = Modes::default();
        self.mouse_tracking = MouseTracking::None;
        self.mouse_encoding = MouseEncoding::X10;
        self.protect_cells = false;
        let s = self.screen_mut();
        s.cursor.style = Style::default();
        s.cursor.pending_wrap = false;
        s.scroll_top = 0;
        s.scroll_bottom = s.rows - 1;
        s.left_margin = 0;
        s.right_margin = s.cols - 1;
        s.charsets = CharsetState::default();
        s.saved_cursor = None;
    }

    /// RIS: full reset.
    pub fn full_reset(&mut self) {
        if self.active_is_alt {
            self.exit_alt_screen(false);
        }
        self.soft_reset();
        self.saved_modes.clear();
        self.cursor_shape = CursorShape::default();
        self.palette = Palette::default();
        self.images.clear();
        self.current_hyperlink = None;
        self.last_char = None;
        let cols = self.cols();
        let rows = self.rows();
        for y in 0..rows {
            self.screen_mut().fill_row(y, 0, cols, Cell::default(), false);
        }
        let s = self.screen_mut();
        s.cursor.x = 0;
        s.cursor.y = 0;
        s.default_tabs();
        s.scroll_offset = 0;
        s.set_selection(None);
        log::debug!("full terminal reset");
    }

    // ------------------------------------------------------------------
    // Resize and viewport

    /// Resize both screens; the alt screen is cleared, per its contract.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        if cols == self.cols() && rows == self.rows() {
            return;
        }
        self.primary.resize(cols, rows);
        self.alt.resize(cols, rows);
        // Alt screen holds no scrollback and resizes cleared.
        for y in 0..self.alt.rows {
            self.alt.fill_row(y, 0, cols, Cell::default(), false);
        }
        self.dirty = true;
    }

    /// Move the viewport by `delta` rows (positive = into history).
    pub fn scroll_viewport(&mut self, delta: i32) {
        let s = self.screen_mut();
        let max = s.scrollback_len();
        let new = if delta >= 0 {
            (s.scroll_offset + delta as usize).min(max)
        } else {
            s.scroll_offset.saturating_sub((-delta) as usize)
        };
        if new != s.scroll_offset {
            s.scroll_offset = new;
            s.mark_all_dirty();
        }
    }

    pub fn scroll_viewport_to_top(&mut self) {
        let s = self.screen_mut();
        s.scroll_offset = s.scrollback_len();
        s.mark_all_dirty();
    }

    pub fn scroll_viewport_to_bottom(&mut self) {
        let s = self.screen_mut();
        if s.scroll_offset != 0 {
            s.scroll_offset = 0;
            s.mark_all_dirty();
        }
    }

    /// Jump the viewport to the `n`-th prompt start away (sign = direction).
    pub fn jump_to_prompt(&mut self, n: i32) {
        if n == 0 {
            return;
        }
        let dir = n.signum();
        let mut remaining = n.unsigned_abs();
        let s = self.screen();
        let mut abs = s.abs_of(0).saturating_sub(s.scroll_offset as u64);
        while remaining > 0 {
            match self.screen().find_prompt(abs, dir) {
                Some(found) => abs = found,
                None => break,
            }
            remaining -= 1;
        }
        let s = self.screen_mut();
        let top_abs = s.abs_of(0);
        let offset = top_abs.saturating_sub(abs) as usize;
        s.scroll_offset = offset.min(s.scrollback_len());
        s.mark_all_dirty();
    }

    /// OSC 133 semantic prompt marker.
    pub fn mark_prompt(&mut self, marker: SemanticPrompt) {
        self.screen_mut().mark_prompt(marker);
    }

    /// OSC 8: set (or clear, with `None`) the active hyperlink.
    pub fn set_hyperlink(&mut self, id: Option<&str>, uri: Option<&str>) {
        self.current_hyperlink = match uri {
            Some(uri) if !uri.is_empty() => Some(self.hyperlinks.intern(id, uri)),
            _ => None,
        };
    }

    // ------------------------------------------------------------------
    // Title

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_owned();
        self.events
            .push(TerminalEvent::TitleChanged(title.to_owned()));
    }

    /// XTWINOPS 22: push the title onto the stack.
    pub fn push_title(&mut self) {
        self.title_stack.push(self.title.clone());
        // XTerm caps the title stack depth.
        if self.title_stack.len() > 10 {
            self.title_stack.remove(0);
        }
    }

    /// XTWINOPS 23: pop the stack into the live title.
    pub fn pop_title(&mut self) {
        if let Some(title) = self.title_stack.pop() {
            self.set_title(&title.clone());
        }
    }

    // ------------------------------------------------------------------
    // Selection

    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.screen_mut().set_selection(selection);
    }

    // ------------------------------------------------------------------
    // Mouse reporting

    /// Encode a mouse event per the active tracking mode and encoding.
    /// Returns an empty vec when the event should not be reported.
    pub fn encode_mouse(
        &self,
        button: u8,
        col: u16,
        row: u16,
        pressed: bool,
        is_motion: bool,
        modifiers: u8,
    ) -> Vec<u8> {
        match self.mouse_tracking {
            MouseTracking::None => return Vec::new(),
            MouseTracking::X10 => {
                if !pressed || is_motion {
                    return Vec::new();
                }
            }
            MouseTracking::Normal => {
                if is_motion {
                    return Vec::new();
                }
            }
            MouseTracking::ButtonEvent | MouseTracking::AnyEvent => {}
        }

        let mut cb = button;
        if !pressed && !is_motion && self.mouse_encoding != MouseEncoding::Sgr {
            cb = 3;
        }
        cb |= modifiers << 2;
        if is_motion {
            cb |= 32;
        }

        let col = col.saturating_add(1);
        let row = row.saturating_add(1);

        match self.mouse_encoding {
            MouseEncoding::X10 => {
                let cb = (cb + 32).min(255);
                let cx = ((col as u8).min(223) + 32).min(255);
                let cy = ((row as u8).min(223) + 32).min(255);
                vec![0x1b, b'[', b'M', cb, cx, cy]
            }
            MouseEncoding::Utf8 => {
                let cb = cb + 32;
                let cx = (col as u8).saturating_add(32);
                let cy = (row as u8).saturating_add(32);
                vec![0x1b, b'[', b'M', cb, cx, cy]
            }
            MouseEncoding::Sgr => {
                let suffix = if pressed { 'M' } else { 'm' };
                format!("\x1b[<{};{};{}{}", cb, col, row, suffix).into_bytes()
            }
            MouseEncoding::Urxvt => {
                let cb = cb + 32;
                format!("\x1b[{};{};{}M", cb, col, row).into_bytes()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(cols: usize, rows: usize) -> Terminal {
        Terminal::new(cols, rows, 100)
    }

    fn feed_str(t: &mut Terminal, s: &str) {
        let cps: Vec<u32> = s.chars().map(|c| c as u32).collect();
        t.input_text(&cps);
    }

    fn row_text(t: &Terminal, y: usize) -> String {
        t.screen()
            .row(y)
            .cells
            .iter()
            .map(|c| c.codepoint().unwrap_or(' '))
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn plain_text_lines() {
        let mut t = term(20, 4);
        feed_str(&mut t, "hello\r\nworld");
        assert_eq!(row_text(&t, 0), "hello");
        assert_eq!(row_text(&t, 1), "world");
        assert_eq!((t.screen().cursor.x, t.screen().cursor.y), (5, 1));
    }

    #[test]
    fn backspace_overwrites() {
        let mut t = term(20, 2);
        feed_str(&mut t, "hello\u{8}y");
        assert_eq!(row_text(&t, 0), "helly");
        assert_eq!(t.screen().cursor.x, 5);
    }

    #[test]
    fn deferred_wrap() {
        let mut t = term(5, 3);
        feed_str(&mut t, "abcde");
        // Cursor parked past the edge, wrap not yet performed.
        assert_eq!(t.screen().cursor.x, 5);
        assert!(t.screen().cursor.pending_wrap);
        assert!(!t.screen().row(0).is_wrapped());

        feed_str(&mut t, "f");
        assert_eq!(row_text(&t, 0), "abcde");
        assert!(t.screen().row(0).is_wrapped());
        assert_eq!(row_text(&t, 1), "f");
        assert_eq!((t.screen().cursor.x, t.screen().cursor.y), (1, 1));
    }

    #[test]
    fn wrap_disabled_overwrites_last_column() {
        let mut t = term(5, 2);
        t.set_private_mode(7, false);
        feed_str(&mut t, "abcdefg");
        assert_eq!(row_text(&t, 0), "abcdg");
        assert_eq!(t.screen().cursor.y, 0);
    }

    #[test]
    fn wide_char_places_head_and_tail() {
        let mut t = term(10, 2);
        feed_str(&mut t, "中");
        let head = t.screen().cell(0, 0);
        let tail = t.screen().cell(0, 1);
        assert_eq!(head.codepoint(), Some('中'));
        assert_eq!(head.wide, Wide::WideHead);
        assert_eq!(tail.wide, Wide::WideTail);
        assert_eq!(t.screen().cursor.x, 2);
    }

    #[test]
    fn wide_char_at_last_column_gets_spacer() {
        let mut t = term(4, 2);
        feed_str(&mut t, "abc中");
        assert_eq!(t.screen().cell(0, 3).wide, Wide::SpacerHead);
        assert!(t.screen().row(0).is_wrapped());
        let head = t.screen().cell(1, 0);
        assert_eq!(head.codepoint(), Some('中'));
        assert_eq!(head.wide, Wide::WideHead);
    }

    #[test]
    fn overwriting_wide_tail_clears_head() {
        let mut t = term(10, 2);
        feed_str(&mut t, "中");
        t.cursor_to(1, 2);
        feed_str(&mut t, "x");
        assert_eq!(t.screen().cell(0, 0).content, CellContent::Empty);
        assert_eq!(t.screen().cell(0, 1).codepoint(), Some('x'));
    }

    #[test]
    fn combining_mark_attaches_to_previous_cell() {
        let mut t = term(10, 2);
        feed_str(&mut t, "e\u{301}");
        let row = t.screen().row(0);
        assert_eq!(row.cells[0].codepoint(), Some('e'));
        assert!(row.cells[0].flags.contains(CellFlags::GRAPHEME));
        assert_eq!(row.grapheme(0), Some(&['\u{301}'][..]));
        assert_eq!(t.screen().cursor.x, 1);
    }

    #[test]
    fn lf_at_region_bottom_scrolls_region_only() {
        let mut t = term(10, 4);
        feed_str(&mut t, "aaa\r\nbbb\r\nccc\r\nddd");
        t.set_scroll_region(2, 3);
        t.cursor_to(3, 1);
        t.linefeed();
        // Region rows 1..=2 scrolled; rows 0 and 3 pinned.
        assert_eq!(row_text(&t, 0), "aaa");
        assert_eq!(row_text(&t, 1), "ccc");
        assert_eq!(row_text(&t, 2), "");
        assert_eq!(row_text(&t, 3), "ddd");
        assert_eq!(t.screen().scrollback_len(), 0);
    }

    #[test]
    fn full_screen_lf_feeds_scrollback() {
        let mut t = term(10, 2);
        feed_str(&mut t, "one\r\ntwo\r\n");
        assert_eq!(t.screen().scrollback_len(), 1);
        assert_eq!(row_text(&t, 0), "two");
    }

    #[test]
    fn reverse_index_scrolls_down_at_top() {
        let mut t = term(10, 3);
        feed_str(&mut t, "top");
        t.cursor_to(1, 1);
        t.reverse_index();
        assert_eq!(row_text(&t, 0), "");
        assert_eq!(row_text(&t, 1), "top");
    }

    #[test]
    fn origin_mode_is_region_relative() {
        let mut t = term(10, 6);
        t.set_scroll_region(3, 5);
        t.set_private_mode(6, true);
        // Home under DECOM is the region origin.
        assert_eq!(t.screen().cursor.y, 2);
        t.cursor_to(2, 4);
        assert_eq!((t.screen().cursor.x, t.screen().cursor.y), (3, 3));
        // Addressing past the region bottom saturates at the region.
        t.cursor_to(99, 1);
        assert_eq!(t.screen().cursor.y, 4);
    }

    #[test]
    fn save_restore_cursor_round_trip() {
        let mut t = term(10, 4);
        t.sgr(&sgr_params(&[1, 31]));
        t.designate_charset(0, b'0');
        t.set_private_mode(6, true);
        t.cursor_to(2, 3);
        let style = t.screen().cursor.style;
        let charsets = t.screen().charsets;
        t.save_cursor();

        t.set_private_mode(6, false);
        t.designate_charset(0, b'B');
        t.sgr(&sgr_params(&[0]));
        t.cursor_to(4, 9);

        t.restore_cursor();
        assert_eq!((t.screen().cursor.x, t.screen().cursor.y), (2, 1));
        assert_eq!(t.screen().cursor.style, style);
        assert_eq!(t.screen().charsets, charsets);
        assert!(t.modes.contains(Modes::ORIGIN));
    }

    #[test]
    fn restore_cursor_keeps_pending_wrap_with_margins() {
        let mut t = term(10, 3);
        t.set_private_mode(69, true);
        t.set_lr_margins(1, 5); // right margin = column 4
        feed_str(&mut t, "abcde");
        assert!(t.screen().cursor.pending_wrap);
        assert_eq!(t.screen().cursor.x, 5);

        t.save_cursor();
        t.cursor_to(1, 1);
        assert!(!t.screen().cursor.pending_wrap);
        t.restore_cursor();
        // The saved wrap state survives even though x < cols.
        assert!(t.screen().cursor.pending_wrap);
        assert_eq!(t.screen().cursor.x, 5);

        // The next print performs the deferred wrap at the margin.
        feed_str(&mut t, "f");
        assert!(t.screen().row(0).is_wrapped());
        assert_eq!(t.screen().cell(1, 0).codepoint(), Some('f'));
        assert_eq!((t.screen().cursor.x, t.screen().cursor.y), (1, 1));
    }

    #[test]
    fn alt_screen_1049_round_trip() {
        let mut t = term(10, 3);
        feed_str(&mut t, "A");
        let saved_x = t.screen().cursor.x;

        t.set_private_mode(1049, true);
        assert!(t.is_alt_screen());
        t.cursor_to(1, 1);
        feed_str(&mut t, "B");
        assert_eq!(row_text(&t, 0), "B");

        t.set_private_mode(1049, false);
        assert!(!t.is_alt_screen());
        assert_eq!(row_text(&t, 0), "A");
        assert_eq!(t.screen().cursor.x, saved_x);
    }

    #[test]
    fn erase_line_modes() {
        let mut t = term(6, 2);
        feed_str(&mut t, "abcdef");
        t.cursor_to(1, 3);
        t.erase_line(0, false);
        assert_eq!(row_text(&t, 0), "ab");
        feed_str(&mut t, "cdef");
        t.cursor_to(1, 3);
        t.erase_line(1, false);
        assert_eq!(row_text(&t, 0), "   def");
    }

    #[test]
    fn selective_erase_skips_protected() {
        let mut t = term(8, 2);
        feed_str(&mut t, "ab");
        t.set_protection(true);
        feed_str(&mut t, "cd");
        t.set_protection(false);
        feed_str(&mut t, "ef");
        t.cursor_to(1, 1);
        t.erase_line(2, true);
        assert_eq!(row_text(&t, 0), "  cd");
        // Plain EL ignores protection entirely.
        t.erase_line(2, false);
        assert_eq!(row_text(&t, 0), "");
    }

    #[test]
    fn erase_display_clears_and_resets_viewport() {
        let mut t = term(5, 2);
        feed_str(&mut t, "11111\r\n22222\r\n33333");
        t.screen_mut().scroll_offset = 1;
        t.erase_display(2, false);
        assert_eq!(row_text(&t, 0), "");
        assert_eq!(row_text(&t, 1), "");
        assert_eq!(t.screen().scroll_offset, 0);
        // Scrollback preserved by ED 2, dropped by ED 3.
        assert!(t.screen().scrollback_len() > 0);
        t.erase_display(3, false);
        assert_eq!(t.screen().scrollback_len(), 0);
    }

    #[test]
    fn insert_delete_lines_respect_region() {
        let mut t = term(5, 4);
        feed_str(&mut t, "a\r\nb\r\nc\r\nd");
        t.set_scroll_region(1, 3);
        t.cursor_to(2, 1);
        t.insert_lines(1);
        assert_eq!(row_text(&t, 0), "a");
        assert_eq!(row_text(&t, 1), "");
        assert_eq!(row_text(&t, 2), "b");
        assert_eq!(row_text(&t, 3), "d");

        t.delete_lines(1);
        assert_eq!(row_text(&t, 1), "b");
        assert_eq!(row_text(&t, 2), "");
        assert_eq!(row_text(&t, 3), "d");
    }

    #[test]
    fn sgr_stacking_and_reset() {
        let mut t = term(5, 2);
        t.sgr(&sgr_params(&[1, 4, 31]));
        let style = t.screen().cursor.style;
        assert!(style.flags.contains(StyleFlags::BOLD));
        assert_eq!(style.underline, Underline::Single);
        assert_eq!(style.fg, Color::Indexed(1));

        t.sgr(&sgr_params(&[22]));
        assert!(!t.screen().cursor.style.flags.contains(StyleFlags::BOLD));

        t.sgr(&sgr_params(&[0]));
        assert_eq!(t.screen().cursor.style, Style::default());
    }

    #[test]
    fn sgr_truecolor_and_256() {
        let mut t = term(5, 2);
        t.sgr(&sgr_params(&[38, 2, 10, 20, 30, 48, 5, 200]));
        let style = t.screen().cursor.style;
        assert_eq!(style.fg, Color::Rgb(10, 20, 30));
        assert_eq!(style.bg, Color::Indexed(200));
    }

    #[test]
    fn styles_are_interned_and_released() {
        let mut t = term(10, 2);
        t.sgr(&sgr_params(&[31]));
        feed_str(&mut t, "xx");
        let id = t.screen().cell(0, 0).style_id;
        let (page, _) = t.screen().row_loc(0);
        assert_eq!(t.screen().pages().page(page).unwrap().styles.ref_count(id), 2);

        // Overwriting with plain text releases both references.
        t.sgr(&sgr_params(&[0]));
        t.cursor_to(1, 1);
        feed_str(&mut t, "yy");
        assert_eq!(t.screen().pages().page(page).unwrap().styles.ref_count(id), 0);
    }

    #[test]
    fn rep_repeats_last_char() {
        let mut t = term(10, 2);
        feed_str(&mut t, "x");
        t.repeat_last(3);
        assert_eq!(row_text(&t, 0), "xxxx");
    }

    #[test]
    fn tab_stops_and_tbc() {
        let mut t = term(24, 2);
        t.tab_forward(1);
        assert_eq!(t.screen().cursor.x, 8);
        t.cursor_to(1, 5);
        t.set_tab_stop();
        t.cursor_to(1, 1);
        t.tab_forward(1);
        assert_eq!(t.screen().cursor.x, 4);
        t.clear_tabs(3);
        t.cursor_to(1, 1);
        t.tab_forward(1);
        assert_eq!(t.screen().cursor.x, 23);
    }

    #[test]
    fn decaln_fills_screen() {
        let mut t = term(4, 2);
        t.screen_alignment();
        assert_eq!(row_text(&t, 0), "EEEE");
        assert_eq!(row_text(&t, 1), "EEEE");
    }

    #[test]
    fn deccolm_switches_width_and_clears() {
        let mut t = term(100, 3);
        feed_str(&mut t, "junk");
        t.set_private_mode(3, true);
        assert_eq!(t.cols(), 132);
        assert_eq!(row_text(&t, 0), "");
        t.set_private_mode(3, false);
        assert_eq!(t.cols(), 80);
    }

    #[test]
    fn print_reencode_round_trip() {
        let mut t = term(10, 2);
        let input = "héllo wo";
        feed_str(&mut t, input);
        let encoded: String = t.screen().row(0).cells[..8]
            .iter()
            .filter_map(|c| c.codepoint())
            .collect();
        let mut t2 = term(10, 2);
        feed_str(&mut t2, &encoded);
        assert_eq!(row_text(&t, 0), row_text(&t2, 0));
    }

    #[test]
    fn wide_pair_invariant_holds_after_mutations() {
        let mut t = term(8, 3);
        feed_str(&mut t, "中中中x");
        t.cursor_to(1, 2);
        feed_str(&mut t, "y");
        t.erase_chars(1);
        for y in 0..t.rows() {
            let row = t.screen().row(y);
            for x in 0..row.len() {
                if row.cells[x].is_wide_head() {
                    assert!(x + 1 < row.len(), "head at last column");
                    assert!(row.cells[x + 1].is_wide_tail());
                }
                if row.cells[x].is_wide_tail() {
                    assert!(x > 0 && row.cells[x - 1].is_wide_head());
                }
            }
        }
    }

    #[test]
    fn cursor_invariant_pending_wrap() {
        let mut t = term(5, 2);
        feed_str(&mut t, "abcd");
        assert!(t.screen().cursor.x < 5 && !t.screen().cursor.pending_wrap);
        feed_str(&mut t, "e");
        assert!(t.screen().cursor.x == 5 && t.screen().cursor.pending_wrap);
        t.carriage_return();
        assert!(t.screen().cursor.x == 0 && !t.screen().cursor.pending_wrap);
    }

    // Build CsiParams the way the parser would deliver them.
    fn sgr_params(values: &[i32]) -> CsiParams {
        let mut p = CsiParams::default();
        for (i, &v) in values.iter().enumerate() {
            p.params[i] = v;
        }
        p.len = values.len();
        p.final_byte = b'm';
        p
    }
}
