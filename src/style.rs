//! Interned, reference-counted cell styles.
//!
//! Most cells share a handful of styles, so cells carry a 16-bit id into a
//! per-page style table instead of inline colors. Identical styles share an
//! id; a style's slot is reclaimed when the last cell bearing it is
//! overwritten. Id 0 is the immortal default style.

use rustc_hash::FxHashMap;

use crate::color::Color;

/// Identifier of an interned style. Id 0 is always the default style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct StyleId(pub u16);

impl StyleId {
    pub const DEFAULT: StyleId = StyleId(0);

    #[inline]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }
}

/// Underline rendition (SGR 4, including 4:x subparameter forms).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Underline {
    #[default]
    None = 0,
    Single = 1,
    Double = 2,
    Curly = 3,
    Dotted = 4,
    Dashed = 5,
}

impl Underline {
    /// Map an SGR 4:x subparameter value.
    pub fn from_sgr(value: i32) -> Self {
        match value {
            1 => Underline::Single,
            2 => Underline::Double,
            3 => Underline::Curly,
            4 => Underline::Dotted,
            5 => Underline::Dashed,
            _ => Underline::None,
        }
    }
}

bitflags::bitflags! {
    /// Boolean style attributes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct StyleFlags: u16 {
        const BOLD          = 1 << 0;
        const FAINT         = 1 << 1;
        const ITALIC        = 1 << 2;
        const BLINK         = 1 << 3;
        const INVERSE       = 1 << 4;
        const INVISIBLE     = 1 << 5;
        const STRIKETHROUGH = 1 << 6;
    }
}

/// A cell style: colors plus attributes. Kept at 16 bytes; this struct is
/// hashed on every intern so it stays plain data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Style {
    pub fg: Color,
    pub bg: Color,
    /// Underline color; `Color::Default` means "follow fg".
    pub underline_color: Color,
    pub underline: Underline,
    pub flags: StyleFlags,
}

impl Style {
    #[inline]
    pub fn is_default(&self) -> bool {
        *self == Style::default()
    }
}

struct Slot {
    style: Style,
    refs: u32,
}

/// Interned style set with per-style reference counts.
///
/// `intern` returns an existing id (bumping its refcount) or claims a free
/// slot. `release` drops a reference and reclaims the slot at zero so ids
/// stay within u16 even under heavy churn. The table is sized so that every
/// cell of a page could in principle carry a distinct id.
pub struct StyleTable {
    slots: Vec<Option<Slot>>,
    lookup: FxHashMap<Style, u16>,
    free: Vec<u16>,
}

impl Default for StyleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleTable {
    pub fn new() -> Self {
        // Slot 0 is the default style and is never released.
        let mut slots = Vec::with_capacity(64);
        slots.push(Some(Slot {
            style: Style::default(),
            refs: 1,
        }));
        Self {
            slots,
            lookup: FxHashMap::default(),
            free: Vec::new(),
        }
    }

    /// Intern a style, returning its id with one reference claimed.
    ///
    /// Returns `None` when the table is full (u16::MAX live styles); the
    /// caller degrades to the default style.
    pub fn intern(&mut self, style: Style) -> Option<StyleId> {
        if style.is_default() {
            return Some(StyleId::DEFAULT);
        }
        if let Some(&idx) = self.lookup.get(&style) {
            let slot = self.slots[idx as usize].as_mut().unwrap();
            slot.refs = slot.refs.saturating_add(1);
            return Some(StyleId(idx));
        }

        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(Slot { style, refs: 1 });
            idx
        } else {
            if self.slots.len() > u16::MAX as usize {
                return None;
            }
            self.slots.push(Some(Slot { style, refs: 1 }));
            (self.slots.len() - 1) as u16
        };
        self.lookup.insert(style, idx);
        Some(StyleId(idx))
    }

    /// Add a reference to an existing style (a cell copied the id).
    #[inline]
    pub fn add_ref(&mut self, id: StyleId) {
        if id.is_default() {
            return;
        }
        if let Some(Some(slot)) = self.slots.get_mut(id.0 as usize) {
            slot.refs = slot.refs.saturating_add(1);
        }
    }

    /// Release a reference; the slot is reclaimed when the count hits zero.
    pub fn release(&mut self, id: StyleId) {
        if id.is_default() {
            return;
        }
        let idx = id.0 as usize;
        let Some(Some(slot)) = self.slots.get_mut(idx) else {
            return;
        };
        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 {
            let style = slot.style;
            self.slots[idx] = None;
            self.lookup.remove(&style);
            self.free.push(id.0);
        }
    }

    /// Look up a style by id. Unknown ids resolve to the default style.
    #[inline]
    pub fn get(&self, id: StyleId) -> Style {
        match self.slots.get(id.0 as usize) {
            Some(Some(slot)) => slot.style,
            _ => Style::default(),
        }
    }

    /// Current reference count of a style (0 for free slots).
    pub fn ref_count(&self, id: StyleId) -> u32 {
        match self.slots.get(id.0 as usize) {
            Some(Some(slot)) => slot.refs,
            _ => 0,
        }
    }

    /// Number of live styles, the immortal default included.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Drop every style except the default. Used on full reset.
    pub fn clear(&mut self) {
        self.slots.truncate(1);
        self.lookup.clear();
        self.free.clear();
    }
}
