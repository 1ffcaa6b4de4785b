//! The packed grid cell.
//!
//! Cells are the hot unit of the whole engine: every print touches one and
//! every rendered frame walks them. The layout stays within 16 bytes.

use crate::style::StyleId;

/// What a cell holds. Exactly one variant is ever active.
///
/// `BgPalette`/`BgRgb` mark cells whose only content is an erased
/// background (BCE); they carry the color directly so erase never has to
/// intern a style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CellContent {
    /// Nothing written since the row was cleared.
    #[default]
    Empty,
    /// A Unicode scalar. For grapheme clusters the base scalar lives here
    /// and the full cluster in the row's side table.
    Codepoint(char),
    /// Erased with an indexed background color.
    BgPalette(u8),
    /// Erased with a direct RGB background color.
    BgRgb(u8, u8, u8),
}

/// East Asian width class of a cell.
///
/// A `WideHead` is always followed by a `WideTail` in the same row. When a
/// wide scalar would straddle the last column, a `SpacerHead` pads that
/// column and the head moves to the next row. Tails and spacers are only
/// ever written by the code placing the head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Wide {
    #[default]
    Narrow = 0,
    WideHead = 1,
    WideTail = 2,
    SpacerHead = 3,
    SpacerTail = 4,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    #[repr(transparent)]
    pub struct CellFlags: u8 {
        /// DECSCA protection: selective erase (DECSEL/DECSED) skips this cell.
        const PROTECTED = 1 << 0;
        /// The cell's full grapheme cluster lives in the row side table.
        const GRAPHEME = 1 << 1;
    }
}

/// One grid cell: content tag, style reference, width class, flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Cell {
    pub content: CellContent,
    pub style_id: StyleId,
    pub wide: Wide,
    pub flags: CellFlags,
}

impl Cell {
    /// A blank cell carrying a style (used by styled erase).
    pub fn blank(style_id: StyleId) -> Self {
        Self {
            style_id,
            ..Self::default()
        }
    }

    /// The scalar to show for this cell, if any.
    #[inline]
    pub fn codepoint(&self) -> Option<char> {
        match self.content {
            CellContent::Codepoint(c) => Some(c),
            _ => None,
        }
    }

    /// True when the cell shows neither a glyph nor an erase color and has
    /// the default style.
    #[inline]
    pub fn is_blank(&self) -> bool {
        self.content == CellContent::Empty && self.style_id.is_default()
    }

    #[inline]
    pub fn is_protected(&self) -> bool {
        self.flags.contains(CellFlags::PROTECTED)
    }

    #[inline]
    pub fn is_wide_head(&self) -> bool {
        self.wide == Wide::WideHead
    }

    #[inline]
    pub fn is_wide_tail(&self) -> bool {
        self.wide == Wide::WideTail
    }
}
