//! Terminal colors and the 256-entry palette.

/// A terminal color: the default fg/bg, a palette index, or direct RGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// Color palette with 256 indexed colors plus default fg/bg/cursor.
///
/// OSC 4 mutates individual entries, OSC 10/11/12 the defaults, and
/// OSC 104/110/111/112 restore them.
#[derive(Clone)]
pub struct Palette {
    /// 256 indexed colors (16 ANSI + 216 cube + 24 grayscale).
    pub colors: [[u8; 3]; 256],
    /// Default foreground color.
    pub default_fg: [u8; 3],
    /// Default background color.
    pub default_bg: [u8; 3],
    /// Cursor color.
    pub cursor: [u8; 3],
}

impl Default for Palette {
    fn default() -> Self {
        let mut colors = [[0u8; 3]; 256];

        // Standard ANSI colors (0-7)
        colors[0] = [0, 0, 0];
        colors[1] = [204, 0, 0];
        colors[2] = [0, 204, 0];
        colors[3] = [204, 204, 0];
        colors[4] = [0, 0, 204];
        colors[5] = [204, 0, 204];
        colors[6] = [0, 204, 204];
        colors[7] = [204, 204, 204];

        // Bright ANSI colors (8-15)
        colors[8] = [102, 102, 102];
        colors[9] = [255, 0, 0];
        colors[10] = [0, 255, 0];
        colors[11] = [255, 255, 0];
        colors[12] = [0, 0, 255];
        colors[13] = [255, 0, 255];
        colors[14] = [0, 255, 255];
        colors[15] = [255, 255, 255];

        // 216 color cube (16-231)
        for r in 0..6 {
            for g in 0..6 {
                for b in 0..6 {
                    let idx = 16 + r * 36 + g * 6 + b;
                    let to_val = |c: usize| if c == 0 { 0 } else { (55 + c * 40) as u8 };
                    colors[idx] = [to_val(r), to_val(g), to_val(b)];
                }
            }
        }

        // 24 grayscale colors (232-255)
        for i in 0..24 {
            let gray = (8 + i * 10) as u8;
            colors[232 + i] = [gray, gray, gray];
        }

        Self {
            colors,
            default_fg: [230, 230, 230],
            default_bg: [26, 26, 26],
            cursor: [230, 230, 230],
        }
    }
}

impl Palette {
    /// Parse a color specification like "#RRGGBB" or "rgb:RR/GG/BB".
    pub fn parse_color_spec(spec: &str) -> Option<[u8; 3]> {
        let spec = spec.trim();

        if let Some(hex) = spec.strip_prefix('#') {
            if hex.len() == 6 {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                return Some([r, g, b]);
            }
        } else if let Some(rgb) = spec.strip_prefix("rgb:") {
            // rgb:RR/GG/BB or rgb:RRRR/GGGG/BBBB
            let parts: Vec<&str> = rgb.split('/').collect();
            if parts.len() == 3 {
                let parse_component = |s: &str| -> Option<u8> {
                    let val = u16::from_str_radix(s, 16).ok()?;
                    Some(if s.len() > 2 { (val >> 8) as u8 } else { val as u8 })
                };
                let r = parse_component(parts[0])?;
                let g = parse_component(parts[1])?;
                let b = parse_component(parts[2])?;
                return Some([r, g, b]);
            }
        }

        None
    }

    /// Format a color as the "rgb:RRRR/GGGG/BBBB" form used in OSC query replies.
    pub fn format_color_spec(rgb: [u8; 3]) -> String {
        // Scale 8-bit components to 16-bit by repetition, like XTerm.
        format!(
            "rgb:{0:02x}{0:02x}/{1:02x}{1:02x}/{2:02x}{2:02x}",
            rgb[0], rgb[1], rgb[2]
        )
    }

    /// Resolve a foreground color to RGB.
    #[inline]
    pub fn resolve_fg(&self, color: Color) -> [u8; 3] {
        match color {
            Color::Default => self.default_fg,
            Color::Indexed(idx) => self.colors[idx as usize],
            Color::Rgb(r, g, b) => [r, g, b],
        }
    }

    /// Resolve a background color to RGB.
    #[inline]
    pub fn resolve_bg(&self, color: Color) -> [u8; 3] {
        match color {
            Color::Default => self.default_bg,
            Color::Indexed(idx) => self.colors[idx as usize],
            Color::Rgb(r, g, b) => [r, g, b],
        }
    }

    /// Restore every indexed color to its startup value (OSC 104 with no args).
    pub fn reset_indexed(&mut self) {
        self.colors = Self::default().colors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hash_spec() {
        assert_eq!(Palette::parse_color_spec("#ff8000"), Some([255, 128, 0]));
        assert_eq!(Palette::parse_color_spec("#ff80"), None);
    }

    #[test]
    fn parse_rgb_spec() {
        assert_eq!(Palette::parse_color_spec("rgb:ff/80/00"), Some([255, 128, 0]));
        assert_eq!(
            Palette::parse_color_spec("rgb:ffff/8080/0000"),
            Some([255, 128, 0])
        );
        assert_eq!(Palette::parse_color_spec("rgb:ff/80"), None);
    }

    #[test]
    fn format_round_trips() {
        let spec = Palette::format_color_spec([255, 128, 0]);
        assert_eq!(Palette::parse_color_spec(&spec), Some([255, 128, 0]));
    }

    #[test]
    fn cube_and_grayscale() {
        let p = Palette::default();
        // 16 = cube origin, 231 = cube max, 255 = lightest gray.
        assert_eq!(p.colors[16], [0, 0, 0]);
        assert_eq!(p.colors[231], [255, 255, 255]);
        assert_eq!(p.colors[255], [238, 238, 238]);
    }
}
