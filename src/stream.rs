//! The stream handler: glue between parser actions and terminal operations.
//!
//! One `StreamHandler` is built per parse batch around a locked terminal.
//! It dispatches every parser action to the matching terminal operation,
//! formats protocol responses (DA, DSR, XTVERSION, DECRQSS, color queries)
//! into a response buffer the IO loop flushes to the pty, and applies the
//! policy decisions that do not belong in the terminal model, like the
//! OSC 52 clipboard gate.

use base64::Engine;

use crate::color::Palette;
use crate::graphics::GraphicsCommand;
use crate::page::SemanticPrompt;
use crate::style::Underline;
use crate::terminal::{CursorShape, Modes, Terminal, TerminalEvent};
use crate::vt_parser::{CsiParams, Handler};

/// Name and version reported by XTVERSION.
const TERM_NAME: &str = concat!("oxterm ", env!("CARGO_PKG_VERSION"));

/// Policy switches consulted while dispatching.
#[derive(Clone, Copy, Debug)]
pub struct StreamPolicy {
    /// OSC 52 writes allowed?
    pub allow_clipboard_write: bool,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            allow_clipboard_write: true,
        }
    }
}

/// Per-batch dispatcher. Borrows the terminal (held under the shared
/// mutex by the IO thread) and a response sink.
pub struct StreamHandler<'a> {
    pub term: &'a mut Terminal,
    /// Bytes to write back to the pty after the batch.
    pub responses: &'a mut Vec<u8>,
    pub policy: StreamPolicy,
}

impl<'a> StreamHandler<'a> {
    pub fn new(term: &'a mut Terminal, responses: &'a mut Vec<u8>, policy: StreamPolicy) -> Self {
        Self {
            term,
            responses,
            policy,
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.responses.extend_from_slice(bytes);
    }

    fn respond_str(&mut self, s: String) {
        self.responses.extend_from_slice(s.as_bytes());
    }

    // ------------------------------------------------------------------
    // CSI dispatch

    fn dispatch_csi(&mut self, p: &CsiParams) {
        let final_byte = p.final_byte as char;
        match (p.prefix, p.intermediate, final_byte) {
            (0, 0, 'A') => self.term.cursor_up(p.get(0, 1).max(1) as usize),
            (0, 0, 'B') => self.term.cursor_down(p.get(0, 1).max(1) as usize),
            (0, 0, 'C') => self.term.cursor_forward(p.get(0, 1).max(1) as usize),
            (0, 0, 'D') => self.term.cursor_back(p.get(0, 1).max(1) as usize),
            (0, 0, 'E') => self.term.cursor_next_line(p.get(0, 1).max(1) as usize),
            (0, 0, 'F') => self.term.cursor_prev_line(p.get(0, 1).max(1) as usize),
            (0, 0, 'G') | (0, 0, '`') => self.term.cursor_col(p.get(0, 1)),
            (0, 0, 'H') | (0, 0, 'f') => self.term.cursor_to(p.get(0, 1), p.get(1, 1)),
            (0, 0, 'I') => self.term.tab_forward(p.get(0, 1).max(1) as usize),
            (0, 0, 'Z') => self.term.tab_backward(p.get(0, 1).max(1) as usize),
            (0, 0, 'J') => self.term.erase_display(p.get(0, 0), false),
            (b'?', 0, 'J') => self.term.erase_display(p.get(0, 0), true),
            (0, 0, 'K') => self.term.erase_line(p.get(0, 0), false),
            (b'?', 0, 'K') => self.term.erase_line(p.get(0, 0), true),
            (0, 0, 'L') => self.term.insert_lines(p.get(0, 1).max(1) as usize),
            (0, 0, 'M') => self.term.delete_lines(p.get(0, 1).max(1) as usize),
            (0, 0, 'P') => self.term.delete_chars(p.get(0, 1).max(1) as usize),
            (0, 0, 'S') => self.term.scroll_up(p.get(0, 1).max(1) as usize),
            (0, 0, 'T') => self.term.scroll_down(p.get(0, 1).max(1) as usize),
            (0, 0, 'X') => self.term.erase_chars(p.get(0, 1).max(1) as usize),
            (0, 0, '@') => self.term.insert_chars(p.get(0, 1).max(1) as usize),
            (0, 0, 'b') => self.term.repeat_last(p.get(0, 1).max(1) as usize),
            (0, 0, 'd') => self.term.cursor_row(p.get(0, 1)),
            (0, 0, 'g') => self.term.clear_tabs(p.get(0, 0)),
            (0, 0, 'm') => self.term.sgr(p),
            (b'>', 0, 'm') => {} // XTMODKEYS
            (0, 0, 'c') | (b'?', 0, 'c') => {
                // Primary DA: VT220 with ANSI color.
                self.respond(b"\x1b[?62;22c");
            }
            (b'>', 0, 'c') => {
                // Secondary DA.
                self.respond(b"\x1b[>0;0;0c");
            }
            (0, 0, 'n') => match p.get(0, 0) {
                5 => self.respond(b"\x1b[0n"),
                6 => {
                    let (row, col) = self.cursor_report_position();
                    self.respond_str(format!("\x1b[{};{}R", row, col));
                }
                _ => {}
            },
            (b'?', 0, 'n') => {
                if p.get(0, 0) == 6 {
                    let (row, col) = self.cursor_report_position();
                    self.respond_str(format!("\x1b[?{};{}R", row, col));
                }
            }
            (b'?', 0, 'h') => {
                for i in 0..p.len {
                    self.term.set_private_mode(p.params[i], true);
                }
            }
            (b'?', 0, 'l') => {
                for i in 0..p.len {
                    self.term.set_private_mode(p.params[i], false);
                }
            }
            (0, 0, 'h') | (0, 0, 'l') => {
                log::debug!("unhandled ANSI mode {:?}", &p.params[..p.len]);
            }
            (0, b'!', 'p') => self.term.soft_reset(),
            (b'?', b'$', 'p') => {
                // DECRQM: 1 = set, 2 = reset (permanently-set values are
                // not distinguished here).
                let mode = p.get(0, 0);
                let state = if self.term.private_mode(mode) { 1 } else { 2 };
                self.respond_str(format!("\x1b[?{};{}$y", mode, state));
            }
            (0, b' ', 'q') | (0, 0, 'q') => {
                self.term.cursor_shape = match p.get(0, 0) {
                    0 | 1 => CursorShape::BlinkingBlock,
                    2 => CursorShape::SteadyBlock,
                    3 => CursorShape::BlinkingUnderline,
                    4 => CursorShape::SteadyUnderline,
                    5 => CursorShape::BlinkingBar,
                    6 => CursorShape::SteadyBar,
                    _ => CursorShape::BlinkingBlock,
                };
            }
            (0, b'"', 'q') => {
                // DECSCA: 1 protects, 0/2 clear protection.
                self.term.set_protection(p.get(0, 0) == 1);
            }
            (b'>', 0, 'q') => {
                // XTVERSION.
                self.respond_str(format!("\x1bP>|{}\x1b\\", TERM_NAME));
            }
            (0, 0, 'r') => self.term.set_scroll_region(p.get(0, 1), p.get(1, 0)),
            (b'?', 0, 'r') => {
                for i in 0..p.len {
                    self.term.restore_private_mode(p.params[i]);
                }
            }
            (0, 0, 's') => {
                if self.term.modes.contains(Modes::LR_MARGINS) {
                    self.term.set_lr_margins(p.get(0, 1), p.get(1, 0));
                } else {
                    self.term.save_cursor();
                }
            }
            (b'?', 0, 's') => {
                for i in 0..p.len {
                    self.term.save_private_mode(p.params[i]);
                }
            }
            (0, 0, 'u') => self.term.restore_cursor(),
            (0, 0, 't') => self.window_op(p),
            _ => {
                log::debug!(
                    "unhandled CSI prefix={:?} intermediate={:?} final={:?} params={:?}",
                    p.prefix as char,
                    p.intermediate as char,
                    final_byte,
                    &p.params[..p.len]
                );
            }
        }
    }

    /// 1-based cursor position for CPR, region-relative under DECOM.
    fn cursor_report_position(&self) -> (usize, usize) {
        let s = self.term.screen();
        let (x, y) = (s.cursor.x.min(s.cols - 1), s.cursor.y);
        if self.term.modes.contains(Modes::ORIGIN) {
            (y - s.scroll_top + 1, x - s.left_margin + 1)
        } else {
            (y + 1, x + 1)
        }
    }

    /// XTWINOPS subset: size reports and the title stack. Resize-acting
    /// forms are ignored.
    fn window_op(&mut self, p: &CsiParams) {
        match p.get(0, 0) {
            14 => {
                let h = (self.term.rows() as f32 * self.term.cell_height) as u32;
                let w = (self.term.cols() as f32 * self.term.cell_width) as u32;
                self.respond_str(format!("\x1b[4;{};{}t", h, w));
            }
            16 => {
                let h = self.term.cell_height as u32;
                let w = self.term.cell_width as u32;
                self.respond_str(format!("\x1b[6;{};{}t", h, w));
            }
            18 => {
                self.respond_str(format!("\x1b[8;{};{}t", self.term.rows(), self.term.cols()));
            }
            22 => self.term.push_title(),
            23 => self.term.pop_title(),
            op => log::trace!("ignored XTWINOPS {}", op),
        }
    }

    // ------------------------------------------------------------------
    // OSC dispatch

    fn dispatch_osc(&mut self, data: &[u8]) {
        let mut parts = data.splitn(2, |&b| b == b';');
        let Some(num) = parts
            .next()
            .and_then(|s| std::str::from_utf8(s).ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };
        let payload = parts.next().unwrap_or(&[]);

        match num {
            0 | 1 | 2 => {
                if let Ok(title) = std::str::from_utf8(payload) {
                    self.term.set_title(title);
                }
            }
            4 => self.osc_palette(payload),
            7 => {
                if let Ok(cwd) = std::str::from_utf8(payload) {
                    self.term
                        .push_event(TerminalEvent::CwdChanged(cwd.to_owned()));
                }
            }
            8 => self.osc_hyperlink(payload),
            9 | 777 => {} // desktop notifications: surface concern, ignored here
            10 | 11 | 12 => self.osc_default_color(num, payload),
            52 => self.osc_clipboard(payload),
            104 => {
                if payload.is_empty() {
                    self.term.palette.reset_indexed();
                } else {
                    let defaults = Palette::default();
                    for part in payload.split(|&b| b == b';') {
                        if let Some(idx) = std::str::from_utf8(part)
                            .ok()
                            .and_then(|s| s.parse::<u8>().ok())
                        {
                            self.term.palette.colors[idx as usize] =
                                defaults.colors[idx as usize];
                        }
                    }
                }
                self.term.push_event(TerminalEvent::ColorsChanged);
            }
            110 => {
                self.term.palette.default_fg = Palette::default().default_fg;
                self.term.push_event(TerminalEvent::ColorsChanged);
            }
            111 => {
                self.term.palette.default_bg = Palette::default().default_bg;
                self.term.push_event(TerminalEvent::ColorsChanged);
            }
            112 => {
                self.term.palette.cursor = Palette::default().cursor;
                self.term.push_event(TerminalEvent::ColorsChanged);
            }
            133 => self.osc_prompt(payload),
            _ => log::debug!("unhandled OSC {}", num),
        }
    }

    /// OSC 4: one or more `index;color` pairs; `?` queries.
    fn osc_palette(&mut self, payload: &[u8]) {
        let parts: Vec<&[u8]> = payload.split(|&b| b == b';').collect();
        let mut changed = false;
        for pair in parts.chunks(2) {
            let [idx, spec] = pair else { continue };
            let Some(idx) = std::str::from_utf8(idx)
                .ok()
                .and_then(|s| s.parse::<u8>().ok())
            else {
                continue;
            };
            match std::str::from_utf8(spec) {
                Ok("?") => {
                    let rgb = self.term.palette.colors[idx as usize];
                    self.respond_str(format!(
                        "\x1b]4;{};{}\x1b\\",
                        idx,
                        Palette::format_color_spec(rgb)
                    ));
                }
                Ok(spec) => {
                    if let Some(rgb) = Palette::parse_color_spec(spec) {
                        self.term.palette.colors[idx as usize] = rgb;
                        changed = true;
                    }
                }
                Err(_) => {}
            }
        }
        if changed {
            self.term.push_event(TerminalEvent::ColorsChanged);
        }
    }

    /// OSC 10/11/12: default foreground/background/cursor color.
    fn osc_default_color(&mut self, num: u32, payload: &[u8]) {
        let Ok(spec) = std::str::from_utf8(payload) else {
            return;
        };
        if spec == "?" {
            let rgb = match num {
                10 => self.term.palette.default_fg,
                11 => self.term.palette.default_bg,
                _ => self.term.palette.cursor,
            };
            self.respond_str(format!(
                "\x1b]{};{}\x1b\\",
                num,
                Palette::format_color_spec(rgb)
            ));
            return;
        }
        if let Some(rgb) = Palette::parse_color_spec(spec) {
            match num {
                10 => self.term.palette.default_fg = rgb,
                11 => self.term.palette.default_bg = rgb,
                _ => self.term.palette.cursor = rgb,
            }
            self.term.push_event(TerminalEvent::ColorsChanged);
        }
    }

    /// OSC 8: `params;uri`. An empty uri ends the hyperlink.
    fn osc_hyperlink(&mut self, payload: &[u8]) {
        let mut parts = payload.splitn(2, |&b| b == b';');
        let params = parts.next().unwrap_or(&[]);
        let uri = parts.next().unwrap_or(&[]);
        let id = std::str::from_utf8(params).ok().and_then(|params| {
            params
                .split(':')
                .find_map(|kv| kv.strip_prefix("id="))
                .filter(|id| !id.is_empty())
        });
        match std::str::from_utf8(uri) {
            Ok(uri) if !uri.is_empty() => self.term.set_hyperlink(id, Some(uri)),
            _ => self.term.set_hyperlink(None, None),
        }
    }

    /// OSC 52: clipboard write, gated by policy. Reads are never served.
    fn osc_clipboard(&mut self, payload: &[u8]) {
        let mut parts = payload.splitn(2, |&b| b == b';');
        let target = parts.next().unwrap_or(b"c").first().copied().unwrap_or(b'c');
        let data = parts.next().unwrap_or(&[]);
        if data == b"?" {
            // Clipboard reads leak data to the child; always denied.
            log::debug!("OSC 52 read query denied");
            return;
        }
        if !self.policy.allow_clipboard_write {
            self.term.push_event(TerminalEvent::ClipboardDenied);
            return;
        }
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(data) else {
            return;
        };
        if let Ok(text) = String::from_utf8(decoded) {
            self.term
                .push_event(TerminalEvent::SetClipboard { target, text });
        }
    }

    /// OSC 133 semantic prompt markers (A/B/C/D).
    fn osc_prompt(&mut self, payload: &[u8]) {
        match payload.first() {
            Some(b'A') => self.term.mark_prompt(SemanticPrompt::PromptStart),
            Some(b'B') => self.term.mark_prompt(SemanticPrompt::CommandStart),
            Some(b'C') => self.term.mark_prompt(SemanticPrompt::Output),
            Some(b'D') => {} // command end carries no row marker
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // DCS dispatch

    fn dispatch_dcs(&mut self, data: &[u8]) {
        if let Some(request) = data.strip_prefix(b"$q") {
            self.decrqss(request);
            return;
        }
        // Legacy synchronized-update pending mode (=1s / =2s).
        if data.len() >= 3 && data[0] == b'=' && data[2] == b's' {
            match data[1] {
                b'1' => self.term.modes.insert(Modes::SYNCHRONIZED),
                b'2' => {
                    self.term.modes.remove(Modes::SYNCHRONIZED);
                    self.term.dirty = true;
                }
                _ => {}
            }
            return;
        }
        if data.first() == Some(&b'q') {
            // Sixel payload: image decode is a collaborator concern.
            log::debug!("sixel DCS ignored ({} bytes)", data.len());
            return;
        }
        log::debug!("unhandled DCS ({} bytes)", data.len());
    }

    /// DECRQSS: report a setting as DCS 1 $ r ... ST (or 0 on failure).
    fn decrqss(&mut self, request: &[u8]) {
        let reply = if request == b"m" {
            Some(self.format_sgr_report())
        } else if request == b"r" {
            let s = self.term.screen();
            Some(format!("{};{}r", s.scroll_top + 1, s.scroll_bottom + 1))
        } else if request == b" q" {
            let shape = match self.term.cursor_shape {
                CursorShape::BlinkingBlock => 1,
                CursorShape::SteadyBlock => 2,
                CursorShape::BlinkingUnderline => 3,
                CursorShape::SteadyUnderline => 4,
                CursorShape::BlinkingBar => 5,
                CursorShape::SteadyBar => 6,
            };
            Some(format!("{} q", shape))
        } else {
            None
        };
        match reply {
            Some(body) => self.respond_str(format!("\x1bP1$r{}\x1b\\", body)),
            None => self.respond(b"\x1bP0$r\x1b\\"),
        }
    }

    /// Current SGR state rendered back as parameters, for DECRQSS.
    fn format_sgr_report(&self) -> String {
        use crate::color::Color;
        use crate::style::StyleFlags;
        let style = self.term.screen().cursor.style;
        let mut parts = vec!["0".to_string()];
        if style.flags.contains(StyleFlags::BOLD) {
            parts.push("1".into());
        }
        if style.flags.contains(StyleFlags::FAINT) {
            parts.push("2".into());
        }
        if style.flags.contains(StyleFlags::ITALIC) {
            parts.push("3".into());
        }
        match style.underline {
            Underline::None => {}
            Underline::Single => parts.push("4".into()),
            Underline::Double => parts.push("21".into()),
            kind => parts.push(format!("4:{}", kind as u8)),
        }
        if style.flags.contains(StyleFlags::BLINK) {
            parts.push("5".into());
        }
        if style.flags.contains(StyleFlags::INVERSE) {
            parts.push("7".into());
        }
        if style.flags.contains(StyleFlags::INVISIBLE) {
            parts.push("8".into());
        }
        if style.flags.contains(StyleFlags::STRIKETHROUGH) {
            parts.push("9".into());
        }
        match style.fg {
            Color::Default => {}
            Color::Indexed(i) if i < 8 => parts.push(format!("{}", 30 + i)),
            Color::Indexed(i) if i < 16 => parts.push(format!("{}", 90 + i - 8)),
            Color::Indexed(i) => parts.push(format!("38:5:{}", i)),
            Color::Rgb(r, g, b) => parts.push(format!("38:2:{}:{}:{}", r, g, b)),
        }
        match style.bg {
            Color::Default => {}
            Color::Indexed(i) if i < 8 => parts.push(format!("{}", 40 + i)),
            Color::Indexed(i) if i < 16 => parts.push(format!("{}", 100 + i - 8)),
            Color::Indexed(i) => parts.push(format!("48:5:{}", i)),
            Color::Rgb(r, g, b) => parts.push(format!("48:2:{}:{}:{}", r, g, b)),
        }
        format!("{}m", parts.join(";"))
    }

    // ------------------------------------------------------------------
    // APC dispatch (Kitty graphics)

    fn dispatch_apc(&mut self, data: &[u8]) {
        if !data.starts_with(b"G") {
            log::debug!("unhandled APC ({} bytes)", data.len());
            return;
        }
        let Some(cmd) = GraphicsCommand::parse(data) else {
            return;
        };
        let (y, x) = {
            let s = self.term.screen();
            (s.cursor.y, s.cursor.x.min(s.cols - 1))
        };
        let pin = self.term.screen().pin_at(y, x);
        let (cell_w, cell_h) = (self.term.cell_width, self.term.cell_height);
        let (response, placement) = self.term.images.process_command(cmd, pin, cell_w, cell_h);
        if let Some(resp) = response {
            self.respond_str(resp);
        }
        // Per the protocol, the cursor lands after the placement rectangle
        // unless the command suppressed movement.
        if let Some(placement) = placement {
            if !placement.suppress_cursor_move {
                for _ in 1..placement.rows.max(1) {
                    self.term.linefeed();
                }
            }
            self.term.dirty = true;
        }
    }
}

impl Handler for StreamHandler<'_> {
    fn text(&mut self, codepoints: &[u32]) {
        self.term.input_text(codepoints);
    }

    fn control(&mut self, byte: u8) {
        self.term.control(byte);
    }

    fn csi(&mut self, params: &CsiParams) {
        self.dispatch_csi(params);
    }

    fn osc(&mut self, data: &[u8]) {
        self.dispatch_osc(data);
    }

    fn dcs(&mut self, data: &[u8]) {
        self.dispatch_dcs(data);
    }

    fn apc(&mut self, data: &[u8]) {
        self.dispatch_apc(data);
    }

    fn save_cursor(&mut self) {
        self.term.save_cursor();
    }

    fn restore_cursor(&mut self) {
        self.term.restore_cursor();
    }

    fn full_reset(&mut self) {
        self.term.full_reset();
    }

    fn index(&mut self) {
        self.term.index();
    }

    fn next_line(&mut self) {
        self.term.next_line();
    }

    fn reverse_index(&mut self) {
        self.term.reverse_index();
    }

    fn set_tab_stop(&mut self) {
        self.term.set_tab_stop();
    }

    fn set_keypad_mode(&mut self, application: bool) {
        self.term.modes.set(Modes::APP_KEYPAD, application);
    }

    fn designate_charset(&mut self, slot: u8, final_byte: u8) {
        self.term.designate_charset(slot, final_byte);
    }

    fn invoke_charset(&mut self, slot: u8, gr: bool) {
        self.term.invoke_charset(slot, gr);
    }

    fn single_shift(&mut self, slot: u8) {
        self.term.single_shift(slot);
    }

    fn screen_alignment(&mut self) {
        self.term.screen_alignment();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::style::StyleFlags;
    use crate::vt_parser::Parser;

    struct Fixture {
        term: Terminal,
        parser: Parser,
        responses: Vec<u8>,
    }

    impl Fixture {
        fn new(cols: usize, rows: usize) -> Self {
            Self {
                term: Terminal::new(cols, rows, 100),
                parser: Parser::new(),
                responses: Vec::new(),
            }
        }

        fn feed(&mut self, bytes: &[u8]) {
            let mut handler = StreamHandler::new(
                &mut self.term,
                &mut self.responses,
                StreamPolicy::default(),
            );
            self.parser.parse(bytes, &mut handler);
        }

        fn feed_with_policy(&mut self, bytes: &[u8], policy: StreamPolicy) {
            let mut handler = StreamHandler::new(&mut self.term, &mut self.responses, policy);
            self.parser.parse(bytes, &mut handler);
        }

        fn row_text(&self, y: usize) -> String {
            self.term
                .screen()
                .row(y)
                .cells
                .iter()
                .map(|c| c.codepoint().unwrap_or(' '))
                .collect::<String>()
                .trim_end()
                .to_string()
        }

        fn cursor(&self) -> (usize, usize) {
            let c = &self.term.screen().cursor;
            (c.x, c.y)
        }
    }

    #[test]
    fn s1_plain_text() {
        let mut f = Fixture::new(20, 4);
        f.feed(b"hello\r\nworld");
        assert_eq!(f.row_text(0), "hello");
        assert_eq!(f.row_text(1), "world");
        assert_eq!(f.cursor(), (5, 1));
    }

    #[test]
    fn s2_backspace() {
        let mut f = Fixture::new(20, 2);
        f.feed(b"hello\x08y");
        assert_eq!(f.row_text(0), "helly");
        assert_eq!(f.cursor(), (5, 0));
    }

    #[test]
    fn s3_clear_cup_sgr() {
        let mut f = Fixture::new(20, 5);
        f.feed(b"\x1b[2J\x1b[3;5H\x1b[31;1mX");
        let cell = *f.term.screen().cell(2, 4);
        assert_eq!(cell.codepoint(), Some('X'));
        let style = f.term.screen().style_of(2, cell.style_id);
        assert_eq!(style.fg, Color::Indexed(1));
        assert!(style.flags.contains(StyleFlags::BOLD));
        assert_eq!(f.cursor(), (5, 2));
    }

    #[test]
    fn s4_autowrap_deferred() {
        let mut f = Fixture::new(5, 3);
        f.feed(b"abcde");
        assert_eq!(f.row_text(0), "abcde");
        assert!(!f.term.screen().row(0).is_wrapped());
        f.feed(b"f");
        assert!(f.term.screen().row(0).is_wrapped());
        assert_eq!(f.term.screen().cell(1, 0).codepoint(), Some('f'));
        assert_eq!(f.cursor(), (1, 1));
    }

    #[test]
    fn s5_alt_screen_1049() {
        let mut f = Fixture::new(10, 3);
        f.feed(b"A\x1b[?1049h\x1b[HB\x1b[?1049l");
        assert!(!f.term.is_alt_screen());
        assert_eq!(f.row_text(0), "A");
        assert_eq!(f.cursor(), (1, 0));
    }

    #[test]
    fn s6_parser_resync_on_can() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b[12;\x18\x1b[31mX");
        let cell = *f.term.screen().cell(0, 0);
        assert_eq!(cell.codepoint(), Some('X'));
        let style = f.term.screen().style_of(0, cell.style_id);
        assert_eq!(style.fg, Color::Indexed(1));
    }

    #[test]
    fn sgr_colon_forms_with_and_without_colorspace() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b[38:2:10:20:30mA\x1b[38:2:0:40:50:60mB");
        let a = *f.term.screen().cell(0, 0);
        assert_eq!(f.term.screen().style_of(0, a.style_id).fg, Color::Rgb(10, 20, 30));
        let b = *f.term.screen().cell(0, 1);
        assert_eq!(f.term.screen().style_of(0, b.style_id).fg, Color::Rgb(40, 50, 60));
    }

    #[test]
    fn dsr_cursor_position_report() {
        let mut f = Fixture::new(20, 5);
        f.feed(b"\x1b[3;7H\x1b[6n");
        assert_eq!(f.responses, b"\x1b[3;7R");
    }

    #[test]
    fn dsr_respects_origin_mode() {
        let mut f = Fixture::new(20, 8);
        f.feed(b"\x1b[3;6r\x1b[?6h\x1b[2;2H\x1b[6n");
        assert_eq!(f.responses, b"\x1b[2;2R");
    }

    #[test]
    fn device_attributes() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b[c\x1b[>c");
        assert_eq!(f.responses, b"\x1b[?62;22c\x1b[>0;0;0c");
    }

    #[test]
    fn xtversion_reports_name() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b[>0q");
        let text = String::from_utf8(f.responses.clone()).unwrap();
        assert!(text.starts_with("\x1bP>|oxterm"));
        assert!(text.ends_with("\x1b\\"));
    }

    #[test]
    fn decrqss_reports_scroll_region() {
        let mut f = Fixture::new(10, 6);
        f.feed(b"\x1b[2;5r\x1bP$qr\x1b\\");
        assert_eq!(f.responses, b"\x1bP1$r2;5r\x1b\\");
    }

    #[test]
    fn decrqss_unknown_setting() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1bP$qz\x1b\\");
        assert_eq!(f.responses, b"\x1bP0$r\x1b\\");
    }

    #[test]
    fn osc_title() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b]2;my title\x07");
        assert_eq!(f.term.title, "my title");
        assert!(f
            .term
            .take_events()
            .contains(&TerminalEvent::TitleChanged("my title".into())));
    }

    #[test]
    fn osc_palette_set_and_query() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b]4;1;#ff0000\x07");
        assert_eq!(f.term.palette.colors[1], [255, 0, 0]);
        f.feed(b"\x1b]4;1;?\x07");
        assert_eq!(f.responses, b"\x1b]4;1;rgb:ffff/0000/0000\x1b\\");
        f.responses.clear();
        f.feed(b"\x1b]104\x07");
        assert_eq!(f.term.palette.colors[1], Palette::default().colors[1]);
    }

    #[test]
    fn osc_default_colors_query() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b]10;#102030\x07\x1b]10;?\x07");
        assert_eq!(f.term.palette.default_fg, [16, 32, 48]);
        assert_eq!(f.responses, b"\x1b]10;rgb:1010/2020/3030\x1b\\");
    }

    #[test]
    fn osc_clipboard_policy_gate() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b]52;c;aGVsbG8=\x07");
        assert!(f.term.take_events().iter().any(|e| matches!(
            e,
            TerminalEvent::SetClipboard { target: b'c', text } if text == "hello"
        )));

        let deny = StreamPolicy {
            allow_clipboard_write: false,
        };
        f.feed_with_policy(b"\x1b]52;c;aGVsbG8=\x07", deny);
        assert!(f
            .term
            .take_events()
            .contains(&TerminalEvent::ClipboardDenied));
    }

    #[test]
    fn osc_semantic_prompt_marks_row() {
        let mut f = Fixture::new(10, 3);
        f.feed(b"\x1b]133;A\x07$ ls\r\n");
        assert_eq!(
            f.term.screen().row(0).prompt,
            crate::page::SemanticPrompt::PromptStart
        );
        assert_eq!(f.term.screen().row(1).prompt, crate::page::SemanticPrompt::None);
    }

    #[test]
    fn osc_hyperlink_tags_cells() {
        let mut f = Fixture::new(20, 2);
        f.feed(b"\x1b]8;;https://example.com\x07link\x1b]8;;\x07off");
        let row = f.term.screen().row(0);
        let link = row.hyperlink(0).unwrap();
        assert_eq!(f.term.hyperlinks.uri(link), Some("https://example.com"));
        assert_eq!(row.hyperlink(5), None);
    }

    #[test]
    fn charset_line_drawing_via_stream() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b(0lqk\x1b(B");
        assert_eq!(f.row_text(0), "┌─┐");
    }

    #[test]
    fn decset_roundtrip_with_xtsave() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b[?2004h\x1b[?2004s\x1b[?2004l");
        assert!(!f.term.modes.contains(Modes::BRACKETED_PASTE));
        f.feed(b"\x1b[?2004r");
        assert!(f.term.modes.contains(Modes::BRACKETED_PASTE));
    }

    #[test]
    fn synchronized_update_via_dcs() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1bP=1s\x1b\\");
        assert!(f.term.is_synchronized());
        f.feed(b"\x1bP=2s\x1b\\");
        assert!(!f.term.is_synchronized());
    }

    #[test]
    fn decrqm_reports_mode_state() {
        let mut f = Fixture::new(10, 2);
        f.feed(b"\x1b[?25$p");
        assert_eq!(f.responses, b"\x1b[?25;1$y");
    }
}
