//! VT escape-sequence parser.
//!
//! A byte-level state machine in the Kitty style: the ground state UTF-8
//! decodes in bulk until an ESC sentinel appears, decoded scalars go to the
//! handler as whole runs, and only escape bytes walk the state machine.
//! Control characters ride along in the text stream and are handled inline
//! by the terminal's text loop.
//!
//! Malformed sequences never fail the parser; they are dropped and the
//! machine returns to ground. CAN (0x18) and SUB (0x1A) abort any in-flight
//! sequence without dispatching it.

use crate::utf8::Utf8Decoder;

/// Maximum CSI parameter slots: 16 parameters of up to 4 subparameters.
/// Excess parameters are dropped silently, matching XTerm.
pub const MAX_PARAMS: usize = 64;

/// Maximum length of an escape sequence before it is abandoned.
const MAX_ESCAPE_LEN: usize = 256 * 1024;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1a;
const ST_C1: u8 = 0x9c;

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Ground: plain text and C0 controls.
    #[default]
    Ground,
    /// Just saw ESC.
    Escape,
    /// ESC plus an intermediate byte; waiting for the final.
    EscapeIntermediate(u8),
    /// Inside CSI (ESC `[`).
    Csi,
    /// Inside OSC (ESC `]`).
    Osc,
    /// Inside DCS (ESC `P`).
    Dcs,
    /// Inside APC (ESC `_`).
    Apc,
    /// Inside PM (ESC `^`).
    Pm,
    /// Inside SOS (ESC `X`).
    Sos,
}

/// CSI parameter accumulation sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CsiPhase {
    #[default]
    Entry,
    Param,
    Intermediate,
}

/// Digit multipliers for reverse-order accumulation: digits land with a
/// positional multiplier and a single division converts at commit time.
static DIGIT_MULTIPLIERS: [i64; 16] = [
    10_000_000_000_000_000,
    1_000_000_000_000_000,
    100_000_000_000_000,
    10_000_000_000_000,
    1_000_000_000_000,
    100_000_000_000,
    10_000_000_000,
    1_000_000_000,
    100_000_000,
    10_000_000,
    1_000_000,
    100_000,
    10_000,
    1_000,
    100,
    10,
];

/// A parsed CSI sequence: parameters, prefix/intermediate bytes, final byte.
#[derive(Debug, Clone)]
pub struct CsiParams {
    pub params: [i32; MAX_PARAMS],
    /// Marks parameters introduced by `:` rather than `;`.
    pub is_sub: [bool; MAX_PARAMS],
    pub len: usize,
    /// Private prefix byte (`?`, `>`, `<`, `=`) or 0.
    pub prefix: u8,
    /// Intermediate byte (space, `!`, `"`, `$`, `'`, `#`, `*`) or 0.
    pub intermediate: u8,
    /// Final byte in `@`..`~`.
    pub final_byte: u8,
    phase: CsiPhase,
    accumulator: i64,
    sign: i32,
    digits: usize,
    have_digits: bool,
}

impl Default for CsiParams {
    fn default() -> Self {
        Self {
            params: [0; MAX_PARAMS],
            is_sub: [false; MAX_PARAMS],
            len: 0,
            prefix: 0,
            intermediate: 0,
            final_byte: 0,
            phase: CsiPhase::Entry,
            accumulator: 0,
            sign: 1,
            digits: 0,
            have_digits: false,
        }
    }
}

impl CsiParams {
    /// Reset for a new sequence. The param arrays are left as-is; entries
    /// are always written before they are read.
    #[inline]
    fn reset(&mut self) {
        self.len = 0;
        self.prefix = 0;
        self.intermediate = 0;
        self.final_byte = 0;
        self.phase = CsiPhase::Entry;
        self.accumulator = 0;
        self.sign = 1;
        self.digits = 0;
        self.have_digits = false;
    }

    /// Parameter at `index`, or `default` when absent or zero.
    #[inline]
    pub fn get(&self, index: usize, default: i32) -> i32 {
        if index < self.len && self.params[index] != 0 {
            self.params[index]
        } else {
            default
        }
    }

    #[inline(always)]
    fn add_digit(&mut self, digit: u8) {
        if self.digits < DIGIT_MULTIPLIERS.len() {
            self.accumulator += (digit - b'0') as i64 * DIGIT_MULTIPLIERS[self.digits];
            self.digits += 1;
        }
        self.have_digits = true;
    }

    /// Commit the pending parameter. Overflowing the slot budget drops the
    /// value silently.
    #[inline]
    fn commit(&mut self, sub: bool) {
        let value = if self.digits == 0 {
            0
        } else {
            (self.accumulator / DIGIT_MULTIPLIERS[self.digits - 1]) as i32 * self.sign
        };
        if self.len < MAX_PARAMS {
            self.params[self.len] = value;
            self.is_sub[self.len] = sub;
            self.len += 1;
        }
        self.accumulator = 0;
        self.sign = 1;
        self.digits = 0;
        self.have_digits = false;
    }
}

/// Receiver of parser actions.
///
/// Text arrives as decoded Unicode scalars (u32), whole runs at a time,
/// with C0 controls other than ESC embedded in the run; the terminal's text
/// loop handles them inline. Every other callback corresponds to one
/// complete escape sequence.
pub trait Handler {
    /// A run of decoded scalars, controls included.
    fn text(&mut self, codepoints: &[u32]);

    /// A C0 control embedded inside a CSI sequence.
    fn control(&mut self, byte: u8);

    /// A complete CSI sequence.
    fn csi(&mut self, params: &CsiParams);

    /// A complete OSC string (terminator stripped).
    fn osc(&mut self, data: &[u8]);

    /// A complete DCS string.
    fn dcs(&mut self, _data: &[u8]) {}

    /// A complete APC string.
    fn apc(&mut self, _data: &[u8]) {}

    /// A complete PM string.
    fn pm(&mut self, _data: &[u8]) {}

    /// A complete SOS string.
    fn sos(&mut self, _data: &[u8]) {}

    /// DECSC (ESC 7).
    fn save_cursor(&mut self) {}

    /// DECRC (ESC 8).
    fn restore_cursor(&mut self) {}

    /// RIS (ESC c).
    fn full_reset(&mut self) {}

    /// IND (ESC D).
    fn index(&mut self) {}

    /// NEL (ESC E).
    fn next_line(&mut self) {}

    /// RI (ESC M).
    fn reverse_index(&mut self) {}

    /// HTS (ESC H).
    fn set_tab_stop(&mut self) {}

    /// DECKPAM / DECKPNM (ESC = / ESC >).
    fn set_keypad_mode(&mut self, _application: bool) {}

    /// Designate a charset into slot G0..G3 (ESC ( ) * + with a final).
    fn designate_charset(&mut self, _slot: u8, _final_byte: u8) {}

    /// Locking shift: invoke slot into GL or GR (ESC n/o/~/}/|).
    fn invoke_charset(&mut self, _slot: u8, _gr: bool) {}

    /// Single shift for the next scalar only (ESC N / ESC O).
    fn single_shift(&mut self, _slot: u8) {}

    /// DECALN (ESC # 8).
    fn screen_alignment(&mut self) {}
}

/// The parser: one instance per terminal, owned by the IO thread.
#[derive(Debug)]
pub struct Parser {
    pub state: State,
    csi: CsiParams,
    utf8: Utf8Decoder,
    /// Reused scalar buffer for text runs.
    codepoints: Vec<u32>,
    /// OSC string accumulator.
    osc_buffer: Vec<u8>,
    /// DCS/APC/PM/SOS string accumulator.
    string_buffer: Vec<u8>,
    /// An ESC ended the previous chunk inside a string; the next byte
    /// decides between ST and an embedded escape.
    pending_esc: bool,
    /// Bytes consumed by the in-flight sequence, for the length cap.
    escape_len: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            state: State::Ground,
            csi: CsiParams::default(),
            utf8: Utf8Decoder::new(),
            codepoints: Vec::with_capacity(4096),
            osc_buffer: Vec::new(),
            string_buffer: Vec::new(),
            pending_esc: false,
            escape_len: 0,
        }
    }
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the parser sits in ground state with no partial sequence.
    #[inline]
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground
    }

    /// Forget any in-flight sequence and return to ground.
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.csi.reset();
        self.utf8.reset();
        self.codepoints.clear();
        self.osc_buffer.clear();
        self.string_buffer.clear();
        self.pending_esc = false;
        self.escape_len = 0;
    }

    /// Consume a slice of bytes, dispatching actions to the handler.
    ///
    /// The whole slice is always consumed; incomplete sequences are carried
    /// in parser state until the next call.
    pub fn parse<H: Handler>(&mut self, bytes: &[u8], handler: &mut H) {
        let mut pos = 0;
        while pos < bytes.len() {
            pos += match self.state {
                State::Ground => self.consume_ground(&bytes[pos..], handler),
                State::Escape => self.consume_escape(&bytes[pos..], handler),
                State::EscapeIntermediate(im) => {
                    self.consume_escape_intermediate(&bytes[pos..], im, handler)
                }
                State::Csi => self.consume_csi(&bytes[pos..], handler),
                State::Osc => self.consume_osc(&bytes[pos..], handler),
                State::Dcs | State::Apc | State::Pm | State::Sos => {
                    self.consume_string(&bytes[pos..], handler)
                }
            };
        }
    }

    /// Ground: bulk UTF-8 decode until ESC.
    fn consume_ground<H: Handler>(&mut self, bytes: &[u8], handler: &mut H) -> usize {
        self.codepoints.clear();
        let (consumed, found_esc) = self.utf8.decode_to_esc(bytes, &mut self.codepoints);
        if !self.codepoints.is_empty() {
            handler.text(&self.codepoints);
        }
        if found_esc {
            self.state = State::Escape;
            self.escape_len = 0;
        }
        consumed
    }

    /// The byte after ESC.
    fn consume_escape<H: Handler>(&mut self, bytes: &[u8], handler: &mut H) -> usize {
        let ch = bytes[0];
        self.escape_len += 1;

        match ch {
            CAN | SUB => {
                self.state = State::Ground;
                return 1;
            }
            b'[' => {
                self.state = State::Csi;
                self.csi.reset();
                return 1;
            }
            b']' => {
                self.state = State::Osc;
                self.osc_buffer.clear();
                return 1;
            }
            b'P' => {
                self.state = State::Dcs;
                self.string_buffer.clear();
                return 1;
            }
            b'_' => {
                self.state = State::Apc;
                self.string_buffer.clear();
                return 1;
            }
            b'^' => {
                self.state = State::Pm;
                self.string_buffer.clear();
                return 1;
            }
            b'X' => {
                self.state = State::Sos;
                self.string_buffer.clear();
                return 1;
            }
            // Intermediate byte: charset designators and DECALN need one
            // more byte.
            b'(' | b')' | b'*' | b'+' | b'#' | b'%' | b' ' => {
                self.state = State::EscapeIntermediate(ch);
                return 1;
            }
            _ => {}
        }

        self.state = State::Ground;
        match ch {
            b'7' => handler.save_cursor(),
            b'8' => handler.restore_cursor(),
            b'c' => handler.full_reset(),
            b'D' => handler.index(),
            b'E' => handler.next_line(),
            b'H' => handler.set_tab_stop(),
            b'M' => handler.reverse_index(),
            b'N' => handler.single_shift(2),
            b'O' => handler.single_shift(3),
            b'n' => handler.invoke_charset(2, false),
            b'o' => handler.invoke_charset(3, false),
            b'~' => handler.invoke_charset(1, true),
            b'}' => handler.invoke_charset(2, true),
            b'|' => handler.invoke_charset(3, true),
            b'=' => handler.set_keypad_mode(true),
            b'>' => handler.set_keypad_mode(false),
            b'\\' => {} // stray ST
            _ => {
                log::debug!("unknown escape: ESC {:02x}", ch);
            }
        }
        1
    }

    /// The final byte of a two-byte escape.
    fn consume_escape_intermediate<H: Handler>(
        &mut self,
        bytes: &[u8],
        intermediate: u8,
        handler: &mut H,
    ) -> usize {
        let ch = bytes[0];
        self.escape_len += 1;
        self.state = State::Ground;

        match (intermediate, ch) {
            (_, CAN) | (_, SUB) => {}
            (b'(', _) => handler.designate_charset(0, ch),
            (b')', _) => handler.designate_charset(1, ch),
            (b'*', _) => handler.designate_charset(2, ch),
            (b'+', _) => handler.designate_charset(3, ch),
            (b'#', b'8') => handler.screen_alignment(),
            // ESC % (charset selection) and ESC SP (C1 transmission): the
            // stream is always UTF-8 here.
            _ => {}
        }
        1
    }

    /// CSI parameter bytes up to the final.
    fn consume_csi<H: Handler>(&mut self, bytes: &[u8], handler: &mut H) -> usize {
        let mut consumed = 0;

        while consumed < bytes.len() {
            let ch = bytes[consumed];
            consumed += 1;
            self.escape_len += 1;

            if self.escape_len > MAX_ESCAPE_LEN {
                log::debug!("CSI sequence too long, dropping");
                self.state = State::Ground;
                return consumed;
            }

            // CAN/SUB abort; ESC aborts and restarts; other C0s execute.
            match ch {
                CAN | SUB => {
                    self.state = State::Ground;
                    return consumed;
                }
                ESC => {
                    self.state = State::Escape;
                    self.escape_len = 0;
                    return consumed;
                }
                0x00..=0x1f => {
                    handler.control(ch);
                    continue;
                }
                _ => {}
            }

            match self.csi.phase {
                CsiPhase::Entry => match ch {
                    b'0'..=b'9' => {
                        self.csi.add_digit(ch);
                        self.csi.phase = CsiPhase::Param;
                    }
                    b';' => {
                        self.csi.commit(false);
                        self.csi.phase = CsiPhase::Param;
                    }
                    b'?' | b'>' | b'<' | b'=' => {
                        self.csi.prefix = ch;
                        self.csi.phase = CsiPhase::Param;
                    }
                    b'-' => {
                        self.csi.sign = -1;
                        self.csi.have_digits = true;
                        self.csi.phase = CsiPhase::Param;
                    }
                    b' ' | b'!' | b'"' | b'#' | b'$' | b'\'' | b'*' => {
                        self.csi.intermediate = ch;
                        self.csi.phase = CsiPhase::Intermediate;
                    }
                    b'@'..=b'~' => {
                        self.csi.final_byte = ch;
                        self.state = State::Ground;
                        handler.csi(&self.csi);
                        return consumed;
                    }
                    _ => {
                        log::debug!("invalid CSI byte {:02x}", ch);
                        self.state = State::Ground;
                        return consumed;
                    }
                },
                CsiPhase::Param => match ch {
                    b'0'..=b'9' => self.csi.add_digit(ch),
                    b';' => self.csi.commit(false),
                    b':' => self.csi.commit(true),
                    b'-' if self.csi.digits == 0 => {
                        self.csi.sign = -1;
                        self.csi.have_digits = true;
                    }
                    b' ' | b'!' | b'"' | b'#' | b'$' | b'\'' | b'*' => {
                        self.csi.commit(false);
                        self.csi.intermediate = ch;
                        self.csi.phase = CsiPhase::Intermediate;
                    }
                    b'@'..=b'~' => {
                        if self.csi.have_digits || self.csi.len > 0 {
                            self.csi.commit(false);
                        }
                        self.csi.final_byte = ch;
                        self.state = State::Ground;
                        handler.csi(&self.csi);
                        return consumed;
                    }
                    _ => {
                        log::debug!("invalid CSI param byte {:02x}", ch);
                        self.state = State::Ground;
                        return consumed;
                    }
                },
                CsiPhase::Intermediate => match ch {
                    b'@'..=b'~' => {
                        self.csi.final_byte = ch;
                        self.state = State::Ground;
                        handler.csi(&self.csi);
                        return consumed;
                    }
                    _ => {
                        log::debug!("invalid CSI final byte {:02x}", ch);
                        self.state = State::Ground;
                        return consumed;
                    }
                },
            }
        }

        consumed
    }

    /// OSC string bytes, terminated by BEL, C1 ST, or ESC `\`.
    fn consume_osc<H: Handler>(&mut self, bytes: &[u8], handler: &mut H) -> usize {
        if self.pending_esc {
            // The previous chunk ended on an ESC.
            self.pending_esc = false;
            handler.osc(&self.osc_buffer);
            if bytes[0] == b'\\' {
                self.state = State::Ground;
                return 1;
            }
            // A new escape also terminates the OSC, matching XTerm.
            self.state = State::Escape;
            self.escape_len = 0;
            return 0;
        }

        // Bulk scan for a terminator candidate, then check the preceding
        // span for CAN/SUB aborts.
        let stop = memchr::memchr3(BEL, ESC, ST_C1, bytes).unwrap_or(bytes.len());
        if let Some(cancel) = memchr::memchr2(CAN, SUB, &bytes[..stop]) {
            self.state = State::Ground;
            return cancel + 1;
        }

        if stop == bytes.len() {
            // No terminator yet: buffer everything.
            if self.escape_len + stop > MAX_ESCAPE_LEN {
                log::debug!("OSC too long, dropping");
                self.state = State::Ground;
                return bytes.len();
            }
            self.osc_buffer.extend_from_slice(bytes);
            self.escape_len += stop;
            return bytes.len();
        }

        if self.escape_len + stop > MAX_ESCAPE_LEN {
            log::debug!("OSC too long, dropping");
            self.state = State::Ground;
            return stop + 1;
        }

        match bytes[stop] {
            BEL | ST_C1 => {
                self.osc_buffer.extend_from_slice(&bytes[..stop]);
                handler.osc(&self.osc_buffer);
                self.state = State::Ground;
                stop + 1
            }
            ESC => {
                if stop + 1 < bytes.len() {
                    self.osc_buffer.extend_from_slice(&bytes[..stop]);
                    if bytes[stop + 1] == b'\\' {
                        handler.osc(&self.osc_buffer);
                        self.state = State::Ground;
                        stop + 2
                    } else {
                        // ESC starting a new sequence also terminates the
                        // OSC, matching XTerm.
                        handler.osc(&self.osc_buffer);
                        self.state = State::Escape;
                        self.escape_len = 0;
                        stop + 1
                    }
                } else {
                    // ESC at the end of the chunk: wait for the next byte.
                    self.osc_buffer.extend_from_slice(&bytes[..stop]);
                    self.escape_len += stop + 1;
                    self.pending_esc = true;
                    stop + 1
                }
            }
            _ => unreachable!(),
        }
    }

    /// DCS/APC/PM/SOS string bytes, terminated by C1 ST or ESC `\`.
    fn consume_string<H: Handler>(&mut self, bytes: &[u8], handler: &mut H) -> usize {
        let mut pos = 0;
        if self.pending_esc {
            self.pending_esc = false;
            if bytes[0] == b'\\' {
                self.dispatch_string(handler);
                self.state = State::Ground;
                return 1;
            }
            // A raw ESC inside the payload: keep it and resume scanning.
            self.string_buffer.push(ESC);
        }
        loop {
            let rest = &bytes[pos..];
            if rest.is_empty() {
                return pos;
            }
            let stop = memchr::memchr2(ESC, ST_C1, rest).unwrap_or(rest.len());
            if let Some(cancel) = memchr::memchr2(CAN, SUB, &rest[..stop]) {
                self.state = State::Ground;
                return pos + cancel + 1;
            }

            if self.escape_len + stop > MAX_ESCAPE_LEN {
                log::debug!("string command too long, dropping");
                self.state = State::Ground;
                return pos + rest.len();
            }

            if stop == rest.len() {
                self.string_buffer.extend_from_slice(rest);
                self.escape_len += stop;
                return pos + rest.len();
            }

            match rest[stop] {
                ST_C1 => {
                    self.string_buffer.extend_from_slice(&rest[..stop]);
                    self.dispatch_string(handler);
                    self.state = State::Ground;
                    return pos + stop + 1;
                }
                ESC => {
                    if stop + 1 < rest.len() {
                        if rest[stop + 1] == b'\\' {
                            self.string_buffer.extend_from_slice(&rest[..stop]);
                            self.dispatch_string(handler);
                            self.state = State::Ground;
                            return pos + stop + 2;
                        }
                        // Raw ESC inside the payload: keep it and continue
                        // scanning (string commands may carry ESC bytes).
                        self.string_buffer.extend_from_slice(&rest[..=stop]);
                        self.escape_len += stop + 1;
                        pos += stop + 1;
                        continue;
                    }
                    // ESC at the chunk boundary.
                    self.string_buffer.extend_from_slice(&rest[..stop]);
                    self.escape_len += stop + 1;
                    self.pending_esc = true;
                    return pos + stop + 1;
                }
                _ => unreachable!(),
            }
        }
    }

    fn dispatch_string<H: Handler>(&mut self, handler: &mut H) {
        match self.state {
            State::Dcs => handler.dcs(&self.string_buffer),
            State::Apc => handler.apc(&self.string_buffer),
            State::Pm => handler.pm(&self.string_buffer),
            State::Sos => handler.sos(&self.string_buffer),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        text: Vec<Vec<u32>>,
        csis: Vec<(Vec<i32>, u8, u8)>,
        oscs: Vec<Vec<u8>>,
        dcss: Vec<Vec<u8>>,
        apcs: Vec<Vec<u8>>,
        controls: Vec<u8>,
        charsets: Vec<(u8, u8)>,
    }

    impl Handler for Recorder {
        fn text(&mut self, codepoints: &[u32]) {
            self.text.push(codepoints.to_vec());
        }
        fn control(&mut self, byte: u8) {
            self.controls.push(byte);
        }
        fn csi(&mut self, params: &CsiParams) {
            self.csis.push((
                params.params[..params.len].to_vec(),
                params.prefix,
                params.final_byte,
            ));
        }
        fn osc(&mut self, data: &[u8]) {
            self.oscs.push(data.to_vec());
        }
        fn dcs(&mut self, data: &[u8]) {
            self.dcss.push(data.to_vec());
        }
        fn apc(&mut self, data: &[u8]) {
            self.apcs.push(data.to_vec());
        }
        fn designate_charset(&mut self, slot: u8, final_byte: u8) {
            self.charsets.push((slot, final_byte));
        }
    }

    fn run(bytes: &[u8]) -> Recorder {
        let mut parser = Parser::new();
        let mut rec = Recorder::default();
        parser.parse(bytes, &mut rec);
        rec
    }

    fn collect_text(rec: &Recorder) -> String {
        rec.text
            .iter()
            .flatten()
            .filter_map(|&cp| char::from_u32(cp))
            .collect()
    }

    #[test]
    fn plain_text() {
        let rec = run(b"Hello, World!");
        assert_eq!(rec.text.len(), 1);
        assert_eq!(collect_text(&rec), "Hello, World!");
    }

    #[test]
    fn controls_ride_in_text() {
        let rec = run(b"a\nb\rc");
        assert_eq!(collect_text(&rec), "a\nb\rc");
    }

    #[test]
    fn csi_params() {
        let rec = run(b"\x1b[1;31m");
        assert_eq!(rec.csis, vec![(vec![1, 31], 0, b'm')]);
    }

    #[test]
    fn csi_private_prefix() {
        let rec = run(b"\x1b[?1049h");
        assert_eq!(rec.csis, vec![(vec![1049], b'?', b'h')]);
    }

    #[test]
    fn csi_subparams() {
        let rec = run(b"\x1b[38:2:255:128:64m");
        let (params, _, final_byte) = &rec.csis[0];
        assert_eq!(params, &vec![38, 2, 255, 128, 64]);
        assert_eq!(*final_byte, b'm');
    }

    #[test]
    fn excess_params_dropped_silently() {
        let mut seq = b"\x1b[".to_vec();
        for i in 0..200 {
            if i > 0 {
                seq.push(b';');
            }
            seq.extend_from_slice(b"1");
        }
        seq.push(b'm');
        let rec = run(&seq);
        assert_eq!(rec.csis.len(), 1);
        assert_eq!(rec.csis[0].0.len(), MAX_PARAMS);
    }

    #[test]
    fn osc_bel_and_st() {
        let rec = run(b"\x1b]0;title\x07\x1b]2;other\x1b\\");
        assert_eq!(rec.oscs, vec![b"0;title".to_vec(), b"2;other".to_vec()]);
    }

    #[test]
    fn osc_split_across_chunks() {
        let mut parser = Parser::new();
        let mut rec = Recorder::default();
        parser.parse(b"\x1b]0;ti", &mut rec);
        parser.parse(b"tle\x07", &mut rec);
        assert_eq!(rec.oscs, vec![b"0;title".to_vec()]);
    }

    #[test]
    fn osc_esc_terminator_split_across_chunks() {
        let mut parser = Parser::new();
        let mut rec = Recorder::default();
        parser.parse(b"\x1b]0;title\x1b", &mut rec);
        assert!(rec.oscs.is_empty());
        parser.parse(b"\\after", &mut rec);
        assert_eq!(rec.oscs, vec![b"0;title".to_vec()]);
        assert_eq!(collect_text(&rec), "after");
    }

    #[test]
    fn apc_kitty_graphics() {
        let rec = run(b"\x1b_Gf=24,s=1,v=1;AAAA\x1b\\");
        assert_eq!(rec.apcs, vec![b"Gf=24,s=1,v=1;AAAA".to_vec()]);
    }

    #[test]
    fn dcs_keeps_embedded_esc() {
        let rec = run(b"\x1bPpayload\x1bX\x1b\\");
        assert_eq!(rec.dcss, vec![b"payload\x1bX".to_vec()]);
    }

    #[test]
    fn can_aborts_csi() {
        // CAN inside a CSI drops it; the following CSI and text work.
        let rec = run(b"\x1b[12;\x18\x1b[31mX");
        assert_eq!(rec.csis, vec![(vec![31], 0, b'm')]);
        assert_eq!(collect_text(&rec), "X");
    }

    #[test]
    fn can_aborts_osc() {
        let rec = run(b"\x1b]0;junk\x18ok");
        assert!(rec.oscs.is_empty());
        assert_eq!(collect_text(&rec), "ok");
    }

    #[test]
    fn control_inside_csi_executes() {
        let rec = run(b"\x1b[1\x085m");
        assert_eq!(rec.controls, vec![0x08]);
        assert_eq!(rec.csis, vec![(vec![15], 0, b'm')]);
    }

    #[test]
    fn charset_designation() {
        let rec = run(b"\x1b(0\x1b)B");
        assert_eq!(rec.charsets, vec![(0, b'0'), (1, b'B')]);
    }

    #[test]
    fn byte_at_a_time_matches_slice() {
        let input: &[u8] =
            b"ab\x1b[1;2Hcd\x1b]0;t\x07\x1b(0ef\x1b[38:5:1mgh\x1b_Gx\x1b\\tail";

        let mut whole = Parser::new();
        let mut rec_whole = Recorder::default();
        whole.parse(input, &mut rec_whole);

        let mut split = Parser::new();
        let mut rec_split = Recorder::default();
        for b in input {
            split.parse(std::slice::from_ref(b), &mut rec_split);
        }

        // Text runs coalesce differently but the scalar stream, and every
        // dispatched sequence, must be identical.
        assert_eq!(collect_text(&rec_whole), collect_text(&rec_split));
        assert_eq!(rec_whole.csis, rec_split.csis);
        assert_eq!(rec_whole.oscs, rec_split.oscs);
        assert_eq!(rec_whole.apcs, rec_split.apcs);
        assert_eq!(rec_whole.charsets, rec_split.charsets);
    }

    #[test]
    fn negative_param() {
        let rec = run(b"\x1b[-1u");
        assert_eq!(rec.csis, vec![(vec![-1], 0, b'u')]);
    }
}
