//! Streaming UTF-8 decoding for the parser's ground state.
//!
//! The decoder consumes bytes until it hits an ESC sentinel, pushing decoded
//! scalars into a reused buffer. Printable ASCII takes a bulk path that
//! scans whole runs at once, so the common case never dispatches per byte.
//! Malformed input (overlong forms, bare continuation bytes, truncated
//! sequences) decodes to U+FFFD and resynchronizes on the next byte.
//!
//! Incomplete sequences at the end of a read are carried across calls, so
//! feeding a stream byte-at-a-time yields the same scalars as one slice.

const REPLACEMENT: u32 = 0xFFFD;
const ESC: u8 = 0x1b;

/// Streaming decoder with at most one partial sequence of state.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    /// Accumulated scalar bits of a partial sequence.
    partial: u32,
    /// Continuation bytes still expected.
    needed: u8,
    /// Lower bound for the next continuation byte (overlong/surrogate guard).
    cont_min: u8,
    /// Upper bound for the next continuation byte.
    cont_max: u8,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partial sequence (parser reset).
    pub fn reset(&mut self) {
        self.needed = 0;
    }

    /// Decode from `input` until an ESC byte or the end of the slice.
    ///
    /// Decoded scalars are appended to `out` (which is not cleared).
    /// Returns `(consumed, found_esc)`; when an ESC was found it has been
    /// consumed and the caller switches to escape parsing.
    pub fn decode_to_esc(&mut self, input: &[u8], out: &mut Vec<u32>) -> (usize, bool) {
        let mut pos = 0;

        while pos < input.len() {
            let byte = input[pos];

            if self.needed > 0 {
                // ESC aborts a partial sequence; the truncated scalar
                // becomes a replacement character.
                if byte == ESC {
                    self.needed = 0;
                    out.push(REPLACEMENT);
                    return (pos + 1, true);
                }
                if (self.cont_min..=self.cont_max).contains(&byte) {
                    self.partial = (self.partial << 6) | (byte & 0x3f) as u32;
                    self.needed -= 1;
                    // Later continuations only need the generic range.
                    self.cont_min = 0x80;
                    self.cont_max = 0xbf;
                    pos += 1;
                    if self.needed == 0 {
                        out.push(self.partial);
                    }
                } else {
                    // Invalid continuation: emit FFFD and resync on this
                    // byte without consuming it.
                    self.needed = 0;
                    out.push(REPLACEMENT);
                }
                continue;
            }

            if byte == ESC {
                return (pos + 1, true);
            }

            if byte < 0x80 {
                // Bulk ASCII: take the whole printable-or-control run up to
                // the next non-ASCII or ESC byte in one pass.
                let run = match memchr::memchr(ESC, &input[pos..]) {
                    Some(esc_off) => &input[pos..pos + esc_off],
                    None => &input[pos..],
                };
                let ascii_len = run
                    .iter()
                    .position(|&b| b >= 0x80)
                    .unwrap_or(run.len());
                out.extend(run[..ascii_len].iter().map(|&b| b as u32));
                pos += ascii_len;
                continue;
            }

            // Leading byte of a multi-byte sequence. The first-continuation
            // bounds fold in the overlong and surrogate checks, matching
            // the Unicode 15 table.
            let (bits, needed, min, max) = match byte {
                0xc2..=0xdf => ((byte & 0x1f) as u32, 1, 0x80, 0xbf),
                0xe0 => ((byte & 0x0f) as u32, 2, 0xa0, 0xbf),
                0xe1..=0xec | 0xee..=0xef => ((byte & 0x0f) as u32, 2, 0x80, 0xbf),
                0xed => ((byte & 0x0f) as u32, 2, 0x80, 0x9f),
                0xf0 => ((byte & 0x07) as u32, 3, 0x90, 0xbf),
                0xf1..=0xf3 => ((byte & 0x07) as u32, 3, 0x80, 0xbf),
                0xf4 => ((byte & 0x07) as u32, 3, 0x80, 0x8f),
                _ => {
                    // 0x80..0xc1 (bare continuation / overlong lead) and
                    // 0xf5..0xff are never valid.
                    out.push(REPLACEMENT);
                    pos += 1;
                    continue;
                }
            };
            self.partial = bits;
            self.needed = needed;
            self.cont_min = min;
            self.cont_max = max;
            pos += 1;
        }

        (pos, false)
    }
}
