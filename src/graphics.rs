//! Kitty graphics protocol: image side-table and placement map.
//!
//! APC payloads (`ESC _ G ... ESC \`) carry `key=value` control pairs plus
//! base64 image data, possibly split over many chunks. This module parses
//! commands, assembles chunked transmissions, and maintains the opaque
//! image store and placement map the terminal model exercises. Pixel
//! decoding (PNG etc.) is a renderer concern; payload bytes are stored
//! as-is after transport decoding (base64 + optional zlib).
//!
//! Protocol reference: https://sw.kovidgoyal.net/kitty/graphics-protocol/

use std::collections::HashMap;
use std::io::Read;

use base64::Engine;
use flate2::read::ZlibDecoder;

use crate::page::Pin;

/// Action requested by a graphics command.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Action {
    /// Transmit image data (store but don't display).
    #[default]
    Transmit,
    /// Transmit and immediately place.
    TransmitAndDisplay,
    /// Place a previously transmitted image.
    Put,
    /// Delete images and/or placements.
    Delete,
    /// Capability query; never stores.
    Query,
}

/// Payload pixel format. Stored, not interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Format {
    /// 24-bit RGB.
    Rgb,
    /// 32-bit RGBA.
    #[default]
    Rgba,
    /// PNG-encoded.
    Png,
}

/// Transmission medium. Only direct transmission is accepted here; file
/// mediums are a platform concern and are refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Transmission {
    #[default]
    Direct,
    File,
    TempFile,
    SharedMemory,
}

/// What a delete command targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DeleteTarget {
    /// Every placement; uppercase `A` also frees image data.
    #[default]
    All,
    /// Placements of one image id.
    ById,
    /// Placements of one image number.
    ByNumber,
    /// Placements intersecting the cursor cell.
    AtCursor,
}

/// A parsed graphics command.
#[derive(Clone, Debug, Default)]
pub struct GraphicsCommand {
    pub action: Action,
    pub format: Format,
    pub transmission: Transmission,
    pub image_id: Option<u32>,
    /// Client-chosen image number (alternative addressing).
    pub image_number: Option<u32>,
    pub placement_id: Option<u32>,
    /// Pixel dimensions, required for raw RGB/RGBA payloads.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Display size in cells (0 = derive from pixels).
    pub cols: u32,
    pub rows: u32,
    pub z_index: i32,
    /// Zlib compression flag (`o=z`).
    pub compressed: bool,
    /// More chunks follow (`m=1`).
    pub more_chunks: bool,
    /// Reply suppression: 0 = normal, 1 = suppress OK, 2 = suppress all.
    pub quiet: u8,
    /// `C=1`: leave the cursor where it is after placing.
    pub no_cursor_move: bool,
    pub delete_target: DeleteTarget,
    /// Lowercase delete keeps image data; uppercase frees it.
    pub delete_frees_data: bool,
    /// Base64-decoded payload bytes.
    pub payload: Vec<u8>,
}

impl GraphicsCommand {
    /// Parse APC data of the form `G<key>=<value>,...;<base64>`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let data = data.strip_prefix(b"G")?;
        let (control, payload) = match data.iter().position(|&b| b == b';') {
            Some(pos) => (&data[..pos], &data[pos + 1..]),
            None => (data, &[][..]),
        };

        let control = std::str::from_utf8(control).ok()?;
        let mut cmd = GraphicsCommand::default();

        for pair in control.split(',') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = match pair.split_once('=') {
                Some(kv) => kv,
                None => (pair, ""),
            };
            match key {
                "a" => {
                    cmd.action = match value {
                        "t" => Action::Transmit,
                        "T" => Action::TransmitAndDisplay,
                        "p" => Action::Put,
                        "d" => Action::Delete,
                        "q" => Action::Query,
                        _ => Action::Transmit,
                    }
                }
                "f" => {
                    cmd.format = match value {
                        "24" => Format::Rgb,
                        "32" => Format::Rgba,
                        "100" => Format::Png,
                        _ => Format::Rgba,
                    }
                }
                "t" => {
                    cmd.transmission = match value {
                        "d" => Transmission::Direct,
                        "f" => Transmission::File,
                        "t" => Transmission::TempFile,
                        "s" => Transmission::SharedMemory,
                        _ => Transmission::Direct,
                    }
                }
                "i" => cmd.image_id = value.parse().ok(),
                "I" => cmd.image_number = value.parse().ok(),
                "p" => cmd.placement_id = value.parse().ok(),
                "s" => cmd.width = value.parse().ok(),
                "v" => cmd.height = value.parse().ok(),
                "c" => cmd.cols = value.parse().unwrap_or(0),
                "r" => cmd.rows = value.parse().unwrap_or(0),
                "z" => cmd.z_index = value.parse().unwrap_or(0),
                "o" => cmd.compressed = value == "z",
                "m" => cmd.more_chunks = value == "1",
                "q" => cmd.quiet = value.parse().unwrap_or(0),
                "C" => cmd.no_cursor_move = value == "1",
                "d" => {
                    cmd.delete_frees_data = value.chars().next().is_some_and(|c| c.is_uppercase());
                    cmd.delete_target = match value.to_ascii_lowercase().as_str() {
                        "a" | "" => DeleteTarget::All,
                        "i" => DeleteTarget::ById,
                        "n" => DeleteTarget::ByNumber,
                        "c" => DeleteTarget::AtCursor,
                        _ => DeleteTarget::All,
                    };
                }
                _ => {}
            }
        }

        if !payload.is_empty() {
            cmd.payload = base64::engine::general_purpose::STANDARD
                .decode(payload)
                .unwrap_or_default();
        }
        Some(cmd)
    }
}

/// A stored image: opaque bytes plus metadata.
#[derive(Clone, Debug)]
pub struct ImageEntry {
    pub id: u32,
    pub number: Option<u32>,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
    /// Live placements referencing this image.
    pub refcount: u32,
}

/// A placement: where an image shows on the grid.
#[derive(Clone, Debug)]
pub struct Placement {
    pub image_id: u32,
    pub placement_id: u32,
    /// Anchor cell; invalidated when its page is pruned.
    pub pin: Pin,
    pub cols: u32,
    pub rows: u32,
    pub z_index: i32,
}

/// Outcome of a display command, for cursor movement in the handler.
#[derive(Clone, Copy, Debug)]
pub struct PlacementResult {
    pub cols: u32,
    pub rows: u32,
    pub suppress_cursor_move: bool,
}

/// In-flight chunked transmission.
struct ChunkBuffer {
    cmd: GraphicsCommand,
    data: Vec<u8>,
}

/// The image side-table and placement map.
#[derive(Default)]
pub struct ImageStorage {
    images: HashMap<u32, ImageEntry>,
    placements: HashMap<(u32, u32), Placement>,
    chunks: Option<ChunkBuffer>,
    next_auto_id: u32,
    /// Render-side invalidation flag: placements changed.
    pub dirty: bool,
}

impl ImageStorage {
    pub fn new() -> Self {
        Self {
            next_auto_id: 1_000_000,
            ..Self::default()
        }
    }

    pub fn image(&self, id: u32) -> Option<&ImageEntry> {
        self.images.get(&id)
    }

    pub fn placements(&self) -> impl Iterator<Item = &Placement> {
        self.placements.values()
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.placements.clear();
        self.chunks = None;
        self.dirty = true;
    }

    /// Apply a parsed command. Returns the reply to queue (respecting the
    /// quiet field) and the placement outcome, if any.
    pub fn process_command(
        &mut self,
        cmd: GraphicsCommand,
        cursor_pin: Pin,
        cell_width: f32,
        cell_height: f32,
    ) -> (Option<String>, Option<PlacementResult>) {
        match cmd.action {
            Action::Query => (self.query_reply(&cmd), None),
            Action::Transmit | Action::TransmitAndDisplay => {
                self.transmit(cmd, cursor_pin, cell_width, cell_height)
            }
            Action::Put => self.put(cmd, cursor_pin, cell_width, cell_height),
            Action::Delete => {
                self.delete(&cmd, cursor_pin);
                (None, None)
            }
        }
    }

    /// Answer an `a=q` capability probe without storing anything.
    fn query_reply(&self, cmd: &GraphicsCommand) -> Option<String> {
        let id = cmd.image_id.unwrap_or(0);
        let reply = if cmd.transmission != Transmission::Direct {
            format!("\x1b_Gi={};EBADTRANS:only direct transmission\x1b\\", id)
        } else if cmd.format != Format::Png && (cmd.width.is_none() || cmd.height.is_none()) {
            format!("\x1b_Gi={};EINVAL:missing dimensions\x1b\\", id)
        } else {
            format!("\x1b_Gi={};OK\x1b\\", id)
        };
        // q=2 silences even errors.
        if cmd.quiet >= 2 || (cmd.quiet == 1 && reply.contains(";OK")) {
            None
        } else {
            Some(reply)
        }
    }

    fn transmit(
        &mut self,
        cmd: GraphicsCommand,
        cursor_pin: Pin,
        cell_width: f32,
        cell_height: f32,
    ) -> (Option<String>, Option<PlacementResult>) {
        // Accumulate chunks until m=0 arrives.
        if let Some(buffer) = self.chunks.as_mut() {
            buffer.data.extend_from_slice(&cmd.payload);
            if cmd.more_chunks {
                return (None, None);
            }
            let mut buffer = self.chunks.take().unwrap();
            buffer.cmd.payload = std::mem::take(&mut buffer.data);
            return self.finish_transmit(buffer.cmd, cursor_pin, cell_width, cell_height);
        }

        if cmd.more_chunks {
            let data = cmd.payload.clone();
            self.chunks = Some(ChunkBuffer { cmd, data });
            return (None, None);
        }

        self.finish_transmit(cmd, cursor_pin, cell_width, cell_height)
    }

    fn finish_transmit(
        &mut self,
        mut cmd: GraphicsCommand,
        cursor_pin: Pin,
        cell_width: f32,
        cell_height: f32,
    ) -> (Option<String>, Option<PlacementResult>) {
        let id = match cmd.image_id {
            Some(id) => id,
            None => {
                let id = self.next_auto_id;
                self.next_auto_id += 1;
                id
            }
        };

        if cmd.transmission != Transmission::Direct {
            return (
                self.reply(&cmd, id, "EBADTRANS:only direct transmission"),
                None,
            );
        }

        if cmd.compressed {
            let mut decoder = ZlibDecoder::new(&cmd.payload[..]);
            let mut inflated = Vec::new();
            if decoder.read_to_end(&mut inflated).is_err() {
                return (self.reply(&cmd, id, "EINVAL:bad zlib stream"), None);
            }
            cmd.payload = inflated;
        }

        let (width, height) = match (cmd.format, cmd.width, cmd.height) {
            // Raw formats need explicit dimensions that match the payload.
            (Format::Rgb, Some(w), Some(h)) if cmd.payload.len() as u64 == w as u64 * h as u64 * 3 => (w, h),
            (Format::Rgba, Some(w), Some(h)) if cmd.payload.len() as u64 == w as u64 * h as u64 * 4 => (w, h),
            (Format::Png, w, h) => (w.unwrap_or(0), h.unwrap_or(0)),
            _ => return (self.reply(&cmd, id, "EINVAL:payload size mismatch"), None),
        };

        self.images.insert(
            id,
            ImageEntry {
                id,
                number: cmd.image_number,
                format: cmd.format,
                width,
                height,
                bytes: std::mem::take(&mut cmd.payload),
                refcount: 0,
            },
        );
        log::debug!("stored image id={} {}x{} {:?}", id, width, height, cmd.format);

        let placement = if cmd.action == Action::TransmitAndDisplay {
            self.add_placement(&cmd, id, cursor_pin, cell_width, cell_height)
        } else {
            None
        };
        (self.reply(&cmd, id, "OK"), placement)
    }

    fn put(
        &mut self,
        cmd: GraphicsCommand,
        cursor_pin: Pin,
        cell_width: f32,
        cell_height: f32,
    ) -> (Option<String>, Option<PlacementResult>) {
        let Some(id) = cmd.image_id.or_else(|| {
            cmd.image_number
                .and_then(|n| self.images.values().find(|e| e.number == Some(n)).map(|e| e.id))
        }) else {
            return (None, None);
        };
        if !self.images.contains_key(&id) {
            return (self.reply(&cmd, id, "ENOENT:no such image"), None);
        }
        let placement = self.add_placement(&cmd, id, cursor_pin, cell_width, cell_height);
        (self.reply(&cmd, id, "OK"), placement)
    }

    /// Insert a placement, bumping the image refcount. Atomic: the entry
    /// appears fully formed or not at all.
    fn add_placement(
        &mut self,
        cmd: &GraphicsCommand,
        image_id: u32,
        pin: Pin,
        cell_width: f32,
        cell_height: f32,
    ) -> Option<PlacementResult> {
        let entry = self.images.get_mut(&image_id)?;

        // Display size: explicit cells, or pixels rounded up to cells.
        let cols = if cmd.cols > 0 {
            cmd.cols
        } else {
            (entry.width as f32 / cell_width.max(1.0)).ceil() as u32
        };
        let rows = if cmd.rows > 0 {
            cmd.rows
        } else {
            (entry.height as f32 / cell_height.max(1.0)).ceil() as u32
        };

        let placement_id = cmd.placement_id.unwrap_or(0);
        let old = self.placements.insert(
            (image_id, placement_id),
            Placement {
                image_id,
                placement_id,
                pin,
                cols,
                rows,
                z_index: cmd.z_index,
            },
        );
        if old.is_none() {
            entry.refcount += 1;
        }
        self.dirty = true;
        Some(PlacementResult {
            cols,
            rows,
            suppress_cursor_move: cmd.no_cursor_move,
        })
    }

    /// Delete placements (and optionally image data) by criteria.
    fn delete(&mut self, cmd: &GraphicsCommand, cursor_pin: Pin) {
        let frees = cmd.delete_frees_data;
        let mut touched: Vec<u32> = Vec::new();
        match cmd.delete_target {
            DeleteTarget::All => {
                touched.extend(self.placements.values().map(|p| p.image_id));
                self.placements.clear();
            }
            DeleteTarget::ById => {
                if let Some(id) = cmd.image_id {
                    self.placements.retain(|_, p| {
                        let hit = p.image_id == id
                            && cmd
                                .placement_id
                                .map(|pid| pid == p.placement_id)
                                .unwrap_or(true);
                        if hit {
                            touched.push(p.image_id);
                        }
                        !hit
                    });
                }
            }
            DeleteTarget::ByNumber => {
                if let Some(n) = cmd.image_number {
                    let ids: Vec<u32> = self
                        .images
                        .values()
                        .filter(|e| e.number == Some(n))
                        .map(|e| e.id)
                        .collect();
                    self.placements.retain(|_, p| {
                        let hit = ids.contains(&p.image_id);
                        if hit {
                            touched.push(p.image_id);
                        }
                        !hit
                    });
                }
            }
            DeleteTarget::AtCursor => {
                self.placements.retain(|_, p| {
                    let hit = p.pin == cursor_pin;
                    if hit {
                        touched.push(p.image_id);
                    }
                    !hit
                });
            }
        }

        for id in touched {
            if let Some(entry) = self.images.get_mut(&id) {
                entry.refcount = entry.refcount.saturating_sub(1);
            }
        }
        if frees {
            // Free image data whose placements are all gone.
            self.images.retain(|_, e| e.refcount > 0);
        }
        self.dirty = true;
    }

    /// Reply for a command, honoring the quiet field.
    fn reply(&self, cmd: &GraphicsCommand, id: u32, status: &str) -> Option<String> {
        let ok = status == "OK";
        if cmd.quiet >= 2 || (cmd.quiet == 1 && ok) {
            return None;
        }
        Some(format!("\x1b_Gi={};{}\x1b\\", id, status))
    }
}
