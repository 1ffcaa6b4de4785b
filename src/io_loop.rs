//! The IO thread: pty reads, mailbox control messages, renderer wakeup.
//!
//! One dedicated OS thread per terminal runs a cooperative loop: drain the
//! mailbox, pull readable pty bytes, feed them to the parser under the
//! shared terminal mutex (in bounded chunks, so lock hold stays short),
//! flush queued writes, and signal the renderer when anything changed.
//! The thread suspends only in `Poller::wait`; mailbox producers wake it
//! through the poller's notifier.

use std::collections::VecDeque;
use std::os::fd::BorrowedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use polling::{Event, Events, PollMode, Poller};

use crate::stream::{StreamHandler, StreamPolicy};
use crate::terminal::Terminal;
use crate::vt_parser::Parser;

/// Read buffer size per loop iteration; also the parser batch bound, which
/// keeps terminal-mutex hold times in the low milliseconds.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Inline capacity of [`Message::WriteSmall`].
pub const SMALL_WRITE_CAP: usize = 38;

/// Poller key for the pty fd.
const PTY_KEY: usize = 1;

/// Viewport motion requested from the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ViewportTarget {
    Delta(i32),
    Top,
    Bottom,
}

/// Control messages accepted by the IO thread.
pub enum Message {
    /// Propagate a resize to the pty and the terminal model.
    Resize {
        cols: u16,
        rows: u16,
        pixel_width: u16,
        pixel_height: u16,
    },
    /// Small write, payload inline to avoid the heap on the hot key path.
    WriteSmall { buf: [u8; SMALL_WRITE_CAP], len: u8 },
    /// Shared payload the caller keeps alive until drained.
    WriteStable(Arc<[u8]>),
    /// Owned payload, freed by the loop after draining.
    WriteAlloc(Vec<u8>),
    ClearScreen,
    ScrollViewport(ViewportTarget),
    JumpToPrompt(i32),
    Inspector(bool),
}

impl Message {
    /// Build a small write, falling back to an owned one when it doesn't fit.
    pub fn write(bytes: &[u8]) -> Message {
        if bytes.len() <= SMALL_WRITE_CAP {
            let mut buf = [0u8; SMALL_WRITE_CAP];
            buf[..bytes.len()].copy_from_slice(bytes);
            Message::WriteSmall {
                buf,
                len: bytes.len() as u8,
            }
        } else {
            Message::WriteAlloc(bytes.to_vec())
        }
    }
}

/// Error returned to producers when the mailbox is at capacity.
#[derive(Debug, thiserror::Error)]
#[error("mailbox full")]
pub struct MailboxFull;

/// Bounded FIFO of control messages. Producers never block; a full
/// mailbox returns the message so the caller can retry or drop it.
pub struct Mailbox {
    queue: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Enqueue a message. Redundant resizes coalesce to the latest.
    pub fn push(&self, message: Message) -> Result<(), MailboxFull> {
        let mut queue = self.queue.lock().unwrap();
        if let (Message::Resize { .. }, Some(Message::Resize { .. })) = (&message, queue.back()) {
            *queue.back_mut().unwrap() = message;
            return Ok(());
        }
        if queue.len() >= self.capacity {
            return Err(MailboxFull);
        }
        queue.push_back(message);
        Ok(())
    }

    pub fn pop(&self) -> Option<Message> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

/// Level-triggered, coalesced wakeup signal between threads.
#[derive(Default)]
pub struct Wakeup {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Multiple raises before a wait coalesce into one.
    pub fn notify(&self) {
        let mut flag = self.flag.lock().unwrap();
        *flag = true;
        self.cond.notify_all();
    }

    /// Wait until the signal is raised or the timeout passes. Returns
    /// whether the signal fired, and lowers it.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().unwrap();
        let (mut flag, _) = self
            .cond
            .wait_timeout_while(flag, timeout, |fired| !*fired)
            .unwrap();
        std::mem::replace(&mut *flag, false)
    }

    /// Non-blocking check-and-clear.
    pub fn take(&self) -> bool {
        std::mem::replace(&mut *self.flag.lock().unwrap(), false)
    }
}

/// The pty as the IO loop sees it: a byte-duplex non-blocking fd pair with
/// a resize control. `crate::pty::Pty` is the production implementation;
/// tests substitute pipe pairs.
pub trait PtyDevice: Send + 'static {
    /// Fd polled for readability.
    fn poll_fd(&self) -> BorrowedFd<'_>;
    /// Non-blocking read. `Ok(None)` = would block, `Ok(Some(0))` = EOF.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<Option<usize>>;
    /// Non-blocking write; may be partial.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<Option<usize>>;
    fn resize(&mut self, cols: u16, rows: u16, pixel_width: u16, pixel_height: u16)
        -> std::io::Result<()>;
}

enum Pending {
    Small { buf: [u8; SMALL_WRITE_CAP], len: usize, off: usize },
    Stable { data: Arc<[u8]>, off: usize },
    Owned { data: Vec<u8>, off: usize },
}

impl Pending {
    fn remaining(&self) -> &[u8] {
        match self {
            Pending::Small { buf, len, off } => &buf[*off..*len],
            Pending::Stable { data, off } => &data[*off..],
            Pending::Owned { data, off } => &data[*off..],
        }
    }

    fn advance(&mut self, n: usize) -> bool {
        let (off, len) = match self {
            Pending::Small { len, off, .. } => (off, *len),
            Pending::Stable { data, off } => (off, data.len()),
            Pending::Owned { data, off } => (off, data.len()),
        };
        *off += n;
        *off >= len
    }
}

/// Handle to a running IO thread.
pub struct IoHandle {
    mailbox: Arc<Mailbox>,
    poller: Arc<Poller>,
    stop: Arc<AtomicBool>,
    inspector: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl IoHandle {
    /// Send a control message and wake the loop.
    pub fn send(&self, message: Message) -> Result<(), MailboxFull> {
        self.mailbox.push(message)?;
        let _ = self.poller.notify();
        Ok(())
    }

    /// Whether the inspector overlay is currently enabled.
    pub fn inspector_enabled(&self) -> bool {
        self.inspector.load(Ordering::Acquire)
    }

    /// Ask the thread to stop and wait for it. Pending mailbox messages
    /// are dropped.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.poller.notify();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for IoHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.poller.notify();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn the IO thread for a terminal.
pub fn spawn<P: PtyDevice>(
    pty: P,
    terminal: Arc<Mutex<Terminal>>,
    renderer_wakeup: Arc<Wakeup>,
    policy: StreamPolicy,
    mailbox_capacity: usize,
) -> std::io::Result<IoHandle> {
    let poller = Arc::new(Poller::new()?);
    let mailbox = Arc::new(Mailbox::new(mailbox_capacity));
    let stop = Arc::new(AtomicBool::new(false));
    let inspector = Arc::new(AtomicBool::new(false));

    let thread_poller = poller.clone();
    let thread_mailbox = mailbox.clone();
    let thread_stop = stop.clone();
    let thread_inspector = inspector.clone();

    let join = std::thread::Builder::new()
        .name("terminal-io".into())
        .spawn(move || {
            let mut io = IoLoop {
                pty,
                terminal,
                renderer_wakeup,
                policy,
                poller: thread_poller,
                mailbox: thread_mailbox,
                stop: thread_stop,
                parser: Parser::new(),
                write_queue: VecDeque::new(),
                read_buf: vec![0u8; READ_BUF_SIZE],
                responses: Vec::new(),
                inspector: thread_inspector,
            };
            io.run();
        })?;

    Ok(IoHandle {
        mailbox,
        poller,
        stop,
        inspector,
        join: Some(join),
    })
}

struct IoLoop<P: PtyDevice> {
    pty: P,
    terminal: Arc<Mutex<Terminal>>,
    renderer_wakeup: Arc<Wakeup>,
    policy: StreamPolicy,
    poller: Arc<Poller>,
    mailbox: Arc<Mailbox>,
    stop: Arc<AtomicBool>,
    parser: Parser,
    write_queue: VecDeque<Pending>,
    read_buf: Vec<u8>,
    responses: Vec<u8>,
    /// Surface-toggled inspector overlay; the renderer polls this.
    inspector: Arc<AtomicBool>,
}

impl<P: PtyDevice> IoLoop<P> {
    fn run(&mut self) {
        // Level-triggered registration: the fd stays armed while readable.
        if let Err(e) = unsafe {
            self.poller
                .add_with_mode(&self.pty.poll_fd(), Event::readable(PTY_KEY), PollMode::Level)
        } {
            log::error!("failed to register pty with poller: {}", e);
            return;
        }

        let mut events = Events::new();
        log::debug!("io loop started");

        'outer: while !self.stop.load(Ordering::Acquire) {
            events.clear();
            // Block until the pty is readable or a producer notifies.
            // A pending write bounds the wait so flushes retry promptly.
            let timeout = if self.write_queue.is_empty() {
                None
            } else {
                Some(Duration::from_millis(10))
            };
            if let Err(e) = self.poller.wait(&mut events, timeout) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("poller error: {}", e);
                break;
            }

            let mut mutated = false;

            // (a) Drain the mailbox. The stop signal only interrupts
            // between messages: the popped message always completes.
            while let Some(message) = self.mailbox.pop() {
                mutated |= self.handle_message(message);
                if self.stop.load(Ordering::Acquire) {
                    break 'outer;
                }
            }

            // (b) Consume readable pty bytes, feeding the parser under the
            // terminal lock one buffer at a time.
            loop {
                match self.pty.read(&mut self.read_buf) {
                    Ok(Some(0)) => {
                        log::debug!("pty EOF, io loop exiting");
                        self.flush_writes();
                        self.renderer_wakeup.notify();
                        break 'outer;
                    }
                    Ok(Some(n)) => {
                        self.feed_parser(n);
                        mutated = true;
                    }
                    Ok(None) => break,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("pty read error: {}", e);
                        break 'outer;
                    }
                }
                // Allocation failure in the grid is fatal for this stream.
                if self.terminal.lock().unwrap().alloc_failed() {
                    log::error!("terminal page allocation failed, stopping io loop");
                    break 'outer;
                }
            }

            // (c) Flush queued writes; partial writes stay queued.
            self.flush_writes();

            // (d) Wake the renderer unless a synchronized update holds
            // frames back.
            if mutated && !self.terminal.lock().unwrap().is_synchronized() {
                self.renderer_wakeup.notify();
            }
        }

        let _ = self.poller.delete(&self.pty.poll_fd());
        log::debug!("io loop stopped");
    }

    /// Parse one read buffer's worth of bytes inside the terminal lock.
    fn feed_parser(&mut self, n: usize) {
        let mut term = self.terminal.lock().unwrap();
        let mut handler = StreamHandler::new(&mut term, &mut self.responses, self.policy);
        self.parser.parse(&self.read_buf[..n], &mut handler);
        drop(term);

        if !self.responses.is_empty() {
            let bytes = std::mem::take(&mut self.responses);
            self.write_queue.push_back(Pending::Owned { data: bytes, off: 0 });
        }
    }

    fn handle_message(&mut self, message: Message) -> bool {
        match message {
            Message::Resize {
                cols,
                rows,
                pixel_width,
                pixel_height,
            } => {
                if let Err(e) = self.pty.resize(cols, rows, pixel_width, pixel_height) {
                    log::warn!("pty resize failed: {}", e);
                }
                self.terminal
                    .lock()
                    .unwrap()
                    .resize(cols as usize, rows as usize);
                true
            }
            Message::WriteSmall { buf, len } => {
                self.write_queue.push_back(Pending::Small {
                    buf,
                    len: len as usize,
                    off: 0,
                });
                false
            }
            Message::WriteStable(data) => {
                self.write_queue.push_back(Pending::Stable { data, off: 0 });
                false
            }
            Message::WriteAlloc(data) => {
                self.write_queue.push_back(Pending::Owned { data, off: 0 });
                false
            }
            Message::ClearScreen => {
                let mut term = self.terminal.lock().unwrap();
                term.erase_display(2, false);
                true
            }
            Message::ScrollViewport(target) => {
                let mut term = self.terminal.lock().unwrap();
                match target {
                    ViewportTarget::Delta(delta) => term.scroll_viewport(delta),
                    ViewportTarget::Top => term.scroll_viewport_to_top(),
                    ViewportTarget::Bottom => term.scroll_viewport_to_bottom(),
                }
                true
            }
            Message::JumpToPrompt(n) => {
                self.terminal.lock().unwrap().jump_to_prompt(n);
                true
            }
            Message::Inspector(on) => {
                self.inspector.store(on, Ordering::Release);
                log::debug!("inspector {}", if on { "enabled" } else { "disabled" });
                true
            }
        }
    }

    /// Write queued bytes to the pty without blocking; partial progress is
    /// kept at the queue front for the next pass.
    fn flush_writes(&mut self) {
        while let Some(front) = self.write_queue.front_mut() {
            let chunk = front.remaining();
            if chunk.is_empty() {
                self.write_queue.pop_front();
                continue;
            }
            match self.pty.write(chunk) {
                Ok(Some(0)) | Ok(None) => break,
                Ok(Some(n)) => {
                    if front.advance(n) {
                        self.write_queue.pop_front();
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("pty write error: {}", e);
                    self.write_queue.clear();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustix::fd::{AsFd, OwnedFd};
    use rustix::io::Errno;
    use rustix::pipe::{pipe_with, PipeFlags};

    /// Pipe-backed stand-in for the pty: one pipe feeds the loop (child
    /// output), another captures what the loop writes back.
    struct PipePty {
        out_rd: OwnedFd,
        in_wr: OwnedFd,
        resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    }

    struct PipeEnds {
        /// Write here to simulate child output.
        out_wr: OwnedFd,
        /// Read here to observe loop write-backs.
        in_rd: OwnedFd,
        resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    }

    fn pipe_pty() -> (PipePty, PipeEnds) {
        let (out_rd, out_wr) = pipe_with(PipeFlags::NONBLOCK | PipeFlags::CLOEXEC).unwrap();
        let (in_rd, in_wr) = pipe_with(PipeFlags::NONBLOCK | PipeFlags::CLOEXEC).unwrap();
        let resizes = Arc::new(Mutex::new(Vec::new()));
        (
            PipePty {
                out_rd,
                in_wr,
                resizes: resizes.clone(),
            },
            PipeEnds {
                out_wr,
                in_rd,
                resizes,
            },
        )
    }

    impl PtyDevice for PipePty {
        fn poll_fd(&self) -> BorrowedFd<'_> {
            self.out_rd.as_fd()
        }

        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<Option<usize>> {
            match rustix::io::read(&self.out_rd, buf) {
                Ok(n) => Ok(Some(n)),
                Err(Errno::AGAIN) => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn write(&mut self, buf: &[u8]) -> std::io::Result<Option<usize>> {
            match rustix::io::write(&self.in_wr, buf) {
                Ok(n) => Ok(Some(n)),
                Err(Errno::AGAIN) => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn resize(&mut self, cols: u16, rows: u16, _pw: u16, _ph: u16) -> std::io::Result<()> {
            self.resizes.lock().unwrap().push((cols, rows));
            Ok(())
        }
    }

    fn wait_for<F: FnMut() -> bool>(mut pred: F) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached within 2s");
    }

    fn row_text(term: &Terminal, y: usize) -> String {
        term.screen()
            .row(y)
            .cells
            .iter()
            .map(|c| c.codepoint().unwrap_or(' '))
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn mailbox_is_bounded_and_coalesces_resizes() {
        let mailbox = Mailbox::new(2);
        mailbox.push(Message::ClearScreen).unwrap();
        mailbox
            .push(Message::Resize {
                cols: 80,
                rows: 24,
                pixel_width: 0,
                pixel_height: 0,
            })
            .unwrap();
        // A second resize replaces the first instead of filling the queue.
        mailbox
            .push(Message::Resize {
                cols: 100,
                rows: 30,
                pixel_width: 0,
                pixel_height: 0,
            })
            .unwrap();
        assert_eq!(mailbox.len(), 2);
        assert!(mailbox.push(Message::ClearScreen).is_err());

        mailbox.pop();
        match mailbox.pop() {
            Some(Message::Resize { cols, rows, .. }) => assert_eq!((cols, rows), (100, 30)),
            _ => panic!("expected the coalesced resize"),
        }
    }

    #[test]
    fn wakeup_coalesces_and_clears() {
        let wakeup = Wakeup::new();
        wakeup.notify();
        wakeup.notify();
        assert!(wakeup.wait_timeout(Duration::from_millis(100)));
        assert!(!wakeup.take());
        assert!(!wakeup.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn bytes_flow_from_pty_to_terminal() {
        let (pty, ends) = pipe_pty();
        let terminal = Arc::new(Mutex::new(Terminal::new(20, 4, 100)));
        let wakeup = Arc::new(Wakeup::new());
        let handle = spawn(
            pty,
            terminal.clone(),
            wakeup.clone(),
            StreamPolicy::default(),
            64,
        )
        .unwrap();

        rustix::io::write(&ends.out_wr, b"hello\r\nworld").unwrap();
        assert!(wakeup.wait_timeout(Duration::from_secs(2)));
        wait_for(|| row_text(&terminal.lock().unwrap(), 1) == "world");
        assert_eq!(row_text(&terminal.lock().unwrap(), 0), "hello");

        handle.stop();
    }

    #[test]
    fn responses_are_written_back() {
        let (pty, ends) = pipe_pty();
        let terminal = Arc::new(Mutex::new(Terminal::new(20, 4, 100)));
        let wakeup = Arc::new(Wakeup::new());
        let handle = spawn(
            pty,
            terminal.clone(),
            wakeup.clone(),
            StreamPolicy::default(),
            64,
        )
        .unwrap();

        // DSR 6 must produce a cursor position report on the write path.
        rustix::io::write(&ends.out_wr, b"\x1b[6n").unwrap();
        let mut buf = [0u8; 64];
        let mut got = Vec::new();
        wait_for(|| {
            if let Ok(n) = rustix::io::read(&ends.in_rd, &mut buf) {
                got.extend_from_slice(&buf[..n]);
            }
            got == b"\x1b[1;1R"
        });

        handle.stop();
    }

    #[test]
    fn mailbox_messages_drive_terminal_and_pty() {
        let (pty, ends) = pipe_pty();
        let terminal = Arc::new(Mutex::new(Terminal::new(20, 4, 100)));
        let wakeup = Arc::new(Wakeup::new());
        let handle = spawn(
            pty,
            terminal.clone(),
            wakeup.clone(),
            StreamPolicy::default(),
            64,
        )
        .unwrap();

        handle
            .send(Message::Resize {
                cols: 30,
                rows: 10,
                pixel_width: 300,
                pixel_height: 200,
            })
            .unwrap();
        wait_for(|| terminal.lock().unwrap().cols() == 30);
        assert_eq!(*ends.resizes.lock().unwrap(), vec![(30, 10)]);

        handle.send(Message::write(b"typed")).unwrap();
        let mut buf = [0u8; 64];
        let mut got = Vec::new();
        wait_for(|| {
            if let Ok(n) = rustix::io::read(&ends.in_rd, &mut buf) {
                got.extend_from_slice(&buf[..n]);
            }
            got == b"typed"
        });

        handle.stop();
    }

    #[test]
    fn eof_stops_the_loop_cleanly() {
        let (pty, ends) = pipe_pty();
        let terminal = Arc::new(Mutex::new(Terminal::new(20, 4, 100)));
        let wakeup = Arc::new(Wakeup::new());
        let handle = spawn(
            pty,
            terminal.clone(),
            wakeup.clone(),
            StreamPolicy::default(),
            64,
        )
        .unwrap();

        rustix::io::write(&ends.out_wr, b"bye").unwrap();
        drop(ends.out_wr); // EOF on the read side
        wait_for(|| row_text(&terminal.lock().unwrap(), 0) == "bye");

        // The thread exits on its own; stop() just joins.
        handle.stop();
    }

    #[test]
    fn synchronized_mode_defers_wakeup() {
        let (pty, ends) = pipe_pty();
        let terminal = Arc::new(Mutex::new(Terminal::new(20, 4, 100)));
        let wakeup = Arc::new(Wakeup::new());
        let handle = spawn(
            pty,
            terminal.clone(),
            wakeup.clone(),
            StreamPolicy::default(),
            64,
        )
        .unwrap();

        rustix::io::write(&ends.out_wr, b"\x1b[?2026hqueued").unwrap();
        wait_for(|| row_text(&terminal.lock().unwrap(), 0) == "queued");
        // Drain any wakeup that raced ahead of the mode set, then verify
        // no further wakeups arrive while synchronized.
        wakeup.take();
        rustix::io::write(&ends.out_wr, b"more").unwrap();
        wait_for(|| row_text(&terminal.lock().unwrap(), 0) == "queuedmore");
        assert!(!wakeup.wait_timeout(Duration::from_millis(50)));

        rustix::io::write(&ends.out_wr, b"\x1b[?2026l!").unwrap();
        assert!(wakeup.wait_timeout(Duration::from_secs(2)));

        handle.stop();
    }
}
