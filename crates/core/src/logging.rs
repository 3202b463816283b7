//! Bounded, non-blocking log delivery.
//!
//! The streaming threads must never block on log I/O, so formatted log
//! lines go through a bounded ring: writers enqueue complete lines and a
//! dedicated thread drains them to the destination. When the ring is
//! full the *oldest* line is dropped and counted — losing history beats
//! stalling the decode or input path.
//!
//! Wiring: [`LogQueue::writer`] hands out [`LogLineWriter`]s implementing
//! `io::Write`, which `tracing_subscriber`'s `fmt` layer accepts through
//! its closure-based `MakeWriter` (`move || queue.writer()`). The
//! [`LogWriterThread`] owns the destination.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::level_filters::LevelFilter;

use crate::config::LogProfile;

/// `tracing` level filter for a configured log profile.
pub fn level_filter(profile: LogProfile) -> LevelFilter {
    match profile {
        LogProfile::Off => LevelFilter::OFF,
        LogProfile::Errors => LevelFilter::ERROR,
        LogProfile::Standard => LevelFilter::INFO,
        LogProfile::Verbose => LevelFilter::TRACE,
    }
}

/// Expand a log path template: `{session}` becomes the session
/// generation.
pub fn expand_log_path(template: &str, generation: u32) -> String {
    template.replace("{session}", &generation.to_string())
}

#[derive(Default)]
struct RingState {
    lines: VecDeque<Vec<u8>>,
    closed: bool,
}

struct QueueInner {
    state: Mutex<RingState>,
    cond: Condvar,
    depth: usize,
    dropped: AtomicU64,
}

/// Bounded ring of formatted log lines.
#[derive(Clone)]
pub struct LogQueue {
    inner: Arc<QueueInner>,
}

impl LogQueue {
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(RingState::default()),
                cond: Condvar::new(),
                depth: depth.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// A line-buffered `io::Write` front end for this queue.
    pub fn writer(&self) -> LogLineWriter {
        LogLineWriter {
            queue: self.inner.clone(),
            buf: Vec::with_capacity(128),
        }
    }

    /// Lines dropped to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Close the queue; the writer thread drains what is left and exits.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.cond.notify_all();
    }

    fn enqueue(inner: &QueueInner, line: Vec<u8>) {
        let mut state = inner.state.lock();
        if state.closed {
            return;
        }
        if state.lines.len() >= inner.depth {
            state.lines.pop_front();
            inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        state.lines.push_back(line);
        inner.cond.notify_one();
    }

    /// Blocking pop; `None` once closed and drained.
    fn pop(&self) -> Option<Vec<u8>> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(line) = state.lines.pop_front() {
                return Some(line);
            }
            if state.closed {
                return None;
            }
            self.inner.cond.wait(&mut state);
        }
    }
}

/// Line-buffered writer front end; enqueues on every newline.
pub struct LogLineWriter {
    queue: Arc<QueueInner>,
    buf: Vec<u8>,
}

impl Write for LogLineWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buf, rest);
            LogQueue::enqueue(&self.queue, line);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogLineWriter {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            let line = std::mem::take(&mut self.buf);
            LogQueue::enqueue(&self.queue, line);
        }
    }
}

/// Drains the queue to a destination on its own thread.
pub struct LogWriterThread {
    queue: LogQueue,
    handle: Option<JoinHandle<()>>,
}

impl LogWriterThread {
    pub fn spawn(queue: LogQueue, mut dest: Box<dyn Write + Send>) -> Self {
        let drain = queue.clone();
        let handle = thread::Builder::new()
            .name("farplay-log".into())
            .spawn(move || {
                while let Some(line) = drain.pop() {
                    if dest.write_all(&line).is_err() {
                        break;
                    }
                    let _ = dest.flush();
                }
            })
            .expect("spawn log writer");
        Self {
            queue,
            handle: Some(handle),
        }
    }

    /// Close the queue and wait for the drain to finish.
    pub fn shutdown(mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogWriterThread {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
