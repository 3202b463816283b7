//! Audio output plumbing.
//!
//! Audio frames arrive decoded from the transport (interleaved 16-bit
//! PCM). The receive path must never block on the audio device, so frames
//! land in a small bounded queue and a writer thread feeds the platform
//! [`AudioSink`]. Overflow drops the oldest frame — late audio is worse
//! than missing audio.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::Result;

/// Pending audio frames before overflow dropping starts.
pub const AUDIO_QUEUE_CAPACITY: usize = 8;

/// Platform audio output.
pub trait AudioSink: Send {
    /// Prepare the output port.
    fn configure(&mut self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Block until the frame is queued on the device.
    fn play(&mut self, samples: &[i16]);
}

#[derive(Default)]
struct QueueState {
    frames: VecDeque<Vec<i16>>,
    closed: bool,
}

struct AudioShared {
    state: Mutex<QueueState>,
    cond: Condvar,
    drops: AtomicU32,
}

/// Bounded audio frame queue plus its writer thread.
pub struct AudioPipeline {
    shared: Arc<AudioShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPipeline {
    /// Configure the sink and start the writer thread.
    pub fn start(mut sink: Box<dyn AudioSink>, sample_rate: u32, channels: u16) -> Result<Self> {
        sink.configure(sample_rate, channels)?;

        let shared = Arc::new(AudioShared {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
            drops: AtomicU32::new(0),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("farplay-audio".into())
            .spawn(move || audio_worker(worker_shared, sink))
            .expect("spawn audio thread");

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a decoded frame; never blocks.
    pub fn submit(&self, samples: &[i16]) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        if state.frames.len() >= AUDIO_QUEUE_CAPACITY {
            state.frames.pop_front();
            self.shared.drops.fetch_add(1, Ordering::Relaxed);
        }
        state.frames.push_back(samples.to_vec());
        self.shared.cond.notify_one();
    }

    /// Frames discarded by overflow.
    pub fn drops(&self) -> u32 {
        self.shared.drops.load(Ordering::Relaxed)
    }

    /// Stop the writer. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
        }
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn audio_worker(shared: Arc<AudioShared>, mut sink: Box<dyn AudioSink>) {
    loop {
        let frame = {
            let mut state = shared.state.lock();
            while state.frames.is_empty() && !state.closed {
                shared.cond.wait(&mut state);
            }
            match state.frames.pop_front() {
                Some(frame) => frame,
                None => break,
            }
        };
        sink.play(&frame);
    }
    debug!("PIPE/audio: worker exited");
}
