//! Hardware decoder abstraction and staged bring-up.
//!
//! The platform decoder is brought up through a strictly ordered ladder of
//! resource stages. Each stage allocates something the next one needs, and
//! a failure anywhere must release exactly the stages already reached — no
//! double-free, no leaks on partial init.
//!
//! [`DecoderDriver`] is the platform seam: it knows how to bring up and
//! tear down each stage and how to decode an access unit. [`StagedDecoder`]
//! owns the ladder bookkeeping — which stages are live, unwinding them in
//! reverse on failure or shutdown — so drivers never track it themselves.

use tracing::{debug, warn};

use crate::error::{Result, StreamError};

/// Decoder bring-up stages, in ladder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecoderStage {
    NotInit,
    InitGs,
    Framebuffer,
    AvcLib,
    DecoderMemblock,
    AvcDec,
    FramePacer,
}

impl DecoderStage {
    /// The ladder, bottom to top (excluding `NotInit`).
    pub const LADDER: [DecoderStage; 6] = [
        DecoderStage::InitGs,
        DecoderStage::Framebuffer,
        DecoderStage::AvcLib,
        DecoderStage::DecoderMemblock,
        DecoderStage::AvcDec,
        DecoderStage::FramePacer,
    ];
}

/// Geometry and reference budget for decoder bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub width: u32,
    pub height: u32,
    pub max_ref_frames: u32,
}

/// A decoded picture handed to the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    /// NV12 plane data as produced by the platform decoder.
    pub data: Vec<u8>,
    pub keyframe: bool,
}

/// Outcome of a decode call. "No output this call" and "decoder busy" are
/// ordinary outcomes, not errors.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    Picture(Picture),
    /// The decoder consumed the unit but produced nothing yet.
    NoOutput,
    /// The decoder could not accept the unit right now.
    Busy,
}

/// Platform decoder driver.
///
/// Implementations live outside the core (the hardware wrapper). The
/// ladder contract: `bring_up` is called in [`DecoderStage::LADDER`] order,
/// `tear_down` in reverse and only for stages that were brought up.
/// Stages must tolerate re-entry after a tear-down (the pipeline rebuilds
/// the decoder across guarded restarts).
pub trait DecoderDriver: Send {
    fn bring_up(&mut self, stage: DecoderStage, config: &DecoderConfig) -> Result<()>;

    fn tear_down(&mut self, stage: DecoderStage);

    /// Decode one access unit.
    fn decode(&mut self, access_unit: &[u8]) -> Result<DecodeStatus>;

    /// Called once on the decode worker before the first decode; drivers
    /// raise thread priority / pin affinity here.
    fn configure_worker_thread(&mut self) {}
}

/// Ladder bookkeeping around a [`DecoderDriver`].
pub struct StagedDecoder {
    driver: Box<dyn DecoderDriver>,
    reached: Vec<DecoderStage>,
}

impl std::fmt::Debug for StagedDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedDecoder")
            .field("reached", &self.reached)
            .finish()
    }
}

impl StagedDecoder {
    /// Bring the decoder up through the full ladder.
    ///
    /// On a stage failure, the stages already reached are torn down in
    /// reverse before the error is returned.
    pub fn bring_up(mut driver: Box<dyn DecoderDriver>, config: &DecoderConfig) -> Result<Self> {
        let mut reached = Vec::with_capacity(DecoderStage::LADDER.len());
        for stage in DecoderStage::LADDER {
            if let Err(e) = driver.bring_up(stage, config) {
                warn!(?stage, error = %e, "PIPE/decoder: stage failed, unwinding");
                for &done in reached.iter().rev() {
                    driver.tear_down(done);
                }
                return Err(StreamError::Decoder { stage });
            }
            reached.push(stage);
        }
        debug!(
            width = config.width,
            height = config.height,
            max_refs = config.max_ref_frames,
            "PIPE/decoder: ladder complete"
        );
        Ok(Self { driver, reached })
    }

    /// Highest stage currently live.
    pub fn stage(&self) -> DecoderStage {
        self.reached.last().copied().unwrap_or(DecoderStage::NotInit)
    }

    pub fn decode(&mut self, access_unit: &[u8]) -> Result<DecodeStatus> {
        self.driver.decode(access_unit)
    }

    pub fn configure_worker_thread(&mut self) {
        self.driver.configure_worker_thread();
    }

    /// Tear down every live stage, top first. Idempotent.
    pub fn shutdown(&mut self) {
        while let Some(stage) = self.reached.pop() {
            self.driver.tear_down(stage);
        }
    }
}

impl Drop for StagedDecoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}
