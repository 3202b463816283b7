//! # farplay — streaming runtime for a handheld Remote Play client
//!
//! A Rust library implementing the realtime core of a Remote Play
//! client: it joins an established console session and drives the
//! video/audio/input loop that makes the console usable from a 960×544
//! handheld over Wi-Fi.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Host UI / renderer (external)                │
//! ├───────────────────────────────────────────────┤
//! │  StreamSession  — lifecycle, recovery FSM     │
//! │  Supervisor     — loss gates, restarts, hints │
//! ├───────────────────────────────────────────────┤
//! │  Assembler — reorder window, gap reports      │
//! │  Video     — decode worker, pacing, metrics   │
//! │  Input     — 2 ms sampling, mapping, touch    │
//! │  Audio     — bounded queue → platform sink    │
//! ├───────────────────────────────────────────────┤
//! │  Session transport / decoder / control source │
//! │  (external, behind traits)                    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Data flow: transport → [`reorder`] → [`assembler`] → [`video`] →
//! display; transport audio → [`audio`]; [`input`] → transport. Metrics
//! flow into the [`supervisor`], which pushes control back to the
//! transport (IDR requests, coordinated soft restarts) and overlay state
//! to the renderer.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use farplay::{StreamSession, StreamSessionConfig};
//! use farplay::config::Settings;
//! use farplay::input::mapping::MappingTable;
//!
//! # fn transport() -> Arc<dyn farplay::session::SessionTransport> { unimplemented!() }
//! # fn decoder() -> Box<dyn farplay::video::decoder::DecoderDriver> { unimplemented!() }
//! # fn controls() -> Box<dyn farplay::input::ControlSource> { unimplemented!() }
//! # fn audio() -> Box<dyn farplay::audio::AudioSink> { unimplemented!() }
//! let session = StreamSession::start(StreamSessionConfig {
//!     transport: transport(),
//!     decoder: decoder(),
//!     control_source: controls(),
//!     audio_sink: audio(),
//!     settings: Settings::default(),
//!     mapping: MappingTable::standard(),
//!     audio_sample_rate: 48_000,
//!     audio_channels: 2,
//! })
//! .unwrap();
//!
//! // Wire the transport's receive threads to session.handle(), then on
//! // the render thread:
//! let _drew = session.render_latest_frame(|picture| {
//!     // blit picture.data at session-selected layout
//!     let _ = picture;
//! });
//! ```
//!
//! ## Crate layout
//!
//! - [`supervisor`] — [`StreamSession`] runtime, session state, loss
//!   gates, staged recovery, restart coordination, overlay state.
//! - [`assembler`] — unit→frame assembly and retransmission gap reports.
//! - [`reorder`] — the sequence-number sliding window.
//! - [`video`] — decoder ladder, decode worker, pacing, metrics tick.
//! - [`input`] — mapping tables, touch geometry, PS-button FSM, the 2 ms
//!   sampling loop.
//! - [`audio`] — bounded PCM queue feeding the platform sink.
//! - [`session`] — the external transport/decoder capability traits.
//! - [`config`] — TOML settings with legacy migration.
//! - [`logging`] — bounded non-blocking log delivery.
//! - [`metrics`] — the shared per-session metrics record.
//! - [`error`] — [`StreamError`] and the [`Result`] alias.

pub mod assembler;
pub mod audio;
pub mod config;
pub mod error;
pub mod input;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod reorder;
pub mod seq;
pub mod session;
pub mod supervisor;
pub mod video;

pub use error::{Result, StreamError};
pub use metrics::StreamMetrics;
pub use reorder::ReorderQueue;
pub use seq::SeqNum16;
pub use supervisor::{SessionHandle, StreamSession, StreamSessionConfig};
