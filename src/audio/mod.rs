//! # Audio Module
//!
//! Per-channel playback queues and the voice plumbing they drive.
//!
//! ## Architecture
//!
//! ### [`queue`] - Playback Queue
//! - FIFO of [`track::Track`]s played one at a time
//! - Skip, stop, pause and repeat of the current track
//! - Disconnects after a period of idleness
//!
//! ### [`connection`] - Connection Lifecycle
//! - Ready and session-takeover watchdogs
//! - Rejoin with linear backoff, destruction after too many attempts
//!
//! ### [`backend`] - Seams
//! - [`backend::AudioPlayer`], [`backend::VoiceConnection`],
//!   [`backend::StreamProvider`] and [`backend::Notifier`] traits
//! - [`player`] implements them on top of songbird and serenity
//!
//! ### [`registry`] - Active Queues
//! - One queue per voice channel, removed when it is destroyed
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! # use queue_bard::audio::{backend::QueueBackend, queue::QueueSettings, track::Track, PlaybackQueue};
//! # async fn example(backend: QueueBackend) {
//! let queue = PlaybackQueue::new("123456789", backend, QueueSettings::default());
//! queue.connect().await;
//!
//! queue.enqueue(Track::search("Daft Punk - One More Time")).await;
//! queue.pause().await;
//! queue.unpause().await;
//! queue.skip_track(1).await;
//! # }
//! ```

pub mod backend;
pub mod connection;
pub mod player;
pub mod queue;
pub mod registry;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use queue::PlaybackQueue;
pub use registry::QueueRegistry;
