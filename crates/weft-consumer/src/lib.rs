//! Weft Consumer - Pulling frames out of a service graph
//!
//! A consumer runs a pump thread that pulls frames from its connected
//! producer, forces their evaluation and hands the result to a [`Sink`].
//! Presentation is paced to the profile frame rate, either inline on the
//! pump thread or on a separate presentation thread fed through a bounded
//! [`FrameQueue`].

pub mod config;
pub mod consumer;
pub mod output;
pub mod pacing;
pub mod queue;
pub mod sink;

pub use config::ConsumerConfig;
pub use consumer::{Consumer, ConsumerState};
pub use output::{output_slot, OutputDevice};
pub use pacing::Pacer;
pub use queue::FrameQueue;
pub use sink::{ChannelSink, CollectSink, NullSink, Presented, Rendered, Sink};
