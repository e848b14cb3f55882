//! Core types for the voicechat turn pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - PCM audio buffer types
//! - Epoch-based cancellation primitives
//! - Error types
//! - Message-facing types (image references)

pub mod audio;
pub mod epoch;
pub mod error;
pub mod message;

pub use audio::{PcmBuffer, SampleRate};
pub use epoch::{Epoch, EpochCoordinator};
pub use error::{Error, Result};
pub use message::ImageRef;
