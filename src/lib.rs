//! Synth Stream Library
//!
//! Audio sample codec, waveform synthesis and a bounded streaming player.

pub mod audio;
pub mod decode;
pub mod engine;
pub mod synth;
