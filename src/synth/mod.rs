//! 合成模块
//!
//! 包含：
//! - Waveform: 波形公式与 WaveformSpec 采样序列
//! - Compose: 拼接、静音、混合、扫频
//! - Notes: 音高换算工具
//! - Demo: 波形巡演与示例旋律

pub mod compose;
pub mod demo;
pub mod notes;
pub mod waveform;

use thiserror::Error;

pub use compose::{concat, frequency_sweep, interleave, mix, silence, Composer, Concatenator, Sweep};
pub use waveform::{generate, Oscillator, Samples, Waveform, WaveformSpec};

/// 合成参数错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SynthError {
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        name: &'static str,
        message: String,
    },
}

impl SynthError {
    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}
