//! 样本序列组合
//!
//! 所有函数都只处理调用方拥有的序列，返回新分配的结果，不保留别名

use rand::Rng;

use super::notes::map_range;
use super::waveform::{Waveform, WaveformSpec};
use super::SynthError;
use crate::audio::format::samples_for;

/// 按顺序拼接，边界处直接相接（没有淡入淡出，可能有咔嗒声）
pub fn concat<S: AsRef<[f32]>>(sequences: &[S]) -> Vec<f32> {
    let total = sequences.iter().map(|s| s.as_ref().len()).sum();
    let mut result = Vec::with_capacity(total);
    for sequence in sequences {
        result.extend_from_slice(sequence.as_ref());
    }
    result
}

/// ceil(rate · duration) 个零样本
pub fn silence(sample_rate: u32, duration_secs: f64) -> Vec<f32> {
    vec![0.0; samples_for(sample_rate, duration_secs)]
}

/// 两个序列取平均
///
/// 结果长度为两者较长者；较短序列结束后，直接沿用较长序列的样本
pub fn mix(a: &[f32], b: &[f32]) -> Vec<f32> {
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut result = Vec::with_capacity(longer.len());
    result.extend(
        longer
            .iter()
            .zip(shorter)
            .map(|(&x, &y)| 0.5 * (x + y)),
    );
    result.extend_from_slice(&longer[shorter.len()..]);
    result
}

/// 把单声道序列复制到每个声道，得到交错的多声道序列
pub fn interleave(mono: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return mono.to_vec();
    }
    let mut result = Vec::with_capacity(mono.len() * channels);
    for &sample in mono {
        result.extend(std::iter::repeat(sample).take(channels));
    }
    result
}

/// 逐段收集，最后一次性拼接
#[derive(Clone, Debug, Default)]
pub struct Concatenator {
    parts: Vec<Vec<f32>>,
}

impl Concatenator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, samples: impl Into<Vec<f32>>) -> &mut Self {
        self.parts.push(samples.into());
        self
    }

    pub fn append_all<I>(&mut self, sequences: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Vec<f32>>,
    {
        self.parts.extend(sequences.into_iter().map(Into::into));
        self
    }

    /// 已收集的样本总数
    pub fn len(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn concat(&self) -> Vec<f32> {
        concat(&self.parts)
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }
}

/// 固定采样率的组合器
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Composer {
    sample_rate: u32,
}

impl Composer {
    pub fn new(sample_rate: u32) -> Result<Self, SynthError> {
        if sample_rate == 0 {
            return Err(SynthError::invalid("sample_rate", "must be positive"));
        }
        Ok(Self { sample_rate })
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 生成一段音
    pub fn tone(
        &self,
        waveform: Waveform,
        frequency_hz: f64,
        amplitude: f32,
        duration_secs: f64,
        phase_radians: f32,
    ) -> Result<Vec<f32>, SynthError> {
        let spec = WaveformSpec::new(waveform, frequency_hz, amplitude, duration_secs, phase_radians)?;
        Ok(spec.generate(self.sample_rate))
    }

    pub fn silence(&self, duration_secs: f64) -> Vec<f32> {
        silence(self.sample_rate, duration_secs)
    }

    /// 序列时长（秒）
    pub fn duration_secs(&self, samples: &[f32]) -> f64 {
        samples.len() as f64 / self.sample_rate as f64
    }
}

/// 扫频结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sweep {
    pub samples: Vec<f32>,
    /// 每个样本对应的瞬时频率（Hz）
    pub frequencies: Vec<f32>,
}

/// 频率从 start_hz 线性变化到 end_hz 的扫频信号
///
/// 相位按瞬时频率累加，频率变化时波形连续
pub fn frequency_sweep<R: Rng + ?Sized>(
    rng: &mut R,
    waveform: Waveform,
    amplitude: f32,
    duration_secs: f64,
    start_hz: f64,
    end_hz: f64,
    sample_rate: u32,
) -> Result<Sweep, SynthError> {
    if sample_rate == 0 {
        return Err(SynthError::invalid("sample_rate", "must be positive"));
    }
    WaveformSpec::new(waveform, start_hz, amplitude, duration_secs, 0.0)?;
    if !(end_hz.is_finite() && end_hz > 0.0) {
        return Err(SynthError::invalid(
            "end_hz",
            format!("must be a positive finite number, got {}", end_hz),
        ));
    }

    let len = samples_for(sample_rate, duration_secs);
    let mut sweep = Sweep {
        samples: Vec::with_capacity(len),
        frequencies: Vec::with_capacity(len),
    };

    let mut cycles = 0.0f64;
    for i in 0..len {
        let frequency = map_range(0.0, len as f64, start_hz, end_hz, i as f64);
        sweep
            .samples
            .push(waveform.sample_with(rng, cycles, 1.0, amplitude, 0.0));
        sweep.frequencies.push(frequency as f32);
        cycles = (cycles + frequency / sample_rate as f64).fract();
    }

    log::debug!(
        "Generated {} sweep {:.1}Hz -> {:.1}Hz, {} samples",
        waveform,
        start_hz,
        end_hz,
        len
    );
    Ok(sweep)
}
