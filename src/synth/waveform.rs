//! 波形发生器
//!
//! 每种波形都是 (t, period, amplitude, phase) 的纯函数：
//! - Sine:     A·sin((2πt − φ)/T)
//! - Saw:      (2A/π)·atan(tan((2πt − φ)/(2T)))
//! - Square:   A·sign(sin((2πt − φ)/T))，sign(0) = 0
//! - Triangle: (2A/π)·asin(sin((2πt − φ)/T))
//! - Noise:    A·U(-1, 1)，与 t / T / φ 无关
//!
//! 时间与周期用 f64，长时间生成时 t 的精度不会退化

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::str::FromStr;

use rand::rngs::ThreadRng;
use rand::Rng;

use super::SynthError;
use crate::audio::format::samples_for;

/// 波形种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Waveform {
    Saw,
    Triangle,
    Sine,
    Square,
    Noise,
}

impl Waveform {
    pub const ALL: [Waveform; 5] = [
        Waveform::Saw,
        Waveform::Triangle,
        Waveform::Sine,
        Waveform::Square,
        Waveform::Noise,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Saw => "saw",
            Self::Triangle => "triangle",
            Self::Sine => "sine",
            Self::Square => "square",
            Self::Noise => "noise",
        }
    }

    /// 同样的参数是否总是产生同样的样本
    #[inline]
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Self::Noise)
    }

    /// 计算 t 时刻的样本，噪声使用线程本地随机源
    #[inline]
    pub fn sample(&self, time_secs: f64, period_secs: f64, amplitude: f32, phase_radians: f32) -> f32 {
        match self {
            Self::Noise => noise(&mut rand::thread_rng(), amplitude),
            _ => self.periodic(time_secs, period_secs, amplitude, phase_radians),
        }
    }

    /// 同 `sample`，噪声从给定随机源取值（可用种子复现）
    #[inline]
    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        time_secs: f64,
        period_secs: f64,
        amplitude: f32,
        phase_radians: f32,
    ) -> f32 {
        match self {
            Self::Noise => noise(rng, amplitude),
            _ => self.periodic(time_secs, period_secs, amplitude, phase_radians),
        }
    }

    fn periodic(&self, time_secs: f64, period_secs: f64, amplitude: f32, phase_radians: f32) -> f32 {
        let amp = amplitude as f64;
        let x = (TAU * time_secs - phase_radians as f64) / period_secs;
        let value = match self {
            Self::Sine => amp * x.sin(),
            Self::Saw => 2.0 * amp / PI * (x / 2.0).tan().atan(),
            Self::Square => amp * sign(x.sin()),
            Self::Triangle => 2.0 * amp / PI * x.sin().asin(),
            // 噪声没有周期
            Self::Noise => 0.0,
        };
        value as f32
    }
}

#[inline]
fn noise<R: Rng + ?Sized>(rng: &mut R, amplitude: f32) -> f32 {
    amplitude * rng.gen_range(-1.0f32..=1.0)
}

/// f64::signum(0.0) 是 1.0，这里需要 0
#[inline]
fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Waveform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "saw" | "sawtooth" => Ok(Self::Saw),
            "triangle" | "tri" => Ok(Self::Triangle),
            "sine" | "sin" => Ok(Self::Sine),
            "square" | "sq" => Ok(Self::Square),
            "noise" => Ok(Self::Noise),
            _ => Err(format!("unknown waveform: {}", s)),
        }
    }
}

/// 一次生成调用的参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaveformSpec {
    pub waveform: Waveform,
    pub frequency_hz: f64,
    /// (0, 1]
    pub amplitude: f32,
    /// ≥ 0
    pub duration_secs: f64,
    /// [0, 2π)
    pub phase_radians: f32,
}

impl WaveformSpec {
    /// 创建并校验参数
    pub fn new(
        waveform: Waveform,
        frequency_hz: f64,
        amplitude: f32,
        duration_secs: f64,
        phase_radians: f32,
    ) -> Result<Self, SynthError> {
        let spec = Self {
            waveform,
            frequency_hz,
            amplitude,
            duration_secs,
            phase_radians,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(SynthError::invalid(
                "frequency_hz",
                format!("must be a positive finite number, got {}", self.frequency_hz),
            ));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(SynthError::invalid(
                "amplitude",
                format!("must be within (0, 1], got {}", self.amplitude),
            ));
        }
        if !(self.duration_secs.is_finite() && self.duration_secs >= 0.0) {
            return Err(SynthError::invalid(
                "duration_secs",
                format!("must be a non-negative finite number, got {}", self.duration_secs),
            ));
        }
        let phase = self.phase_radians as f64;
        if !(phase >= 0.0 && phase < TAU) {
            return Err(SynthError::invalid(
                "phase_radians",
                format!("must be within [0, 2π), got {}", self.phase_radians),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn period_secs(&self) -> f64 {
        1.0 / self.frequency_hz
    }

    /// ceil(rate · duration)
    #[inline]
    pub fn sample_count(&self, sample_rate: u32) -> usize {
        samples_for(sample_rate, self.duration_secs)
    }

    /// 惰性样本序列，噪声使用线程本地随机源
    pub fn samples(&self, sample_rate: u32) -> Samples<ThreadRng> {
        self.samples_with_rng(sample_rate, rand::thread_rng())
    }

    /// 惰性样本序列，噪声从给定随机源取值
    pub fn samples_with_rng<R: Rng>(&self, sample_rate: u32, rng: R) -> Samples<R> {
        Samples {
            spec: *self,
            period_secs: self.period_secs(),
            sample_rate: sample_rate.max(1),
            index: 0,
            len: self.sample_count(sample_rate),
            rng,
        }
    }

    /// 生成完整样本序列
    pub fn generate(&self, sample_rate: u32) -> Vec<f32> {
        self.samples(sample_rate).collect()
    }
}

/// 生成 `ceil(rate · duration)` 个样本，第 i 个样本取 t = i / rate
pub fn generate(spec: &WaveformSpec, sample_rate: u32) -> Vec<f32> {
    spec.generate(sample_rate)
}

/// WaveformSpec 的有限惰性样本序列
///
/// clone 一个使用种子随机源的序列可以得到完全相同的噪声
#[derive(Clone, Debug)]
pub struct Samples<R> {
    spec: WaveformSpec,
    period_secs: f64,
    sample_rate: u32,
    index: usize,
    len: usize,
    rng: R,
}

impl<R> Samples<R> {
    /// 回到第一个样本（噪声不会重复之前的值）
    pub fn restart(&mut self) {
        self.index = 0;
    }

    pub fn position(&self) -> usize {
        self.index
    }
}

impl<R: Rng> Iterator for Samples<R> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.index >= self.len {
            return None;
        }
        let t = self.index as f64 / self.sample_rate as f64;
        self.index += 1;
        Some(self.spec.waveform.sample_with(
            &mut self.rng,
            t,
            self.period_secs,
            self.spec.amplitude,
            self.spec.phase_radians,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.index;
        (remaining, Some(remaining))
    }
}

impl<R: Rng> ExactSizeIterator for Samples<R> {}

/// 无限振荡器
///
/// 不限时长地持续产生样本，频率和幅度可以在运行中修改，
/// 修改频率时按累计相位衔接，波形不会跳变
#[derive(Clone, Debug)]
pub struct Oscillator<R = ThreadRng> {
    waveform: Waveform,
    frequency_hz: f64,
    amplitude: f32,
    sample_rate: u32,
    /// 已经过的周期数（小数部分即当前相位）
    cycles: f64,
    rng: R,
}

impl Oscillator<ThreadRng> {
    pub fn new(
        waveform: Waveform,
        frequency_hz: f64,
        amplitude: f32,
        sample_rate: u32,
    ) -> Result<Self, SynthError> {
        Self::with_rng(waveform, frequency_hz, amplitude, sample_rate, rand::thread_rng())
    }
}

impl<R: Rng> Oscillator<R> {
    pub fn with_rng(
        waveform: Waveform,
        frequency_hz: f64,
        amplitude: f32,
        sample_rate: u32,
        rng: R,
    ) -> Result<Self, SynthError> {
        if sample_rate == 0 {
            return Err(SynthError::invalid("sample_rate", "must be positive"));
        }
        // 借用 WaveformSpec 的参数校验
        WaveformSpec::new(waveform, frequency_hz, amplitude, 0.0, 0.0)?;
        Ok(Self {
            waveform,
            frequency_hz,
            amplitude,
            sample_rate,
            cycles: 0.0,
            rng,
        })
    }

    pub fn set_frequency(&mut self, frequency_hz: f64) -> Result<(), SynthError> {
        WaveformSpec::new(self.waveform, frequency_hz, self.amplitude, 0.0, 0.0)?;
        self.frequency_hz = frequency_hz;
        Ok(())
    }

    pub fn set_amplitude(&mut self, amplitude: f32) -> Result<(), SynthError> {
        WaveformSpec::new(self.waveform, self.frequency_hz, amplitude, 0.0, 0.0)?;
        self.amplitude = amplitude;
        Ok(())
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }
}

impl<R: Rng> Iterator for Oscillator<R> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        // 周期取 1，t 取累计周期数，等价于 2π·cycles 的相位
        let value = self
            .waveform
            .sample_with(&mut self.rng, self.cycles, 1.0, self.amplitude, 0.0);
        self.cycles += self.frequency_hz / self.sample_rate as f64;
        // 只保留小数部分，避免长时间运行后精度下降
        self.cycles = self.cycles.fract();
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn spec(waveform: Waveform, frequency: f64, duration: f64) -> WaveformSpec {
        WaveformSpec::new(waveform, frequency, 1.0, duration, 0.0).unwrap()
    }

    #[test]
    fn test_sine_starts_at_zero() {
        assert_eq!(Waveform::Sine.sample(0.0, 1.0, 1.0, 0.0), 0.0);
        let samples = spec(Waveform::Sine, 1.0, 1.0).generate(1000);
        assert_eq!(samples[0], 0.0);
        // 四分之一周期到达峰值
        assert!((samples[250] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_square_sign_changes_at_half_period() {
        assert_eq!(Waveform::Square.sample(1e-3, 1.0, 1.0, 0.0), 1.0);
        assert_eq!(Waveform::Square.sample(0.499, 1.0, 1.0, 0.0), 1.0);
        assert_eq!(Waveform::Square.sample(0.75, 1.0, 1.0, 0.0), -1.0);
        assert_eq!(Waveform::Square.sample(1.0 - 1e-3, 1.0, 1.0, 0.0), -1.0);
        assert_eq!(Waveform::Square.sample(0.0, 1.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_saw_ramps_and_wraps() {
        let amp = 0.5;
        // 上升段
        let a = Waveform::Saw.sample(0.1, 1.0, amp, 0.0);
        let b = Waveform::Saw.sample(0.2, 1.0, amp, 0.0);
        assert!(b > a && a > 0.0);
        // 线性：t = 0.25 时为 A/2
        assert!((Waveform::Saw.sample(0.25, 1.0, amp, 0.0) - amp / 2.0).abs() < 1e-6);
        // 越过半周期后回绕到负值
        assert!(Waveform::Saw.sample(0.6, 1.0, amp, 0.0) < 0.0);
    }

    #[test]
    fn test_triangle_peaks() {
        assert!((Waveform::Triangle.sample(0.25, 1.0, 0.8, 0.0) - 0.8).abs() < 1e-6);
        assert!((Waveform::Triangle.sample(0.75, 1.0, 0.8, 0.0) + 0.8).abs() < 1e-6);
        assert!((Waveform::Triangle.sample(0.125, 1.0, 0.8, 0.0) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_phase_shifts_waveform() {
        // 相位 π 相当于翻转正弦
        let shifted = Waveform::Sine.sample(0.25, 1.0, 1.0, std::f32::consts::PI);
        assert!((shifted + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic_kinds_stay_within_amplitude() {
        for waveform in Waveform::ALL {
            let samples = WaveformSpec::new(waveform, 110.0, 0.3, 0.1, 1.0)
                .unwrap()
                .generate(44100);
            assert!(samples.iter().all(|s| s.abs() <= 0.3 + 1e-6), "{}", waveform);
        }
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let noise = spec(Waveform::Noise, 100.0, 0.01);
        let a: Vec<f32> = noise.samples_with_rng(8000, Pcg32::seed_from_u64(7)).collect();
        let b: Vec<f32> = noise.samples_with_rng(8000, Pcg32::seed_from_u64(7)).collect();
        let c: Vec<f32> = noise.samples_with_rng(8000, Pcg32::seed_from_u64(8)).collect();

        assert_eq!(a.len(), 80);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_sample_count_rounds_up() {
        assert_eq!(spec(Waveform::Sine, 440.0, 1.0).sample_count(44100), 44100);
        assert_eq!(spec(Waveform::Sine, 440.0, 0.0).sample_count(44100), 0);
        assert_eq!(spec(Waveform::Sine, 440.0, 0.00001).sample_count(44100), 1);
    }

    #[test]
    fn test_lazy_samples_are_exact_size_and_restartable() {
        let mut samples = spec(Waveform::Triangle, 50.0, 0.5).samples(100);
        assert_eq!(samples.len(), 50);

        let first: Vec<f32> = samples.by_ref().take(10).collect();
        assert_eq!(samples.len(), 40);

        samples.restart();
        let again: Vec<f32> = samples.by_ref().take(10).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn test_spec_validation() {
        assert!(WaveformSpec::new(Waveform::Sine, 0.0, 1.0, 1.0, 0.0).is_err());
        assert!(WaveformSpec::new(Waveform::Sine, f64::NAN, 1.0, 1.0, 0.0).is_err());
        assert!(WaveformSpec::new(Waveform::Sine, 440.0, 0.0, 1.0, 0.0).is_err());
        assert!(WaveformSpec::new(Waveform::Sine, 440.0, 1.5, 1.0, 0.0).is_err());
        assert!(WaveformSpec::new(Waveform::Sine, 440.0, 1.0, -1.0, 0.0).is_err());
        assert!(WaveformSpec::new(Waveform::Sine, 440.0, 1.0, 1.0, -0.1).is_err());

        let err = WaveformSpec::new(Waveform::Sine, 440.0, 1.0, 1.0, 7.0).unwrap_err();
        assert!(matches!(err, SynthError::InvalidParameter { name: "phase_radians", .. }));
    }

    #[test]
    fn test_oscillator_matches_generated_sine() {
        let osc = Oscillator::new(Waveform::Sine, 100.0, 0.5, 8000).unwrap();
        let streamed: Vec<f32> = osc.take(80).collect();
        let generated = WaveformSpec::new(Waveform::Sine, 100.0, 0.5, 0.01, 0.0)
            .unwrap()
            .generate(8000);

        assert_eq!(streamed.len(), generated.len());
        for (a, b) in streamed.iter().zip(&generated) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_oscillator_rejects_bad_parameters() {
        assert!(Oscillator::new(Waveform::Sine, 440.0, 0.5, 0).is_err());
        let mut osc = Oscillator::new(Waveform::Square, 440.0, 0.5, 48000).unwrap();
        assert!(osc.set_frequency(-1.0).is_err());
        assert!(osc.set_amplitude(2.0).is_err());
        assert_eq!(osc.frequency_hz(), 440.0);
    }

    #[test]
    fn test_waveform_from_str() {
        assert_eq!("Sine".parse::<Waveform>(), Ok(Waveform::Sine));
        assert_eq!("sawtooth".parse::<Waveform>(), Ok(Waveform::Saw));
        assert!("pulse".parse::<Waveform>().is_err());
    }
}
