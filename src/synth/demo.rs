//! 示例素材
//!
//! - 波形巡演：每种波形 110 Hz 各一秒，相位半周
//! - 儿歌旋律《Alle meine Entchen》，由音符和休止拼接而成

use super::compose::{Composer, Concatenator};
use super::notes::{key_frequency, phase01_to_radians};
use super::waveform::Waveform;
use super::SynthError;

/// 巡演中每段的频率
pub const TOUR_FREQUENCY_HZ: f64 = 110.0;
/// 巡演中每段的时长
pub const TOUR_SEGMENT_SECS: f64 = 1.0;

/// 旋律中的一步
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Step {
    /// 键号 + 时长（秒）
    Note(i32, f64),
    Rest(f64),
}

impl Step {
    pub fn duration_secs(&self) -> f64 {
        match *self {
            Step::Note(_, secs) | Step::Rest(secs) => secs,
        }
    }
}

// 键号（第三个八度）
const C: i32 = 28;
const D: i32 = 30;
const E: i32 = 32;
const F: i32 = 33;
const G: i32 = 35;
const A: i32 = 37;

/// 按 Waveform::ALL 的顺序依次播放每种波形
pub fn waveform_tour(composer: &Composer, amplitude: f32) -> Result<Vec<f32>, SynthError> {
    let phase = phase01_to_radians(0.5)?;
    let mut concatenator = Concatenator::new();
    for waveform in Waveform::ALL {
        concatenator.append(composer.tone(
            waveform,
            TOUR_FREQUENCY_HZ,
            amplitude,
            TOUR_SEGMENT_SECS,
            phase,
        )?);
    }
    Ok(concatenator.concat())
}

/// 旋律的音符序列（开头一秒静音）
pub fn melody_steps() -> Vec<Step> {
    let mut steps = vec![Step::Rest(1.0)];

    // C D E F G G
    for key in [C, D, E, F] {
        steps.push(Step::Note(key, 0.5));
    }
    for _ in 0..2 {
        steps.push(Step::Note(G, 0.5));
        steps.push(Step::Rest(0.5));
    }

    // A A A A G，重复两次
    for _ in 0..2 {
        for _ in 0..4 {
            steps.push(Step::Note(A, 0.25));
            steps.push(Step::Rest(0.25));
        }
        steps.push(Step::Note(G, 0.5));
        steps.push(Step::Rest(1.5));
    }

    // F F F F E E
    for _ in 0..4 {
        steps.push(Step::Note(F, 0.25));
        steps.push(Step::Rest(0.25));
    }
    for _ in 0..2 {
        steps.push(Step::Note(E, 0.5));
        steps.push(Step::Rest(0.5));
    }

    // G G G G C
    for _ in 0..4 {
        steps.push(Step::Note(G, 0.25));
        steps.push(Step::Rest(0.25));
    }
    steps.push(Step::Note(C, 1.0));

    steps
}

/// 用指定波形演奏一串音符
pub fn render_steps(
    composer: &Composer,
    steps: &[Step],
    waveform: Waveform,
    amplitude: f32,
) -> Result<Vec<f32>, SynthError> {
    let mut concatenator = Concatenator::new();
    for step in steps {
        let samples = match *step {
            Step::Note(key, secs) => composer.tone(waveform, key_frequency(key), amplitude, secs, 0.0)?,
            Step::Rest(secs) => composer.silence(secs),
        };
        concatenator.append(samples);
    }
    Ok(concatenator.concat())
}

/// 用指定波形演奏整段旋律
pub fn melody(composer: &Composer, waveform: Waveform, amplitude: f32) -> Result<Vec<f32>, SynthError> {
    render_steps(composer, &melody_steps(), waveform, amplitude)
}
