//! 音高换算工具
//!
//! 钢琴键号：A4 = 49 = 440 Hz，C4 = 40，相邻键相差一个半音

use std::f64::consts::TAU;

use super::SynthError;

/// A4 的键号
pub const A4_KEY: i32 = 49;
/// A4 的频率
pub const A4_HZ: f64 = 440.0;

/// 键号对应的频率：440·2^((n−49)/12)
#[inline]
pub fn key_frequency(key: i32) -> f64 {
    A4_HZ * 2f64.powf((key - A4_KEY) as f64 / 12.0)
}

/// 解析音名，例如 "A4"、"C#3"、"Bb2"，返回键号
pub fn parse_note(name: &str) -> Option<i32> {
    let name = name.trim();
    let mut chars = name.chars();
    let semitone = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next() {
        Some('#') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().ok()?;

    Some(octave * 12 + semitone + accidental - 8)
}

/// 升高若干个八度
pub fn octave_up(frequency_hz: f64, octaves: i32) -> Result<f64, SynthError> {
    if octaves < 0 {
        return Err(SynthError::invalid(
            "octaves",
            format!("cannot pitch up a negative number of octaves: {}", octaves),
        ));
    }
    Ok(frequency_hz * 2f64.powi(octaves))
}

/// 降低若干个八度
pub fn octave_down(frequency_hz: f64, octaves: i32) -> Result<f64, SynthError> {
    if octaves < 0 {
        return Err(SynthError::invalid(
            "octaves",
            format!("cannot pitch down a negative number of octaves: {}", octaves),
        ));
    }
    Ok(frequency_hz / 2f64.powi(octaves))
}

/// 把 [0, 1] 的相位比例换算为弧度（0 → 0，1 → 2π）
pub fn phase01_to_radians(phase: f32) -> Result<f32, SynthError> {
    if !(0.0..=1.0).contains(&phase) {
        return Err(SynthError::invalid(
            "phase",
            format!("must be within [0, 1], got {}", phase),
        ));
    }
    Ok(map_range(0.0, 1.0, 0.0, TAU, phase as f64) as f32)
}

/// 把 [a1, a2] 中的 s 线性映射到 [b1, b2]
#[inline]
pub fn map_range(a1: f64, a2: f64, b1: f64, b2: f64, s: f64) -> f64 {
    b1 + (s - a1) * (b2 - b1) / (a2 - a1)
}

#[inline]
pub fn freq_to_period(frequency_hz: f64) -> f64 {
    1.0 / frequency_hz
}
