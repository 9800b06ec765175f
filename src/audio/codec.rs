//! 样本编解码
//!
//! 字节 <-> f32 样本的无状态转换，由 FormatDescriptor 参数化。
//! 所有函数都是纯函数，可以在任意线程并发调用。
//!
//! 位解包/打包：
//! - 1/2/3 字节各有专用快速路径
//! - 其余宽度（含 4..8 字节）走通用逐字节循环
//!
//! 整数 PCM 编码时先 round 再 clamp 到 [-full_scale, full_scale - 1]，
//! 越界样本被削顶，不会因整数截断而回绕。

use thiserror::Error;

use super::format::{Encoding, FormatDescriptor};

/// mu-law 常数
const MU: f64 = 255.0;
/// A-law 常数
const A: f64 = 87.7;
/// 压扩码的幅度刻度 = full_scale(8)
const COMPANDED_SCALE: f64 = 128.0;
/// 压扩码最大幅度（bit 7 为符号位）
const COMPANDED_MAX: u64 = 127;
/// mu-law 字节序约定掩码
const MU_LAW_MASK: u8 = 0xFF;
/// A-law 偶数位翻转掩码
const A_LAW_MASK: u8 = 0x55;

/// 编解码错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// 不支持的位深 / 编码组合
    #[error("invalid format: {reason}")]
    InvalidFormat { reason: String },

    /// 缓冲区容量不足
    #[error("buffer too small: need {needed}, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

impl CodecError {
    pub(crate) fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}

/// 将字节解码为样本
///
/// `bytes_len`: bytes 中有效字节数（通常是 read 的返回值）。
/// 末尾不足一个样本的字节会被忽略。
///
/// 返回解码出的样本数
pub fn decode(
    bytes: &[u8],
    samples: &mut [f32],
    bytes_len: usize,
    format: &FormatDescriptor,
) -> Result<usize, CodecError> {
    format.validate()?;

    if bytes.len() < bytes_len {
        return Err(CodecError::BufferTooSmall {
            needed: bytes_len,
            available: bytes.len(),
        });
    }

    let bytes_per_sample = format.bytes_per_sample();
    let count = bytes_len / bytes_per_sample;
    if samples.len() < count {
        return Err(CodecError::BufferTooSmall {
            needed: count,
            available: samples.len(),
        });
    }

    let full_scale = format.full_scale();
    let bytes = &bytes[..count * bytes_per_sample];

    for (chunk, out) in bytes.chunks_exact(bytes_per_sample).zip(samples.iter_mut()) {
        let bits = unpack_bits(chunk, format.big_endian);
        *out = bits_to_sample(bits, format.encoding, format.bits_per_sample, full_scale);
    }

    Ok(count)
}

/// 将样本编码为字节
///
/// `samples_len`: 从 samples 开头取多少个样本
///
/// 返回写入的字节数 = samples_len * bytes_per_sample
pub fn encode(
    samples: &[f32],
    bytes: &mut [u8],
    samples_len: usize,
    format: &FormatDescriptor,
) -> Result<usize, CodecError> {
    format.validate()?;

    if samples.len() < samples_len {
        return Err(CodecError::BufferTooSmall {
            needed: samples_len,
            available: samples.len(),
        });
    }

    let bytes_per_sample = format.bytes_per_sample();
    let needed = samples_len * bytes_per_sample;
    if bytes.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: bytes.len(),
        });
    }

    let full_scale = format.full_scale();
    let samples = &samples[..samples_len];

    for (&sample, chunk) in samples
        .iter()
        .zip(bytes[..needed].chunks_exact_mut(bytes_per_sample))
    {
        let bits = sample_to_bits(sample, format.encoding, format.bits_per_sample, full_scale);
        pack_bits(chunk, bits, format.big_endian);
    }

    Ok(needed)
}

/// 解码整个字节缓冲区，返回新分配的样本序列
pub fn decode_to_vec(bytes: &[u8], format: &FormatDescriptor) -> Result<Vec<f32>, CodecError> {
    format.validate()?;
    let mut samples = vec![0.0f32; bytes.len() / format.bytes_per_sample()];
    let count = decode(bytes, &mut samples, bytes.len(), format)?;
    samples.truncate(count);
    Ok(samples)
}

/// 编码整个样本序列，返回新分配的字节缓冲区
pub fn encode_to_vec(samples: &[f32], format: &FormatDescriptor) -> Result<Vec<u8>, CodecError> {
    format.validate()?;
    let mut bytes = vec![0u8; samples.len() * format.bytes_per_sample()];
    encode(samples, &mut bytes, samples.len(), format)?;
    Ok(bytes)
}

/// 在两种格式之间转码（经由 f32 中间表示）
pub fn transcode(
    bytes: &[u8],
    from: &FormatDescriptor,
    to: &FormatDescriptor,
) -> Result<Vec<u8>, CodecError> {
    let samples = decode_to_vec(bytes, from)?;
    encode_to_vec(&samples, to)
}

// ============================================================================
// 数值语义
// ============================================================================

#[inline]
fn bits_to_sample(bits: u64, encoding: Encoding, bits_per_sample: u16, full_scale: f64) -> f32 {
    match encoding {
        Encoding::PcmSigned => (extend_sign(bits, bits_per_sample) as f64 / full_scale) as f32,
        Encoding::PcmUnsigned => {
            (unsigned_to_signed(bits, bits_per_sample) as f64 / full_scale) as f32
        }
        Encoding::PcmFloat => {
            if bits_per_sample == 32 {
                f32::from_bits(bits as u32)
            } else {
                f64::from_bits(bits) as f32
            }
        }
        Encoding::MuLaw => mu_law_to_sample(bits as u8),
        Encoding::ALaw => a_law_to_sample(bits as u8),
    }
}

#[inline]
fn sample_to_bits(sample: f32, encoding: Encoding, bits_per_sample: u16, full_scale: f64) -> u64 {
    match encoding {
        Encoding::PcmSigned => quantize(sample, full_scale) as u64,
        Encoding::PcmUnsigned => {
            let offset = 1i128 << (bits_per_sample - 1);
            (quantize(sample, full_scale) as i128 + offset) as u64
        }
        Encoding::PcmFloat => {
            if bits_per_sample == 32 {
                sample.to_bits() as u64
            } else {
                (sample as f64).to_bits()
            }
        }
        Encoding::MuLaw => sample_to_mu_law(sample) as u64,
        Encoding::ALaw => sample_to_a_law(sample) as u64,
    }
}

/// 缩放到整数刻度并削顶；NaN 编码为 0
#[inline]
fn quantize(sample: f32, full_scale: f64) -> i64 {
    let scaled = (sample as f64 * full_scale).round();
    // 64-bit 时 full_scale - 1.0 == full_scale，由 `as` 的饱和语义兜底
    scaled.clamp(-full_scale, full_scale - 1.0) as i64
}

/// 从 bits_per_sample 位符号扩展到 i64
///
/// 先左移把符号位移到 bit63，再算术右移恢复
#[inline]
fn extend_sign(bits: u64, bits_per_sample: u16) -> i64 {
    let shift = 64 - bits_per_sample as u32;
    ((bits << shift) as i64) >> shift
}

#[inline]
fn unsigned_to_signed(bits: u64, bits_per_sample: u16) -> i128 {
    let mask = if bits_per_sample >= 64 {
        u64::MAX
    } else {
        (1u64 << bits_per_sample) - 1
    };
    (bits & mask) as i128 - (1i128 << (bits_per_sample - 1))
}

// ============================================================================
// mu-law / A-law 压扩
// ============================================================================

/// 8-bit 符号-幅度码 -> [-127, 127]
#[inline]
fn sign_magnitude_to_int(code: u8) -> i32 {
    if code & 0x80 != 0 {
        -((code ^ 0x80) as i32)
    } else {
        code as i32
    }
}

/// [-127, 127]（超出部分削顶）-> 8-bit 符号-幅度码
#[inline]
fn int_to_sign_magnitude(value: i64) -> u8 {
    let magnitude = value.unsigned_abs().min(COMPANDED_MAX) as u8;
    if value < 0 {
        magnitude | 0x80
    } else {
        magnitude
    }
}

fn mu_law_to_sample(code: u8) -> f32 {
    let y = sign_magnitude_to_int(code ^ MU_LAW_MASK) as f64 / COMPANDED_SCALE;
    let magnitude = ((1.0 + MU).powf(y.abs()) - 1.0) / MU;
    (magnitude.copysign(y)) as f32
}

fn sample_to_mu_law(sample: f32) -> u8 {
    let x = sample as f64;
    let y = ((1.0 + MU * x.abs()).ln() / (1.0 + MU).ln()).copysign(x);
    int_to_sign_magnitude((y * COMPANDED_SCALE).round() as i64) ^ MU_LAW_MASK
}

fn a_law_to_sample(code: u8) -> f32 {
    let ln_a = A.ln();
    let y = sign_magnitude_to_int(code ^ A_LAW_MASK) as f64 / COMPANDED_SCALE;
    let abs = y.abs();

    let magnitude = if abs < 1.0 / (1.0 + ln_a) {
        abs * (1.0 + ln_a) / A
    } else {
        ((abs * (1.0 + ln_a)) - 1.0).exp() / A
    };

    (magnitude.copysign(y)) as f32
}

fn sample_to_a_law(sample: f32) -> u8 {
    let ln_a = A.ln();
    let x = sample as f64;
    let abs = x.abs();

    let compressed = if abs < 1.0 / A {
        (A * abs) / (1.0 + ln_a)
    } else {
        (1.0 + (A * abs).ln()) / (1.0 + ln_a)
    };

    let y = compressed.copysign(x);
    int_to_sign_magnitude((y * COMPANDED_SCALE).round() as i64) ^ A_LAW_MASK
}

// ============================================================================
// 位解包 / 打包
// ============================================================================

/// 把一个样本的字节组装成无符号整数
#[inline]
fn unpack_bits(chunk: &[u8], big_endian: bool) -> u64 {
    match chunk.len() {
        1 => unpack_8bit(chunk),
        2 => unpack_16bit(chunk, big_endian),
        3 => unpack_24bit(chunk, big_endian),
        _ => unpack_any(chunk, big_endian),
    }
}

#[inline]
fn unpack_8bit(chunk: &[u8]) -> u64 {
    chunk[0] as u64
}

#[inline]
fn unpack_16bit(chunk: &[u8], big_endian: bool) -> u64 {
    if big_endian {
        u16::from_be_bytes([chunk[0], chunk[1]]) as u64
    } else {
        u16::from_le_bytes([chunk[0], chunk[1]]) as u64
    }
}

#[inline]
fn unpack_24bit(chunk: &[u8], big_endian: bool) -> u64 {
    if big_endian {
        ((chunk[0] as u64) << 16) | ((chunk[1] as u64) << 8) | (chunk[2] as u64)
    } else {
        (chunk[0] as u64) | ((chunk[1] as u64) << 8) | ((chunk[2] as u64) << 16)
    }
}

#[inline]
fn unpack_any(chunk: &[u8], big_endian: bool) -> u64 {
    if big_endian {
        chunk.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    } else {
        chunk
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << (8 * i)))
    }
}

/// 把整数的低 chunk.len() 个字节写入 chunk
#[inline]
fn pack_bits(chunk: &mut [u8], bits: u64, big_endian: bool) {
    match chunk.len() {
        1 => pack_8bit(chunk, bits),
        2 => pack_16bit(chunk, bits, big_endian),
        3 => pack_24bit(chunk, bits, big_endian),
        _ => pack_any(chunk, bits, big_endian),
    }
}

#[inline]
fn pack_8bit(chunk: &mut [u8], bits: u64) {
    chunk[0] = (bits & 0xFF) as u8;
}

#[inline]
fn pack_16bit(chunk: &mut [u8], bits: u64, big_endian: bool) {
    let v = bits as u16;
    let bytes = if big_endian {
        v.to_be_bytes()
    } else {
        v.to_le_bytes()
    };
    chunk.copy_from_slice(&bytes);
}

#[inline]
fn pack_24bit(chunk: &mut [u8], bits: u64, big_endian: bool) {
    let (b0, b1, b2) = (
        (bits & 0xFF) as u8,
        ((bits >> 8) & 0xFF) as u8,
        ((bits >> 16) & 0xFF) as u8,
    );
    if big_endian {
        chunk[0] = b2;
        chunk[1] = b1;
        chunk[2] = b0;
    } else {
        chunk[0] = b0;
        chunk[1] = b1;
        chunk[2] = b2;
    }
}

#[inline]
fn pack_any(chunk: &mut [u8], bits: u64, big_endian: bool) {
    let width = chunk.len();
    for (b, byte) in chunk.iter_mut().enumerate() {
        let shift = if big_endian { 8 * (width - b - 1) } else { 8 * b };
        *byte = ((bits >> shift) & 0xFF) as u8;
    }
}
