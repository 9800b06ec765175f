//! 音频格式描述
//!
//! FormatDescriptor 描述一段原始字节的编码方式，codec / player / sink 都依赖它。
//! 样本统一以 f32 表示，范围 [-1.0, 1.0]：
//! - 1.0 = 最大正向偏移
//! - -1.0 = 最大负向偏移
//! - 0.0 = 静音

use std::fmt;
use std::str::FromStr;

use super::codec::CodecError;

/// 样本编码方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// 有符号线性 PCM（二进制补码）
    PcmSigned,
    /// 无符号线性 PCM（以 full scale 为零点）
    PcmUnsigned,
    /// IEEE 浮点（仅 32 / 64 bit）
    PcmFloat,
    /// G.711 mu-law，8 bit
    MuLaw,
    /// G.711 A-law，8 bit
    ALaw,
}

impl Encoding {
    pub const ALL: [Encoding; 5] = [
        Encoding::PcmSigned,
        Encoding::PcmUnsigned,
        Encoding::PcmFloat,
        Encoding::MuLaw,
        Encoding::ALaw,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::PcmSigned => "PCM_SIGNED",
            Self::PcmUnsigned => "PCM_UNSIGNED",
            Self::PcmFloat => "PCM_FLOAT",
            Self::MuLaw => "MU_LAW",
            Self::ALaw => "A_LAW",
        }
    }

    /// 是否为压扩编码
    #[inline]
    pub fn is_companded(&self) -> bool {
        matches!(self, Self::MuLaw | Self::ALaw)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // 同时接受 "pcm-signed" 与 "PCM_SIGNED"
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "pcm-signed" | "signed" | "s" => Ok(Self::PcmSigned),
            "pcm-unsigned" | "unsigned" | "u" => Ok(Self::PcmUnsigned),
            "pcm-float" | "float" | "f" => Ok(Self::PcmFloat),
            "mu-law" | "ulaw" | "mulaw" => Ok(Self::MuLaw),
            "a-law" | "alaw" => Ok(Self::ALaw),
            _ => Err(format!("unknown encoding: {}", s)),
        }
    }
}

/// 音频格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub encoding: Encoding,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub big_endian: bool,
}

impl FormatDescriptor {
    /// 创建并校验音频格式
    pub fn new(
        encoding: Encoding,
        sample_rate: u32,
        bits_per_sample: u16,
        channels: u16,
        big_endian: bool,
    ) -> Result<Self, CodecError> {
        let format = Self {
            encoding,
            bits_per_sample,
            channels,
            sample_rate,
            big_endian,
        };
        format.validate()?;
        Ok(format)
    }

    /// 有符号 16-bit little-endian（最常见的设备格式）
    pub fn pcm_16(sample_rate: u32, channels: u16) -> Self {
        Self {
            encoding: Encoding::PcmSigned,
            bits_per_sample: 16,
            channels,
            sample_rate,
            big_endian: false,
        }
    }

    /// 检查位深与编码组合是否合法
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.bits_per_sample == 0 || self.bits_per_sample > 64 {
            return Err(CodecError::invalid_format(format!(
                "bits per sample must be within 1..=64, got {}",
                self.bits_per_sample
            )));
        }
        if self.channels == 0 {
            return Err(CodecError::invalid_format("channel count must be at least 1"));
        }
        if self.sample_rate == 0 {
            return Err(CodecError::invalid_format("sample rate must be positive"));
        }
        match self.encoding {
            Encoding::PcmFloat if !matches!(self.bits_per_sample, 32 | 64) => {
                Err(CodecError::invalid_format(format!(
                    "PCM_FLOAT requires 32 or 64 bits per sample, got {}",
                    self.bits_per_sample
                )))
            }
            Encoding::MuLaw | Encoding::ALaw if self.bits_per_sample != 8 => {
                Err(CodecError::invalid_format(format!(
                    "{} requires 8 bits per sample, got {}",
                    self.encoding, self.bits_per_sample
                )))
            }
            _ => Ok(()),
        }
    }

    /// 每样本的字节数（向上取整，例如 20-bit 占 3 字节）
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        bytes_per_sample(self.bits_per_sample)
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// 该位深能表示的最大幅度 2^(bits-1)
    #[inline]
    pub fn full_scale(&self) -> f64 {
        full_scale(self.bits_per_sample)
    }

    /// 每秒字节数
    #[inline]
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.bytes_per_frame() as u64
    }

    /// 指定时长对应的样本数：ceil(rate * seconds)
    #[inline]
    pub fn samples_for(&self, duration_secs: f64) -> usize {
        samples_for(self.sample_rate, duration_secs)
    }

    /// 样本序列的时长（秒）
    #[inline]
    pub fn duration_secs(&self, sample_count: usize) -> f64 {
        sample_count as f64 / self.sample_rate as f64
    }
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        Self::pcm_16(44100, 2)
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}Hz {}bit {}ch {}",
            self.encoding,
            self.sample_rate,
            self.bits_per_sample,
            self.channels,
            if self.big_endian { "BE" } else { "LE" }
        )
    }
}

#[inline]
pub fn bytes_per_sample(bits_per_sample: u16) -> usize {
    (bits_per_sample as usize + 7) >> 3
}

/// 64-bit 时 2^63 超出 i64，所以用 f64 返回
#[inline]
pub fn full_scale(bits_per_sample: u16) -> f64 {
    (1u64 << (bits_per_sample.clamp(1, 64) - 1)) as f64
}

#[inline]
pub fn samples_for(sample_rate: u32, duration_secs: f64) -> usize {
    if duration_secs <= 0.0 || !duration_secs.is_finite() {
        return 0;
    }
    (sample_rate as f64 * duration_secs).ceil() as usize
}
