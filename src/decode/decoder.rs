//! 音频文件解码器
//!
//! 使用 symphonia 库解码，支持：FLAC, WAV, AIFF, MP3
//!
//! 解码结果统一转换为有符号 little-endian PCM 字节：
//! - 源位深 ≤ 16（或未知，例如 MP3）：16-bit
//! - 其余：32-bit 左对齐，不丢精度
//!
//! DecodedSource 把文件包装成 `Read` 字节源，可以直接交给播放器

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;

use crate::audio::{Encoding, FormatDescriptor};

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to open file: {0}")]
    FileOpen(#[from] io::Error),

    #[error("unsupported audio format")]
    UnsupportedFormat,

    #[error("no audio track found")]
    NoAudioTrack,

    #[error("failed to create decoder: {0}")]
    DecoderCreation(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("seek failed: {0}")]
    SeekFailed(String),
}

/// 音频文件信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果已知）
    pub total_frames: Option<u64>,
    pub duration_secs: Option<f64>,
    /// 格式名称（文件扩展名）
    pub format: String,
    /// 编解码器名称
    pub codec: String,
}

impl AudioInfo {
    /// 解码输出的字节格式
    pub fn output_format(&self) -> FormatDescriptor {
        let bits = match self.bit_depth {
            Some(bits) if bits > 16 => 32,
            _ => 16,
        };
        FormatDescriptor {
            encoding: Encoding::PcmSigned,
            bits_per_sample: bits,
            channels: self.channels.max(1),
            sample_rate: self.sample_rate,
            big_endian: false,
        }
    }
}

/// 音频文件解码器
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
    output: FormatDescriptor,
    /// 每个 packet 的交错样本（按输出位深二选一）
    s16_buffer: Option<SampleBuffer<i16>>,
    s32_buffer: Option<SampleBuffer<i32>>,
}

impl AudioDecoder {
    /// 打开音频文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // 提示文件扩展名
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|_| DecodeError::UnsupportedFormat)?;

        let reader = probed.format;
        let format_name = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "Unknown".to_string());

        // 第一个音频轨道
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let total_frames = codec_params.n_frames;

        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = AudioInfo {
            sample_rate,
            channels,
            bit_depth: codec_params.bits_per_sample,
            total_frames,
            duration_secs: total_frames.map(|f| f as f64 / sample_rate as f64),
            format: format_name,
            codec: codec_name,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        let output = info.output_format();
        log::info!(
            "Opened {}: {} | {}Hz {}ch {}bit -> {}",
            path.display(),
            info.codec,
            info.sample_rate,
            info.channels,
            info.bit_depth.unwrap_or(0),
            output
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            output,
            s16_buffer: None,
            s32_buffer: None,
        })
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// 解码输出的字节格式
    pub fn output_format(&self) -> &FormatDescriptor {
        &self.output
    }

    /// 解码下一个 packet，把 little-endian 字节追加到 `out`
    ///
    /// 返回追加的字节数，0 表示文件结束
    pub fn decode_next(&mut self, out: &mut Vec<u8>) -> Result<usize, DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(0);
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            // 跳过非目标轨道
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // 跳过损坏的帧
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let spec: SignalSpec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let start = out.len();

            if self.output.bits_per_sample == 16 {
                let buffer = sample_buffer(&mut self.s16_buffer, capacity, spec);
                buffer.copy_interleaved_ref(decoded);
                for sample in buffer.samples() {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            } else {
                let buffer = sample_buffer(&mut self.s32_buffer, capacity, spec);
                buffer.copy_interleaved_ref(decoded);
                for sample in buffer.samples() {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }

            return Ok(out.len() - start);
        }
    }

    /// Seek 到指定时间（秒）
    pub fn seek(&mut self, time_secs: f64) -> Result<(), DecodeError> {
        if !(time_secs.is_finite() && time_secs >= 0.0) {
            return Err(DecodeError::SeekFailed(format!(
                "invalid seek position: {}s",
                time_secs
            )));
        }
        let seek_to = SeekTo::Time {
            time: Time::new(time_secs as u64, time_secs.fract()),
            track_id: Some(self.track_id),
        };

        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| DecodeError::SeekFailed(e.to_string()))?;

        // 重置解码器状态
        self.decoder.reset();
        Ok(())
    }
}

/// 按需创建（或在 packet 变大时重建）交错样本缓冲区
fn sample_buffer<S>(slot: &mut Option<SampleBuffer<S>>, capacity: u64, spec: SignalSpec) -> &mut SampleBuffer<S>
where
    S: symphonia::core::sample::Sample,
{
    let needed = capacity as usize * spec.channels.count();
    let rebuild = match slot {
        Some(buffer) => buffer.capacity() < needed,
        None => true,
    };
    if rebuild {
        *slot = None;
    }
    slot.get_or_insert_with(|| SampleBuffer::new(capacity, spec))
}

/// 把解码器包装为 `Read` 字节源
pub struct DecodedSource {
    decoder: AudioDecoder,
    pending: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl DecodedSource {
    pub fn new(decoder: AudioDecoder) -> Self {
        Self {
            decoder,
            pending: Vec::with_capacity(64 * 1024),
            pos: 0,
            finished: false,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        Ok(Self::new(AudioDecoder::open(path)?))
    }

    pub fn info(&self) -> &AudioInfo {
        self.decoder.info()
    }

    pub fn format(&self) -> FormatDescriptor {
        *self.decoder.output_format()
    }

    pub fn seek(&mut self, time_secs: f64) -> Result<(), DecodeError> {
        self.decoder.seek(time_secs)?;
        self.pending.clear();
        self.pos = 0;
        self.finished = false;
        Ok(())
    }
}

impl Read for DecodedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            if self.finished {
                return Ok(0);
            }
            self.pending.clear();
            self.pos = 0;
            let appended = self
                .decoder
                .decode_next(&mut self.pending)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if appended == 0 {
                self.finished = true;
            }
        }

        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// 解码整个文件，返回字节和对应格式
pub fn decode_all<P: AsRef<Path>>(path: P) -> Result<(Vec<u8>, FormatDescriptor), DecodeError> {
    let mut decoder = AudioDecoder::open(path)?;
    let format = *decoder.output_format();
    let mut bytes = Vec::new();
    while decoder.decode_next(&mut bytes)? > 0 {}
    log::debug!("Decoded {} bytes ({})", bytes.len(), format);
    Ok((bytes, format))
}
