//! 合成样本 → 字节源
//!
//! 从样本迭代器中按需取样、复制到每个声道并编码，
//! 无需先生成完整的样本序列，可以配合无限振荡器使用

use std::io::{self, Read};

use crate::audio::{encode, CodecError, FormatDescriptor};

/// 每次补充的帧数
const FRAMES_PER_FILL: usize = 1024;

/// 惰性编码的字节源
pub struct EncodedSource<I> {
    samples: I,
    format: FormatDescriptor,
    /// 交错后的待编码样本
    frame_buffer: Vec<f32>,
    /// 已编码但尚未被读走的字节
    pending: Vec<u8>,
    pos: usize,
    exhausted: bool,
}

impl<I: Iterator<Item = f32>> EncodedSource<I> {
    /// `samples` 为单声道序列，每个样本会复制到所有声道
    pub fn new(samples: I, format: FormatDescriptor) -> Result<Self, CodecError> {
        format.validate()?;
        let channels = format.channels as usize;
        Ok(Self {
            samples,
            format,
            frame_buffer: Vec::with_capacity(FRAMES_PER_FILL * channels),
            pending: Vec::with_capacity(FRAMES_PER_FILL * format.bytes_per_frame()),
            pos: 0,
            exhausted: false,
        })
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// 取下一批样本并编码，返回是否还有数据
    fn refill(&mut self) -> Result<bool, CodecError> {
        let channels = self.format.channels as usize;
        self.frame_buffer.clear();
        for sample in self.samples.by_ref().take(FRAMES_PER_FILL) {
            self.frame_buffer
                .extend(std::iter::repeat(sample).take(channels));
        }
        if self.frame_buffer.is_empty() {
            self.exhausted = true;
            return Ok(false);
        }

        let len = self.frame_buffer.len() * self.format.bytes_per_sample();
        self.pending.resize(len, 0);
        encode(&self.frame_buffer, &mut self.pending, self.frame_buffer.len(), &self.format)?;
        self.pos = 0;
        Ok(true)
    }
}

impl<I: Iterator<Item = f32>> Read for EncodedSource<I> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.pending.len() {
            if self.exhausted {
                return Ok(0);
            }
            let has_data = self
                .refill()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if !has_data {
                return Ok(0);
            }
        }

        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audio::{decode_to_vec, encode_to_vec};
    use crate::synth::interleave;

    #[test]
    fn test_matches_eager_encoding() {
        let format = FormatDescriptor::pcm_16(8000, 2);
        let mono: Vec<f32> = (0..3000).map(|i| ((i % 200) as f32 / 100.0) - 1.0).collect();

        let mut source = EncodedSource::new(mono.clone().into_iter(), format).unwrap();
        let mut streamed = Vec::new();
        source.read_to_end(&mut streamed).unwrap();

        let eager = encode_to_vec(&interleave(&mono, 2), &format).unwrap();
        assert_eq!(streamed, eager);
        assert_eq!(streamed.len(), 3000 * 4);
    }

    #[test]
    fn test_endless_source_keeps_producing() {
        let format = FormatDescriptor::pcm_16(8000, 1);
        let mut source = EncodedSource::new(std::iter::repeat(0.5f32), format).unwrap();

        let mut buf = vec![0u8; 10_000];
        source.read_exact(&mut buf).unwrap();
        let decoded = decode_to_vec(&buf, &format).unwrap();
        assert!(decoded.iter().all(|&s| (s - 0.5).abs() < 1e-4));
    }

    #[test]
    fn test_invalid_format_rejected() {
        let mut format = FormatDescriptor::default();
        format.bits_per_sample = 0;
        assert!(EncodedSource::new(std::iter::empty::<f32>(), format).is_err());
    }
}
