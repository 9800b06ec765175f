//! 音频核心模块
//!
//! 包含：
//! - Format: 格式描述
//! - Codec: 样本与字节之间的编解码
//! - Sink: 输出端抽象与原始字节输出
//! - Output: 按实时速度消费的 paced 输出
//! - Ring Buffer: Lock-free 数据传递
//! - Stats: 播放统计

pub mod codec;
pub mod format;
pub mod output;
pub mod ring_buffer;
pub mod sink;
pub mod stats;

pub use codec::{decode, decode_to_vec, encode, encode_to_vec, transcode, CodecError};
pub use format::{Encoding, FormatDescriptor};
pub use output::{OutputConfig, PacedLine, PacedSink};
pub use ring_buffer::RingBuffer;
pub use sink::{AudioSink, MemorySink, OutputError, RawSink, RawTarget, SinkLine, WriterLine};
pub use stats::{PlaybackStats, StatsReport};
