//! 输出端抽象
//!
//! - AudioSink: 按格式打开一条输出线路（对应设备的 open）
//! - SinkLine: 已打开的线路，阻塞写入 + 关闭
//!
//! 这里只提供原始字节输出（文件 / stdout），设备选择不属于本 crate

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::format::FormatDescriptor;

/// 输出错误
#[derive(Debug, Error)]
pub enum OutputError {
    /// 打开输出端失败
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// 线路已关闭
    #[error("output line is closed")]
    Closed,

    #[error("output I/O error: {0}")]
    Io(#[from] io::Error),
}

/// 可打开输出线路的 sink
pub trait AudioSink {
    type Line: SinkLine + 'static;

    /// 以指定格式打开线路
    ///
    /// 无法打开时返回 `OutputError::DeviceUnavailable`，不做重试
    fn open(&mut self, format: &FormatDescriptor) -> Result<Self::Line, OutputError>;
}

/// 已打开的输出线路
pub trait SinkLine: Send {
    /// 阻塞写入，返回本次被接收的字节数
    fn write(&mut self, bytes: &[u8]) -> Result<usize, OutputError>;

    /// 关闭线路，释放资源。重复调用无副作用
    fn close(&mut self) -> Result<(), OutputError>;

    /// 写入全部字节（逐次调用 write 直到全部被接收）
    fn write_all(&mut self, mut bytes: &[u8]) -> Result<(), OutputError> {
        while !bytes.is_empty() {
            let accepted = self.write(bytes)?;
            if accepted == 0 {
                return Err(OutputError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no bytes",
                )));
            }
            bytes = &bytes[accepted..];
        }
        Ok(())
    }
}

/// 原始字节输出目标
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawTarget {
    Stdout,
    File(PathBuf),
}

impl RawTarget {
    /// "-" 表示 stdout
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

/// 把编码后的字节原样写到文件或 stdout 的 sink
///
/// 例：`synth-stream tone | aplay -f S16_LE -c 2 -r 44100`
pub struct RawSink {
    target: RawTarget,
}

impl RawSink {
    pub fn new(target: RawTarget) -> Self {
        Self { target }
    }

    pub fn stdout() -> Self {
        Self::new(RawTarget::Stdout)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(RawTarget::File(path.into()))
    }
}

impl AudioSink for RawSink {
    type Line = WriterLine;

    fn open(&mut self, format: &FormatDescriptor) -> Result<Self::Line, OutputError> {
        let writer: Box<dyn Write + Send> = match &self.target {
            RawTarget::Stdout => Box::new(io::stdout()),
            RawTarget::File(path) => {
                let file = File::create(path).map_err(|e| {
                    OutputError::DeviceUnavailable(format!("{}: {}", path.display(), e))
                })?;
                Box::new(BufWriter::new(file))
            }
        };
        log::info!("Opened raw output {:?} ({})", self.target, format);
        Ok(WriterLine::new(writer))
    }
}

/// 基于 `io::Write` 的输出线路
pub struct WriterLine {
    writer: Option<Box<dyn Write + Send>>,
    bytes_written: u64,
}

impl WriterLine {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Some(writer),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl SinkLine for WriterLine {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, OutputError> {
        let writer = self.writer.as_mut().ok_or(OutputError::Closed)?;
        writer.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for WriterLine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// 写入共享内存缓冲区的 sink
///
/// clone 出的句柄共享同一个缓冲区，可在线路关闭后查看收到的全部字节
#[derive(Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    unavailable: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 永远无法打开的 sink
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// 目前收到的全部字节
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

impl AudioSink for MemorySink {
    type Line = MemoryLine;

    fn open(&mut self, format: &FormatDescriptor) -> Result<Self::Line, OutputError> {
        if self.unavailable {
            return Err(OutputError::DeviceUnavailable(format!(
                "memory sink refuses {}",
                format
            )));
        }
        self.opens.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryLine {
            buffer: Arc::clone(&self.buffer),
            closes: Arc::clone(&self.closes),
            closed: false,
        })
    }
}

pub struct MemoryLine {
    buffer: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

impl SinkLine for MemoryLine {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, OutputError> {
        if self.closed {
            return Err(OutputError::Closed);
        }
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// 每次最多接收 3 字节
    struct TrickleLine(Vec<u8>);

    impl SinkLine for TrickleLine {
        fn write(&mut self, bytes: &[u8]) -> Result<usize, OutputError> {
            let n = bytes.len().min(3);
            self.0.extend_from_slice(&bytes[..n]);
            Ok(n)
        }

        fn close(&mut self) -> Result<(), OutputError> {
            Ok(())
        }
    }

    #[test]
    fn test_writer_line_write_and_close() {
        let buf = SharedBuf::default();
        let mut line = WriterLine::new(Box::new(buf.clone()));

        assert_eq!(line.write(&[1, 2, 3]).unwrap(), 3);
        line.write_all(&[4, 5]).unwrap();
        assert_eq!(line.bytes_written(), 5);

        line.close().unwrap();
        line.close().unwrap();
        assert!(matches!(line.write(&[6]), Err(OutputError::Closed)));
        assert_eq!(*buf.0.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_write_all_handles_partial_writes() {
        let mut line = TrickleLine(Vec::new());
        let data: Vec<u8> = (0..10).collect();
        line.write_all(&data).unwrap();
        assert_eq!(line.0, data);
    }

    #[test]
    fn test_unopenable_file_is_device_unavailable() {
        let mut sink = RawSink::file("/nonexistent-dir/for-sure/out.raw");
        let err = sink.open(&FormatDescriptor::default()).err().unwrap();
        assert!(matches!(err, OutputError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_memory_sink_counts_open_and_close() {
        let sink = MemorySink::new();
        let mut opener = sink.clone();
        let mut line = opener.open(&FormatDescriptor::default()).unwrap();

        line.write_all(&[9, 8, 7]).unwrap();
        line.close().unwrap();
        line.close().unwrap();

        assert_eq!(sink.contents(), vec![9, 8, 7]);
        assert_eq!(sink.open_count(), 1);
        assert_eq!(sink.close_count(), 1);
        assert!(matches!(line.write(&[1]), Err(OutputError::Closed)));
    }

    #[test]
    fn test_memory_sink_unavailable() {
        let mut sink = MemorySink::unavailable();
        assert!(matches!(
            sink.open(&FormatDescriptor::default()),
            Err(OutputError::DeviceUnavailable(_))
        ));
        assert_eq!(sink.open_count(), 0);
    }

    #[test]
    fn test_raw_target_from_arg() {
        assert_eq!(RawTarget::from_arg("-"), RawTarget::Stdout);
        assert_eq!(
            RawTarget::from_arg("out.raw"),
            RawTarget::File(PathBuf::from("out.raw"))
        );
    }
}
