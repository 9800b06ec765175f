//! 流式播放器
//!
//! 把编码后的字节源按固定大小分块写入输出线路：
//! - 每块同步写入，线路满时阻塞（天然背压，不做无界缓冲）
//! - 字节源读完后进入 Draining，由独立线程在宽限期后关闭线路，
//!   让线路内部缓冲的音频播完
//! - 循环播放时读完即回到开头，直到 close()
//! - close() 幂等，会取消尚未触发的延迟关闭
//!
//! 状态机：Idle → Streaming → Draining → Closed
//!
//! 锁顺序：pending_close → stream。进入 Streaming 与登记线路在同一把 stream 锁内完成，
//! 进入 Draining 与排程延迟关闭在同一把 pending_close 锁内完成，close() 不会漏掉正在启动的流

mod source;

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::atomic::AtomicCell;
use thiserror::Error;

use crate::audio::{encode_to_vec, AudioSink, CodecError, FormatDescriptor, OutputError, SinkLine};

pub use source::EncodedSource;

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Streaming,
    Draining,
    Closed,
}

/// 播放器配置
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// 每次读取 / 写入的块大小（字节）
    pub buffer_size: usize,
    /// 读完后等待多久再关闭线路
    pub close_grace: Duration,
    /// play_samples() 是否循环播放
    pub looping: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            close_grace: Duration::from_secs(3),
            looping: false,
        }
    }
}

/// 播放器错误
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    #[error("source I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// 正在播放的输出线路
///
/// 字节源留在 play() 的线程里，不放进这里：读取时不持锁
struct OpenStream {
    line: Box<dyn SinkLine>,
    format: FormatDescriptor,
    bytes_written: u64,
    started: Instant,
}

/// 尚未触发的延迟关闭
struct PendingClose {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl PendingClose {
    /// 取消并等待线程退出
    fn cancel(self) {
        // 线程可能已经退出，发送失败无所谓
        let _ = self.cancel.send(());
        self.join();
    }

    fn join(self) {
        if self.handle.join().is_err() {
            log::error!("Deferred close thread panicked");
        }
    }
}

/// 流式播放器
///
/// 方法都只需要 `&self`，可以放进 Arc 在别的线程（例如 Ctrl+C 处理）里调用 close()
pub struct StreamingPlayer<S: AudioSink> {
    config: PlayerConfig,
    sink: Mutex<S>,
    state: Arc<AtomicCell<PlayerState>>,
    stream: Arc<Mutex<Option<OpenStream>>>,
    pending_close: Mutex<Option<PendingClose>>,
    total_bytes: AtomicU64,
    total_chunks: AtomicU64,
}

impl<S: AudioSink> StreamingPlayer<S> {
    pub fn new(sink: S, config: PlayerConfig) -> Self {
        Self {
            config,
            sink: Mutex::new(sink),
            state: Arc::new(AtomicCell::new(PlayerState::Idle)),
            stream: Arc::new(Mutex::new(None)),
            pending_close: Mutex::new(None),
            total_bytes: AtomicU64::new(0),
            total_chunks: AtomicU64::new(0),
        }
    }

    /// 播放一个字节源，直到读完（或被 close() 打断）
    ///
    /// 返回本次写入线路的字节数。返回时播放器处于 Draining（延迟关闭已排程）
    /// 或 Closed（被提前关闭）。字节源出错时先关闭已打开的资源再返回错误。
    pub fn play<R: Read>(&self, mut source: R, format: &FormatDescriptor) -> Result<u64, PlayerError> {
        self.run(&mut source, format, |_| Ok(false))
    }

    /// 循环播放：字节源读完后回到开头，直到 close()
    ///
    /// 一整轮都读不到数据时按普通播放结束，不会空转
    pub fn play_looping<R: Read + Seek>(
        &self,
        mut source: R,
        format: &FormatDescriptor,
    ) -> Result<u64, PlayerError> {
        self.run(&mut source, format, |s| s.seek(SeekFrom::Start(0)).map(|_| true))
    }

    /// 编码样本后播放，`config.looping` 时循环
    pub fn play_samples(&self, samples: &[f32], format: &FormatDescriptor) -> Result<u64, PlayerError> {
        let bytes = Cursor::new(encode_to_vec(samples, format)?);
        if self.config.looping {
            self.play_looping(bytes, format)
        } else {
            self.play(bytes, format)
        }
    }

    fn run<R, F>(&self, source: &mut R, format: &FormatDescriptor, rewind: F) -> Result<u64, PlayerError>
    where
        R: Read,
        F: FnMut(&mut R) -> io::Result<bool>,
    {
        format.validate()?;

        let previous = self.state.load();
        if matches!(previous, PlayerState::Streaming | PlayerState::Draining) {
            return Err(PlayerError::InvalidState("a stream is already active"));
        }
        // 上一个流遗留的延迟关闭已经没有意义
        self.cancel_pending_close();

        // 打开失败直接返回 DeviceUnavailable，不重试
        let line = lock(&self.sink).open(format)?;
        let mut line: Box<dyn SinkLine> = Box::new(line);

        {
            let mut stream = lock(&self.stream);
            if self
                .state
                .compare_exchange(previous, PlayerState::Streaming)
                .is_err()
            {
                drop(stream);
                let _ = line.close();
                return Err(PlayerError::InvalidState("player state changed while opening"));
            }
            *stream = Some(OpenStream {
                line,
                format: *format,
                bytes_written: 0,
                started: Instant::now(),
            });
        }
        log::info!("Streaming started: {}", format);

        let written = match self.stream_loop(source, rewind) {
            Ok(written) => written,
            Err(e) => {
                log::error!("Streaming failed: {}", e);
                if let Err(close_err) = release(&self.stream, &self.state) {
                    log::warn!("Error closing output after failure: {}", close_err);
                }
                return Err(e);
            }
        };

        // 期间被 close() 抢先关闭时不再排程
        let mut pending = lock(&self.pending_close);
        if self
            .state
            .compare_exchange(PlayerState::Streaming, PlayerState::Draining)
            .is_ok()
        {
            log::info!(
                "Source exhausted after {} bytes, closing in {:?}",
                written,
                self.config.close_grace
            );
            match self.spawn_deferred_close() {
                Ok(scheduled) => *pending = Some(scheduled),
                Err(e) => {
                    drop(pending);
                    if let Err(close_err) = release(&self.stream, &self.state) {
                        log::warn!("Error closing output: {}", close_err);
                    }
                    return Err(e.into());
                }
            }
        } else {
            log::info!("Stream closed early after {} bytes", written);
        }

        Ok(written)
    }

    /// 分块读取并写入，直到字节源读完或线路被取走
    fn stream_loop<R, F>(&self, source: &mut R, mut rewind: F) -> Result<u64, PlayerError>
    where
        R: Read,
        F: FnMut(&mut R) -> io::Result<bool>,
    {
        let mut buffer = vec![0u8; self.config.buffer_size.max(1)];
        let mut written = 0u64;
        let mut pass_bytes = 0u64;

        loop {
            // 读取时不持锁：阻塞的字节源不会拖住 close()
            let n = match source.read(&mut buffer) {
                Ok(0) => {
                    if pass_bytes == 0 || !rewind(&mut *source)? {
                        return Ok(written);
                    }
                    log::debug!("Looping after {} bytes", pass_bytes);
                    pass_bytes = 0;
                    continue;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            // 写入期间持有锁：一次写入不可被打断，close() 会等它完成
            let mut guard = lock(&self.stream);
            let Some(stream) = guard.as_mut() else {
                return Ok(written);
            };
            stream.line.write_all(&buffer[..n])?;
            stream.bytes_written += n as u64;
            drop(guard);

            written += n as u64;
            pass_bytes += n as u64;
            self.total_bytes.fetch_add(n as u64, Ordering::Relaxed);
            self.total_chunks.fetch_add(1, Ordering::Relaxed);
            log::debug!("Wrote {} bytes to sink", n);
        }
    }

    /// 宽限期后在独立线程中关闭线路
    fn spawn_deferred_close(&self) -> io::Result<PendingClose> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let stream = Arc::clone(&self.stream);
        let state = Arc::clone(&self.state);
        let grace = self.config.close_grace;

        let handle = thread::Builder::new()
            .name("deferred-close".to_string())
            .spawn(move || match cancelled.recv_timeout(grace) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = release(&stream, &state) {
                        log::warn!("Error closing output: {}", e);
                    }
                }
                // 收到取消，或播放器已被销毁
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("Deferred close cancelled");
                }
            })?;

        Ok(PendingClose { cancel, handle })
    }

    /// 立即关闭：取消尚未触发的延迟关闭，关闭输出线路
    ///
    /// 幂等，重复调用无副作用。正在进行的单次写入会先完成；
    /// 正在播放的 play() 在下一次读取后发现线路已关闭，随即返回并释放字节源
    pub fn close(&self) -> Result<(), PlayerError> {
        let mut pending = lock(&self.pending_close);
        if let Some(scheduled) = pending.take() {
            scheduled.cancel();
        }
        release(&self.stream, &self.state)?;
        Ok(())
    }

    /// 阻塞等待延迟关闭完成（不取消）
    pub fn wait_closed(&self) {
        let scheduled = lock(&self.pending_close).take();
        if let Some(scheduled) = scheduled {
            scheduled.join();
        }
    }

    fn cancel_pending_close(&self) {
        let scheduled = lock(&self.pending_close).take();
        if let Some(scheduled) = scheduled {
            log::debug!("Cancelling stale deferred close");
            scheduled.cancel();
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state.load()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// 所有流累计写入的字节数
    pub fn bytes_written(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// 所有流累计写入的块数
    pub fn chunks_written(&self) -> u64 {
        self.total_chunks.load(Ordering::Relaxed)
    }
}

impl<S: AudioSink> Drop for StreamingPlayer<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error closing player: {}", e);
        }
    }
}

/// 取走线路并标记为 Closed，再在锁外关闭线路
///
/// 状态在 stream 锁内写入，与 play() 进入 Streaming 互斥
fn release(
    stream: &Mutex<Option<OpenStream>>,
    state: &AtomicCell<PlayerState>,
) -> Result<(), OutputError> {
    let taken = {
        let mut guard = lock(stream);
        state.store(PlayerState::Closed);
        guard.take()
    };
    match taken {
        Some(mut open) => {
            let result = open.line.close();
            log::info!(
                "Output closed: {} bytes of {} in {:.2}s",
                open.bytes_written,
                open.format,
                open.started.elapsed().as_secs_f64()
            );
            result
        }
        None => Ok(()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audio::MemorySink;

    /// 每次最多返回 `chunk` 字节的字节源
    struct ChunkedReader {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// 先返回一段数据，然后报错
    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated source"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(&[1, 2, 3, 4]);
            Ok(4)
        }
    }

    /// 永不结束、每次读取都稍作停顿的字节源
    struct EndlessReader;

    impl Read for EndlessReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(1));
            let n = buf.len().min(16);
            buf[..n].fill(0xAB);
            Ok(n)
        }
    }

    /// 每次读取前稍作停顿，可以 seek 的字节源
    struct SlowCursor(Cursor<Vec<u8>>);

    impl Read for SlowCursor {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(1));
            self.0.read(buf)
        }
    }

    impl Seek for SlowCursor {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    /// 先返回 8 字节，然后阻塞到收到信号
    struct StalledReader {
        sent: bool,
        resume: mpsc::Receiver<()>,
    }

    impl Read for StalledReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                let _ = self.resume.recv();
                return Ok(0);
            }
            self.sent = true;
            buf[..8].fill(0x11);
            Ok(8)
        }
    }

    fn config(grace: Duration) -> PlayerConfig {
        PlayerConfig {
            buffer_size: 64,
            close_grace: grace,
            ..PlayerConfig::default()
        }
    }

    #[test]
    fn test_player_config_default() {
        let config = PlayerConfig::default();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.close_grace, Duration::from_secs(3));
        assert!(!config.looping);
    }

    #[test]
    fn test_streams_all_bytes_in_order() {
        let memory = MemorySink::new();
        let player = StreamingPlayer::new(memory.clone(), config(Duration::from_millis(20)));
        assert_eq!(player.state(), PlayerState::Idle);

        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
        let reader = ChunkedReader {
            data: data.clone(),
            pos: 0,
            chunk: 37,
        };

        let written = player.play(reader, &FormatDescriptor::default()).unwrap();
        assert_eq!(written, 1000);
        assert_eq!(player.state(), PlayerState::Draining);
        assert_eq!(memory.contents(), data);
        assert_eq!(player.bytes_written(), 1000);
        assert_eq!(player.chunks_written(), 28);

        player.wait_closed();
        assert_eq!(player.state(), PlayerState::Closed);
        assert_eq!(memory.close_count(), 1);
    }

    #[test]
    fn test_device_unavailable_is_surfaced() {
        let player = StreamingPlayer::new(MemorySink::unavailable(), PlayerConfig::default());
        let err = player
            .play(Cursor::new(vec![0u8; 16]), &FormatDescriptor::default())
            .unwrap_err();

        assert!(matches!(err, PlayerError::Output(OutputError::DeviceUnavailable(_))));
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[test]
    fn test_close_cancels_deferred_close() {
        let memory = MemorySink::new();
        let player = StreamingPlayer::new(memory.clone(), config(Duration::from_secs(30)));

        player
            .play(Cursor::new(vec![1u8; 100]), &FormatDescriptor::default())
            .unwrap();
        assert_eq!(player.state(), PlayerState::Draining);
        assert_eq!(memory.close_count(), 0);

        let start = Instant::now();
        player.close().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(player.state(), PlayerState::Closed);
        assert_eq!(memory.close_count(), 1);

        // 幂等
        player.close().unwrap();
        assert_eq!(memory.close_count(), 1);
    }

    #[test]
    fn test_source_error_closes_resources() {
        let memory = MemorySink::new();
        let player = StreamingPlayer::new(memory.clone(), config(Duration::from_secs(30)));

        let err = player
            .play(FailingReader { sent: false }, &FormatDescriptor::default())
            .unwrap_err();

        assert!(matches!(err, PlayerError::Io(_)));
        assert_eq!(memory.contents(), vec![1, 2, 3, 4]);
        assert_eq!(memory.close_count(), 1);
        assert_eq!(player.state(), PlayerState::Closed);
    }

    #[test]
    fn test_play_while_draining_is_rejected() {
        let player = StreamingPlayer::new(MemorySink::new(), config(Duration::from_secs(30)));
        player
            .play(Cursor::new(vec![0u8; 8]), &FormatDescriptor::default())
            .unwrap();

        let err = player
            .play(Cursor::new(vec![0u8; 8]), &FormatDescriptor::default())
            .unwrap_err();
        assert!(matches!(err, PlayerError::InvalidState(_)));

        // 关闭后可以开始新的流
        player.close().unwrap();
        player
            .play(Cursor::new(vec![0u8; 8]), &FormatDescriptor::default())
            .unwrap();
        assert_eq!(player.bytes_written(), 16);
    }

    #[test]
    fn test_close_from_another_thread_stops_streaming() {
        let memory = MemorySink::new();
        let player = Arc::new(StreamingPlayer::new(memory.clone(), config(Duration::from_secs(30))));

        let worker = {
            let player = Arc::clone(&player);
            thread::spawn(move || player.play(EndlessReader, &FormatDescriptor::default()))
        };

        thread::sleep(Duration::from_millis(50));
        player.close().unwrap();

        let written = worker.join().unwrap().unwrap();
        assert_eq!(written as usize, memory.contents().len());
        assert_eq!(player.state(), PlayerState::Closed);
        assert_eq!(memory.close_count(), 1);
    }

    #[test]
    fn test_play_samples_encodes_with_format() {
        let memory = MemorySink::new();
        let player = StreamingPlayer::new(memory.clone(), config(Duration::from_millis(1)));
        let format = FormatDescriptor::pcm_16(44100, 1);

        player.play_samples(&[1.0, -1.0, 0.0], &format).unwrap();
        assert_eq!(memory.contents(), vec![0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_invalid_format_is_rejected_before_open() {
        let memory = MemorySink::new();
        let player = StreamingPlayer::new(memory.clone(), PlayerConfig::default());
        let mut format = FormatDescriptor::default();
        format.channels = 0;

        let err = player.play(Cursor::new(vec![0u8; 4]), &format).unwrap_err();
        assert!(matches!(err, PlayerError::Codec(_)));
        assert_eq!(memory.open_count(), 0);
    }

    #[test]
    fn test_close_during_startup_always_closes_line() {
        for _ in 0..500 {
            let memory = MemorySink::new();
            let player = Arc::new(StreamingPlayer::new(memory.clone(), config(Duration::from_secs(30))));

            let closer = {
                let player = Arc::clone(&player);
                thread::spawn(move || {
                    while player.state() == PlayerState::Idle {
                        thread::yield_now();
                    }
                    player.close().unwrap();
                })
            };

            let _ = player.play(Cursor::new(vec![0u8; 64]), &FormatDescriptor::default());
            closer.join().unwrap();

            assert_eq!(player.state(), PlayerState::Closed);
            assert_eq!(memory.open_count(), 1);
            assert_eq!(memory.close_count(), 1);
        }
    }

    #[test]
    fn test_replay_cancels_stale_deferred_close() {
        let memory = MemorySink::new();
        let player = StreamingPlayer::new(memory.clone(), config(Duration::from_secs(30)));
        let format = FormatDescriptor::default();

        // play → close → play
        player.play(Cursor::new(vec![1u8; 32]), &format).unwrap();
        player.close().unwrap();
        let start = Instant::now();
        player.play(Cursor::new(vec![2u8; 32]), &format).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));

        // 线路已关闭，但延迟关闭还挂着
        release(&player.stream, &player.state).unwrap();
        assert_eq!(player.state(), PlayerState::Closed);

        let start = Instant::now();
        player.play(Cursor::new(vec![3u8; 32]), &format).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(player.state(), PlayerState::Draining);

        player.close().unwrap();
        assert_eq!(memory.open_count(), 3);
        assert_eq!(memory.close_count(), 3);
    }

    #[test]
    fn test_looping_repeats_source_until_closed() {
        let memory = MemorySink::new();
        let player = Arc::new(StreamingPlayer::new(memory.clone(), config(Duration::from_secs(30))));
        let data: Vec<u8> = (0..100u8).collect();

        let worker = {
            let player = Arc::clone(&player);
            let source = SlowCursor(Cursor::new(data.clone()));
            thread::spawn(move || player.play_looping(source, &FormatDescriptor::default()))
        };

        while player.bytes_written() < 300 {
            thread::sleep(Duration::from_millis(1));
        }
        player.close().unwrap();

        let written = worker.join().unwrap().unwrap();
        let contents = memory.contents();
        assert!(written >= 300);
        assert_eq!(written as usize, contents.len());
        assert!(contents.iter().enumerate().all(|(i, &b)| b == data[i % data.len()]));
        assert_eq!(player.state(), PlayerState::Closed);
        assert_eq!(memory.close_count(), 1);
    }

    #[test]
    fn test_looping_empty_source_ends() {
        let player = StreamingPlayer::new(MemorySink::new(), config(Duration::from_millis(1)));
        let written = player
            .play_looping(Cursor::new(Vec::new()), &FormatDescriptor::default())
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(player.state(), PlayerState::Draining);
    }

    #[test]
    fn test_close_is_not_blocked_by_stalled_source() {
        let memory = MemorySink::new();
        let player = Arc::new(StreamingPlayer::new(memory.clone(), config(Duration::from_secs(30))));
        let (resume, stalled) = mpsc::channel();

        let worker = {
            let player = Arc::clone(&player);
            let source = StalledReader {
                sent: false,
                resume: stalled,
            };
            thread::spawn(move || player.play(source, &FormatDescriptor::default()))
        };

        while player.bytes_written() < 8 {
            thread::sleep(Duration::from_millis(1));
        }
        let start = Instant::now();
        player.close().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(player.state(), PlayerState::Closed);
        assert_eq!(memory.close_count(), 1);

        resume.send(()).unwrap();
        assert_eq!(worker.join().unwrap().unwrap(), 8);
    }
}
