//! 实时节奏输出
//!
//! PacedSink 包装任意 AudioSink，模拟声卡的消费节奏：
//! 写入端把字节放进 ring buffer，渲染线程按 bytes_per_second 的速度
//! 以整帧为单位取出并交给内层线路。ring buffer 满时写入阻塞，
//! 所以上游会被真实的播放速度限流。

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::format::FormatDescriptor;
use super::ring_buffer::RingBuffer;
use super::sink::{AudioSink, OutputError, SinkLine};
use super::stats::PlaybackStats;

/// 输出配置
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Ring buffer 最小字节数（会被向上取整到 2 的幂）
    pub ring_capacity: usize,
    /// 渲染周期
    pub tick: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            // 约 0.37 秒 @ 44.1kHz 16bit 立体声
            ring_capacity: 64 * 1024,
            tick: Duration::from_millis(10),
        }
    }
}

/// 渲染线程共享状态
struct RenderState {
    running: AtomicBool,
    /// 内层线路写入失败
    failed: AtomicBool,
}

/// 按实时速度消费数据的 sink
pub struct PacedSink<S: AudioSink> {
    inner: S,
    config: OutputConfig,
    stats: Arc<PlaybackStats>,
}

impl<S: AudioSink> PacedSink<S> {
    pub fn new(inner: S, config: OutputConfig) -> Self {
        Self {
            inner,
            config,
            stats: Arc::new(PlaybackStats::new()),
        }
    }

    /// 统计信息（跨多次 open 累计）
    pub fn stats(&self) -> Arc<PlaybackStats> {
        Arc::clone(&self.stats)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: AudioSink> AudioSink for PacedSink<S> {
    type Line = PacedLine;

    fn open(&mut self, format: &FormatDescriptor) -> Result<Self::Line, OutputError> {
        let line = self.inner.open(format)?;
        PacedLine::start(line, format, &self.config, Arc::clone(&self.stats))
    }
}

/// PacedSink 打开的线路
pub struct PacedLine {
    ring: Arc<RingBuffer<u8>>,
    state: Arc<RenderState>,
    stats: Arc<PlaybackStats>,
    render_thread: Option<JoinHandle<Result<(), OutputError>>>,
    /// 渲染一个字节所需的纳秒数
    ns_per_byte: u64,
}

impl PacedLine {
    fn start<L: SinkLine + 'static>(
        line: L,
        format: &FormatDescriptor,
        config: &OutputConfig,
        stats: Arc<PlaybackStats>,
    ) -> Result<Self, OutputError> {
        let frame = format.bytes_per_frame().max(1);
        let bytes_per_second = format.bytes_per_second().max(1);

        // 每个 tick 消费的字节数，按整帧对齐，至少一帧
        let tick_bytes = (bytes_per_second as f64 * config.tick.as_secs_f64()) as usize;
        let tick_bytes = (tick_bytes / frame).max(1) * frame;

        // 至少容纳两个 tick 的数据
        let ring = Arc::new(RingBuffer::with_min_capacity(
            config.ring_capacity.max(tick_bytes * 2),
        ));
        let state = Arc::new(RenderState {
            running: AtomicBool::new(true),
            failed: AtomicBool::new(false),
        });

        log::info!(
            "Paced output started: {} | ring {} bytes | {} bytes per {:?}",
            format,
            ring.capacity(),
            tick_bytes,
            config.tick
        );

        let render_thread = {
            let ring = Arc::clone(&ring);
            let state = Arc::clone(&state);
            let stats = Arc::clone(&stats);
            let tick = config.tick;
            thread::Builder::new()
                .name("render".to_string())
                .spawn(move || render_main(line, ring, state, stats, tick, tick_bytes, frame))?
        };

        Ok(Self {
            ring,
            state,
            stats,
            render_thread: Some(render_thread),
            ns_per_byte: (1_000_000_000 / bytes_per_second).max(1),
        })
    }

    /// 尚未渲染的字节数
    pub fn pending_bytes(&self) -> usize {
        self.ring.available()
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    /// 缓冲区满时的自适应等待
    ///
    /// - < 50µs: 仅自旋
    /// - 50-500µs: yield + 短自旋
    /// - > 500µs: 睡眠预计时间的 70%
    fn wait_for_space(&self, bytes_needed: usize) {
        let wait_us = (bytes_needed as u64 * self.ns_per_byte) / 1_000;
        if wait_us < 50 {
            for _ in 0..64 {
                std::hint::spin_loop();
            }
        } else if wait_us < 500 {
            thread::yield_now();
            for _ in 0..32 {
                std::hint::spin_loop();
            }
        } else {
            let sleep_us = (wait_us * 7 / 10).clamp(100, 10_000);
            thread::sleep(Duration::from_micros(sleep_us));
        }
    }
}

impl SinkLine for PacedLine {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, OutputError> {
        if bytes.is_empty() {
            return Ok(0);
        }

        loop {
            if self.state.failed.load(Ordering::Acquire) {
                return Err(OutputError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "render thread stopped",
                )));
            }
            if !self.state.running.load(Ordering::Acquire) {
                return Err(OutputError::Closed);
            }

            let written = self.ring.write(bytes);
            if written > 0 {
                self.stats.on_write(written);
                return Ok(written);
            }

            self.wait_for_space(bytes.len().min(self.ring.capacity()));
        }
    }

    /// 停止渲染线程，丢弃未渲染的数据，关闭内层线路
    fn close(&mut self) -> Result<(), OutputError> {
        let Some(handle) = self.render_thread.take() else {
            return Ok(());
        };

        self.state.running.store(false, Ordering::Release);
        let result = match handle.join() {
            Ok(result) => result,
            Err(_) => {
                log::error!("Render thread panicked");
                Err(OutputError::Closed)
            }
        };

        let discarded = self.ring.available();
        self.ring.clear();
        if discarded > 0 {
            log::debug!("Discarded {} unrendered bytes", discarded);
        }
        log::info!("Paced output closed");
        result
    }
}

impl Drop for PacedLine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error closing paced output: {}", e);
        }
    }
}

/// 渲染线程主函数
///
/// 按固定周期从 ring buffer 取出一个 tick 的整帧数据写给内层线路，
/// 截止时间累加计算，sleep 的误差不会累积
fn render_main<L: SinkLine>(
    mut line: L,
    ring: Arc<RingBuffer<u8>>,
    state: Arc<RenderState>,
    stats: Arc<PlaybackStats>,
    tick: Duration,
    tick_bytes: usize,
    frame: usize,
) -> Result<(), OutputError> {
    let mut buffer = vec![0u8; tick_bytes];
    let mut deadline = Instant::now();
    let mut result = Ok(());

    while state.running.load(Ordering::Acquire) {
        let water_level = ring.available();
        let readable = water_level.min(tick_bytes) / frame * frame;
        let rendered = ring.read(&mut buffer[..readable]);
        stats.on_render(rendered, tick_bytes, water_level);

        if rendered > 0 {
            if let Err(e) = line.write_all(&buffer[..rendered]) {
                log::error!("Render write failed: {}", e);
                state.failed.store(true, Ordering::Release);
                result = Err(e);
                break;
            }
        }

        deadline += tick;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            // 落后太多时重新对齐，不追帧
            deadline = now;
        }
    }

    let closed = line.close();
    result.and(closed)
}
