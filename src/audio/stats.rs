//! 播放统计模块
//!
//! 写线程与渲染线程共享，全部基于原子计数，lock-free

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 播放统计收集器
pub struct PlaybackStats {
    /// 渲染 tick 次数
    render_count: AtomicU64,
    /// 已开始播放后，缓冲区数据不足的 tick 次数
    starved_ticks: AtomicU64,
    /// sink 接收的字节数
    bytes_accepted: AtomicU64,
    /// 已渲染（交给下游）的字节数
    bytes_rendered: AtomicU64,
    /// 写入调用次数
    chunks_written: AtomicU64,

    // 水位（渲染时采样）
    water_min: AtomicUsize,
    water_max: AtomicUsize,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self {
            render_count: AtomicU64::new(0),
            starved_ticks: AtomicU64::new(0),
            bytes_accepted: AtomicU64::new(0),
            bytes_rendered: AtomicU64::new(0),
            chunks_written: AtomicU64::new(0),
            water_min: AtomicUsize::new(usize::MAX),
            water_max: AtomicUsize::new(0),
        }
    }

    /// 写入端每接收一个 chunk 调用一次
    #[inline]
    pub fn on_write(&self, bytes: usize) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_accepted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// 渲染端每个 tick 调用一次
    ///
    /// `rendered`: 实际取到的字节数，`wanted`: 按时钟应该消费的字节数，
    /// `water_level`: 本次读取前缓冲区中的字节数
    #[inline]
    pub fn on_render(&self, rendered: usize, wanted: usize, water_level: usize) {
        self.render_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_rendered
            .fetch_add(rendered as u64, Ordering::Relaxed);

        // 还没收到任何数据时的空转不算饥饿
        if rendered < wanted && self.bytes_accepted() > 0 {
            self.starved_ticks.fetch_add(1, Ordering::Relaxed);
        }

        self.water_min.fetch_min(water_level, Ordering::Relaxed);
        self.water_max.fetch_max(water_level, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_accepted(&self) -> u64 {
        self.bytes_accepted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_rendered(&self) -> u64 {
        self.bytes_rendered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn starved_ticks(&self) -> u64 {
        self.starved_ticks.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self) -> StatsReport {
        let water_min = self.water_min.load(Ordering::Relaxed);
        StatsReport {
            render_count: self.render_count.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            bytes_accepted: self.bytes_accepted(),
            bytes_rendered: self.bytes_rendered(),
            starved_ticks: self.starved_ticks(),
            water_min: if water_min == usize::MAX { 0 } else { water_min },
            water_max: self.water_max.load(Ordering::Relaxed),
        }
    }

    /// 重置统计
    pub fn reset(&self) {
        self.render_count.store(0, Ordering::Relaxed);
        self.starved_ticks.store(0, Ordering::Relaxed);
        self.bytes_accepted.store(0, Ordering::Relaxed);
        self.bytes_rendered.store(0, Ordering::Relaxed);
        self.chunks_written.store(0, Ordering::Relaxed);
        self.water_min.store(usize::MAX, Ordering::Relaxed);
        self.water_max.store(0, Ordering::Relaxed);
    }
}

impl Default for PlaybackStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    pub render_count: u64,
    pub chunks_written: u64,
    pub bytes_accepted: u64,
    pub bytes_rendered: u64,
    pub starved_ticks: u64,
    pub water_min: usize,
    pub water_max: usize,
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Playback Statistics")?;
        writeln!(f, "===================")?;
        writeln!(f, "Chunks written: {}", self.chunks_written)?;
        writeln!(f, "Bytes accepted: {}", self.bytes_accepted)?;
        writeln!(f, "Bytes rendered: {}", self.bytes_rendered)?;
        writeln!(f, "Render ticks: {}", self.render_count)?;
        writeln!(f, "Starved ticks: {}", self.starved_ticks)?;
        writeln!(f, "Ring Buffer Water Level:")?;
        writeln!(f, "  Min: {} bytes", self.water_min)?;
        write!(f, "  Max: {} bytes", self.water_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starvation_only_counts_after_first_write() {
        let stats = PlaybackStats::new();

        stats.on_render(0, 128, 0);
        assert_eq!(stats.starved_ticks(), 0);

        stats.on_write(64);
        stats.on_render(64, 128, 64);
        assert_eq!(stats.starved_ticks(), 1);

        stats.on_render(128, 128, 512);
        let report = stats.report();
        assert_eq!(report.render_count, 3);
        assert_eq!(report.bytes_rendered, 192);
        assert_eq!(report.bytes_accepted, 64);
        assert_eq!(report.water_min, 0);
        assert_eq!(report.water_max, 512);
    }

    #[test]
    fn test_reset() {
        let stats = PlaybackStats::new();
        stats.on_write(100);
        stats.on_render(10, 10, 90);
        stats.reset();

        let report = stats.report();
        assert_eq!(report.bytes_accepted, 0);
        assert_eq!(report.render_count, 0);
        assert_eq!(report.water_min, 0);
        assert_eq!(report.water_max, 0);
    }
}
