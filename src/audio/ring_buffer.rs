//! Lock-free Single-Producer Single-Consumer Ring Buffer
//!
//! 设计目标：
//! - 零锁：生产者和消费者完全无锁操作
//! - 零分配：所有内存在初始化时预分配
//! - 缓存友好：使用 #[repr(align(64))] 避免 false sharing
//!
//! 用于 player 写线程（生产者）和 paced output 渲染线程（消费者）之间传递字节

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cache line 对齐包装器
#[repr(align(64))]
pub struct CacheLine<T>(pub T);

impl<T> CacheLine<T> {
    pub fn new(val: T) -> Self {
        Self(val)
    }
}

/// SPSC 无锁环形缓冲区
///
/// write_pos / read_pos 单调递增（wrapping），下标通过 mask 取模
pub struct RingBuffer<T: Copy + Default> {
    buffer: Box<[UnsafeCell<T>]>,
    capacity: usize,
    mask: usize,

    write_pos: CacheLine<AtomicUsize>,
    read_pos: CacheLine<AtomicUsize>,
}

// 生产者只写 [write, read + capacity) 区间，消费者只读 [read, write) 区间，两者不重叠
unsafe impl<T: Copy + Default + Send> Send for RingBuffer<T> {}
unsafe impl<T: Copy + Default + Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// 创建指定容量的 Ring Buffer
    ///
    /// capacity 必须是 2 的幂
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of two");

        let buffer: Vec<UnsafeCell<T>> = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: CacheLine::new(AtomicUsize::new(0)),
            read_pos: CacheLine::new(AtomicUsize::new(0)),
        }
    }

    /// 创建指定最小容量的 Ring Buffer（自动向上取整到 2 的幂）
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self::new(min_capacity.max(1).next_power_of_two())
    }

    /// 写入数据（生产者调用）
    ///
    /// 返回实际写入的元素数，缓冲区满时返回 0，绝不阻塞
    #[inline]
    pub fn write(&self, data: &[T]) -> usize {
        let write = self.write_pos.0.load(Ordering::Relaxed);
        let read = self.read_pos.0.load(Ordering::Acquire);

        let used = write.wrapping_sub(read);
        debug_assert!(used <= self.capacity, "ring buffer invariant violated: used > capacity");

        let to_write = data.len().min(self.capacity - used);
        for (i, &value) in data[..to_write].iter().enumerate() {
            let idx = (write.wrapping_add(i)) & self.mask;
            unsafe {
                *self.buffer[idx].get() = value;
            }
        }

        self.write_pos
            .0
            .store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// 读取数据（消费者调用）
    ///
    /// 返回实际读取的元素数，绝不阻塞
    #[inline]
    pub fn read(&self, output: &mut [T]) -> usize {
        let read = self.read_pos.0.load(Ordering::Relaxed);
        let write = self.write_pos.0.load(Ordering::Acquire);

        let to_read = output.len().min(write.wrapping_sub(read));
        for (i, slot) in output[..to_read].iter_mut().enumerate() {
            let idx = (read.wrapping_add(i)) & self.mask;
            *slot = unsafe { *self.buffer[idx].get() };
        }

        self.read_pos
            .0
            .store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// 当前可读元素数
    #[inline]
    pub fn available(&self) -> usize {
        let write = self.write_pos.0.load(Ordering::Acquire);
        let read = self.read_pos.0.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// 当前可写空间
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 缓冲区填充比例（用于监控）
    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        self.available() as f64 / self.capacity as f64
    }

    /// 丢弃所有未读数据（消费者调用）
    pub fn clear(&self) {
        let write = self.write_pos.0.load(Ordering::Acquire);
        self.read_pos.0.store(write, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ring_buffer_basic() {
        let rb = RingBuffer::<u8>::new(16);

        let data = [1, 2, 3, 4];
        assert_eq!(rb.write(&data), 4);
        assert_eq!(rb.available(), 4);

        let mut output = [0u8; 4];
        assert_eq!(rb.read(&mut output), 4);
        assert_eq!(output, data);
    }

    #[test]
    fn test_ring_buffer_wrap() {
        let rb = RingBuffer::<u8>::new(4);

        assert_eq!(rb.write(&[1, 2, 3, 4]), 4);

        let mut output = [0u8; 2];
        assert_eq!(rb.read(&mut output), 2);
        assert_eq!(output, [1, 2]);

        // 再写入，测试环绕
        assert_eq!(rb.write(&[5, 6]), 2);

        let mut all = [0u8; 4];
        assert_eq!(rb.read(&mut all), 4);
        assert_eq!(all, [3, 4, 5, 6]);
    }

    #[test]
    fn test_ring_buffer_full_and_empty() {
        let rb = RingBuffer::<u8>::new(4);

        assert_eq!(rb.write(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(rb.free_space(), 0);
        assert_eq!(rb.write(&[7]), 0);
        assert_eq!(rb.fill_ratio(), 1.0);

        rb.clear();
        let mut output = [0u8; 4];
        assert_eq!(rb.read(&mut output), 0);
        assert_eq!(rb.free_space(), 4);
    }

    #[test]
    fn test_min_capacity_rounds_up() {
        assert_eq!(RingBuffer::<u8>::with_min_capacity(3000).capacity(), 4096);
        assert_eq!(RingBuffer::<u8>::with_min_capacity(0).capacity(), 1);
    }

    #[test]
    fn test_spsc_preserves_order() {
        let rb = Arc::new(RingBuffer::<u8>::new(64));
        let total = 10_000usize;

        let producer = {
            let rb = Arc::clone(&rb);
            thread::spawn(move || {
                let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
                let mut offset = 0;
                while offset < data.len() {
                    let end = (offset + 37).min(data.len());
                    offset += rb.write(&data[offset..end]);
                    thread::yield_now();
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut buf = [0u8; 29];
        while received.len() < total {
            let n = rb.read(&mut buf);
            received.extend_from_slice(&buf[..n]);
            if n == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert!(received.iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
    }

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<CacheLine<AtomicUsize>>(), 64);
    }
}
