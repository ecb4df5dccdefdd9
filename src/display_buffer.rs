//! # Display Ring Buffer Module
//!
//! Fixed-capacity circular buffer that carries samples from the acquisition thread
//! to a render thread without either side ever waiting on the other.
//!
//! ## Architecture
//! - **DisplayRingBuffer**: Shared storage plus two groups of counters, each on its own cache line
//! - **DisplayWriter**: The single producer handle
//! - **DisplayReader**: The single consumer handle
//!
//! ## Consistency
//! The writer never checks where the reader is. A read pass starts at most
//! `max_read_size` samples behind the writer and walks forward; if the writer laps
//! it mid-pass, the pass returns a mixture of old and new samples. Each slot is a
//! single atomic word, so a sample itself is never half-written, only out of date.
//! This is acceptable because the samples only ever feed a picture.
//!
//! Keep `max_read_size` well below `capacity` so that a lap inside one pass is
//! practically impossible at the production rate.
//!
//! ## Usage
//! ```text
//! let (mut writer, mut reader) = DisplayRingBuffer::<PosPoint>::new(4096, 512);
//! writer.write(point, !point.x.is_nan());          // acquisition thread
//! let n = reader.start_read();                     // render thread
//! while reader.read(&mut point) { ... }
//! ```

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A sample that fits in one 64-bit slot
pub trait DisplaySample: Copy + Default {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

impl DisplaySample for f32 {
    fn to_bits(self) -> u64 {
        u64::from(f32::to_bits(self))
    }

    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl DisplaySample for f64 {
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

/// A 2-D tracked position in camera pixels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PosPoint {
    pub x: f32,
    pub y: f32,
}

impl PosPoint {
    pub fn is_valid(&self) -> bool {
        !self.x.is_nan() && !self.y.is_nan()
    }
}

impl DisplaySample for PosPoint {
    fn to_bits(self) -> u64 {
        (u64::from(self.x.to_bits()) << 32) | u64::from(self.y.to_bits())
    }

    fn from_bits(bits: u64) -> Self {
        Self {
            x: f32::from_bits((bits >> 32) as u32),
            y: f32::from_bits(bits as u32),
        }
    }
}

// Producer-owned counters, alone on the first cache line
#[repr(align(64))]
struct WriterCursor {
    at: AtomicUsize,
    used: AtomicUsize,
}

// Consumer-owned counters, alone on the second cache line
#[repr(align(64))]
struct ReaderCursor {
    at: AtomicUsize,
    remaining: AtomicUsize,
}

/// Storage shared by one [`DisplayWriter`] and one [`DisplayReader`]
#[repr(C)]
pub struct DisplayRingBuffer<T> {
    writer: WriterCursor,
    reader: ReaderCursor,
    slots: Box<[AtomicU64]>,
    capacity: usize,
    max_read_size: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DisplaySample> DisplayRingBuffer<T> {
    /// Allocate a buffer and hand out its producer and consumer
    ///
    /// # Panics
    /// If `capacity` is zero or `max_read_size` is not strictly less than `capacity`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize, max_read_size: usize) -> (DisplayWriter<T>, DisplayReader<T>) {
        assert!(capacity > 0, "capacity must be greater than zero");
        assert!(
            max_read_size < capacity,
            "max_read_size ({}) must be less than capacity ({})",
            max_read_size,
            capacity
        );

        let empty = T::default().to_bits();
        let shared = Arc::new(Self {
            writer: WriterCursor {
                at: AtomicUsize::new(0),
                used: AtomicUsize::new(0),
            },
            reader: ReaderCursor {
                at: AtomicUsize::new(0),
                remaining: AtomicUsize::new(0),
            },
            slots: (0..capacity).map(|_| AtomicU64::new(empty)).collect(),
            capacity,
            max_read_size,
            _marker: PhantomData,
        });

        (
            DisplayWriter {
                shared: shared.clone(),
            },
            DisplayReader { shared },
        )
    }

    fn next_index(&self, index: usize) -> usize {
        if index + 1 == self.capacity {
            0
        } else {
            index + 1
        }
    }
}

/// Producer side of a [`DisplayRingBuffer`]
pub struct DisplayWriter<T> {
    shared: Arc<DisplayRingBuffer<T>>,
}

impl<T: DisplaySample> DisplayWriter<T> {
    /// Store `value` at the writer cursor
    ///
    /// The cursor only advances when `is_valid` is true; otherwise the slot is
    /// overwritten by the next write. Never blocks.
    pub fn write(&mut self, value: T, is_valid: bool) {
        let buf = &*self.shared;
        let at = buf.writer.at.load(Ordering::Relaxed);
        buf.slots[at].store(value.to_bits(), Ordering::Relaxed);

        if is_valid {
            buf.writer.at.store(buf.next_index(at), Ordering::Release);
            let used = buf.writer.used.load(Ordering::Relaxed);
            if used < buf.capacity {
                buf.writer.used.store(used + 1, Ordering::Release);
            }
        }
    }

    /// Number of valid samples held, capped at capacity
    pub fn len(&self) -> usize {
        self.shared.writer.used.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Reset both cursors to empty without reallocating
    ///
    /// Only call this when no read pass is in flight, e.g. while recording is stopped.
    pub fn clear(&self) {
        let buf = &*self.shared;
        buf.reader.remaining.store(0, Ordering::Relaxed);
        buf.writer.used.store(0, Ordering::Relaxed);
        buf.writer.at.store(0, Ordering::Relaxed);
        buf.reader.at.store(0, Ordering::Release);
    }
}

impl DisplayWriter<PosPoint> {
    /// Push one point per `(x, y)` pair, skipping pairs with a NaN coordinate
    pub fn push_positions(&mut self, xs: &[f32], ys: &[f32]) {
        for (&x, &y) in xs.iter().zip(ys) {
            let point = PosPoint { x, y };
            self.write(point, point.is_valid());
        }
    }
}

/// Consumer side of a [`DisplayRingBuffer`]
pub struct DisplayReader<T> {
    shared: Arc<DisplayRingBuffer<T>>,
}

impl<T: DisplaySample> DisplayReader<T> {
    /// Begin a read pass and return how many samples it will yield
    ///
    /// With fewer than `max_read_size` samples stored, the pass covers all of them
    /// from the oldest. Otherwise it covers the latest `max_read_size`.
    pub fn start_read(&mut self) -> usize {
        let buf = &*self.shared;
        let used = buf.writer.used.load(Ordering::Acquire);
        let (start, count) = if used < buf.max_read_size {
            (0, used)
        } else {
            let writer_at = buf.writer.at.load(Ordering::Acquire);
            (
                (writer_at + buf.capacity - buf.max_read_size) % buf.capacity,
                buf.max_read_size,
            )
        };

        buf.reader.at.store(start, Ordering::Relaxed);
        buf.reader.remaining.store(count, Ordering::Relaxed);
        log::trace!(
            "start_read: writer_used={} reader_at={} reader_remaining={}",
            used,
            start,
            count
        );
        count
    }

    /// Copy the next sample of the pass into `dest` and report whether more remain
    ///
    /// Returns false without touching `dest` once the pass is exhausted.
    pub fn read(&mut self, dest: &mut T) -> bool {
        let buf = &*self.shared;
        let remaining = buf.reader.remaining.load(Ordering::Relaxed);
        if remaining == 0 {
            return false;
        }

        let at = buf.reader.at.load(Ordering::Relaxed);
        *dest = T::from_bits(buf.slots[at].load(Ordering::Acquire));
        buf.reader.at.store(buf.next_index(at), Ordering::Relaxed);
        buf.reader.remaining.store(remaining - 1, Ordering::Relaxed);
        remaining > 1
    }

    /// Run one complete pass, appending its samples to `out`
    pub fn drain_into(&mut self, out: &mut Vec<T>) -> usize {
        let count = self.start_read();
        out.reserve(count);
        let mut value = T::default();
        for _ in 0..count {
            self.read(&mut value);
            out.push(value);
        }
        count
    }

    pub fn max_read_size(&self) -> usize {
        self.shared.max_read_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of};
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_cursor_layout() {
        assert_eq!(align_of::<WriterCursor>(), 64);
        assert_eq!(offset_of!(DisplayRingBuffer<f32>, writer), 0);
        assert!(offset_of!(DisplayRingBuffer<f32>, reader) >= 64);
    }

    #[test]
    #[should_panic(expected = "max_read_size")]
    fn test_max_read_must_be_below_capacity() {
        let _ = DisplayRingBuffer::<f32>::new(8, 8);
    }

    #[test]
    fn test_partial_fill_reads_from_oldest() {
        let (mut writer, mut reader) = DisplayRingBuffer::<f32>::new(8, 4);
        writer.write(1.0, true);
        writer.write(2.0, true);
        writer.write(3.0, true);

        assert_eq!(reader.start_read(), 3);
        let mut v = 0.0;
        assert!(reader.read(&mut v));
        assert_eq!(v, 1.0);
        assert!(reader.read(&mut v));
        assert_eq!(v, 2.0);
        assert!(!reader.read(&mut v));
        assert_eq!(v, 3.0);
        assert!(!reader.read(&mut v));
        assert_eq!(v, 3.0);
    }

    #[test]
    fn test_read_window_follows_writer() {
        let (mut writer, mut reader) = DisplayRingBuffer::<f64>::new(8, 4);
        for i in 0..10 {
            writer.write(i as f64, true);
        }
        assert_eq!(writer.len(), 8);

        let mut out = Vec::new();
        assert_eq!(reader.drain_into(&mut out), 4);
        assert_eq!(out, vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_invalid_writes_do_not_advance() {
        let (mut writer, mut reader) = DisplayRingBuffer::<f32>::new(8, 4);
        writer.write(1.0, true);
        writer.write(99.0, false);
        writer.write(2.0, true);

        let mut out = Vec::new();
        reader.drain_into(&mut out);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_push_positions_skips_nan() {
        let (mut writer, mut reader) = DisplayRingBuffer::<PosPoint>::new(16, 8);
        writer.push_positions(&[1.0, f32::NAN, 3.0], &[10.0, 20.0, f32::NAN]);
        writer.push_positions(&[4.0], &[40.0]);

        let mut out = Vec::new();
        reader.drain_into(&mut out);
        assert_eq!(
            out,
            vec![PosPoint { x: 1.0, y: 10.0 }, PosPoint { x: 4.0, y: 40.0 }]
        );
    }

    #[test]
    fn test_clear_resets_without_realloc() {
        let (mut writer, mut reader) = DisplayRingBuffer::<f32>::new(4, 2);
        for i in 0..6 {
            writer.write(i as f32, true);
        }
        writer.clear();
        assert!(writer.is_empty());
        assert_eq!(reader.start_read(), 0);

        writer.write(42.0, true);
        let mut out = Vec::new();
        reader.drain_into(&mut out);
        assert_eq!(out, vec![42.0]);
        assert_eq!(writer.capacity(), 4);
    }

    #[test]
    fn test_pos_point_bits_preserved() {
        let p = PosPoint { x: -12.5, y: 700.25 };
        assert_eq!(PosPoint::from_bits(p.to_bits()), p);
    }

    #[test]
    fn test_concurrent_tear_tolerance() {
        const CAPACITY: usize = 256;
        const MAX_READ: usize = 32;
        const TOTAL: usize = CAPACITY * 3;

        let (mut writer, mut reader) = DisplayRingBuffer::<f64>::new(CAPACITY, MAX_READ);
        let done = Arc::new(AtomicBool::new(false));

        let producer_done = done.clone();
        let producer = std::thread::spawn(move || {
            for i in 0..TOTAL {
                writer.write(i as f64, true);
                if i % 16 == 0 {
                    std::thread::yield_now();
                }
            }
            producer_done.store(true, Ordering::Release);
        });

        let mut total_read = 0usize;
        let mut passes = 0usize;
        loop {
            let finished = done.load(Ordering::Acquire);
            let before = total_read;
            let count = reader.start_read();
            assert!(count <= MAX_READ);

            let mut value = 0.0f64;
            let mut yielded = 0;
            if count > 0 {
                loop {
                    let more = reader.read(&mut value);
                    yielded += 1;
                    assert!(value >= 0.0 && value < TOTAL as f64);
                    if !more {
                        break;
                    }
                }
            }
            assert_eq!(yielded, count);
            total_read += yielded;
            assert!(total_read >= before);
            passes += 1;
            if finished {
                break;
            }
        }
        producer.join().unwrap();

        // Once the writer has stopped, a pass sees exactly the newest samples
        let mut out = Vec::new();
        reader.drain_into(&mut out);
        let expected: Vec<f64> = ((TOTAL - MAX_READ)..TOTAL).map(|i| i as f64).collect();
        assert_eq!(out, expected);
        assert!(passes > 0);
    }
}
