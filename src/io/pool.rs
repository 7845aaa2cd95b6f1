//! A process-wide pool of reusable byte buffers, bucketed by power-of-two
//! size classes.
//!
//! Both sides of the non-blocking connection queue data in pooled buffers,
//! so the same few allocations cycle through write-flush-read paths instead
//! of being reallocated per message. Reuse is best-effort: a class that is
//! momentarily empty simply allocates, and a full class drops returned
//! buffers on the floor.

use std::mem;
use std::ops::{Deref, DerefMut};

use crossbeam_queue::ArrayQueue;
use once_cell::sync::Lazy;

// Size classes are 2^8 ..= 2^25; requests above the top class get an
// exact-fit allocation that is never pooled.
const MIN_CLASS_SHIFT: u32 = 8;
const MAX_CLASS_SHIFT: u32 = 25;
const CLASS_COUNT: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

// Buffers retained per class.
const PER_CLASS: usize = 32;

static POOL: Lazy<Vec<ArrayQueue<Vec<u8>>>> =
    Lazy::new(|| (0..CLASS_COUNT).map(|_| ArrayQueue::new(PER_CLASS)).collect());

/// The largest buffer size served from the pool.
pub const MAX_POOLED: usize = 1 << MAX_CLASS_SHIFT;

// Maps a requested size to its class index:
// ceil(log2(max(size, 1))) - 8, clamped to [0, 17].
fn class_index(size: usize) -> usize {
    let exp = size.max(1).next_power_of_two().trailing_zeros();

    (exp.saturating_sub(MIN_CLASS_SHIFT) as usize).min(CLASS_COUNT - 1)
}

/// Acquire a buffer with `len() == size` and the smallest pool-class
/// capacity that fits, allocating if the class is empty.
///
/// Contents are not guaranteed to be zeroed; treat the buffer as
/// uninitialized scratch. The buffer returns to its class when dropped.
pub fn get(size: usize) -> PoolBuf {
    if size > MAX_POOLED {
        let mut buf = Vec::with_capacity(size);
        buf.resize(size, 0);

        return PoolBuf { buf };
    }

    let index = class_index(size);

    let mut buf = POOL[index]
        .pop()
        .unwrap_or_else(|| Vec::with_capacity(1 << (MIN_CLASS_SHIFT + index as u32)));

    buf.resize(size, 0);

    PoolBuf { buf }
}

// Returns a buffer to its class. Only buffers whose capacity is an exact
// class size are accepted; anything else (including oversize exact-fit
// allocations and buffers that were grown after acquisition) is dropped.
fn put(mut buf: Vec<u8>) {
    let cap = buf.capacity();

    if !cap.is_power_of_two()
        || cap < (1 << MIN_CLASS_SHIFT)
        || cap > (1 << MAX_CLASS_SHIFT)
    {
        return;
    }

    buf.clear();

    let index = (cap.trailing_zeros() - MIN_CLASS_SHIFT) as usize;
    let _ = POOL[index].push(buf);
}

/// A byte buffer borrowed from the pool; dereferences to `Vec<u8>` and
/// returns itself to the pool on drop.
#[derive(Debug)]
pub struct PoolBuf {
    buf: Vec<u8>,
}

impl Deref for PoolBuf {
    type Target = Vec<u8>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PoolBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PoolBuf {
    fn drop(&mut self) {
        put(mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::{class_index, get, CLASS_COUNT, MAX_POOLED};

    #[test]
    fn it_maps_sizes_to_classes() {
        assert_eq!(class_index(0), 0);
        assert_eq!(class_index(1), 0);
        assert_eq!(class_index(256), 0);
        assert_eq!(class_index(257), 1);
        assert_eq!(class_index(512), 1);
        assert_eq!(class_index(8192), 5);
        assert_eq!(class_index(MAX_POOLED), CLASS_COUNT - 1);
    }

    #[test]
    fn it_serves_size_class_capacities() {
        for &n in &[1usize, 17, 255, 256, 300, 511, 512, 8191, 8192, 100_000, MAX_POOLED] {
            let buf = get(n);

            assert_eq!(buf.len(), n);
            assert!(buf.capacity().is_power_of_two());
            assert!(buf.capacity() >= 256);
            assert!(buf.capacity() >= n);

            if n >= 256 {
                // the class is the tightest power-of-two fit
                assert!(buf.capacity() < 2 * n);
            } else {
                assert_eq!(buf.capacity(), 256);
            }
        }
    }

    #[test]
    fn it_allocates_oversize_exactly() {
        let n = MAX_POOLED + 1;
        let buf = get(n);

        assert_eq!(buf.len(), n);
        assert_eq!(buf.capacity(), n);
    }
}
