//! The Mempool struct is a fixed-capacity pool of reusable packet buffers
//!
//! Buffers are uniform sized, large enough for an MTU frame plus headroom,
//! and carry a per-slot reference count. Allocation and release go through a
//! lock-free queue of free slot indices so all cores can alloc/free
//! concurrently.

use std::{
	cell::UnsafeCell,
	fmt,
	sync::{
		atomic::{AtomicU32, Ordering},
		Arc,
	},
};

use crossbeam_queue::ArrayQueue;

use super::{MemoryError, PktBuf};

pub(crate) struct BufInner {
	pub(crate) data_off: u16,
	pub(crate) data_len: u16,
	pub(crate) room: Box<[u8]>,
}

pub(crate) struct BufSlot {
	pub(crate) refcnt: AtomicU32,
	pub(crate) cell: UnsafeCell<BufInner>,
}

// A slot's cell is only ever mutated through the single PktBuf handle that
// exclusively owns the buffer; concurrent access is limited to the atomic
// refcount.
unsafe impl Send for BufSlot {}
unsafe impl Sync for BufSlot {}

struct PoolInner {
	name: String,
	data_size: u32,
	slots: Box<[BufSlot]>,
	free: ArrayQueue<u32>,
}

pub struct Mempool {
	inner: Arc<PoolInner>,
}

impl Clone for Mempool {
	fn clone(&self) -> Self {
		Self { inner: Arc::clone(&self.inner) }
	}
}

impl Mempool {
	pub const BUF_DATA_SIZE: u32 = 2048;
	pub const BUF_HEADROOM: u32 = 128;
	pub const NUM_BUFS: u32 = 16 * 1024;

	pub fn new(name: &str, capacity: u32, data_size: u32) -> Result<Self, MemoryError> {
		if capacity == 0 || data_size == 0 {
			log::error!("mempool {}: invalid capacity/buffer size", name);
			return Err(MemoryError::Invalid);
		}

		let room_len = (Self::BUF_HEADROOM + data_size) as usize;
		let mut slots = Vec::with_capacity(capacity as usize);
		let free = ArrayQueue::new(capacity as usize);
		for i in 0..capacity {
			slots.push(BufSlot {
				refcnt: AtomicU32::new(0),
				cell: UnsafeCell::new(BufInner {
					data_off: Self::BUF_HEADROOM as u16,
					data_len: 0,
					room: vec![0u8; room_len].into_boxed_slice(),
				}),
			});
			// freshly built queue always has room
			let _ = free.push(i);
		}

		log::info!("created mempool: {} ({} bufs x {} bytes)", name, capacity, data_size);
		Ok(Self {
			inner: Arc::new(PoolInner {
				name: name.to_owned(),
				data_size,
				slots: slots.into_boxed_slice(),
				free,
			}),
		})
	}

	/// Draw one buffer from the pool
	pub fn alloc(&self) -> Result<PktBuf, MemoryError> {
		let index = match self.inner.free.pop() {
			Some(i) => i,
			None => return Err(MemoryError::NoBuf),
		};

		let slot = &self.inner.slots[index as usize];
		slot.refcnt.store(1, Ordering::Release);
		// sole owner now; reset the data region bookkeeping
		unsafe {
			let inner = &mut *slot.cell.get();
			inner.data_off = Self::BUF_HEADROOM as u16;
			inner.data_len = 0;
		}

		Ok(PktBuf::from_parts(self.clone(), index))
	}

	/// Returns the name of the mempool
	#[inline]
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Number of buffers currently sitting in the free list
	#[inline]
	pub fn current_count(&self) -> usize {
		self.inner.free.len()
	}

	#[inline]
	pub fn capacity(&self) -> usize {
		self.inner.slots.len()
	}

	#[inline]
	pub fn data_size(&self) -> u32 {
		self.inner.data_size
	}

	#[inline]
	pub(crate) fn slot(&self, index: u32) -> &BufSlot {
		&self.inner.slots[index as usize]
	}

	pub(crate) fn ref_up(&self, index: u32) {
		self.slot(index).refcnt.fetch_add(1, Ordering::AcqRel);
	}

	pub(crate) fn ref_down(&self, index: u32) {
		let slot = self.slot(index);
		let prev = slot.refcnt.fetch_sub(1, Ordering::AcqRel);
		if prev == 1 {
			if self.inner.free.push(index).is_err() {
				log::error!("{}: free list overflow for buffer {}", self.inner.name, index);
			}
		} else if prev == 0 {
			// underflow: a handle was released twice somewhere
			slot.refcnt.store(0, Ordering::Release);
			log::error!("{}: refcount underflow for buffer {}", self.inner.name, index);
			debug_assert!(false, "buffer refcount underflow");
		}
	}
}

impl fmt::Debug for Mempool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct(&self.inner.name)
			.field("capacity", &self.capacity())
			.field("free", &self.current_count())
			.field("data_size", &self.inner.data_size)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn alloc_free_cycles_through_the_pool() {
		let mp = Mempool::new("t_pool", 4, 256).unwrap();
		assert_eq!(mp.current_count(), 4);

		let a = mp.alloc().unwrap();
		let b = mp.alloc().unwrap();
		assert_eq!(mp.current_count(), 2);

		drop(a);
		assert_eq!(mp.current_count(), 3);
		drop(b);
		assert_eq!(mp.current_count(), 4);
	}

	#[test]
	fn exhaustion_reports_no_buf() {
		let mp = Mempool::new("t_small", 1, 256).unwrap();
		let _held = mp.alloc().unwrap();
		assert!(matches!(mp.alloc(), Err(MemoryError::NoBuf)));
	}

	#[test]
	fn clone_keeps_the_buffer_alive() {
		let mp = Mempool::new("t_clone", 2, 256).unwrap();
		let a = mp.alloc().unwrap();
		let extra = a.clone();
		assert_eq!(a.refcnt_read(), 2);

		drop(a);
		assert_eq!(mp.current_count(), 1);
		drop(extra);
		assert_eq!(mp.current_count(), 2);
	}

	#[test]
	fn zero_capacity_is_rejected() {
		assert!(matches!(Mempool::new("t_bad", 0, 256), Err(MemoryError::Invalid)));
	}
}
