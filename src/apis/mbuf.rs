//! The PktBuf structure is a handle to one pooled packet buffer
//!
//! A buffer has a headroom offset, an effective data length and a reference
//! count living in its pool slot. Cloning a handle bumps the refcount;
//! dropping one releases it, returning the slot to the pool when the count
//! reaches zero. Only the exclusive holder of a buffer may mutate its data;
//! once a buffer has been posted for transmit it must not be touched until
//! the device releases it.

use std::fmt;

use super::{BufError, Mempool};

pub struct PktBuf {
	pool: Mempool,
	index: u32,
}

impl PktBuf {
	pub(crate) fn from_parts(pool: Mempool, index: u32) -> Self {
		Self { pool, index }
	}

	/// Create a new packet buffer holding a copy of `data`
	#[inline]
	pub fn from_bytes(data: &[u8], mp: &Mempool) -> Result<Self, BufError> {
		let mut buf = mp.alloc()?;
		let room = buf.append(data.len())?;
		room.copy_from_slice(data);
		Ok(buf)
	}

	/// Returns amount of data stored in the buffer
	#[inline]
	pub fn data_len(&self) -> usize {
		unsafe { (*self.pool.slot(self.index).cell.get()).data_len as usize }
	}

	/// Returns the amount of bytes left after the data region
	#[inline]
	pub fn tailroom(&self) -> usize {
		unsafe {
			let inner = &*self.pool.slot(self.index).cell.get();
			inner.room.len() - inner.data_off as usize - inner.data_len as usize
		}
	}

	/// Extends the data region by `len` bytes at its end and returns the
	/// newly usable slice
	#[inline]
	pub fn append(&mut self, len: usize) -> Result<&mut [u8], BufError> {
		if len == 0 || len > self.tailroom() {
			return Err(BufError::NotResized);
		}

		unsafe {
			let inner = &mut *self.pool.slot(self.index).cell.get();
			let start = inner.data_off as usize + inner.data_len as usize;
			inner.data_len += len as u16;
			Ok(&mut inner.room[start..start + len])
		}
	}

	/// Truncates the data region to `to_len`
	#[inline]
	pub fn truncate(&mut self, to_len: usize) -> Result<(), BufError> {
		if to_len >= self.data_len() {
			return Err(BufError::NotResized);
		}

		unsafe {
			(*self.pool.slot(self.index).cell.get()).data_len = to_len as u16;
		}
		Ok(())
	}

	/// Writes `data` into the data region at `offset`
	///
	/// The region must already be large enough; call [`PktBuf::append`]
	/// first to reserve space.
	#[inline]
	pub fn write_data_slice(&mut self, offset: usize, data: &[u8]) -> Result<(), BufError> {
		let len = self.data_len();
		if offset >= len {
			return Err(BufError::BadOffset(offset, len));
		}
		if offset + data.len() > len {
			return Err(BufError::OutOfBuffer(data.len(), len - offset));
		}

		unsafe {
			let inner = &mut *self.pool.slot(self.index).cell.get();
			let start = inner.data_off as usize + offset;
			inner.room[start..start + data.len()].copy_from_slice(data);
		}
		Ok(())
	}

	/// The data region as a slice
	#[inline]
	pub fn bytes(&self) -> &[u8] {
		unsafe {
			let inner = &*self.pool.slot(self.index).cell.get();
			let start = inner.data_off as usize;
			&inner.room[start..start + inner.data_len as usize]
		}
	}

	/// Current reference count of the underlying slot
	#[inline]
	pub fn refcnt_read(&self) -> u32 {
		self.pool.slot(self.index).refcnt.load(std::sync::atomic::Ordering::Acquire)
	}

	#[inline]
	pub fn pool(&self) -> &Mempool {
		&self.pool
	}
}

impl Clone for PktBuf {
	/// Another owning handle to the same buffer; the refcount goes up by one
	fn clone(&self) -> Self {
		self.pool.ref_up(self.index);
		Self { pool: self.pool.clone(), index: self.index }
	}
}

impl Drop for PktBuf {
	fn drop(&mut self) {
		self.pool.ref_down(self.index);
	}
}

impl fmt::Debug for PktBuf {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct(&format!("pktbuf#{}", self.index))
			.field("data_len", &self.data_len())
			.field("tailroom", &self.tailroom())
			.field("refcnt", &self.refcnt_read())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pool() -> Mempool {
		Mempool::new("t_mbuf", 4, 128).unwrap()
	}

	#[test]
	fn append_then_read_back() {
		let mp = pool();
		let buf = PktBuf::from_bytes(&[1, 2, 3, 4], &mp).unwrap();
		assert_eq!(buf.data_len(), 4);
		assert_eq!(buf.bytes(), &[1, 2, 3, 4]);
	}

	#[test]
	fn append_respects_tailroom() {
		let mp = pool();
		let mut buf = mp.alloc().unwrap();
		assert_eq!(buf.tailroom(), 128);
		assert!(buf.append(129).is_err());
		assert!(buf.append(128).is_ok());
		assert_eq!(buf.tailroom(), 0);
	}

	#[test]
	fn truncate_shrinks_only() {
		let mp = pool();
		let mut buf = PktBuf::from_bytes(&[0u8; 16], &mp).unwrap();
		assert!(buf.truncate(20).is_err());
		buf.truncate(8).unwrap();
		assert_eq!(buf.data_len(), 8);
	}

	#[test]
	fn write_data_slice_bounds() {
		let mp = pool();
		let mut buf = PktBuf::from_bytes(&[0u8; 8], &mp).unwrap();
		assert!(buf.write_data_slice(8, &[1]).is_err());
		assert!(buf.write_data_slice(6, &[1, 2, 3]).is_err());
		buf.write_data_slice(6, &[1, 2]).unwrap();
		assert_eq!(&buf.bytes()[6..], &[1, 2]);
	}
}
