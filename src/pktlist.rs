//! The packet list a transmit engine replays
//!
//! A list is an ordered array of pre-built buffers with scheduled
//! timestamps, partitioned into packet sets that each carry their own loop
//! count and per-loop delay. A list without any timing structure transmits
//! in top-speed mode instead.

use crate::apis::{Mempool, PktBuf};

/// One contiguous sub-range of the list with its own replay loop
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketSet {
	pub start_ofs: u64,
	pub end_ofs: u64,
	pub loop_count: u64,
	pub repeat_delay_usec: u64,
}

pub struct PacketRecord {
	pub buf: PktBuf,
	pub ts_sec: u64,
	pub ts_nsec: u64,
}

pub struct PacketList {
	packets: Vec<PacketRecord>,
	max_size: u64,
	sets: Vec<PacketSet>,
	loop_mode: bool,
	loop_delay_sec: u64,
	loop_delay_nsec: u64,
	top_speed: bool,
}

impl PacketList {
	pub fn new() -> Self {
		Self {
			packets: Vec::new(),
			max_size: 0,
			sets: Vec::new(),
			loop_mode: false,
			loop_delay_sec: 0,
			loop_delay_nsec: 0,
			top_speed: true,
		}
	}

	/// Return every held buffer to the pool and reset all state
	pub fn clear(&mut self) {
		// dropping a record releases the list's reference; any clone still
		// in flight on the driver side keeps the buffer alive on its own
		self.packets.clear();
		self.sets.clear();
		self.max_size = 0;
		self.loop_mode = false;
		self.loop_delay_sec = 0;
		self.loop_delay_nsec = 0;
		self.top_speed = true;
	}

	/// Pre-size backing storage for `size` packets and the per-stream set
	/// descriptors
	///
	/// One extra set slot is reserved beyond `active_stream_count`: the
	/// transmit loop peeks one set past the final one.
	pub fn set_size(&mut self, size: u64, active_stream_count: usize) {
		debug_assert!(self.packets.is_empty());
		self.max_size = size;
		if size == 0 {
			return;
		}
		self.packets.reserve(size as usize);
		self.sets.reserve(active_stream_count + 1);
	}

	/// Append one packet with its scheduled timestamp
	///
	/// The bytes are truncated to the buffer's tailroom when oversized.
	/// Returns false when the pool is exhausted or the list is full.
	pub fn append(&mut self, sec: u64, nsec: u64, bytes: &[u8], pool: &Mempool) -> bool {
		if self.size() >= self.max_size {
			log::warn!("packet list is full ({} packets)", self.max_size);
			return false;
		}

		let mut buf = match pool.alloc() {
			Ok(b) => b,
			Err(_) => return false,
		};

		let mut length = bytes.len();
		let tailroom = buf.tailroom();
		if length > tailroom {
			length = tailroom;
		}

		match buf.append(length) {
			Ok(room) => room.copy_from_slice(&bytes[..length]),
			Err(e) => {
				log::debug!("not enough tailroom in buffer: {}", e);
				return false;
			}
		}

		self.packets.push(PacketRecord { buf, ts_sec: sec, ts_nsec: nsec });

		if sec != 0 || nsec != 0 {
			self.top_speed = false;
		}

		true
	}

	/// Declare a set covering the next `size` records, replayed `repeats`
	/// times with the given delay after each pass
	///
	/// A zero-size set covers no records (a stream configured for zero
	/// packets) and gets no descriptor.
	pub fn loop_next_set(&mut self, size: u64, repeats: u64, delay_sec: u64, delay_nsec: u64) {
		if size == 0 {
			log::debug!("skipping empty packet set");
			return;
		}

		let start_ofs = self.size();
		let set = PacketSet {
			start_ofs,
			end_ofs: start_ofs + size - 1,
			loop_count: repeats,
			repeat_delay_usec: delay_sec * 1_000_000 + delay_nsec / 1_000,
		};

		log::debug!(
			"set [{}] ({} - {})x{} delay = {} usec",
			self.sets.len(),
			set.start_ofs,
			set.end_ofs,
			set.loop_count,
			set.repeat_delay_usec
		);

		if set.repeat_delay_usec != 0 {
			self.top_speed = false;
		}
		self.sets.push(set);
	}

	/// Configure the outer loop over the whole list
	pub fn set_loop_mode(&mut self, loop_mode: bool, delay_sec: u64, delay_nsec: u64) {
		self.loop_mode = loop_mode;
		self.loop_delay_sec = delay_sec;
		self.loop_delay_nsec = delay_nsec;
		if loop_mode && (delay_sec != 0 || delay_nsec != 0) {
			self.top_speed = false;
		}
	}

	#[inline]
	pub fn size(&self) -> u64 {
		self.packets.len() as u64
	}

	#[inline]
	pub fn max_size(&self) -> u64 {
		self.max_size
	}

	#[inline]
	pub fn set_count(&self) -> usize {
		self.sets.len()
	}

	#[inline]
	pub fn record(&self, index: u64) -> &PacketRecord {
		&self.packets[index as usize]
	}

	/// The set at `index`, or the zeroed sentinel one past the final set
	#[inline]
	pub fn set_at(&self, index: usize) -> PacketSet {
		self.sets.get(index).copied().unwrap_or_default()
	}

	#[inline]
	pub fn is_loop_mode(&self) -> bool {
		self.loop_mode
	}

	#[inline]
	pub fn loop_delay(&self) -> (u64, u64) {
		(self.loop_delay_sec, self.loop_delay_nsec)
	}

	#[inline]
	pub fn is_top_speed(&self) -> bool {
		self.top_speed
	}

	/// Check the set descriptors partition `[0, size)` into ascending,
	/// non-overlapping ranges
	pub fn sets_are_consistent(&self) -> bool {
		let mut expected = 0u64;
		for set in &self.sets {
			if set.start_ofs != expected || set.end_ofs < set.start_ofs {
				return false;
			}
			expected = set.end_ofs + 1;
		}
		expected == self.size()
	}
}

impl Default for PacketList {
	fn default() -> Self {
		Self::new()
	}
}
