//! This module defines the structures required for packet memory operations
//!
//! Errors related to pool, buffer and port operations
//!
//! Driver runtime configuration and small lcore helpers

mod mbuf;
mod mempool;
mod port;

pub use mbuf::*;
pub use mempool::*;
pub use port::*;

use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
	#[error("a pool with the same name already exists")]
	Exists,
	#[error("capacity or buffer size provided is invalid")]
	Invalid,
	#[error("not enough memory to back the pool")]
	NoMem,
	#[error("pool is out of buffers")]
	NoBuf,
}

#[derive(Error, Debug)]
pub enum BufError {
	/// The offset exceeds the buffer length
	#[error("Offset {} exceeds the buffer length {}", _0, _1)]
	BadOffset(usize, usize),

	/// The buffer is not resized
	#[error("Buffer is not resized")]
	NotResized,

	/// The write exceeds the remaining buffer length
	#[error("Write of {} bytes exceeds the remaining buffer length {}", _0, _1)]
	OutOfBuffer(usize, usize),

	/// No buffer could be drawn from the pool
	#[error(transparent)]
	Alloc(#[from] MemoryError),
}

#[derive(Error, Debug)]
pub enum PortError {
	#[error("No such device")]
	NoDevice,
	#[error("device rejected the configuration")]
	Configure,
	#[error("rx/tx queue setup failed")]
	QueueSetup,
	#[error("device failed to start")]
	DeviceStart,
	#[error("port has no lcore to transmit")]
	NoLcore,
	#[error("packet list cannot be changed while the transmitter is running")]
	TransmitterBusy,
	#[error("failed to launch the transmit worker")]
	LaunchFailed,
	#[error("operation not supported on this port")]
	NoSupport,
	#[error("port is not usable")]
	NotUsable,
	#[error("no such stream")]
	NoStream,
	#[error(transparent)]
	Memory(#[from] MemoryError),
	#[error(transparent)]
	Stream(#[from] crate::stream::StreamError),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
	#[error("driver runtime failed to initialize")]
	Init,
	#[error("device probe failed")]
	Probe,
	#[error("not enough cores for rx polling")]
	NoRxCore,
	#[error("failed to launch the rx polling worker")]
	RxLaunchFailed,
	#[error(transparent)]
	Pool(#[from] MemoryError),
}

/// Arguments handed to the driver runtime at startup: which cores the
/// engine may use, memory channel count, hugepage memory and a file prefix
/// to keep multiple instances apart.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
	pub core_mask: u64,
	pub mem_channels: u32,
	pub hugepage_mb: u32,
	pub file_prefix: String,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			core_mask: 0xf,
			mem_channels: 1,
			hugepage_mb: 128,
			file_prefix: String::from("pktgen"),
		}
	}
}

/// Busy-wait for `us` microseconds
///
/// Transmit pacing must not release the core to the OS scheduler, so this
/// spins on the TSC-backed monotonic clock instead of sleeping.
#[inline]
pub fn delay_us(us: u64) {
	let end = Instant::now() + Duration::from_micros(us);
	while Instant::now() < end {
		std::hint::spin_loop();
	}
}

/// Pin the calling thread to one CPU core
///
/// Failure is logged and ignored; an unpinned worker still functions, it
/// just loses its latency guarantees.
pub(crate) fn pin_current_thread(core: u32) {
	unsafe {
		let mut set: libc::cpu_set_t = std::mem::zeroed();
		libc::CPU_SET(core as usize, &mut set);
		if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
			log::warn!("failed to pin thread to core {}", core);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_us_waits_at_least_the_requested_time() {
		let start = Instant::now();
		delay_us(2_000);
		assert!(start.elapsed() >= Duration::from_micros(2_000));
	}
}
