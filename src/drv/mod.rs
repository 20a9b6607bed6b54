//! Poll-mode NIC driver interface consumed by the port layer
//!
//! The trait mirrors the ethdev surface the engine needs: runtime init,
//! device enumeration, queue setup, burst tx/rx, counters and link state.
//! A production build backs it with a kernel-bypass driver; tests and the
//! bundled daemon use the [`loopback::LoopbackDriver`] double.

pub mod loopback;

pub use loopback::LoopbackDriver;

use crate::apis::{Mempool, PktBuf, PortError, RuntimeConfig, RuntimeError};

/// Driver-local port index
pub type DevPortId = u16;

/// PCI address of a device, used for predictable interface naming
#[derive(Clone, Copy, Debug, Default)]
pub struct PciAddr {
	pub domain: u32,
	pub bus: u8,
	pub devid: u8,
	pub function: u8,
}

#[derive(Clone, Copy, Debug)]
pub struct DevInfo {
	pub pci: PciAddr,
	pub if_index: u32,
	pub min_rx_bufsize: u32,
	pub max_rx_pktlen: u32,
	pub max_rx_queues: u16,
	pub max_tx_queues: u16,
}

/// Raw device counters as the hardware reports them; 64-bit, free-running,
/// allowed to wrap
#[derive(Clone, Copy, Debug, Default)]
pub struct DevStats {
	pub ipackets: u64,
	pub opackets: u64,
	pub ibytes: u64,
	pub obytes: u64,
	pub ierrors: u64,
	pub oerrors: u64,
	pub rx_nombuf: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
	Up,
	Down,
}

/// Device-level configuration applied before queue setup
#[derive(Clone, Copy, Debug)]
pub struct EthConf {
	pub max_rx_pktlen: u32,
}

impl Default for EthConf {
	fn default() -> Self {
		Self { max_rx_pktlen: 1518 }
	}
}

pub trait EthDriver: Send + Sync {
	/// Bring up the driver runtime with the fixed startup arguments
	fn init_runtime(&self, conf: &RuntimeConfig) -> Result<(), RuntimeError>;

	/// Number of devices the probe discovered
	fn device_count(&self) -> u16;

	fn device_info(&self, port: DevPortId) -> Result<DevInfo, PortError>;

	fn configure(
		&self,
		port: DevPortId,
		rx_queues: u16,
		tx_queues: u16,
		conf: &EthConf,
	) -> Result<(), PortError>;

	fn rx_queue_setup(
		&self,
		port: DevPortId,
		queue: u16,
		descriptors: u16,
		pool: &Mempool,
	) -> Result<(), PortError>;

	fn tx_queue_setup(&self, port: DevPortId, queue: u16, descriptors: u16)
		-> Result<(), PortError>;

	fn start(&self, port: DevPortId) -> Result<(), PortError>;

	fn promiscuous_enable(&self, port: DevPortId) -> Result<(), PortError>;

	/// Post a burst of packets to a tx queue; returns how many the device
	/// accepted. Ownership of all buffers passes to the driver either way.
	fn tx_burst(&self, port: DevPortId, queue: u16, pkts: Vec<PktBuf>) -> usize;

	/// Drain up to `max` packets from an rx queue
	fn rx_burst(&self, port: DevPortId, queue: u16, max: usize) -> Vec<PktBuf>;

	fn stats_get(&self, port: DevPortId) -> DevStats;

	/// Non-blocking link state query
	fn link_get_nowait(&self, port: DevPortId) -> LinkStatus;
}
