//! A loopback test double for the driver interface
//!
//! Every device is a bounded ring: `tx_burst` moves buffers in, `rx_burst`
//! drains them out on the same device, so whatever a port transmits shows
//! up on its own receive queue. Counters are free-running atomics and the
//! link reports up once the device has been started.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

use super::{DevInfo, DevPortId, DevStats, EthConf, EthDriver, LinkStatus, PciAddr};
use crate::apis::{Mempool, PktBuf, PortError, RuntimeConfig, RuntimeError};

const RING_SIZE: usize = 4096;

struct LoopbackDev {
	pci: PciAddr,
	ring: ArrayQueue<PktBuf>,
	configured: AtomicBool,
	started: AtomicBool,
	promiscuous: AtomicBool,
	ipackets: AtomicU64,
	opackets: AtomicU64,
	ibytes: AtomicU64,
	obytes: AtomicU64,
	oerrors: AtomicU64,
}

pub struct LoopbackDriver {
	devs: Vec<LoopbackDev>,
}

impl LoopbackDriver {
	pub fn new(device_count: u16) -> Self {
		let devs = (0..device_count)
			.map(|i| LoopbackDev {
				pci: PciAddr { domain: 0, bus: i as u8, devid: 0, function: 0 },
				ring: ArrayQueue::new(RING_SIZE),
				configured: AtomicBool::new(false),
				started: AtomicBool::new(false),
				promiscuous: AtomicBool::new(false),
				ipackets: AtomicU64::new(0),
				opackets: AtomicU64::new(0),
				ibytes: AtomicU64::new(0),
				obytes: AtomicU64::new(0),
				oerrors: AtomicU64::new(0),
			})
			.collect();
		Self { devs }
	}

	fn dev(&self, port: DevPortId) -> Result<&LoopbackDev, PortError> {
		self.devs.get(port as usize).ok_or(PortError::NoDevice)
	}
}

impl EthDriver for LoopbackDriver {
	fn init_runtime(&self, conf: &RuntimeConfig) -> Result<(), RuntimeError> {
		if conf.core_mask == 0 {
			return Err(RuntimeError::Init);
		}
		log::info!(
			"loopback runtime up: core_mask {:#x}, {} mem channels, {} MB, prefix {}",
			conf.core_mask,
			conf.mem_channels,
			conf.hugepage_mb,
			conf.file_prefix
		);
		Ok(())
	}

	fn device_count(&self) -> u16 {
		self.devs.len() as u16
	}

	fn device_info(&self, port: DevPortId) -> Result<DevInfo, PortError> {
		let dev = self.dev(port)?;
		Ok(DevInfo {
			pci: dev.pci,
			if_index: port as u32,
			min_rx_bufsize: 64,
			max_rx_pktlen: 1518,
			max_rx_queues: 1,
			max_tx_queues: 1,
		})
	}

	fn configure(
		&self,
		port: DevPortId,
		rx_queues: u16,
		tx_queues: u16,
		_conf: &EthConf,
	) -> Result<(), PortError> {
		let dev = self.dev(port)?;
		if rx_queues != 1 || tx_queues != 1 {
			return Err(PortError::Configure);
		}
		dev.configured.store(true, Ordering::Release);
		Ok(())
	}

	fn rx_queue_setup(
		&self,
		port: DevPortId,
		queue: u16,
		_descriptors: u16,
		_pool: &Mempool,
	) -> Result<(), PortError> {
		let dev = self.dev(port)?;
		if queue != 0 || !dev.configured.load(Ordering::Acquire) {
			return Err(PortError::QueueSetup);
		}
		Ok(())
	}

	fn tx_queue_setup(
		&self,
		port: DevPortId,
		queue: u16,
		_descriptors: u16,
	) -> Result<(), PortError> {
		let dev = self.dev(port)?;
		if queue != 0 || !dev.configured.load(Ordering::Acquire) {
			return Err(PortError::QueueSetup);
		}
		Ok(())
	}

	fn start(&self, port: DevPortId) -> Result<(), PortError> {
		let dev = self.dev(port)?;
		if !dev.configured.load(Ordering::Acquire) {
			return Err(PortError::DeviceStart);
		}
		dev.started.store(true, Ordering::Release);
		Ok(())
	}

	fn promiscuous_enable(&self, port: DevPortId) -> Result<(), PortError> {
		self.dev(port)?.promiscuous.store(true, Ordering::Release);
		Ok(())
	}

	fn tx_burst(&self, port: DevPortId, _queue: u16, pkts: Vec<PktBuf>) -> usize {
		let dev = match self.dev(port) {
			Ok(d) => d,
			Err(_) => return 0,
		};

		let mut sent = 0;
		for pkt in pkts {
			let len = pkt.data_len() as u64;
			match dev.ring.push(pkt) {
				Ok(()) => {
					dev.opackets.fetch_add(1, Ordering::Relaxed);
					dev.obytes.fetch_add(len, Ordering::Relaxed);
					sent += 1;
				}
				Err(dropped) => {
					// ring full; the device drops the frame
					dev.oerrors.fetch_add(1, Ordering::Relaxed);
					drop(dropped);
				}
			}
		}
		sent
	}

	fn rx_burst(&self, port: DevPortId, _queue: u16, max: usize) -> Vec<PktBuf> {
		let dev = match self.dev(port) {
			Ok(d) => d,
			Err(_) => return Vec::new(),
		};

		let mut pkts = Vec::with_capacity(max);
		while pkts.len() < max {
			match dev.ring.pop() {
				Some(pkt) => {
					dev.ipackets.fetch_add(1, Ordering::Relaxed);
					dev.ibytes.fetch_add(pkt.data_len() as u64, Ordering::Relaxed);
					pkts.push(pkt);
				}
				None => break,
			}
		}
		pkts
	}

	fn stats_get(&self, port: DevPortId) -> DevStats {
		match self.dev(port) {
			Ok(dev) => DevStats {
				ipackets: dev.ipackets.load(Ordering::Relaxed),
				opackets: dev.opackets.load(Ordering::Relaxed),
				ibytes: dev.ibytes.load(Ordering::Relaxed),
				obytes: dev.obytes.load(Ordering::Relaxed),
				ierrors: 0,
				oerrors: dev.oerrors.load(Ordering::Relaxed),
				rx_nombuf: 0,
			},
			Err(_) => DevStats::default(),
		}
	}

	fn link_get_nowait(&self, port: DevPortId) -> LinkStatus {
		match self.dev(port) {
			Ok(dev) if dev.started.load(Ordering::Acquire) => LinkStatus::Up,
			_ => LinkStatus::Down,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tx_shows_up_on_rx() {
		let drv = LoopbackDriver::new(1);
		let mp = Mempool::new("t_loop", 8, 256).unwrap();
		drv.configure(0, 1, 1, &EthConf::default()).unwrap();
		drv.start(0).unwrap();

		let pkt = PktBuf::from_bytes(&[0xAB; 60], &mp).unwrap();
		assert_eq!(drv.tx_burst(0, 0, vec![pkt]), 1);

		let rx = drv.rx_burst(0, 0, 32);
		assert_eq!(rx.len(), 1);
		assert_eq!(rx[0].data_len(), 60);

		let stats = drv.stats_get(0);
		assert_eq!(stats.opackets, 1);
		assert_eq!(stats.ipackets, 1);
		assert_eq!(stats.obytes, 60);
	}

	#[test]
	fn link_follows_start() {
		let drv = LoopbackDriver::new(1);
		assert_eq!(drv.link_get_nowait(0), LinkStatus::Down);
		drv.configure(0, 1, 1, &EthConf::default()).unwrap();
		drv.start(0).unwrap();
		assert_eq!(drv.link_get_nowait(0), LinkStatus::Up);
	}

	#[test]
	fn unknown_port_is_an_error() {
		let drv = LoopbackDriver::new(1);
		assert!(drv.device_info(3).is_err());
	}
}
