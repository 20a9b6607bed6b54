//! The PortManager brings up the runtime and owns everything shared
//!
//! One context object instead of process globals: the buffer pool, the
//! driver handle, the lcore bookkeeping, the ports, the rx poller and the
//! stats monitor all live here. Construction follows the driver's order:
//! runtime init, pool, probe, lcore assignment, per-device port creation,
//! then the shared rx poller and stats monitor.

use std::{
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc,
	},
	thread::{self, JoinHandle},
};

use crate::apis::{pin_current_thread, Mempool, Port, PortError, RuntimeConfig, RuntimeError};
use crate::drv::{EthDriver, PciAddr};
use crate::stats::{LinkState, MonitorPort, StatsMonitor, StatsSnapshot};
use crate::stream::{Stream, StreamConfig};
use crate::txrx;

/// Predictable interface name from the device's PCI address
fn if_name(pci: &PciAddr) -> String {
	if pci.domain != 0 {
		format!("enP{}p{}s{}", pci.domain, pci.bus, pci.devid)
	} else {
		format!("enp{}s{}", pci.bus, pci.devid)
	}
}

pub struct PortManager {
	driver: Arc<dyn EthDriver>,
	pool: Mempool,
	lcore_count: u32,
	lcore_free_mask: u64,
	rx_lcore: u32,
	ports: Vec<Port>,
	rx_stop: Arc<AtomicBool>,
	rx_polled: Arc<AtomicU64>,
	rx_join: Option<JoinHandle<()>>,
	monitor: Option<StatsMonitor>,
	next_stream_id: u32,
}

impl PortManager {
	pub fn new(driver: Arc<dyn EthDriver>, conf: RuntimeConfig) -> Result<Self, RuntimeError> {
		driver.init_runtime(&conf)?;

		let pool = Mempool::new("pktgen_pool", Mempool::NUM_BUFS, Mempool::BUF_DATA_SIZE)?;

		// probe
		let device_count = driver.device_count();
		if device_count == 0 {
			log::warn!("no devices found by the probe");
		}

		// lcore bookkeeping: every enabled core except the master is free
		// for packet i/o
		let lcore_count = conf.core_mask.count_ones();
		let master_lcore = conf.core_mask.trailing_zeros();
		let lcore_free_mask = conf.core_mask & !(1u64 << master_lcore);
		log::debug!(
			"lcore_count = {}, lcore_free_mask = {:#x}",
			lcore_count,
			lcore_free_mask
		);

		let mut mgr = Self {
			driver,
			pool,
			lcore_count,
			lcore_free_mask,
			rx_lcore: 0,
			ports: Vec::new(),
			rx_stop: Arc::new(AtomicBool::new(false)),
			rx_polled: Arc::new(AtomicU64::new(0)),
			rx_join: None,
			monitor: None,
			next_stream_id: 1,
		};

		// one core for rx polling, up front
		mgr.rx_lcore = match mgr.get_free_lcore() {
			Some(c) => c,
			None => return Err(RuntimeError::NoRxCore),
		};

		mgr.create_ports(device_count);
		mgr.launch_rx_poller()?;

		if !mgr.ports.is_empty() {
			let monitor_ports: Vec<_> = mgr
				.ports
				.iter()
				.map(|p| MonitorPort {
					dev_port: p.dev_port(),
					stats: p.stats_handle(),
					link: p.link_handle(),
				})
				.collect();
			mgr.monitor = Some(StatsMonitor::start(Arc::clone(&mgr.driver), monitor_ports));
		}

		Ok(mgr)
	}

	fn get_free_lcore(&mut self) -> Option<u32> {
		for i in 0..64 {
			if self.lcore_free_mask & (1u64 << i) != 0 {
				self.lcore_free_mask &= !(1u64 << i);
				return Some(i);
			}
		}
		None
	}

	fn create_ports(&mut self, device_count: u16) {
		let mut id = 0u16;
		for dev in 0..device_count {
			let info = match self.driver.device_info(dev) {
				Ok(i) => i,
				Err(e) => {
					log::warn!("no device info for dev {}: {}", dev, e);
					continue;
				}
			};

			let name = if_name(&info.pci);
			log::debug!("{}. {}", id, name);
			log::debug!(
				"dev {}: {} min_rx_buf = {}, max_rx_pktlen = {}, maxq rx/tx = {}/{}",
				dev,
				info.if_index,
				info.min_rx_bufsize,
				info.max_rx_pktlen,
				info.max_rx_queues,
				info.max_tx_queues
			);

			let mut port = Port::new(id, dev, name, Arc::clone(&self.driver), self.pool.clone());
			if !port.is_usable() {
				log::warn!("unable to open dev {}. Skipping!", dev);
				continue;
			}

			match self.get_free_lcore() {
				Some(lcore) => port.set_transmit_lcore(lcore),
				None => {
					log::warn!(
						"Not enough cores - port {}.{} cannot transmit",
						port.id(),
						port.name()
					);
				}
			}

			self.ports.push(port);
			id += 1;
		}
	}

	fn launch_rx_poller(&mut self) -> Result<(), RuntimeError> {
		let driver = Arc::clone(&self.driver);
		let dev_ports: Vec<_> = self.ports.iter().map(|p| p.dev_port()).collect();
		let stop = Arc::clone(&self.rx_stop);
		let polled = Arc::clone(&self.rx_polled);
		let lcore = self.rx_lcore;

		let join = thread::Builder::new()
			.name("pktgen-rx".to_owned())
			.spawn(move || {
				pin_current_thread(lcore);
				txrx::poll_rx_rings(driver, dev_ports, stop, polled);
			})
			.map_err(|e| {
				log::error!("cannot launch the rx poller: {}", e);
				RuntimeError::RxLaunchFailed
			})?;

		self.rx_join = Some(join);
		Ok(())
	}

	#[inline]
	pub fn port_count(&self) -> usize {
		self.ports.len()
	}

	#[inline]
	pub fn lcore_count(&self) -> u32 {
		self.lcore_count
	}

	/// Packets the rx poller has drained so far
	pub fn rx_polled(&self) -> u64 {
		self.rx_polled.load(Ordering::Relaxed)
	}

	pub fn pool_free_count(&self) -> usize {
		self.pool.current_count()
	}

	pub fn pool_capacity(&self) -> usize {
		self.pool.capacity()
	}

	pub fn port(&self, port_id: u16) -> Result<&Port, PortError> {
		self.ports.get(port_id as usize).ok_or(PortError::NoDevice)
	}

	fn port_mut(&mut self, port_id: u16) -> Result<&mut Port, PortError> {
		self.ports.get_mut(port_id as usize).ok_or(PortError::NoDevice)
	}

	// ---- control-plane contract ----------------------------------------

	/// Add a stream to a port; the transmitter is stopped first since the
	/// stream set feeds the next packet-list build
	pub fn add_stream(&mut self, port_id: u16, config: StreamConfig) -> Result<u32, PortError> {
		let stream_id = self.next_stream_id;
		let port = self.port_mut(port_id)?;
		port.stop_transmit();

		let stream = Stream::new(stream_id, config)?;
		port.push_stream(stream);
		self.next_stream_id += 1;
		Ok(stream_id)
	}

	pub fn modify_stream(
		&mut self,
		port_id: u16,
		stream_id: u32,
		config: StreamConfig,
	) -> Result<(), PortError> {
		let port = self.port_mut(port_id)?;
		port.stop_transmit();

		let fresh = Stream::new(stream_id, config)?;
		match port.stream_mut(stream_id) {
			Some(slot) => {
				*slot = fresh;
				Ok(())
			}
			None => Err(PortError::NoStream),
		}
	}

	pub fn delete_stream(&mut self, port_id: u16, stream_id: u32) -> Result<(), PortError> {
		let port = self.port_mut(port_id)?;
		port.stop_transmit();

		if port.remove_stream(stream_id) {
			Ok(())
		} else {
			Err(PortError::NoStream)
		}
	}

	/// Build the packet list from the port's streams and launch the
	/// transmit worker
	pub fn start_transmit(&mut self, port_id: u16) -> Result<(), PortError> {
		let port = self.port_mut(port_id)?;
		if port.is_transmit_on() {
			return Err(PortError::TransmitterBusy);
		}
		port.update_packet_list()?;
		port.start_transmit()
	}

	pub fn stop_transmit(&mut self, port_id: u16) -> Result<(), PortError> {
		self.port_mut(port_id)?.stop_transmit();
		Ok(())
	}

	pub fn is_transmit_on(&self, port_id: u16) -> Result<bool, PortError> {
		Ok(self.port(port_id)?.is_transmit_on())
	}

	pub fn start_capture(&mut self, port_id: u16) -> Result<(), PortError> {
		self.port(port_id)?.start_capture()
	}

	pub fn stop_capture(&mut self, port_id: u16) -> Result<(), PortError> {
		self.port(port_id)?.stop_capture()
	}

	pub fn capture_data(&self, port_id: u16) -> Result<Option<Vec<u8>>, PortError> {
		Ok(self.port(port_id)?.capture_data())
	}

	pub fn get_port_stats(&self, port_id: u16) -> Result<StatsSnapshot, PortError> {
		Ok(self.port(port_id)?.stats())
	}

	pub fn get_link_state(&self, port_id: u16) -> Result<LinkState, PortError> {
		Ok(self.port(port_id)?.link_state())
	}

	/// Tear everything down in reverse construction order, pool last
	pub fn shutdown(&mut self) {
		for port in self.ports.iter_mut().rev() {
			port.stop_transmit();
		}

		if let Some(mut monitor) = self.monitor.take() {
			monitor.stop();
		}

		self.rx_stop.store(true, Ordering::SeqCst);
		if let Some(join) = self.rx_join.take() {
			let _ = join.join();
		}

		self.ports.clear();
		log::info!("port manager shut down, {} buffers back in the pool", self.pool.current_count());
	}
}

impl Drop for PortManager {
	fn drop(&mut self) {
		self.shutdown();
	}
}
