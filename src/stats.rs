//! Per-port statistics and the link-state monitor
//!
//! One sampler thread reads every port's device counters once per refresh
//! period, turns the raw deltas into rates and mirrors the link state. The
//! stats records are written only by the sampler and read by the control
//! plane; plain 64-bit atomics carry them across.

use std::{
	sync::{
		atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
		Arc,
	},
	thread::{self, JoinHandle},
	time::Duration,
};

use crate::drv::{DevPortId, EthDriver, LinkStatus};

/// Stats refresh period in seconds
pub const REFRESH_FREQ_SECS: u64 = 1;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkState {
	Unknown,
	Up,
	Down,
}

/// Lock-free cell the monitor writes the link state into
pub struct LinkStateCell {
	state: AtomicU8,
}

impl LinkStateCell {
	pub fn new() -> Self {
		Self { state: AtomicU8::new(0) }
	}

	pub fn get(&self) -> LinkState {
		match self.state.load(Ordering::Relaxed) {
			1 => LinkState::Up,
			2 => LinkState::Down,
			_ => LinkState::Unknown,
		}
	}

	fn set(&self, state: LinkState) {
		let v = match state {
			LinkState::Unknown => 0,
			LinkState::Up => 1,
			LinkState::Down => 2,
		};
		self.state.store(v, Ordering::Relaxed);
	}
}

impl Default for LinkStateCell {
	fn default() -> Self {
		Self::new()
	}
}

/// Cumulative counters plus the instantaneous rates of one port
#[derive(Default)]
pub struct PortStats {
	pub rx_pkts: AtomicU64,
	pub rx_bytes: AtomicU64,
	pub tx_pkts: AtomicU64,
	pub tx_bytes: AtomicU64,
	pub rx_pps: AtomicU64,
	pub rx_bps: AtomicU64,
	pub tx_pps: AtomicU64,
	pub tx_bps: AtomicU64,
	pub rx_drops: AtomicU64,
	pub rx_errors: AtomicU64,
}

/// A point-in-time copy of a port's statistics
#[derive(Clone, Copy, Debug, Default)]
pub struct StatsSnapshot {
	pub rx_pkts: u64,
	pub rx_bytes: u64,
	pub tx_pkts: u64,
	pub tx_bytes: u64,
	pub rx_pps: u64,
	pub rx_bps: u64,
	pub tx_pps: u64,
	pub tx_bps: u64,
	pub rx_drops: u64,
	pub rx_errors: u64,
}

impl PortStats {
	pub fn snapshot(&self) -> StatsSnapshot {
		StatsSnapshot {
			rx_pkts: self.rx_pkts.load(Ordering::Relaxed),
			rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
			tx_pkts: self.tx_pkts.load(Ordering::Relaxed),
			tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
			rx_pps: self.rx_pps.load(Ordering::Relaxed),
			rx_bps: self.rx_bps.load(Ordering::Relaxed),
			tx_pps: self.tx_pps.load(Ordering::Relaxed),
			tx_bps: self.tx_bps.load(Ordering::Relaxed),
			rx_drops: self.rx_drops.load(Ordering::Relaxed),
			rx_errors: self.rx_errors.load(Ordering::Relaxed),
		}
	}
}

/// Delta between two samples of a free-running 64-bit counter, safe across
/// a wrap
#[inline]
pub fn wrap_delta(current: u64, previous: u64) -> u64 {
	current.wrapping_sub(previous)
}

pub(crate) struct MonitorPort {
	pub dev_port: DevPortId,
	pub stats: Arc<PortStats>,
	pub link: Arc<LinkStateCell>,
}

pub(crate) struct StatsMonitor {
	stop: Arc<AtomicBool>,
	join: Option<JoinHandle<()>>,
}

impl StatsMonitor {
	/// Launch the sampler over the given ports
	pub(crate) fn start(driver: Arc<dyn EthDriver>, ports: Vec<MonitorPort>) -> Self {
		let stop = Arc::new(AtomicBool::new(false));
		let stop_flag = Arc::clone(&stop);

		let join = thread::Builder::new()
			.name("pktgen-stats".to_owned())
			.spawn(move || run_monitor(driver, ports, stop_flag))
			.ok();
		if join.is_none() {
			log::error!("failed to launch the stats monitor");
		}

		Self { stop, join }
	}

	/// Ask the sampler to stop and join it
	pub(crate) fn stop(&mut self) {
		self.stop.store(true, Ordering::SeqCst);
		if let Some(join) = self.join.take() {
			let _ = join.join();
		}
	}
}

impl Drop for StatsMonitor {
	fn drop(&mut self) {
		self.stop();
	}
}

fn run_monitor(driver: Arc<dyn EthDriver>, ports: Vec<MonitorPort>, stop: Arc<AtomicBool>) {
	log::info!("stats monitor started for {} ports", ports.len());

	while !stop.load(Ordering::SeqCst) {
		for port in &ports {
			let dev = driver.stats_get(port.dev_port);
			let stats = &port.stats;

			let rx_pkts = stats.rx_pkts.load(Ordering::Relaxed);
			let rx_bytes = stats.rx_bytes.load(Ordering::Relaxed);
			let tx_pkts = stats.tx_pkts.load(Ordering::Relaxed);
			let tx_bytes = stats.tx_bytes.load(Ordering::Relaxed);

			stats
				.rx_pps
				.store(wrap_delta(dev.ipackets, rx_pkts) / REFRESH_FREQ_SECS, Ordering::Relaxed);
			stats
				.rx_bps
				.store(wrap_delta(dev.ibytes, rx_bytes) / REFRESH_FREQ_SECS, Ordering::Relaxed);
			stats.rx_pkts.store(dev.ipackets, Ordering::Relaxed);
			stats.rx_bytes.store(dev.ibytes, Ordering::Relaxed);

			stats
				.tx_pps
				.store(wrap_delta(dev.opackets, tx_pkts) / REFRESH_FREQ_SECS, Ordering::Relaxed);
			stats
				.tx_bps
				.store(wrap_delta(dev.obytes, tx_bytes) / REFRESH_FREQ_SECS, Ordering::Relaxed);
			stats.tx_pkts.store(dev.opackets, Ordering::Relaxed);
			stats.tx_bytes.store(dev.obytes, Ordering::Relaxed);

			stats.rx_drops.store(dev.rx_nombuf, Ordering::Relaxed);
			stats.rx_errors.store(dev.ierrors, Ordering::Relaxed);

			port.link.set(match driver.link_get_nowait(port.dev_port) {
				LinkStatus::Up => LinkState::Up,
				LinkStatus::Down => LinkState::Down,
			});
		}

		// one sleep per sweep, not per port
		thread::sleep(Duration::from_secs(REFRESH_FREQ_SECS));
	}

	log::info!("stats monitor stopped");
}
