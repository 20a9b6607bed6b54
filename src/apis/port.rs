//! The Port structure wraps one NIC port
//!
//! A port owns its streams, its pre-built packet list and the transmit
//! worker that replays it on the port's dedicated core. Bring-up follows
//! the driver's order: configure, queue setup, start, promiscuous. A port
//! that fails any bring-up step is marked unusable and skipped.

use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread::{self, JoinHandle},
};

use crate::drv::{DevPortId, EthConf, EthDriver};
use crate::pktlist::PacketList;
use crate::stats::{LinkState, LinkStateCell, PortStats, StatsSnapshot};
use crate::stream::{SendUnit, Stream};
use crate::txrx::{self, TxInfo};

use super::{pin_current_thread, MemoryError, Mempool, PortError};

struct TxWorker {
	join: JoinHandle<()>,
	stop: Arc<AtomicBool>,
	running: Arc<AtomicBool>,
}

pub struct Port {
	id: u16,
	dev_port: DevPortId,
	name: String,
	driver: Arc<dyn EthDriver>,
	pool: Mempool,
	transmit_lcore: Option<u32>,
	usable: bool,
	streams: Vec<Stream>,
	list: Arc<PacketList>,
	stats: Arc<PortStats>,
	link: Arc<LinkStateCell>,
	tx: Option<TxWorker>,
}

impl Port {
	const RX_DESC: u16 = 32;
	const TX_DESC: u16 = 32;

	pub(crate) fn new(
		id: u16,
		dev_port: DevPortId,
		name: String,
		driver: Arc<dyn EthDriver>,
		pool: Mempool,
	) -> Self {
		let mut port = Self {
			id,
			dev_port,
			name,
			driver,
			pool,
			transmit_lcore: None,
			usable: true,
			streams: Vec::new(),
			list: Arc::new(PacketList::new()),
			stats: Arc::new(PortStats::default()),
			link: Arc::new(LinkStateCell::new()),
			tx: None,
		};

		if let Err(e) = port.bring_up() {
			log::warn!("unable to bring up port {}.{}: {}", port.id, port.name, e);
			port.usable = false;
		}
		port
	}

	fn bring_up(&self) -> Result<(), PortError> {
		self.driver
			.configure(self.dev_port, 1, 1, &EthConf::default())?;
		self.driver
			.tx_queue_setup(self.dev_port, 0, Self::TX_DESC)?;
		self.driver
			.rx_queue_setup(self.dev_port, 0, Self::RX_DESC, &self.pool)?;
		self.driver.start(self.dev_port)?;
		self.driver.promiscuous_enable(self.dev_port)?;
		Ok(())
	}

	#[inline]
	pub fn id(&self) -> u16 {
		self.id
	}

	#[inline]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[inline]
	pub fn dev_port(&self) -> DevPortId {
		self.dev_port
	}

	#[inline]
	pub fn is_usable(&self) -> bool {
		self.usable
	}

	#[inline]
	pub fn transmit_lcore(&self) -> Option<u32> {
		self.transmit_lcore
	}

	pub(crate) fn set_transmit_lcore(&mut self, lcore: u32) {
		self.transmit_lcore = Some(lcore);
	}

	pub fn stats(&self) -> StatsSnapshot {
		self.stats.snapshot()
	}

	pub fn link_state(&self) -> LinkState {
		self.link.get()
	}

	pub(crate) fn stats_handle(&self) -> Arc<PortStats> {
		Arc::clone(&self.stats)
	}

	pub(crate) fn link_handle(&self) -> Arc<LinkStateCell> {
		Arc::clone(&self.link)
	}

	pub fn packet_list(&self) -> &PacketList {
		&self.list
	}

	// ---- streams -------------------------------------------------------

	pub(crate) fn push_stream(&mut self, stream: Stream) {
		self.streams.push(stream);
	}

	pub(crate) fn stream_mut(&mut self, stream_id: u32) -> Option<&mut Stream> {
		self.streams.iter_mut().find(|s| s.id() == stream_id)
	}

	pub(crate) fn remove_stream(&mut self, stream_id: u32) -> bool {
		let before = self.streams.len();
		self.streams.retain(|s| s.id() != stream_id);
		self.streams.len() != before
	}

	pub fn stream_count(&self) -> usize {
		self.streams.len()
	}

	// ---- packet list construction --------------------------------------

	/// Reap a transmit worker that already ran to completion so the list
	/// becomes exclusively ours again
	fn reap_tx(&mut self) {
		let finished = match &self.tx {
			Some(w) => !w.running.load(Ordering::SeqCst),
			None => false,
		};
		if finished {
			if let Some(w) = self.tx.take() {
				let _ = w.join.join();
			}
		}
	}

	fn list_mut(&mut self) -> Result<&mut PacketList, PortError> {
		self.reap_tx();
		if self.is_transmit_on() {
			return Err(PortError::TransmitterBusy);
		}
		Arc::get_mut(&mut self.list).ok_or(PortError::TransmitterBusy)
	}

	/// Return every held buffer to the pool and reset the list
	pub fn clear_packet_list(&mut self) -> Result<(), PortError> {
		self.list_mut()?.clear();
		Ok(())
	}

	pub fn set_packet_list_size(&mut self, size: u64, active_streams: usize) -> Result<(), PortError> {
		self.list_mut()?.set_size(size, active_streams);
		Ok(())
	}

	/// Append one packet; reports pool exhaustion as `Ok(false)`
	pub fn append_to_packet_list(
		&mut self,
		sec: u64,
		nsec: u64,
		bytes: &[u8],
	) -> Result<bool, PortError> {
		let pool = self.pool.clone();
		Ok(self.list_mut()?.append(sec, nsec, bytes, &pool))
	}

	pub fn loop_next_packet_set(
		&mut self,
		size: u64,
		repeats: u64,
		delay_sec: u64,
		delay_nsec: u64,
	) -> Result<(), PortError> {
		self.list_mut()?.loop_next_set(size, repeats, delay_sec, delay_nsec);
		Ok(())
	}

	pub fn set_packet_list_loop_mode(
		&mut self,
		loop_mode: bool,
		delay_sec: u64,
		delay_nsec: u64,
	) -> Result<(), PortError> {
		self.list_mut()?.set_loop_mode(loop_mode, delay_sec, delay_nsec);
		Ok(())
	}

	/// Rebuild the packet list from the port's streams
	///
	/// Invariant frames become one record replayed through a packet set;
	/// variable frames are materialised one record per packet. A stream
	/// with `Stop` ends the list, a final `GotoFirst` arms the outer loop.
	pub fn update_packet_list(&mut self) -> Result<(), PortError> {
		self.clear_packet_list()?;

		let enabled: Vec<usize> = (0..self.streams.len())
			.filter(|&i| self.streams[i].is_enabled())
			.collect();
		let total: u64 = enabled.iter().map(|&i| self.streams[i].packet_count()).sum();
		self.set_packet_list_size(total, enabled.len())?;

		let mut cur_ns: u64 = 0;
		let mut loop_first = false;
		let mut last_gap_ns: u64 = 0;

		for &si in &enabled {
			let config = self.streams[si].config().clone();
			let variable = self.streams[si].is_frame_value_variable()
				|| self.streams[si].is_frame_size_variable();

			match config.unit {
				SendUnit::Packets => {
					let count = config.frame_count;
					let gap_ns = if config.packets_per_sec > 0.0 {
						(1e9 / config.packets_per_sec) as u64
					} else {
						0
					};
					last_gap_ns = gap_ns;

					if variable {
						// every packet differs; materialise them all
						self.loop_next_packet_set(count, 1, 0, 0)?;
						for k in 0..count {
							let bytes = self.streams[si].frame_value(k as usize);
							if !self.append_to_packet_list(
								cur_ns / 1_000_000_000,
								cur_ns % 1_000_000_000,
								&bytes,
							)? {
								return Err(MemoryError::NoBuf.into());
							}
							cur_ns += gap_ns;
						}
					} else {
						// one record replayed count times, gap as the
						// per-loop delay
						self.loop_next_packet_set(
							1,
							count,
							gap_ns / 1_000_000_000,
							gap_ns % 1_000_000_000,
						)?;
						let bytes = self.streams[si].frame_value(0);
						if !self.append_to_packet_list(
							cur_ns / 1_000_000_000,
							cur_ns % 1_000_000_000,
							&bytes,
						)? {
							return Err(MemoryError::NoBuf.into());
						}
						cur_ns += gap_ns;
					}
				}
				SendUnit::Bursts => {
					let burst_gap_ns = if config.bursts_per_sec > 0.0 {
						(1e9 / config.bursts_per_sec) as u64
					} else {
						0
					};
					last_gap_ns = burst_gap_ns;

					self.loop_next_packet_set(
						config.packets_per_burst,
						config.num_bursts,
						burst_gap_ns / 1_000_000_000,
						burst_gap_ns % 1_000_000_000,
					)?;
					for k in 0..config.packets_per_burst {
						let bytes = self.streams[si].frame_value(k as usize);
						if !self.append_to_packet_list(
							cur_ns / 1_000_000_000,
							cur_ns % 1_000_000_000,
							&bytes,
						)? {
							return Err(MemoryError::NoBuf.into());
						}
					}
					cur_ns += burst_gap_ns;
				}
			}

			match config.next {
				crate::stream::NextAction::Stop => break,
				crate::stream::NextAction::GotoFirst => {
					loop_first = true;
					break;
				}
				crate::stream::NextAction::GotoNext => {}
			}
		}

		if loop_first {
			self.set_packet_list_loop_mode(
				true,
				last_gap_ns / 1_000_000_000,
				last_gap_ns % 1_000_000_000,
			)?;
		}

		Ok(())
	}

	// ---- transmit ------------------------------------------------------

	pub fn start_transmit(&mut self) -> Result<(), PortError> {
		if !self.usable {
			return Err(PortError::NotUsable);
		}

		let lcore = match self.transmit_lcore {
			Some(c) => c,
			None => {
				log::warn!("Port {}.{} doesn't have a lcore to transmit", self.id, self.name);
				return Err(PortError::NoLcore);
			}
		};

		self.reap_tx();
		if self.tx.is_some() {
			return Err(PortError::TransmitterBusy);
		}

		let stop = Arc::new(AtomicBool::new(false));
		let running = Arc::new(AtomicBool::new(true));
		let info = TxInfo {
			dev_port: self.dev_port,
			driver: Arc::clone(&self.driver),
			pool: self.pool.clone(),
			list: Arc::clone(&self.list),
			stop: Arc::clone(&stop),
			running: Arc::clone(&running),
		};
		let top_speed = self.list.is_top_speed();

		let join = thread::Builder::new()
			.name(format!("pktgen-tx-{}", self.id))
			.spawn(move || {
				pin_current_thread(lcore);
				if top_speed {
					txrx::top_speed_transmit(info);
				} else {
					txrx::sync_transmit(info);
				}
			})
			.map_err(|e| {
				log::error!("failed to launch transmit for port {}: {}", self.id, e);
				PortError::LaunchFailed
			})?;

		self.tx = Some(TxWorker { join, stop, running });
		Ok(())
	}

	/// Signal the transmit worker to stop and join it; blocks the caller
	/// until the worker has exited
	pub fn stop_transmit(&mut self) {
		if let Some(w) = self.tx.take() {
			w.stop.store(true, Ordering::SeqCst);
			let _ = w.join.join();
		}
	}

	pub fn is_transmit_on(&self) -> bool {
		match &self.tx {
			Some(w) => w.running.load(Ordering::SeqCst),
			None => false,
		}
	}

	// ---- capture: not supported by this backend ------------------------

	pub fn start_capture(&self) -> Result<(), PortError> {
		Err(PortError::NoSupport)
	}

	pub fn stop_capture(&self) -> Result<(), PortError> {
		Err(PortError::NoSupport)
	}

	pub fn is_capture_on(&self) -> bool {
		false
	}

	pub fn capture_data(&self) -> Option<Vec<u8>> {
		None
	}
}

impl Drop for Port {
	fn drop(&mut self) {
		self.stop_transmit();
	}
}
