//! The transmit loops and the receive poller
//!
//! One transmit worker per port replays its packet list on the port's
//! dedicated core; one receive worker for all ports drains the rx rings.
//! Both observe a plain stop flag every iteration and busy-wait for their
//! delays instead of sleeping.

use std::sync::{
	atomic::{AtomicBool, AtomicU64, Ordering},
	Arc,
};

use crate::apis::{delay_us, Mempool};
use crate::drv::{DevPortId, EthDriver};
use crate::pktlist::PacketList;

/// Burst size for the rx poller
const RX_BURST_MAX: usize = 32;

/// Frame size pushed out in top-speed mode
const TOP_SPEED_PKT_LEN: usize = 64;

pub(crate) struct TxInfo {
	pub dev_port: DevPortId,
	pub driver: Arc<dyn EthDriver>,
	pub pool: Mempool,
	pub list: Arc<PacketList>,
	pub stop: Arc<AtomicBool>,
	pub running: Arc<AtomicBool>,
}

/// Replay the packet list honouring timestamps, per-set loops and the
/// outer list loop
pub(crate) fn sync_transmit(info: TxInfo) {
	let list = &info.list;
	let size = list.size();

	log::debug!("tx {}: list sz = {}", info.dev_port, size);

	if size == 0 {
		info.running.store(false, Ordering::SeqCst);
		return;
	}

	let (loop_delay_sec, loop_delay_nsec) = list.loop_delay();
	let loop_delay_usec = if list.is_loop_mode() {
		loop_delay_sec * 1_000_000 + loop_delay_nsec / 1_000
	} else {
		0
	};

	let mut set_idx = 0usize;
	let mut set = list.set_at(set_idx);
	let mut n = set.loop_count;
	let mut last_sec = 0u64;
	let mut last_nsec = 0u64;
	let mut i = 0u64;

	log::debug!(
		"tx {}: set = ({}-{})x{} delay = {}",
		info.dev_port,
		set.start_ofs,
		set.end_ofs,
		n,
		set.repeat_delay_usec
	);

	while !info.stop.load(Ordering::SeqCst) {
		let record = list.record(i);
		let sec = record.ts_sec;
		let nsec = record.ts_nsec;

		let usec = (sec as i64 - last_sec as i64) * 1_000_000
			+ (nsec as i64 - last_nsec as i64) / 1_000;
		if usec > 0 {
			delay_us(usec as u64);
		}

		// the clone holds a reference for the driver so the list keeps
		// owning the buffer through tx completion
		info.driver.tx_burst(info.dev_port, 0, vec![record.buf.clone()]);

		if i == set.end_ofs {
			if set.repeat_delay_usec > 0 {
				delay_us(set.repeat_delay_usec);
			}
			n = n.saturating_sub(1);
			if n > 0 {
				i = set.start_ofs;
				let first = list.record(i);
				last_sec = first.ts_sec;
				last_nsec = first.ts_nsec;
				continue;
			}
			// the slot one past the final set reads as a zeroed sentinel
			set_idx += 1;
			set = list.set_at(set_idx);
			n = set.loop_count;
		}

		last_sec = sec;
		last_nsec = nsec;

		i += 1;
		if i >= size {
			i = 0;
			set_idx = 0;
			set = list.set_at(set_idx);
			n = set.loop_count;
			if loop_delay_usec > 0 {
				delay_us(loop_delay_usec);
			} else if !list.is_loop_mode() {
				break;
			}
			last_sec = 0;
			last_nsec = 0;
		}
	}

	log::debug!("tx {}: finished sync transmit", info.dev_port);
	info.running.store(false, Ordering::SeqCst);
}

/// Degenerate transmit mode used when the list has no timing structure:
/// saturate the port with minimum-size frames
pub(crate) fn top_speed_transmit(info: TxInfo) {
	while !info.stop.load(Ordering::SeqCst) {
		let mut buf = match info.pool.alloc() {
			Ok(b) => b,
			Err(_) => continue,
		};
		if buf.append(TOP_SPEED_PKT_LEN).is_ok() {
			info.driver.tx_burst(info.dev_port, 0, vec![buf]);
		}
	}

	log::debug!("tx {}: finished top speed transmit", info.dev_port);
	info.running.store(false, Ordering::SeqCst);
}

/// Drain every port's rx ring round robin, counting then freeing
pub(crate) fn poll_rx_rings(
	driver: Arc<dyn EthDriver>,
	ports: Vec<DevPortId>,
	stop: Arc<AtomicBool>,
	polled: Arc<AtomicU64>,
) {
	while !stop.load(Ordering::SeqCst) {
		for &port in &ports {
			let pkts = driver.rx_burst(port, 0, RX_BURST_MAX);
			if !pkts.is_empty() {
				polled.fetch_add(pkts.len() as u64, Ordering::Relaxed);
			}
			// dropping the burst frees the buffers back to the pool
		}
	}

	log::debug!("rx polling stopped");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::drv::{EthConf, EthDriver, LoopbackDriver};
	use std::time::Instant;

	fn setup(devices: u16) -> (Arc<LoopbackDriver>, Mempool) {
		let driver = Arc::new(LoopbackDriver::new(devices));
		let mp = Mempool::new("t_txrx", 64, 256).unwrap();
		for port in 0..devices {
			driver.configure(port, 1, 1, &EthConf::default()).unwrap();
			driver.start(port).unwrap();
		}
		(driver, mp)
	}

	fn tx_info(
		driver: Arc<LoopbackDriver>,
		pool: Mempool,
		list: PacketList,
	) -> (TxInfo, Arc<AtomicBool>, Arc<AtomicBool>) {
		let stop = Arc::new(AtomicBool::new(false));
		let running = Arc::new(AtomicBool::new(true));
		let info = TxInfo {
			dev_port: 0,
			driver,
			pool,
			list: Arc::new(list),
			stop: Arc::clone(&stop),
			running: Arc::clone(&running),
		};
		(info, stop, running)
	}

	#[test]
	fn replays_sets_in_order_with_their_delays() {
		let (driver, mp) = setup(1);

		// three packets at 0 / 1ms / 3ms, one set looped twice with a
		// 5ms repeat delay
		let mut list = PacketList::new();
		list.set_size(3, 1);
		list.loop_next_set(3, 2, 0, 5_000_000);
		assert!(list.append(0, 0, &[0u8; 60], &mp));
		assert!(list.append(0, 1_000_000, &[1u8; 60], &mp));
		assert!(list.append(0, 3_000_000, &[2u8; 60], &mp));

		let (info, _stop, running) = tx_info(Arc::clone(&driver), mp.clone(), list);

		let start = Instant::now();
		sync_transmit(info);
		let elapsed = start.elapsed();

		assert!(!running.load(Ordering::SeqCst));
		// inter-packet waits: 0 + 1ms + 2ms per pass, 5ms between passes
		assert!(elapsed.as_micros() >= 11_000, "elapsed {:?}", elapsed);

		let rx = driver.rx_burst(0, 0, 32);
		let order: Vec<u8> = rx.iter().map(|p| p.bytes()[0]).collect();
		assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
	}

	#[test]
	fn advances_through_multiple_sets() {
		let (driver, mp) = setup(1);

		let mut list = PacketList::new();
		list.set_size(3, 2);
		list.loop_next_set(1, 3, 0, 0);
		assert!(list.append(0, 0, &[0xA0u8; 60], &mp));
		list.loop_next_set(2, 1, 0, 0);
		assert!(list.append(0, 0, &[0xB0u8; 60], &mp));
		assert!(list.append(0, 0, &[0xC0u8; 60], &mp));
		assert!(list.sets_are_consistent());

		let (info, _stop, _running) = tx_info(Arc::clone(&driver), mp.clone(), list);
		sync_transmit(info);

		let rx = driver.rx_burst(0, 0, 32);
		let order: Vec<u8> = rx.iter().map(|p| p.bytes()[0]).collect();
		assert_eq!(order, vec![0xA0, 0xA0, 0xA0, 0xB0, 0xC0]);
	}

	#[test]
	fn list_retains_its_buffers_across_replay() {
		let (driver, mp) = setup(1);

		let mut list = PacketList::new();
		list.set_size(1, 1);
		list.loop_next_set(1, 4, 0, 0);
		assert!(list.append(0, 0, &[7u8; 60], &mp));

		let (info, _stop, _running) = tx_info(Arc::clone(&driver), mp.clone(), list);
		let list_arc = Arc::clone(&info.list);
		sync_transmit(info);

		// the record still owns its buffer after four transmissions
		assert_eq!(list_arc.record(0).buf.refcnt_read(), 1 + 4);

		// the rx side drops the in-flight clones
		let rx = driver.rx_burst(0, 0, 32);
		assert_eq!(rx.len(), 4);
		drop(rx);
		assert_eq!(list_arc.record(0).buf.refcnt_read(), 1);
	}

	#[test]
	fn stop_flag_ends_an_endless_loop() {
		let (driver, mp) = setup(1);

		let mut list = PacketList::new();
		list.set_size(1, 1);
		list.loop_next_set(1, 1, 0, 0);
		assert!(list.append(0, 0, &[9u8; 60], &mp));
		list.set_loop_mode(true, 0, 1_000); // loop forever, 1us delay

		let (info, stop, running) = tx_info(Arc::clone(&driver), mp.clone(), list);
		let handle = std::thread::spawn(move || sync_transmit(info));

		std::thread::sleep(std::time::Duration::from_millis(20));
		stop.store(true, Ordering::SeqCst);
		handle.join().unwrap();
		assert!(!running.load(Ordering::SeqCst));
	}

	#[test]
	fn top_speed_mode_saturates_until_stopped() {
		let (driver, mp) = setup(1);
		let list = PacketList::new();
		let (info, stop, _running) = tx_info(Arc::clone(&driver), mp.clone(), list);

		let handle = std::thread::spawn(move || top_speed_transmit(info));
		std::thread::sleep(std::time::Duration::from_millis(5));
		stop.store(true, Ordering::SeqCst);
		handle.join().unwrap();

		assert!(driver.stats_get(0).opackets > 0);
	}

	#[test]
	fn poller_counts_and_frees() {
		let (driver, mp) = setup(2);

		for port in 0..2u16 {
			for _ in 0..3 {
				let buf = crate::apis::PktBuf::from_bytes(&[0u8; 60], &mp).unwrap();
				driver.tx_burst(port, 0, vec![buf]);
			}
		}
		assert_eq!(mp.current_count(), 64 - 6);

		let stop = Arc::new(AtomicBool::new(false));
		let polled = Arc::new(AtomicU64::new(0));
		let drv: Arc<dyn EthDriver> = driver.clone();
		let handle = {
			let stop = Arc::clone(&stop);
			let polled = Arc::clone(&polled);
			std::thread::spawn(move || poll_rx_rings(drv, vec![0, 1], stop, polled))
		};

		std::thread::sleep(std::time::Duration::from_millis(20));
		stop.store(true, Ordering::SeqCst);
		handle.join().unwrap();

		assert_eq!(polled.load(Ordering::Relaxed), 6);
		// every received buffer went back to the pool
		assert_eq!(mp.current_count(), 64);
	}
}
