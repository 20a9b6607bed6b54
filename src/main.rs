use std::{
	process,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread,
	time::Duration,
};

use anyhow::Context;

use pktgenlib::drv::LoopbackDriver;
use pktgenlib::{PortManager, RuntimeConfig, RuntimeError};

const EXIT_RUNTIME_INIT: i32 = 2;
const EXIT_POOL_CREATE: i32 = 3;
const EXIT_PROBE: i32 = 4;
const EXIT_LAUNCH: i32 = 5;

/// Handle Ctrl+C
fn handle_signal(kr: Arc<AtomicBool>) -> anyhow::Result<()> {
	ctrlc::set_handler(move || {
		kr.store(false, Ordering::SeqCst);
	})
	.context("Error setting Ctrl-C handler")
}

fn main() {
	env_logger::init();

	log::info!("initializing driver runtime ...");
	let conf = RuntimeConfig::default();

	// the bundled daemon runs against the loopback double; a production
	// build plugs a kernel-bypass driver in here instead
	let driver = Arc::new(LoopbackDriver::new(2));

	let mut manager = match PortManager::new(driver, conf) {
		Ok(m) => m,
		Err(e) => {
			log::error!("failed to bring up the port manager: {}", e);
			let code = match e {
				RuntimeError::Init => EXIT_RUNTIME_INIT,
				RuntimeError::Pool(_) => EXIT_POOL_CREATE,
				RuntimeError::Probe => EXIT_PROBE,
				RuntimeError::NoRxCore | RuntimeError::RxLaunchFailed => EXIT_LAUNCH,
			};
			process::exit(code);
		}
	};

	log::info!("{} usable ports", manager.port_count());
	for i in 0..manager.port_count() as u16 {
		if let Ok(port) = manager.port(i) {
			log::info!("port {}: {} (tx lcore {:?})", port.id(), port.name(), port.transmit_lcore());
		}
	}

	let keep_running = Arc::new(AtomicBool::new(true));
	if let Err(e) = handle_signal(Arc::clone(&keep_running)) {
		log::error!("{}", e);
		process::exit(EXIT_LAUNCH);
	}

	while keep_running.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_millis(100));
	}

	log::info!("shutting down ...");
	manager.shutdown();
}
