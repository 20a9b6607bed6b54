//! Streams: a described pattern of packets to emit from a port
//!
//! A stream owns one protocol chain plus the control block the packet-list
//! builder consumes: frame length and its variation mode, how many packets
//! or bursts to send at what rate, and what to do when the stream is done.

use thiserror::Error;

use crate::proto::{create_protocol, FieldAttrib, FieldValue, ProtocolChain};

#[derive(Error, Debug)]
pub enum StreamError {
	#[error("unknown protocol number {}", _0)]
	UnknownProtocol(u32),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FrameLenMode {
	Fixed,
	/// Walk the length range upwards, one step per packet
	Inc,
	/// Walk the length range downwards
	Dec,
}

/// Stream-wide state the protocol layers read through their context
#[derive(Clone, Debug)]
pub struct StreamState {
	pub frame_len: usize,
	pub frame_len_min: usize,
	pub frame_len_max: usize,
	pub len_mode: FrameLenMode,
}

impl StreamState {
	/// Frame length for the given packet index within the stream
	pub fn frame_len(&self, stream_index: usize) -> usize {
		match self.len_mode {
			FrameLenMode::Fixed => self.frame_len,
			FrameLenMode::Inc => {
				let span = self.frame_len_max - self.frame_len_min + 1;
				self.frame_len_min + stream_index % span
			}
			FrameLenMode::Dec => {
				let span = self.frame_len_max - self.frame_len_min + 1;
				self.frame_len_max - stream_index % span
			}
		}
	}

	pub fn is_len_variable(&self) -> bool {
		self.len_mode != FrameLenMode::Fixed && self.frame_len_max > self.frame_len_min
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NextAction {
	/// Continue with the next stream
	GotoNext,
	/// Stop transmitting after this stream
	Stop,
	/// Restart from the first stream
	GotoFirst,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SendUnit {
	Packets,
	Bursts,
}

/// One layer's configuration: the protocol number plus field overrides
/// applied with [`FieldAttrib::Value`]
#[derive(Clone, Debug)]
pub struct LayerConfig {
	pub protocol: u32,
	pub fields: Vec<(usize, FieldValue)>,
}

impl LayerConfig {
	pub fn plain(protocol: u32) -> Self {
		Self { protocol, fields: Vec::new() }
	}
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
	pub enabled: bool,
	pub layers: Vec<LayerConfig>,
	pub frame_len: usize,
	pub frame_len_min: usize,
	pub frame_len_max: usize,
	pub len_mode: FrameLenMode,
	pub unit: SendUnit,
	pub frame_count: u64,
	pub packets_per_sec: f64,
	pub num_bursts: u64,
	pub packets_per_burst: u64,
	pub bursts_per_sec: f64,
	pub next: NextAction,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			layers: Vec::new(),
			frame_len: 64,
			frame_len_min: 64,
			frame_len_max: 1518,
			len_mode: FrameLenMode::Fixed,
			unit: SendUnit::Packets,
			frame_count: 10,
			packets_per_sec: 1.0,
			num_bursts: 1,
			packets_per_burst: 10,
			bursts_per_sec: 1.0,
			next: NextAction::GotoNext,
		}
	}
}

pub struct Stream {
	id: u32,
	config: StreamConfig,
	state: StreamState,
	chain: ProtocolChain,
}

impl Stream {
	pub fn new(id: u32, config: StreamConfig) -> Result<Self, StreamError> {
		let mut chain = ProtocolChain::new();
		for layer in &config.layers {
			let mut proto = match create_protocol(layer.protocol) {
				Some(p) => p,
				None => return Err(StreamError::UnknownProtocol(layer.protocol)),
			};
			for (index, value) in &layer.fields {
				if !proto.set_field_data(*index, value, FieldAttrib::Value) {
					log::warn!(
						"stream {}: field {} of protocol {} rejected the value",
						id,
						index,
						layer.protocol
					);
				}
			}
			chain.append(proto);
		}

		let state = StreamState {
			frame_len: config.frame_len,
			frame_len_min: config.frame_len_min,
			frame_len_max: config.frame_len_max,
			len_mode: config.len_mode,
		};

		Ok(Self { id, config, state, chain })
	}

	#[inline]
	pub fn id(&self) -> u32 {
		self.id
	}

	#[inline]
	pub fn config(&self) -> &StreamConfig {
		&self.config
	}

	#[inline]
	pub fn is_enabled(&self) -> bool {
		self.config.enabled
	}

	#[inline]
	pub fn chain(&self) -> &ProtocolChain {
		&self.chain
	}

	/// Packets this stream contributes to one pass of the packet list
	pub fn packet_count(&self) -> u64 {
		match self.config.unit {
			SendUnit::Packets => self.config.frame_count,
			SendUnit::Bursts => self.config.num_bursts * self.config.packets_per_burst,
		}
	}

	/// Render the stream's packet for the given index
	pub fn frame_value(&self, stream_index: usize) -> Vec<u8> {
		self.chain.frame_value(&self.state, stream_index)
	}

	pub fn frame_size(&self, stream_index: usize) -> usize {
		self.chain.frame_size(&self.state, stream_index)
	}

	pub fn is_frame_value_variable(&self) -> bool {
		self.chain.is_frame_value_variable(&self.state)
	}

	pub fn is_frame_size_variable(&self) -> bool {
		self.chain.is_frame_size_variable(&self.state)
	}
}
