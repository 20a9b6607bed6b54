//! Pattern payload layer
//!
//! Fills whatever room is left between the preceding headers and the frame
//! check sequence the hardware appends, so its size tracks the stream's
//! frame length rather than a field table.

use super::{
	default_field_data, FieldAttrib, FieldFlags, FieldValue, LayerCtx, ProtoBase, Protocol,
	PROTO_PAYLOAD,
};

/// Frame check sequence appended by the NIC
const FCS_SIZE: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PatternMode {
	/// Repeat a 32-bit word
	FixedWord,
	/// Incrementing byte ramp
	IncByte,
}

pub struct PayloadProtocol {
	base: ProtoBase,
	mode: PatternMode,
	pattern: u32,
}

impl PayloadProtocol {
	pub const FIELD_PATTERN: usize = 0;
	pub const FIELD_PATTERN_MODE: usize = 1;
	pub const FIELD_DATA: usize = 2;
	const FIELD_COUNT: usize = 3;

	pub fn new() -> Self {
		Self { base: ProtoBase::default(), mode: PatternMode::FixedWord, pattern: 0 }
	}

	fn data_len(&self, ctx: &LayerCtx<'_>, stream_index: usize) -> usize {
		ctx.stream()
			.frame_len(stream_index)
			.saturating_sub(ctx.frame_offset(stream_index) + FCS_SIZE)
	}

	fn fill(&self, len: usize) -> Vec<u8> {
		match self.mode {
			PatternMode::FixedWord => self
				.pattern
				.to_be_bytes()
				.iter()
				.copied()
				.cycle()
				.take(len)
				.collect(),
			PatternMode::IncByte => (0..len).map(|i| i as u8).collect(),
		}
	}
}

impl Default for PayloadProtocol {
	fn default() -> Self {
		Self::new()
	}
}

impl Protocol for PayloadProtocol {
	fn base(&self) -> &ProtoBase {
		&self.base
	}

	fn name(&self) -> &str {
		"Payload Data"
	}

	fn protocol_number(&self) -> u32 {
		PROTO_PAYLOAD
	}

	fn field_count(&self) -> usize {
		Self::FIELD_COUNT
	}

	fn field_flags(&self, index: usize) -> FieldFlags {
		match index {
			Self::FIELD_PATTERN | Self::FIELD_PATTERN_MODE => FieldFlags::Meta,
			_ => FieldFlags::Normal,
		}
	}

	fn field_data(
		&self,
		ctx: &LayerCtx<'_>,
		index: usize,
		attrib: FieldAttrib,
		stream_index: usize,
	) -> FieldValue {
		match (index, attrib) {
			(Self::FIELD_PATTERN, FieldAttrib::Name) => FieldValue::Text("Pattern".to_owned()),
			(Self::FIELD_PATTERN, FieldAttrib::Value) => FieldValue::U64(self.pattern as u64),
			(Self::FIELD_PATTERN, FieldAttrib::TextValue) => {
				FieldValue::Text(format!("0x{:08x}", self.pattern))
			}

			(Self::FIELD_PATTERN_MODE, FieldAttrib::Name) => {
				FieldValue::Text("Pattern Mode".to_owned())
			}
			(Self::FIELD_PATTERN_MODE, FieldAttrib::Value) => {
				FieldValue::U64((self.mode == PatternMode::IncByte) as u64)
			}

			(Self::FIELD_DATA, FieldAttrib::Name) => FieldValue::Text("Data".to_owned()),
			(Self::FIELD_DATA, FieldAttrib::BitSize) => {
				FieldValue::U64(self.data_len(ctx, stream_index) as u64 * 8)
			}
			(Self::FIELD_DATA, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.fill(self.data_len(ctx, stream_index)))
			}

			_ => default_field_data(self, ctx, index, attrib, stream_index),
		}
	}

	fn set_field_data(&mut self, index: usize, value: &FieldValue, attrib: FieldAttrib) -> bool {
		if attrib != FieldAttrib::Value {
			return false;
		}
		match index {
			Self::FIELD_PATTERN => self.pattern = value.as_u64() as u32,
			Self::FIELD_PATTERN_MODE => {
				self.mode = if value.as_u64() != 0 {
					PatternMode::IncByte
				} else {
					PatternMode::FixedWord
				}
			}
			_ => return false,
		}
		true
	}

	// size and content follow the stream's frame length, so neither the
	// cached default size nor the fixed-value default applies
	fn frame_size(&self, ctx: &LayerCtx<'_>, stream_index: usize) -> usize {
		self.data_len(ctx, stream_index)
	}

	fn is_frame_value_variable(&self, ctx: &LayerCtx<'_>) -> bool {
		ctx.stream().is_len_variable()
	}

	fn is_frame_size_variable(&self, ctx: &LayerCtx<'_>) -> bool {
		ctx.stream().is_len_variable()
	}
}
