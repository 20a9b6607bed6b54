//! Ethernet II type layer
//!
//! The type field normally resolves to the payload protocol's id in the
//! Ethernet id space; the override meta field pins it to a user value.

use super::{
	default_field_data, FieldAttrib, FieldFlags, FieldValue, LayerCtx, ProtoBase, Protocol,
	ProtocolIdType, PROTO_ETH2,
};

pub struct Eth2Protocol {
	base: ProtoBase,
	ether_type: u16,
	override_type: bool,
}

impl Eth2Protocol {
	pub const FIELD_TYPE: usize = 0;
	pub const FIELD_IS_OVERRIDE_TYPE: usize = 1;
	const FIELD_COUNT: usize = 2;

	pub fn new() -> Self {
		Self { base: ProtoBase::default(), ether_type: 0, override_type: false }
	}

	fn type_value(&self, ctx: &LayerCtx<'_>) -> u16 {
		if self.override_type {
			self.ether_type
		} else {
			ctx.payload_protocol_id(ProtocolIdType::Eth) as u16
		}
	}
}

impl Default for Eth2Protocol {
	fn default() -> Self {
		Self::new()
	}
}

impl Protocol for Eth2Protocol {
	fn base(&self) -> &ProtoBase {
		&self.base
	}

	fn name(&self) -> &str {
		"Ethernet II"
	}

	fn short_name(&self) -> &str {
		"Eth II"
	}

	fn protocol_number(&self) -> u32 {
		PROTO_ETH2
	}

	fn field_count(&self) -> usize {
		Self::FIELD_COUNT
	}

	fn field_flags(&self, index: usize) -> FieldFlags {
		match index {
			Self::FIELD_IS_OVERRIDE_TYPE => FieldFlags::Meta,
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
			(Self::FIELD_TYPE, FieldAttrib::Name) => FieldValue::Text("Type".to_owned()),
			(Self::FIELD_TYPE, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_TYPE, FieldAttrib::Value) => FieldValue::U64(self.type_value(ctx) as u64),
			(Self::FIELD_TYPE, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.type_value(ctx).to_be_bytes().to_vec())
			}
			(Self::FIELD_TYPE, FieldAttrib::TextValue) => {
				FieldValue::Text(format!("0x{:04x}", self.type_value(ctx)))
			}
			(Self::FIELD_IS_OVERRIDE_TYPE, FieldAttrib::Value) => {
				FieldValue::U64(self.override_type as u64)
			}
			_ => default_field_data(self, ctx, index, attrib, stream_index),
		}
	}

	fn set_field_data(&mut self, index: usize, value: &FieldValue, attrib: FieldAttrib) -> bool {
		if attrib != FieldAttrib::Value {
			return false;
		}
		match index {
			Self::FIELD_TYPE => {
				self.ether_type = value.as_u64() as u16;
				self.override_type = true;
			}
			Self::FIELD_IS_OVERRIDE_TYPE => self.override_type = value.as_u64() != 0,
			_ => return false,
		}
		true
	}
}
