//! Ethernet MAC addresses layer

use super::{
	default_field_data, FieldAttrib, FieldValue, LayerCtx, ProtoBase, Protocol, PROTO_MAC,
};

pub struct MacProtocol {
	base: ProtoBase,
	dst_mac: u64,
	src_mac: u64,
}

impl MacProtocol {
	pub const FIELD_DST_MAC: usize = 0;
	pub const FIELD_SRC_MAC: usize = 1;
	const FIELD_COUNT: usize = 2;

	pub fn new() -> Self {
		Self { base: ProtoBase::default(), dst_mac: 0, src_mac: 0 }
	}
}

impl Default for MacProtocol {
	fn default() -> Self {
		Self::new()
	}
}

fn format_mac(v: u64) -> String {
	let b = v.to_be_bytes();
	format!(
		"{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
		b[2], b[3], b[4], b[5], b[6], b[7]
	)
}

impl Protocol for MacProtocol {
	fn base(&self) -> &ProtoBase {
		&self.base
	}

	fn name(&self) -> &str {
		"Media Access Protocol"
	}

	fn short_name(&self) -> &str {
		"MAC"
	}

	fn protocol_number(&self) -> u32 {
		PROTO_MAC
	}

	fn field_count(&self) -> usize {
		Self::FIELD_COUNT
	}

	fn field_data(
		&self,
		ctx: &LayerCtx<'_>,
		index: usize,
		attrib: FieldAttrib,
		stream_index: usize,
	) -> FieldValue {
		let value = match index {
			Self::FIELD_DST_MAC => self.dst_mac,
			Self::FIELD_SRC_MAC => self.src_mac,
			_ => return default_field_data(self, ctx, index, attrib, stream_index),
		};

		match attrib {
			FieldAttrib::Name => FieldValue::Text(
				if index == Self::FIELD_DST_MAC { "Destination" } else { "Source" }.to_owned(),
			),
			FieldAttrib::BitSize => FieldValue::U64(48),
			FieldAttrib::Value => FieldValue::U64(value),
			FieldAttrib::FrameValue => FieldValue::Bytes(value.to_be_bytes()[2..].to_vec()),
			FieldAttrib::TextValue => FieldValue::Text(format_mac(value)),
		}
	}

	fn set_field_data(&mut self, index: usize, value: &FieldValue, attrib: FieldAttrib) -> bool {
		if attrib != FieldAttrib::Value {
			return false;
		}
		match index {
			Self::FIELD_DST_MAC => self.dst_mac = value.as_u64() & 0xFFFF_FFFF_FFFF,
			Self::FIELD_SRC_MAC => self.src_mac = value.as_u64() & 0xFFFF_FFFF_FFFF,
			_ => return false,
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::proto::tests::fixed_stream;
	use crate::proto::ProtocolChain;

	#[test]
	fn renders_both_addresses_big_endian() {
		let mut proto = MacProtocol::new();
		proto.set_field_data(
			MacProtocol::FIELD_DST_MAC,
			&FieldValue::U64(0x0011_2233_4455),
			FieldAttrib::Value,
		);
		proto.set_field_data(
			MacProtocol::FIELD_SRC_MAC,
			&FieldValue::U64(0x6677_8899_AABB),
			FieldAttrib::Value,
		);

		let mut chain = ProtocolChain::new();
		let h = chain.append(Box::new(proto));
		let stream = fixed_stream(64);
		let ctx = chain.ctx(h, &stream);

		let fv = chain.proto(h).frame_value(&ctx, 0, false);
		assert_eq!(
			fv,
			vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]
		);
		assert_eq!(chain.proto(h).frame_size(&ctx, 0), 12);
		assert_eq!(chain.proto(h).short_name(), "MAC");
	}
}
