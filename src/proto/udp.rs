//! UDP layer
//!
//! Length tracks the payload; the checksum combines the layer's own bytes
//! with the payload checksum and the enclosing IP pseudo-header.

use super::{
	default_field_data, CksumType, FieldAttrib, FieldFlags, FieldValue, LayerCtx, ProtoBase,
	Protocol, ProtocolIdType, PROTO_UDP,
};

const HDR_SIZE: usize = 8;

pub struct UdpProtocol {
	base: ProtoBase,
	src_port: u16,
	dst_port: u16,
	totlen: u16,
	cksum: u16,
	override_totlen: bool,
	override_cksum: bool,
}

impl UdpProtocol {
	pub const FIELD_SRC_PORT: usize = 0;
	pub const FIELD_DST_PORT: usize = 1;
	pub const FIELD_TOTLEN: usize = 2;
	pub const FIELD_CKSUM: usize = 3;
	pub const FIELD_IS_OVERRIDE_TOTLEN: usize = 4;
	pub const FIELD_IS_OVERRIDE_CKSUM: usize = 5;
	const FIELD_COUNT: usize = 6;

	pub fn new() -> Self {
		Self {
			base: ProtoBase::default(),
			src_port: 8902,
			dst_port: 7,
			totlen: 0,
			cksum: 0,
			override_totlen: false,
			override_cksum: false,
		}
	}

	fn totlen_value(&self, ctx: &LayerCtx<'_>, stream_index: usize) -> u16 {
		if self.override_totlen {
			self.totlen
		} else {
			(HDR_SIZE + ctx.payload_size(stream_index)) as u16
		}
	}

	fn cksum_value(&self, ctx: &LayerCtx<'_>, stream_index: usize) -> u16 {
		if self.override_cksum {
			self.cksum
		} else {
			self.frame_cksum(ctx, stream_index, CksumType::TcpUdp) as u16
		}
	}
}

impl Default for UdpProtocol {
	fn default() -> Self {
		Self::new()
	}
}

impl Protocol for UdpProtocol {
	fn base(&self) -> &ProtoBase {
		&self.base
	}

	fn name(&self) -> &str {
		"User Datagram Protocol"
	}

	fn protocol_number(&self) -> u32 {
		PROTO_UDP
	}

	fn field_count(&self) -> usize {
		Self::FIELD_COUNT
	}

	fn field_flags(&self, index: usize) -> FieldFlags {
		match index {
			Self::FIELD_CKSUM => FieldFlags::Cksum,
			Self::FIELD_IS_OVERRIDE_TOTLEN | Self::FIELD_IS_OVERRIDE_CKSUM => FieldFlags::Meta,
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
			(Self::FIELD_SRC_PORT, FieldAttrib::Name) => {
				FieldValue::Text("Source Port".to_owned())
			}
			(Self::FIELD_SRC_PORT, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_SRC_PORT, FieldAttrib::Value) => FieldValue::U64(self.src_port as u64),
			(Self::FIELD_SRC_PORT, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.src_port.to_be_bytes().to_vec())
			}

			(Self::FIELD_DST_PORT, FieldAttrib::Name) => {
				FieldValue::Text("Destination Port".to_owned())
			}
			(Self::FIELD_DST_PORT, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_DST_PORT, FieldAttrib::Value) => FieldValue::U64(self.dst_port as u64),
			(Self::FIELD_DST_PORT, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.dst_port.to_be_bytes().to_vec())
			}

			(Self::FIELD_TOTLEN, FieldAttrib::Name) => FieldValue::Text("Length".to_owned()),
			(Self::FIELD_TOTLEN, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_TOTLEN, FieldAttrib::Value) => {
				FieldValue::U64(self.totlen_value(ctx, stream_index) as u64)
			}
			(Self::FIELD_TOTLEN, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.totlen_value(ctx, stream_index).to_be_bytes().to_vec())
			}

			// declared bit size keeps the checksum out of the default
			// derivation path
			(Self::FIELD_CKSUM, FieldAttrib::Name) => FieldValue::Text("Checksum".to_owned()),
			(Self::FIELD_CKSUM, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_CKSUM, FieldAttrib::Value) => {
				FieldValue::U64(self.cksum_value(ctx, stream_index) as u64)
			}
			(Self::FIELD_CKSUM, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.cksum_value(ctx, stream_index).to_be_bytes().to_vec())
			}

			(Self::FIELD_IS_OVERRIDE_TOTLEN, FieldAttrib::Value) => {
				FieldValue::U64(self.override_totlen as u64)
			}
			(Self::FIELD_IS_OVERRIDE_CKSUM, FieldAttrib::Value) => {
				FieldValue::U64(self.override_cksum as u64)
			}

			_ => default_field_data(self, ctx, index, attrib, stream_index),
		}
	}

	fn set_field_data(&mut self, index: usize, value: &FieldValue, attrib: FieldAttrib) -> bool {
		if attrib != FieldAttrib::Value {
			return false;
		}
		let v = value.as_u64();
		match index {
			Self::FIELD_SRC_PORT => self.src_port = v as u16,
			Self::FIELD_DST_PORT => self.dst_port = v as u16,
			Self::FIELD_TOTLEN => {
				self.totlen = v as u16;
				self.override_totlen = true;
			}
			Self::FIELD_CKSUM => {
				self.cksum = v as u16;
				self.override_cksum = true;
			}
			Self::FIELD_IS_OVERRIDE_TOTLEN => self.override_totlen = v != 0,
			Self::FIELD_IS_OVERRIDE_CKSUM => self.override_cksum = v != 0,
			_ => return false,
		}
		true
	}

	fn protocol_id(&self, id_type: ProtocolIdType) -> u32 {
		match id_type {
			ProtocolIdType::Ip => 0x11,
			_ => 0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::proto::eth2::Eth2Protocol;
	use crate::proto::ip4::Ip4Protocol;
	use crate::proto::mac::MacProtocol;
	use crate::proto::payload::PayloadProtocol;
	use crate::proto::tests::fixed_stream;
	use crate::proto::{ip_cksum, ProtocolChain};

	fn eth_ip_udp_payload() -> (ProtocolChain, crate::proto::LayerHandle) {
		let mut chain = ProtocolChain::new();
		chain.append(Box::new(MacProtocol::new()));
		chain.append(Box::new(Eth2Protocol::new()));
		chain.append(Box::new(Ip4Protocol::new()));
		let udp = chain.append(Box::new(UdpProtocol::new()));

		let mut pay = PayloadProtocol::new();
		pay.set_field_data(
			PayloadProtocol::FIELD_PATTERN,
			&FieldValue::U64(0x4142_4344),
			FieldAttrib::Value,
		);
		chain.append(Box::new(pay));
		(chain, udp)
	}

	#[test]
	fn derived_short_name_is_the_upper_case_letters() {
		let proto = UdpProtocol::new();
		assert_eq!(proto.short_name(), "UDP");
	}

	#[test]
	fn length_covers_header_and_payload() {
		let (chain, udp) = eth_ip_udp_payload();
		// headers: 12 mac + 2 eth + 20 ip + 8 udp = 42; payload 49-42-4=3
		let stream = fixed_stream(49);
		let ctx = chain.ctx(udp, &stream);

		let fv = chain.proto(udp).frame_value(&ctx, 0, false);
		assert_eq!(fv.len(), HDR_SIZE);
		assert_eq!(u16::from_be_bytes([fv[4], fv[5]]), (HDR_SIZE + 3) as u16);
	}

	#[test]
	fn payload_cksum_is_the_ip_sum_of_the_payload_bytes() {
		let (chain, udp) = eth_ip_udp_payload();
		// payload renders as "ABC"; its checksum pads to an even length
		let stream = fixed_stream(49);
		let ctx = chain.ctx(udp, &stream);

		let expected = ip_cksum(&[0x41, 0x42, 0x43, 0x00]) as u32;
		assert_eq!(ctx.payload_cksum(0, CksumType::Ip), expected);
	}

	#[test]
	fn tcpudp_cksum_verifies_against_a_straight_sum() {
		let (chain, udp) = eth_ip_udp_payload();
		let stream = fixed_stream(49);
		let ctx = chain.ctx(udp, &stream);

		// independently sum pseudo header + udp header (cksum zeroed) +
		// padded payload; the emitted checksum must make it all ones
		let udp_hdr = chain.proto(udp).frame_value(&ctx, 0, true);
		let cksum = chain.proto(udp).frame_cksum(&ctx, 0, CksumType::TcpUdp) as u16;

		let mut data = Vec::new();
		data.extend_from_slice(&[10, 0, 0, 1]);
		data.extend_from_slice(&[10, 0, 0, 2]);
		data.push(0);
		data.push(0x11);
		data.extend_from_slice(&(11u16).to_be_bytes()); // udp len 8 + 3
		data.extend_from_slice(&udp_hdr);
		data.extend_from_slice(&[0x41, 0x42, 0x43, 0x00]);

		let mut sum: u32 = 0;
		for chunk in data.chunks(2) {
			sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
		}
		sum += cksum as u32;
		assert_eq!(crate::proto::fold_cksum(sum), 0xFFFF);
	}
}
