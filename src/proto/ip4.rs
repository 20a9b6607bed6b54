//! IPv4 layer
//!
//! Total length, payload protocol and header checksum are computed from the
//! neighbouring layers unless their override meta fields pin them; the
//! pseudo-header contribution feeds the TCP/UDP checksums of the layers
//! above.

use std::net::Ipv4Addr;

use super::{
	default_field_data, default_frame_cksum, ip_cksum, CksumType, FieldAttrib, FieldFlags,
	FieldValue, LayerCtx, ProtoBase, Protocol, ProtocolIdType, PROTO_IP4,
};

const HDR_SIZE: usize = 20;

pub struct Ip4Protocol {
	base: ProtoBase,
	tos: u8,
	totlen: u16,
	id: u16,
	flags: u8,
	frag_ofs: u16,
	ttl: u8,
	proto: u8,
	cksum: u16,
	src_ip: u32,
	dst_ip: u32,
	override_totlen: bool,
	override_proto: bool,
	override_cksum: bool,
}

impl Ip4Protocol {
	pub const FIELD_VER: usize = 0;
	pub const FIELD_HDRLEN: usize = 1;
	pub const FIELD_TOS: usize = 2;
	pub const FIELD_TOTLEN: usize = 3;
	pub const FIELD_ID: usize = 4;
	pub const FIELD_FLAGS: usize = 5;
	pub const FIELD_FRAG_OFS: usize = 6;
	pub const FIELD_TTL: usize = 7;
	pub const FIELD_PROTO: usize = 8;
	pub const FIELD_CKSUM: usize = 9;
	pub const FIELD_SRC_IP: usize = 10;
	pub const FIELD_DST_IP: usize = 11;
	pub const FIELD_IS_OVERRIDE_TOTLEN: usize = 12;
	pub const FIELD_IS_OVERRIDE_PROTO: usize = 13;
	pub const FIELD_IS_OVERRIDE_CKSUM: usize = 14;
	const FIELD_COUNT: usize = 15;

	pub fn new() -> Self {
		Self {
			base: ProtoBase::default(),
			tos: 0,
			totlen: 0,
			id: 0x0432,
			flags: 0,
			frag_ofs: 0,
			ttl: 127,
			proto: 0,
			cksum: 0,
			src_ip: u32::from(Ipv4Addr::new(10, 0, 0, 1)),
			dst_ip: u32::from(Ipv4Addr::new(10, 0, 0, 2)),
			override_totlen: false,
			override_proto: false,
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

	fn proto_value(&self, ctx: &LayerCtx<'_>) -> u8 {
		if self.override_proto {
			self.proto
		} else {
			ctx.payload_protocol_id(ProtocolIdType::Ip) as u8
		}
	}

	fn cksum_value(&self, ctx: &LayerCtx<'_>, stream_index: usize) -> u16 {
		if self.override_cksum {
			self.cksum
		} else {
			self.frame_cksum(ctx, stream_index, CksumType::Ip) as u16
		}
	}
}

impl Default for Ip4Protocol {
	fn default() -> Self {
		Self::new()
	}
}

impl Protocol for Ip4Protocol {
	fn base(&self) -> &ProtoBase {
		&self.base
	}

	fn name(&self) -> &str {
		"Internet Protocol ver 4"
	}

	fn short_name(&self) -> &str {
		"IPv4"
	}

	fn protocol_number(&self) -> u32 {
		PROTO_IP4
	}

	fn field_count(&self) -> usize {
		Self::FIELD_COUNT
	}

	fn field_flags(&self, index: usize) -> FieldFlags {
		match index {
			Self::FIELD_CKSUM => FieldFlags::Cksum,
			Self::FIELD_IS_OVERRIDE_TOTLEN
			| Self::FIELD_IS_OVERRIDE_PROTO
			| Self::FIELD_IS_OVERRIDE_CKSUM => FieldFlags::Meta,
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
			(Self::FIELD_VER, FieldAttrib::Name) => FieldValue::Text("Version".to_owned()),
			(Self::FIELD_VER, FieldAttrib::BitSize) => FieldValue::U64(4),
			(Self::FIELD_VER, FieldAttrib::Value) => FieldValue::U64(4),
			(Self::FIELD_VER, FieldAttrib::FrameValue) => FieldValue::Bytes(vec![4]),

			(Self::FIELD_HDRLEN, FieldAttrib::Name) => {
				FieldValue::Text("Header Length".to_owned())
			}
			(Self::FIELD_HDRLEN, FieldAttrib::BitSize) => FieldValue::U64(4),
			(Self::FIELD_HDRLEN, FieldAttrib::Value) => FieldValue::U64(5),
			(Self::FIELD_HDRLEN, FieldAttrib::FrameValue) => FieldValue::Bytes(vec![5]),

			(Self::FIELD_TOS, FieldAttrib::Name) => FieldValue::Text("TOS/DSCP".to_owned()),
			(Self::FIELD_TOS, FieldAttrib::BitSize) => FieldValue::U64(8),
			(Self::FIELD_TOS, FieldAttrib::Value) => FieldValue::U64(self.tos as u64),
			(Self::FIELD_TOS, FieldAttrib::FrameValue) => FieldValue::Bytes(vec![self.tos]),

			(Self::FIELD_TOTLEN, FieldAttrib::Name) => {
				FieldValue::Text("Total Length".to_owned())
			}
			(Self::FIELD_TOTLEN, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_TOTLEN, FieldAttrib::Value) => {
				FieldValue::U64(self.totlen_value(ctx, stream_index) as u64)
			}
			(Self::FIELD_TOTLEN, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.totlen_value(ctx, stream_index).to_be_bytes().to_vec())
			}

			(Self::FIELD_ID, FieldAttrib::Name) => FieldValue::Text("Identification".to_owned()),
			(Self::FIELD_ID, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_ID, FieldAttrib::Value) => FieldValue::U64(self.id as u64),
			(Self::FIELD_ID, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.id.to_be_bytes().to_vec())
			}

			(Self::FIELD_FLAGS, FieldAttrib::Name) => FieldValue::Text("Flags".to_owned()),
			(Self::FIELD_FLAGS, FieldAttrib::BitSize) => FieldValue::U64(3),
			(Self::FIELD_FLAGS, FieldAttrib::Value) => FieldValue::U64(self.flags as u64),
			(Self::FIELD_FLAGS, FieldAttrib::FrameValue) => FieldValue::Bytes(vec![self.flags]),

			(Self::FIELD_FRAG_OFS, FieldAttrib::Name) => {
				FieldValue::Text("Fragment Offset".to_owned())
			}
			(Self::FIELD_FRAG_OFS, FieldAttrib::BitSize) => FieldValue::U64(13),
			(Self::FIELD_FRAG_OFS, FieldAttrib::Value) => FieldValue::U64(self.frag_ofs as u64),
			(Self::FIELD_FRAG_OFS, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.frag_ofs.to_be_bytes().to_vec())
			}

			(Self::FIELD_TTL, FieldAttrib::Name) => FieldValue::Text("Time to Live".to_owned()),
			(Self::FIELD_TTL, FieldAttrib::BitSize) => FieldValue::U64(8),
			(Self::FIELD_TTL, FieldAttrib::Value) => FieldValue::U64(self.ttl as u64),
			(Self::FIELD_TTL, FieldAttrib::FrameValue) => FieldValue::Bytes(vec![self.ttl]),

			(Self::FIELD_PROTO, FieldAttrib::Name) => FieldValue::Text("Protocol".to_owned()),
			(Self::FIELD_PROTO, FieldAttrib::BitSize) => FieldValue::U64(8),
			(Self::FIELD_PROTO, FieldAttrib::Value) => {
				FieldValue::U64(self.proto_value(ctx) as u64)
			}
			(Self::FIELD_PROTO, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(vec![self.proto_value(ctx)])
			}

			// the checksum declares its bit size; deriving it from the
			// frame value would recurse through frame_cksum
			(Self::FIELD_CKSUM, FieldAttrib::Name) => FieldValue::Text("Checksum".to_owned()),
			(Self::FIELD_CKSUM, FieldAttrib::BitSize) => FieldValue::U64(16),
			(Self::FIELD_CKSUM, FieldAttrib::Value) => {
				FieldValue::U64(self.cksum_value(ctx, stream_index) as u64)
			}
			(Self::FIELD_CKSUM, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.cksum_value(ctx, stream_index).to_be_bytes().to_vec())
			}
			(Self::FIELD_CKSUM, FieldAttrib::TextValue) => FieldValue::Text(format!(
				"0x{:04x} ({})",
				self.cksum_value(ctx, stream_index),
				if self.override_cksum { "overridden" } else { "correct" }
			)),

			(Self::FIELD_SRC_IP, FieldAttrib::Name) => FieldValue::Text("Source".to_owned()),
			(Self::FIELD_SRC_IP, FieldAttrib::BitSize) => FieldValue::U64(32),
			(Self::FIELD_SRC_IP, FieldAttrib::Value) => FieldValue::U64(self.src_ip as u64),
			(Self::FIELD_SRC_IP, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.src_ip.to_be_bytes().to_vec())
			}
			(Self::FIELD_SRC_IP, FieldAttrib::TextValue) => {
				FieldValue::Text(Ipv4Addr::from(self.src_ip).to_string())
			}

			(Self::FIELD_DST_IP, FieldAttrib::Name) => FieldValue::Text("Destination".to_owned()),
			(Self::FIELD_DST_IP, FieldAttrib::BitSize) => FieldValue::U64(32),
			(Self::FIELD_DST_IP, FieldAttrib::Value) => FieldValue::U64(self.dst_ip as u64),
			(Self::FIELD_DST_IP, FieldAttrib::FrameValue) => {
				FieldValue::Bytes(self.dst_ip.to_be_bytes().to_vec())
			}
			(Self::FIELD_DST_IP, FieldAttrib::TextValue) => {
				FieldValue::Text(Ipv4Addr::from(self.dst_ip).to_string())
			}

			(Self::FIELD_IS_OVERRIDE_TOTLEN, FieldAttrib::Value) => {
				FieldValue::U64(self.override_totlen as u64)
			}
			(Self::FIELD_IS_OVERRIDE_PROTO, FieldAttrib::Value) => {
				FieldValue::U64(self.override_proto as u64)
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
			Self::FIELD_TOS => self.tos = v as u8,
			Self::FIELD_TOTLEN => {
				self.totlen = v as u16;
				self.override_totlen = true;
			}
			Self::FIELD_ID => self.id = v as u16,
			Self::FIELD_FLAGS => self.flags = (v as u8) & 0x7,
			Self::FIELD_FRAG_OFS => self.frag_ofs = (v as u16) & 0x1FFF,
			Self::FIELD_TTL => self.ttl = v as u8,
			Self::FIELD_PROTO => {
				self.proto = v as u8;
				self.override_proto = true;
			}
			Self::FIELD_CKSUM => {
				self.cksum = v as u16;
				self.override_cksum = true;
			}
			Self::FIELD_SRC_IP => self.src_ip = v as u32,
			Self::FIELD_DST_IP => self.dst_ip = v as u32,
			Self::FIELD_IS_OVERRIDE_TOTLEN => self.override_totlen = v != 0,
			Self::FIELD_IS_OVERRIDE_PROTO => self.override_proto = v != 0,
			Self::FIELD_IS_OVERRIDE_CKSUM => self.override_cksum = v != 0,
			_ => return false,
		}
		true
	}

	fn protocol_id(&self, id_type: ProtocolIdType) -> u32 {
		match id_type {
			ProtocolIdType::Eth => 0x0800,
			ProtocolIdType::Ip => 0x04,
			ProtocolIdType::Llc => 0x06_06_03,
			ProtocolIdType::None => 0,
		}
	}

	fn frame_cksum(&self, ctx: &LayerCtx<'_>, stream_index: usize, kind: CksumType) -> u32 {
		match kind {
			CksumType::IpPseudo => {
				// src, dst, zero+protocol, tcp/udp length
				let mut pseudo = Vec::with_capacity(12);
				pseudo.extend_from_slice(&self.src_ip.to_be_bytes());
				pseudo.extend_from_slice(&self.dst_ip.to_be_bytes());
				pseudo.push(0);
				pseudo.push(self.proto_value(ctx));
				pseudo.extend_from_slice(
					&(ctx.payload_size(stream_index) as u16).to_be_bytes(),
				);
				ip_cksum(&pseudo) as u32
			}
			_ => default_frame_cksum(self, ctx, stream_index, kind),
		}
	}
}
