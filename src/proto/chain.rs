//! The ProtocolChain owns the ordered layers of one stream
//!
//! Layers live in an arena and are addressed by handles; prev/next/parent
//! links are handles too, so the chain stays acyclic for the borrow checker
//! while still letting a layer reach its neighbours. A layer nested under a
//! parent ("combo" protocols) defers queries that run off the end of its
//! sub-chain to that parent.

use std::cell::Cell;

use super::{fold_cksum, CksumType, Protocol, ProtocolIdType, PROTO_ID_NONE};
use crate::stream::StreamState;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LayerHandle(usize);

struct Slot {
	proto: Option<Box<dyn Protocol>>,
	prev: Option<LayerHandle>,
	next: Option<LayerHandle>,
	parent: Option<LayerHandle>,
}

pub struct ProtocolChain {
	slots: Vec<Slot>,
	free: Vec<usize>,
	head: Option<LayerHandle>,
	tail: Option<LayerHandle>,
	cksum_depth: Cell<u32>,
}

impl ProtocolChain {
	pub fn new() -> Self {
		Self {
			slots: Vec::new(),
			free: Vec::new(),
			head: None,
			tail: None,
			cksum_depth: Cell::new(0),
		}
	}

	fn alloc_slot(&mut self, slot: Slot) -> LayerHandle {
		match self.free.pop() {
			Some(i) => {
				self.slots[i] = slot;
				LayerHandle(i)
			}
			None => {
				self.slots.push(slot);
				LayerHandle(self.slots.len() - 1)
			}
		}
	}

	/// Append a layer at the tail of the chain
	pub fn append(&mut self, proto: Box<dyn Protocol>) -> LayerHandle {
		let h = self.alloc_slot(Slot { proto: Some(proto), prev: self.tail, next: None, parent: None });

		match self.tail {
			Some(t) => self.slots[t.0].next = Some(h),
			None => self.head = Some(h),
		}
		self.tail = Some(h);
		h
	}

	/// Insert a layer at the head of the chain
	pub fn prepend(&mut self, proto: Box<dyn Protocol>) -> LayerHandle {
		let h = self.alloc_slot(Slot { proto: Some(proto), prev: None, next: self.head, parent: None });

		match self.head {
			Some(old) => self.slots[old.0].prev = Some(h),
			None => self.tail = Some(h),
		}
		self.head = Some(h);
		h
	}

	/// Append a layer to the sub-chain nested under `parent`
	///
	/// Nested layers are linked among themselves but not into the top-level
	/// list; queries walking off their ends defer to the parent layer.
	pub fn append_nested(&mut self, parent: LayerHandle, proto: Box<dyn Protocol>) -> LayerHandle {
		let last = (0..self.slots.len())
			.map(LayerHandle)
			.filter(|&h| self.slots[h.0].proto.is_some())
			.find(|&h| self.slots[h.0].parent == Some(parent) && self.slots[h.0].next.is_none());

		let h = self.alloc_slot(Slot { proto: Some(proto), prev: last, next: None, parent: Some(parent) });
		if let Some(l) = last {
			self.slots[l.0].next = Some(h);
		}
		h
	}

	/// Unlink a layer and hand its protocol back to the caller
	///
	/// Only leaf layers may be removed; a combo parent must have its nested
	/// sub-chain removed first.
	pub fn remove(&mut self, h: LayerHandle) -> Box<dyn Protocol> {
		let prev = self.slots[h.0].prev;
		let next = self.slots[h.0].next;

		if let Some(p) = prev {
			self.slots[p.0].next = next;
		}
		if let Some(n) = next {
			self.slots[n.0].prev = prev;
		}
		if self.head == Some(h) {
			self.head = next;
		}
		if self.tail == Some(h) {
			self.tail = prev;
		}

		let proto = match self.slots[h.0].proto.take() {
			Some(p) => p,
			None => panic!("stale layer handle"),
		};
		self.free.push(h.0);
		proto
	}

	#[inline]
	pub fn proto(&self, h: LayerHandle) -> &dyn Protocol {
		match self.slots[h.0].proto.as_deref() {
			Some(p) => p,
			None => panic!("stale layer handle"),
		}
	}

	#[inline]
	pub fn proto_mut(&mut self, h: LayerHandle) -> &mut dyn Protocol {
		match self.slots[h.0].proto.as_deref_mut() {
			Some(p) => p,
			None => panic!("stale layer handle"),
		}
	}

	#[inline]
	pub fn prev(&self, h: LayerHandle) -> Option<LayerHandle> {
		self.slots[h.0].prev
	}

	#[inline]
	pub fn next(&self, h: LayerHandle) -> Option<LayerHandle> {
		self.slots[h.0].next
	}

	#[inline]
	pub fn parent(&self, h: LayerHandle) -> Option<LayerHandle> {
		self.slots[h.0].parent
	}

	#[inline]
	pub fn head(&self) -> Option<LayerHandle> {
		self.head
	}

	#[inline]
	pub fn tail(&self) -> Option<LayerHandle> {
		self.tail
	}

	/// Top-level layers, head to tail
	pub fn iter(&self) -> Layers<'_> {
		Layers { chain: self, cur: self.head, forward: true }
	}

	/// Top-level layers, tail to head
	pub fn iter_rev(&self) -> Layers<'_> {
		Layers { chain: self, cur: self.tail, forward: false }
	}

	pub fn len(&self) -> usize {
		self.iter().count()
	}

	pub fn is_empty(&self) -> bool {
		self.head.is_none()
	}

	/// The neighbour context a layer needs to compute cross-layer fields
	pub fn ctx<'a>(&'a self, h: LayerHandle, stream: &'a StreamState) -> LayerCtx<'a> {
		LayerCtx { chain: self, handle: h, stream }
	}

	/// Render the whole chain into frame bytes
	pub fn frame_value(&self, stream: &StreamState, stream_index: usize) -> Vec<u8> {
		let mut out = Vec::new();
		for h in self.iter() {
			let ctx = self.ctx(h, stream);
			out.extend_from_slice(&self.proto(h).frame_value(&ctx, stream_index, false));
		}
		out
	}

	pub fn frame_size(&self, stream: &StreamState, stream_index: usize) -> usize {
		self.iter()
			.map(|h| self.proto(h).frame_size(&self.ctx(h, stream), stream_index))
			.sum()
	}

	pub fn is_frame_value_variable(&self, stream: &StreamState) -> bool {
		self.iter()
			.any(|h| self.proto(h).is_frame_value_variable(&self.ctx(h, stream)))
	}

	pub fn is_frame_size_variable(&self, stream: &StreamState) -> bool {
		self.iter()
			.any(|h| self.proto(h).is_frame_size_variable(&self.ctx(h, stream)))
	}

	fn payload_protocol_id_from(&self, h: LayerHandle, id_type: ProtocolIdType) -> u32 {
		if let Some(n) = self.next(h) {
			self.proto(n).protocol_id(id_type)
		} else if let Some(p) = self.parent(h) {
			self.payload_protocol_id_from(p, id_type)
		} else {
			PROTO_ID_NONE
		}
	}

	fn payload_size_from(&self, h: LayerHandle, stream: &StreamState, stream_index: usize) -> usize {
		let mut size = 0;
		let mut cur = self.next(h);
		while let Some(n) = cur {
			size += self.proto(n).frame_size(&self.ctx(n, stream), stream_index);
			cur = self.next(n);
		}
		if let Some(p) = self.parent(h) {
			size += self.payload_size_from(p, stream, stream_index);
		}
		size
	}

	fn frame_offset_from(&self, h: LayerHandle, stream: &StreamState, stream_index: usize) -> usize {
		let mut size = 0;
		let mut cur = self.prev(h);
		while let Some(p) = cur {
			size += self.proto(p).frame_size(&self.ctx(p, stream), stream_index);
			cur = self.prev(p);
		}
		if let Some(p) = self.parent(h) {
			size += self.frame_offset_from(p, stream, stream_index);
		}
		size
	}

	fn header_cksum_from(
		&self,
		h: LayerHandle,
		stream: &StreamState,
		stream_index: usize,
		kind: CksumType,
	) -> u32 {
		assert!(matches!(kind, CksumType::IpPseudo));

		let mut sum: u32 = 0;
		let mut cur = self.prev(h);
		while let Some(p) = cur {
			let cksum = self.proto(p).frame_cksum(&self.ctx(p, stream), stream_index, kind);
			sum += !(cksum as u16) as u32;
			cur = self.prev(p);
		}
		if let Some(p) = self.parent(h) {
			let cksum = self.header_cksum_from(p, stream, stream_index, kind);
			sum += !(cksum as u16) as u32;
		}

		!fold_cksum(sum) as u16 as u32
	}

	fn payload_cksum_from(
		&self,
		h: LayerHandle,
		stream: &StreamState,
		stream_index: usize,
		kind: CksumType,
	) -> u32 {
		assert!(matches!(kind, CksumType::Ip));

		let mut sum: u32 = 0;
		let mut cur = self.next(h);
		while let Some(n) = cur {
			let cksum = self.proto(n).frame_cksum(&self.ctx(n, stream), stream_index, kind);
			sum += !(cksum as u16) as u32;
			cur = self.next(n);
		}
		if let Some(p) = self.parent(h) {
			let cksum = self.payload_cksum_from(p, stream, stream_index, kind);
			sum += !(cksum as u16) as u32;
		}

		!fold_cksum(sum) as u16 as u32
	}

	fn payload_value_variable_from(&self, h: LayerHandle, stream: &StreamState) -> bool {
		let mut cur = self.next(h);
		while let Some(n) = cur {
			if self.proto(n).is_frame_value_variable(&self.ctx(n, stream)) {
				return true;
			}
			cur = self.next(n);
		}
		match self.parent(h) {
			Some(p) => self.payload_value_variable_from(p, stream),
			None => false,
		}
	}

	fn payload_size_variable_from(&self, h: LayerHandle, stream: &StreamState) -> bool {
		let mut cur = self.next(h);
		while let Some(n) = cur {
			if self.proto(n).is_frame_size_variable(&self.ctx(n, stream)) {
				return true;
			}
			cur = self.next(n);
		}
		match self.parent(h) {
			Some(p) => self.payload_size_variable_from(p, stream),
			None => false,
		}
	}
}

impl Default for ProtocolChain {
	fn default() -> Self {
		Self::new()
	}
}

pub struct Layers<'a> {
	chain: &'a ProtocolChain,
	cur: Option<LayerHandle>,
	forward: bool,
}

impl<'a> Iterator for Layers<'a> {
	type Item = LayerHandle;

	fn next(&mut self) -> Option<LayerHandle> {
		let h = self.cur?;
		self.cur = if self.forward { self.chain.next(h) } else { self.chain.prev(h) };
		Some(h)
	}
}

/// A layer's view of its surroundings: the owning chain, its own handle and
/// the stream-wide state
pub struct LayerCtx<'a> {
	chain: &'a ProtocolChain,
	handle: LayerHandle,
	stream: &'a StreamState,
}

impl<'a> LayerCtx<'a> {
	#[inline]
	pub fn stream(&self) -> &StreamState {
		self.stream
	}

	#[inline]
	pub fn handle(&self) -> LayerHandle {
		self.handle
	}

	/// Protocol id of the layer immediately following this one
	pub fn payload_protocol_id(&self, id_type: ProtocolIdType) -> u32 {
		self.chain.payload_protocol_id_from(self.handle, id_type)
	}

	/// Bytes contributed by all layers after this one
	pub fn payload_size(&self, stream_index: usize) -> usize {
		self.chain.payload_size_from(self.handle, self.stream, stream_index)
	}

	/// Byte offset of this layer within the packet
	pub fn frame_offset(&self, stream_index: usize) -> usize {
		self.chain.frame_offset_from(self.handle, self.stream, stream_index)
	}

	/// Combined checksum of all layers before this one
	pub fn header_cksum(&self, stream_index: usize, kind: CksumType) -> u32 {
		self.chain.header_cksum_from(self.handle, self.stream, stream_index, kind)
	}

	/// Combined checksum of all layers after this one
	pub fn payload_cksum(&self, stream_index: usize, kind: CksumType) -> u32 {
		self.chain.payload_cksum_from(self.handle, self.stream, stream_index, kind)
	}

	pub fn is_payload_value_variable(&self) -> bool {
		self.chain.payload_value_variable_from(self.handle, self.stream)
	}

	pub fn is_payload_size_variable(&self) -> bool {
		self.chain.payload_size_variable_from(self.handle, self.stream)
	}

	pub(crate) fn enter_cksum(&self) -> u32 {
		let depth = self.chain.cksum_depth.get() + 1;
		self.chain.cksum_depth.set(depth);
		depth
	}

	pub(crate) fn leave_cksum(&self) {
		let depth = self.chain.cksum_depth.get();
		self.chain.cksum_depth.set(depth.saturating_sub(1));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::proto::tests::{fixed_stream, TestProto};
	use crate::proto::FieldFlags;

	fn layer(name: &'static str) -> Box<dyn Protocol> {
		Box::new(TestProto::new(name, vec![(FieldFlags::Normal, 8, vec![0x11])]))
	}

	fn assert_links_consistent(chain: &ProtocolChain) {
		for h in chain.iter() {
			if let Some(p) = chain.prev(h) {
				assert_eq!(chain.next(p), Some(h));
			}
			if let Some(n) = chain.next(h) {
				assert_eq!(chain.prev(n), Some(h));
			}
		}
	}

	#[test]
	fn append_and_prepend_keep_links_consistent() {
		let mut chain = ProtocolChain::new();
		let b = chain.append(layer("B Layer"));
		let _c = chain.append(layer("C Layer"));
		let a = chain.prepend(layer("A Layer"));

		assert_eq!(chain.head(), Some(a));
		assert_eq!(chain.len(), 3);
		assert_links_consistent(&chain);

		let names: Vec<&str> = chain.iter().map(|h| chain.proto(h).name()).collect();
		assert_eq!(names, vec!["A Layer", "B Layer", "C Layer"]);

		let rev: Vec<&str> = chain.iter_rev().map(|h| chain.proto(h).name()).collect();
		assert_eq!(rev, vec!["C Layer", "B Layer", "A Layer"]);

		assert_eq!(chain.prev(b), Some(a));
	}

	#[test]
	fn remove_unlinks_and_reuses_the_slot() {
		let mut chain = ProtocolChain::new();
		let a = chain.append(layer("A Layer"));
		let b = chain.append(layer("B Layer"));
		let c = chain.append(layer("C Layer"));

		let removed = chain.remove(b);
		assert_eq!(removed.name(), "B Layer");
		assert_eq!(chain.len(), 2);
		assert_eq!(chain.next(a), Some(c));
		assert_eq!(chain.prev(c), Some(a));
		assert_links_consistent(&chain);

		// the freed slot is reused by the next append
		let d = chain.append(layer("D Layer"));
		assert_eq!(d, b);
		assert_eq!(chain.tail(), Some(d));
		assert_links_consistent(&chain);
	}

	#[test]
	fn remove_head_and_tail() {
		let mut chain = ProtocolChain::new();
		let a = chain.append(layer("A Layer"));
		let b = chain.append(layer("B Layer"));

		chain.remove(a);
		assert_eq!(chain.head(), Some(b));
		chain.remove(b);
		assert!(chain.is_empty());
	}

	#[test]
	fn chain_render_concatenates_layers() {
		let mut chain = ProtocolChain::new();
		chain.append(Box::new(TestProto::new(
			"One",
			vec![(FieldFlags::Normal, 16, vec![0xAA, 0xBB])],
		)));
		chain.append(Box::new(TestProto::new(
			"Two",
			vec![(FieldFlags::Normal, 8, vec![0xCC])],
		)));

		let stream = fixed_stream(64);
		assert_eq!(chain.frame_value(&stream, 0), vec![0xAA, 0xBB, 0xCC]);
		assert_eq!(chain.frame_size(&stream, 0), 3);
	}

	#[test]
	fn nested_layers_defer_to_the_parent() {
		// outer: combo -> tail; the nested leaf's payload queries must
		// reach `tail` through the combo parent
		let mut chain = ProtocolChain::new();
		let combo = chain.append(layer("Combo Outer"));
		let _tail = chain.append(Box::new(TestProto::new(
			"Tail Layer",
			vec![(FieldFlags::Normal, 16, vec![0x12, 0x34])],
		)));

		let inner = chain.append_nested(combo, layer("Inner Leaf"));
		let stream = fixed_stream(64);

		let ctx = chain.ctx(inner, &stream);
		// TestProto has no protocol id, so the id resolves to 0
		assert_eq!(ctx.payload_protocol_id(ProtocolIdType::Eth), 0);
		// payload size runs off the nested chain into the outer tail
		assert_eq!(ctx.payload_size(0), 2);
	}

	#[test]
	fn payload_variability_propagates_to_earlier_layers() {
		let mut chain = ProtocolChain::new();
		let first = chain.append(layer("First"));
		chain.append(Box::new(crate::proto::payload::PayloadProtocol::new()));

		let varying = StreamState {
			frame_len: 64,
			frame_len_min: 64,
			frame_len_max: 128,
			len_mode: crate::stream::FrameLenMode::Inc,
		};
		assert!(chain.ctx(first, &varying).is_payload_value_variable());
		assert!(chain.ctx(first, &varying).is_payload_size_variable());

		let fixed = fixed_stream(64);
		assert!(!chain.ctx(first, &fixed).is_payload_value_variable());
		assert!(!chain.ctx(first, &fixed).is_payload_size_variable());
	}

	#[test]
	fn payload_queries_without_next_or_parent_hit_the_sentinel() {
		let mut chain = ProtocolChain::new();
		let only = chain.append(layer("Only Layer"));
		let stream = fixed_stream(64);

		let ctx = chain.ctx(only, &stream);
		assert_eq!(ctx.payload_protocol_id(ProtocolIdType::Ip), PROTO_ID_NONE);
		assert_eq!(ctx.payload_size(0), 0);
	}
}
