//! This is the library module that provides structures like
//! PktBuf, Mempool, Port, ProtocolChain, PacketList and the PortManager
//!
//! Together they form the core of a software traffic generator: streams are
//! described as chains of protocol layers, rendered into pooled packet
//! buffers, organised into replayable packet lists and transmitted from
//! core-pinned worker threads while a poller drains receive rings and a
//! monitor samples per-port counters and link state.

pub mod apis;
pub mod drv;
pub mod pktlist;
pub mod portmgr;
pub mod proto;
pub mod stats;
pub mod stream;

mod txrx;

pub use apis::*;
pub use pktlist::{PacketList, PacketSet};
pub use portmgr::PortManager;
pub use stats::{LinkState, StatsSnapshot};
pub use stream::{LayerConfig, NextAction, SendUnit, Stream, StreamConfig};
