//! Descriptor-driven client for the compositor wire protocol

pub mod client;
pub mod codec;
pub mod descriptor;
pub mod transport;

pub use client::{
    CallReply, EventBatch, Global, ObjectId, WireArg, WireClient, WireEvent, WireObject,
    WireOptions, WireValue, DISPLAY_ID,
};
pub use codec::Fixed;
pub use descriptor::{ArgType, InterfaceSpec, MessageSpec, ProtocolDescriptor};
