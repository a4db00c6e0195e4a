#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! The middleware core: values, codecs, channel names, the registry proxy
//! and the per-process node context. Processes built on this crate expose
//! named input and output channels, register themselves with the registry,
//! and exchange self-describing binary messages over the selected transport.

pub mod buffer;
pub mod codec;
pub mod context;
pub mod name;
pub mod net;
pub mod registry;
pub mod roles;
pub mod value;

pub use crate::codec::message::Message;
pub use crate::codec::text::StringBuffer;
pub use crate::name::ChannelName;
pub use crate::value::Value;
