//! The wire contract between a node and the registry service. Requests and
//! replies travel as integer-keyed maps in the binary message format; the
//! constants here pin the operation codes and field ids on both sides.

use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Transport selection for a channel. `Any` leaves the choice to the
/// registry when the connection is brokered.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
    Any,
}

impl Transport {
    pub fn name(self) -> &'static str {
        match self {
            Transport::Tcp => "TCP",
            Transport::Udp => "UDP",
            Transport::Any => "Any",
        }
    }

    pub fn from_name(name: &str) -> Option<Transport> {
        match name {
            "TCP" => Some(Transport::Tcp),
            "UDP" => Some(Transport::Udp),
            "Any" => Some(Transport::Any),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Transport::Tcp => 1,
            Transport::Udp => 2,
            Transport::Any => 0,
        }
    }

    pub fn from_code(code: i64) -> Option<Transport> {
        match code {
            0 => Some(Transport::Any),
            1 => Some(Transport::Tcp),
            2 => Some(Transport::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The role a node registers under. Input and Output services are bridge
/// nodes that carry traffic into and out of the mesh.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ServiceKind {
    SourceService,
    SinkService,
    FilterService,
    InputService,
    OutputService,
}

impl ServiceKind {
    pub fn code(self) -> i64 {
        match self {
            ServiceKind::SourceService => 1,
            ServiceKind::SinkService => 2,
            ServiceKind::FilterService => 3,
            ServiceKind::InputService => 4,
            ServiceKind::OutputService => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<ServiceKind> {
        match code {
            1 => Some(ServiceKind::SourceService),
            2 => Some(ServiceKind::SinkService),
            3 => Some(ServiceKind::FilterService),
            4 => Some(ServiceKind::InputService),
            5 => Some(ServiceKind::OutputService),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ServiceKind::SourceService => "source",
            ServiceKind::SinkService => "sink",
            ServiceKind::FilterService => "filter",
            ServiceKind::InputService => "input",
            ServiceKind::OutputService => "output",
        }
    }
}

/// One reachable endpoint: where a node's command listener, or the registry
/// itself, can be contacted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub address: Ipv4Addr,
    pub port: u16,
    pub transport: Transport,
}

impl Connection {
    pub fn new(address: Ipv4Addr, port: u16, transport: Transport) -> Connection {
        Connection {
            address,
            port,
            transport,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}/{}", self.address, self.port, self.transport)
    }
}

// Operation codes. Field 0 of every request names one of these.
pub const OP_IS_NODE_PRESENT: i64 = 1;
pub const OP_ADD_NODE: i64 = 2;
pub const OP_ADD_CHANNEL: i64 = 3;
pub const OP_REMOVE_CHANNEL: i64 = 4;
pub const OP_REMOVE_NODE: i64 = 5;

// Request field ids.
pub const KEY_OP: i64 = 0;
pub const KEY_NODE: i64 = 1;
pub const KEY_PATH: i64 = 2;
pub const KEY_ARGS: i64 = 3;
pub const KEY_KIND: i64 = 4;
pub const KEY_ADDRESS: i64 = 5;
pub const KEY_PORT: i64 = 6;
pub const KEY_TRANSPORT: i64 = 7;
pub const KEY_IS_OUTPUT: i64 = 8;
pub const KEY_DATA_TYPE: i64 = 9;
pub const KEY_VERSION: i64 = 10;

// Reply field ids.
pub const KEY_SUCCESS: i64 = 0;
pub const KEY_DETAIL: i64 = 1;
pub const KEY_PAYLOAD: i64 = 2;

// Node command-endpoint operations, sharing the request field ids above.
pub const OP_CONNECT_CHANNEL: i64 = 32;
pub const OP_DISCONNECT_CHANNEL: i64 = 33;
