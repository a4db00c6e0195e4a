//! Typed requests and replies to the registry service, carried as
//! integer-keyed maps over the command channel. Success reports protocol
//! health; the boolean payload reports whether the state actually changed.

use crate::codec::message::{decode_frame, encode_value};
use crate::codec::mime;
use crate::context::keep_running;
use crate::value::{Map, Value};
use skein::config::NodeConfig;
use skein::contract::{self, Connection, ServiceKind, Transport};
use skein::logging::{self, Logger};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Outcome of one registry call.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpStatus {
    pub success: bool,
    pub detail: String,
}

impl OpStatus {
    fn ok() -> OpStatus {
        OpStatus {
            success: true,
            detail: String::new(),
        }
    }

    fn failed<S: Into<String>>(detail: S) -> OpStatus {
        OpStatus {
            success: false,
            detail: detail.into(),
        }
    }
}

pub type StatusWithBool = (OpStatus, bool);

/// The minimal discovery hook the core consumes: a bounded connect attempt
/// to the configured registry address. Richer discovery (mDNS) stays an
/// external collaborator that produces the same `Connection`.
pub fn find_registry(config: &NodeConfig) -> Option<Connection> {
    let address: Ipv4Addr = config.registry.address.parse().ok()?;
    let target = SocketAddr::new(address.into(), config.registry.port);
    let probe = TcpStream::connect_timeout(&target, Duration::from_millis(config.registry.timeout_ms));

    match probe {
        Ok(_) => Some(Connection::new(address, config.registry.port, Transport::Tcp)),
        Err(_) => None,
    }
}

/// RPC client over one command connection, with a per-call deadline.
pub struct RegistryProxy {
    stream: TcpStream,
    deadline: Duration,
    log: Logger,
}

impl RegistryProxy {
    pub fn connect(connection: &Connection, deadline: Duration, log: &Logger) -> std::io::Result<RegistryProxy> {
        let target = SocketAddr::new(connection.address.into(), connection.port);
        let stream = TcpStream::connect_timeout(&target, deadline)?;

        stream.set_nodelay(true)?;

        Ok(RegistryProxy {
            stream,
            deadline,
            log: log.new(logging::o!("proxy" => connection.to_string())),
        })
    }

    pub fn is_node_present(&mut self, name: &str) -> StatusWithBool {
        let mut request = Map::new();

        request.add_value(Value::Integer(contract::KEY_OP), Value::Integer(contract::OP_IS_NODE_PRESENT));
        request.add_value(Value::Integer(contract::KEY_NODE), Value::string(name));

        self.call_with_bool(request)
    }

    pub fn add_node(
        &mut self,
        name: &str,
        launch_args: &[String],
        kind: ServiceKind,
        command: &Connection,
    ) -> StatusWithBool {
        let mut request = Map::new();
        let args = launch_args.iter().map(Value::string).collect();

        request.add_value(Value::Integer(contract::KEY_OP), Value::Integer(contract::OP_ADD_NODE));
        request.add_value(Value::Integer(contract::KEY_NODE), Value::string(name));
        request.add_value(Value::Integer(contract::KEY_ARGS), Value::Array(args));
        request.add_value(Value::Integer(contract::KEY_KIND), Value::Integer(kind.code()));
        request.add_value(Value::Integer(contract::KEY_ADDRESS), Value::Address(command.address));
        request.add_value(Value::Integer(contract::KEY_PORT), Value::Integer(i64::from(command.port)));
        request.add_value(Value::Integer(contract::KEY_VERSION), Value::Integer(skein::PROTOCOL_VERSION));

        self.call_with_bool(request)
    }

    pub fn add_channel(
        &mut self,
        node: &str,
        path: &str,
        is_output: bool,
        data_type: &str,
        transport: Transport,
    ) -> StatusWithBool {
        let mut request = Map::new();

        request.add_value(Value::Integer(contract::KEY_OP), Value::Integer(contract::OP_ADD_CHANNEL));
        request.add_value(Value::Integer(contract::KEY_NODE), Value::string(node));
        request.add_value(Value::Integer(contract::KEY_PATH), Value::string(path));
        request.add_value(Value::Integer(contract::KEY_IS_OUTPUT), Value::Logical(is_output));
        request.add_value(Value::Integer(contract::KEY_DATA_TYPE), Value::string(data_type));
        request.add_value(Value::Integer(contract::KEY_TRANSPORT), Value::Integer(transport.code()));

        self.call_with_bool(request)
    }

    pub fn remove_channel(&mut self, node: &str, path: &str) -> StatusWithBool {
        let mut request = Map::new();

        request.add_value(Value::Integer(contract::KEY_OP), Value::Integer(contract::OP_REMOVE_CHANNEL));
        request.add_value(Value::Integer(contract::KEY_NODE), Value::string(node));
        request.add_value(Value::Integer(contract::KEY_PATH), Value::string(path));

        self.call_with_bool(request)
    }

    pub fn remove_node(&mut self, name: &str) -> StatusWithBool {
        let mut request = Map::new();

        request.add_value(Value::Integer(contract::KEY_OP), Value::Integer(contract::OP_REMOVE_NODE));
        request.add_value(Value::Integer(contract::KEY_NODE), Value::string(name));

        self.call_with_bool(request)
    }

    fn call_with_bool(&mut self, request: Map) -> StatusWithBool {
        let (status, payload) = self.call(request);
        let flag = matches!(payload, Some(Value::Logical(true)));

        (status, flag)
    }

    /// One request/reply exchange. A cleared run flag fails fast (teardown
    /// re-arms it around each call); a missed deadline is reported as
    /// "timeout".
    fn call(&mut self, request: Map) -> (OpStatus, Option<Value>) {
        if !keep_running() {
            return (OpStatus::failed("stopping"), None);
        }

        let framed = mime::package(&encode_value(&Value::Map(request)));
        let started = Instant::now();

        if self.stream.set_write_timeout(Some(self.deadline)).is_err()
            || self.stream.set_read_timeout(Some(self.deadline)).is_err()
        {
            return (OpStatus::failed("socket configuration failed"), None);
        }
        if let Err(error) = self.stream.write_all(framed.as_bytes()) {
            logging::warn!(self.log, "request write failed"; "error" => error.to_string());
            return (OpStatus::failed(error.to_string()), None);
        }

        let mut collected = Vec::new();
        let mut scanner = mime::SeparatorScanner::new();
        let mut scratch = [0u8; 4096];

        loop {
            if started.elapsed() >= self.deadline {
                return (OpStatus::failed("timeout"), None);
            }

            let count = match self.stream.read(&mut scratch) {
                Ok(0) => return (OpStatus::failed("registry closed the connection"), None),
                Ok(count) => count,
                Err(error)
                    if error.kind() == std::io::ErrorKind::WouldBlock
                        || error.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return (OpStatus::failed("timeout"), None);
                }
                Err(error) => return (OpStatus::failed(error.to_string()), None),
            };

            let mut frame_end = None;

            for (index, byte) in scratch[..count].iter().enumerate() {
                if scanner.feed(*byte) {
                    frame_end = Some(index + 1);
                    break;
                }
            }
            match frame_end {
                Some(end) => {
                    collected.extend_from_slice(&scratch[..end]);
                    break;
                }
                None => collected.extend_from_slice(&scratch[..count]),
            }
        }

        let body = match std::str::from_utf8(&collected).ok().and_then(mime::unpackage) {
            Some(body) => body,
            None => return (OpStatus::failed("undecodable reply"), None),
        };

        match decode_frame(&body) {
            Some(Value::Map(reply)) => {
                let success = matches!(
                    reply.get(&Value::Integer(contract::KEY_SUCCESS)),
                    Some(Value::Logical(true))
                );
                let detail = match reply.get(&Value::Integer(contract::KEY_DETAIL)) {
                    Some(Value::String(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                    _ => String::new(),
                };
                let payload = reply.get(&Value::Integer(contract::KEY_PAYLOAD)).cloned();

                if success {
                    (OpStatus::ok(), payload)
                } else {
                    (OpStatus::failed(detail), payload)
                }
            }
            _ => (OpStatus::failed("malformed reply"), None),
        }
    }
}

/// A one-connection stub registry for tests: answers every request using
/// the supplied responder and records the operations it saw.
#[cfg(test)]
pub(crate) mod test_stub {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    pub(crate) fn spawn_stub<F>(responder: F) -> (SocketAddr, thread::JoinHandle<Vec<i64>>)
    where
        F: Fn(i64, &Map) -> (bool, String, Value) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen_operations = Vec::new();
            let mut pending = Vec::new();
            let mut scanner = mime::SeparatorScanner::new();
            let mut scratch = [0u8; 4096];

            loop {
                let count = match stream.read(&mut scratch) {
                    Ok(0) | Err(_) => return seen_operations,
                    Ok(count) => count,
                };

                for byte in &scratch[..count] {
                    pending.push(*byte);
                    if !scanner.feed(*byte) {
                        continue;
                    }

                    let body = std::str::from_utf8(&pending).ok().and_then(mime::unpackage).unwrap();
                    let request = match decode_frame(&body) {
                        Some(Value::Map(request)) => request,
                        _ => return seen_operations,
                    };
                    let operation = match request.get(&Value::Integer(contract::KEY_OP)) {
                        Some(Value::Integer(operation)) => *operation,
                        _ => -1,
                    };

                    seen_operations.push(operation);

                    let (success, detail, payload) = responder(operation, &request);
                    let mut reply = Map::new();

                    reply.add_value(Value::Integer(contract::KEY_SUCCESS), Value::Logical(success));
                    reply.add_value(Value::Integer(contract::KEY_DETAIL), Value::string(&detail));
                    reply.add_value(Value::Integer(contract::KEY_PAYLOAD), payload);

                    let framed = mime::package(&encode_value(&Value::Map(reply)));

                    if stream.write_all(framed.as_bytes()).is_err() {
                        return seen_operations;
                    }
                    pending.clear();
                }
            }
        });

        (address, handle)
    }

    pub(crate) fn proxy_for(address: SocketAddr) -> RegistryProxy {
        let connection = Connection::new(
            match address.ip() {
                std::net::IpAddr::V4(ip) => ip,
                _ => unreachable!(),
            },
            address.port(),
            Transport::Tcp,
        );

        RegistryProxy::connect(&connection, Duration::from_millis(2000), &logging::discard()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_stub::{proxy_for, spawn_stub};
    use super::*;
    use crate::context;
    use skein::logging;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_add_and_remove_node_roundtrip() {
        let _guard = context::test_support::run_flag_guard();

        context::reset_run_flags();

        let (address, handle) = spawn_stub(|_, _| (true, String::new(), Value::Logical(true)));
        let mut proxy = proxy_for(address);

        let (status, payload) = proxy.is_node_present("alpha");
        assert!(status.success);
        assert!(payload);

        let command = Connection::new(Ipv4Addr::LOCALHOST, 5000, Transport::Tcp);
        let (status, payload) = proxy.add_node("alpha", &[], ServiceKind::FilterService, &command);
        assert!(status.success);
        assert!(payload);

        let (status, _) = proxy.add_channel("alpha", "/in", false, "", Transport::Any);
        assert!(status.success);

        let (status, _) = proxy.remove_channel("alpha", "/in");
        assert!(status.success);

        let (status, _) = proxy.remove_node("alpha");
        assert!(status.success);

        drop(proxy);

        let seen = handle.join().unwrap();
        assert_eq!(
            seen,
            vec![
                contract::OP_IS_NODE_PRESENT,
                contract::OP_ADD_NODE,
                contract::OP_ADD_CHANNEL,
                contract::OP_REMOVE_CHANNEL,
                contract::OP_REMOVE_NODE,
            ]
        );
    }

    #[test]
    fn test_remove_on_absent_entity_is_success_without_change() {
        let _guard = context::test_support::run_flag_guard();

        context::reset_run_flags();

        let (address, handle) = spawn_stub(|_, _| (true, String::new(), Value::Logical(false)));
        let mut proxy = proxy_for(address);

        let (status, changed) = proxy.remove_node("ghost");

        assert!(status.success);
        assert!(!changed);

        drop(proxy);
        handle.join().unwrap();
    }

    #[test]
    fn test_missed_deadline_reports_timeout() {
        let _guard = context::test_support::run_flag_guard();

        context::reset_run_flags();

        // A listener that accepts and never replies.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let keeper = thread::spawn(move || listener.accept());

        let connection = Connection::new(Ipv4Addr::LOCALHOST, address.port(), Transport::Tcp);
        let mut proxy =
            RegistryProxy::connect(&connection, Duration::from_millis(100), &logging::discard()).unwrap();

        let (status, _) = proxy.is_node_present("quiet");

        assert!(!status.success);
        assert_eq!(status.detail, "timeout");
        let _ = keeper.join();
    }

    #[test]
    fn test_cleared_run_flag_fails_fast() {
        let _guard = context::test_support::run_flag_guard();

        context::reset_run_flags();
        context::set_keep_running(false);

        let (address, handle) = spawn_stub(|_, _| (true, String::new(), Value::Logical(true)));
        let mut proxy = proxy_for(address);

        let (status, _) = proxy.is_node_present("stopped");

        assert!(!status.success);
        assert_eq!(status.detail, "stopping");

        context::reset_run_flags();
        drop(proxy);
        handle.join().unwrap();
    }

    #[test]
    fn test_find_registry_probes_the_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = NodeConfig::default();
        config.registry.port = port;
        config.registry.timeout_ms = 500;

        let found = find_registry(&config).unwrap();
        assert_eq!(found.port, port);

        drop(listener);

        let mut config = NodeConfig::default();
        config.registry.port = 1;
        config.registry.timeout_ms = 100;
        assert!(find_registry(&config).is_none());
    }
}
