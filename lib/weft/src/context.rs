use crate::codec::message::{decode_frame, encode_value};
use crate::codec::mime;
use crate::net::buffer::IoBuffer;
use crate::net::channel::{FrameReader, InputChannel, OutputChannel};
use crate::net::endpoint::Endpoint;
use crate::net::queue::{PendingQueue, ReceivedValue};
use crate::net::{ErrorType, NetworkError, NetworkResult};
use crate::value::{Map, Value};
use hashbrown::HashMap;
use indexmap::IndexMap;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use skein::contract::{self, Connection, Transport};
use skein::logging::{self, Logger};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

const PENDING_QUEUE_CAPACITY: usize = 256;
const SEND_SLICE: Duration = Duration::from_millis(5);
const YIELD_SLICE: Duration = Duration::from_millis(1);

/// Level-triggered run flag: cleared by the break handler so every traffic
/// loop and blocking send unwinds promptly. Teardown re-arms it around each
/// registry call.
static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

/// Set alongside clearing `KEEP_RUNNING` when the stop came from a signal,
/// so the teardown path knows registry calls should still be attempted.
static PENDING_STOP: AtomicBool = AtomicBool::new(false);

static SIGNAL_HOOK: Once = Once::new();

#[inline]
pub fn keep_running() -> bool {
    KEEP_RUNNING.load(Ordering::SeqCst)
}

#[inline]
pub fn set_keep_running(on: bool) {
    KEEP_RUNNING.store(on, Ordering::SeqCst);
}

#[inline]
pub fn pending_stop() -> bool {
    PENDING_STOP.load(Ordering::SeqCst)
}

/// What the break handler does; also callable directly for orderly stops.
pub fn request_stop() {
    KEEP_RUNNING.store(false, Ordering::SeqCst);
    PENDING_STOP.store(true, Ordering::SeqCst);
}

/// Reset the run flags, for a fresh start within one process.
pub fn reset_run_flags() {
    KEEP_RUNNING.store(true, Ordering::SeqCst);
    PENDING_STOP.store(false, Ordering::SeqCst);
}

/// Arm the SIGINT handler. The handler only touches the atomics; everything
/// that polls `keep_running` picks the change up within one slice.
pub fn install_signal_handlers(log: &Logger) {
    SIGNAL_HOOK.call_once(|| {
        let outcome = unsafe { signal_hook::low_level::register(signal_hook::consts::SIGINT, request_stop) };

        match outcome {
            Ok(_) => logging::debug!(log, "break handler installed"),
            Err(error) => logging::error!(log, "failed to install break handler"; "error" => error.to_string()),
        }
    });
}

#[cfg(test)]
pub(crate) mod test_support {
    use lazy_static::lazy_static;
    use std::sync::{Mutex, MutexGuard};

    lazy_static! {
        static ref RUN_FLAG_LOCK: Mutex<()> = Mutex::new(());
    }

    /// Tests that read or toggle the global run flags hold this so they do
    /// not interleave.
    pub(crate) fn run_flag_guard() -> MutexGuard<'static, ()> {
        RUN_FLAG_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone)]
enum Route {
    InputListener(String),
    InputConn(String),
    OutputPeer(String),
    CommandListener,
    CommandConn,
}

struct CommandConnection {
    stream: TcpStream,
    token: Token,
    reader: FrameReader,
    replies: IoBuffer,
}

/// Per-process node state: the I/O dispatcher, the channel objects keyed by
/// path, the pending-message queue, the command endpoint the registry uses
/// to reach the node, and the channel-count limits the role imposes.
pub struct NodeContext {
    log: Logger,
    name: String,
    logging_enabled: bool,
    endpoint: Endpoint,
    inputs: IndexMap<String, InputChannel>,
    outputs: IndexMap<String, OutputChannel>,
    routes: HashMap<Token, Route>,
    queue: Arc<PendingQueue>,
    max_inputs: usize,
    max_outputs: usize,
    command_listener: TcpListener,
    command_port: u16,
    command_conns: Vec<CommandConnection>,
    break_hook: Option<Box<dyn Fn() + Send + Sync>>,
    break_seen: bool,
}

impl NodeContext {
    pub fn new(
        name: &str,
        max_inputs: usize,
        max_outputs: usize,
        logging_enabled: bool,
        log: &Logger,
    ) -> NetworkResult<NodeContext> {
        let mut endpoint = Endpoint::new().map_err(NetworkError::from)?;
        let mut command_listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).map_err(NetworkError::from)?;
        let command_token = endpoint.allocate_token();

        endpoint
            .registry()
            .register(&mut command_listener, command_token, Interest::READABLE)
            .map_err(NetworkError::from)?;

        let command_port = command_listener.local_addr().map_err(NetworkError::from)?.port();
        let context_log = log.new(logging::o!("node" => name.to_string()));
        let mut routes = HashMap::new();

        routes.insert(command_token, Route::CommandListener);
        logging::debug!(context_log, "context created"; "command_port" => command_port);

        Ok(NodeContext {
            log: context_log,
            name: name.to_string(),
            logging_enabled,
            endpoint,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            routes,
            queue: Arc::new(PendingQueue::new(PENDING_QUEUE_CAPACITY)),
            max_inputs,
            max_outputs,
            command_listener,
            command_port,
            command_conns: Vec::new(),
            break_hook: None,
            break_seen: false,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn log(&self) -> &Logger {
        &self.log
    }

    #[inline]
    pub fn queue(&self) -> Arc<PendingQueue> {
        self.queue.clone()
    }

    /// Where the registry can reach this node.
    pub fn command_connection(&self) -> Connection {
        Connection::new(Ipv4Addr::LOCALHOST, self.command_port, Transport::Tcp)
    }

    /// Role-specific break behavior, invoked once when a stop is first
    /// observed inside the dispatcher.
    pub fn set_break_hook<F: Fn() + Send + Sync + 'static>(&mut self, hook: F) {
        self.break_hook = Some(Box::new(hook));
    }

    pub fn report(&self, message: &str) {
        if self.logging_enabled {
            logging::info!(self.log, "{}", message);
        }
    }

    /// Create an input channel under this node. The registry must already
    /// have accepted the registration.
    pub fn add_input_channel(&mut self, path: &str, transport: Transport) -> NetworkResult<()> {
        if self.inputs.len() >= self.max_inputs {
            return Err(NetworkError::Fatal(ErrorType::LimitExceeded));
        }
        if self.inputs.contains_key(path) {
            return Err(NetworkError::Fatal(ErrorType::Duplicate));
        }

        let channel = InputChannel::open(path, transport, &mut self.endpoint, self.queue.clone(), &self.log)?;

        self.routes.insert(channel.token(), Route::InputListener(path.to_string()));
        self.inputs.insert(path.to_string(), channel);

        Ok(())
    }

    /// Create an output channel slot; peers attach later, either through a
    /// command or directly via `connect_output`.
    pub fn add_output_channel(&mut self, path: &str, transport: Transport) -> NetworkResult<()> {
        if self.outputs.len() >= self.max_outputs {
            return Err(NetworkError::Fatal(ErrorType::LimitExceeded));
        }
        if self.outputs.contains_key(path) {
            return Err(NetworkError::Fatal(ErrorType::Duplicate));
        }

        let channel = OutputChannel::new(path, transport, &self.log);

        self.outputs.insert(path.to_string(), channel);

        Ok(())
    }

    /// Attach a downstream peer to an output channel.
    pub fn connect_output(&mut self, path: &str, address: SocketAddr) -> NetworkResult<()> {
        let channel = match self.outputs.get_mut(path) {
            Some(channel) => channel,
            None => return Err(NetworkError::Fatal(ErrorType::UnknownChannel)),
        };

        if let Some(token) = channel.connect_peer(address, &mut self.endpoint)? {
            self.routes.insert(token, Route::OutputPeer(path.to_string()));
        }

        Ok(())
    }

    /// Drop every peer of an output channel.
    pub fn disconnect_output(&mut self, path: &str) -> NetworkResult<()> {
        let channel = match self.outputs.get_mut(path) {
            Some(channel) => channel,
            None => return Err(NetworkError::Fatal(ErrorType::UnknownChannel)),
        };

        for token in channel.peer_tokens() {
            self.routes.remove(&token);
        }
        channel.close(self.endpoint.registry());

        Ok(())
    }

    pub fn input_channel_paths(&self) -> Vec<String> {
        self.inputs.keys().cloned().collect()
    }

    pub fn output_channel_paths(&self) -> Vec<String> {
        self.outputs.keys().cloned().collect()
    }

    /// The loopback port an input channel listens on; wiring and tests use
    /// this to point upstream peers at the node.
    pub fn input_port(&self, path: &str) -> Option<u16> {
        self.inputs.get(path).map(|channel| channel.local_port())
    }

    pub fn is_input_connected(&self, path: &str) -> bool {
        self.inputs.get(path).map(|channel| channel.is_connected()).unwrap_or(false)
    }

    pub fn is_output_connected(&self, path: &str) -> bool {
        self.outputs.get(path).map(|channel| channel.is_connected()).unwrap_or(false)
    }

    /// Non-blocking pop of the next decoded message.
    #[inline]
    pub fn get_next_message(&self) -> Option<ReceivedValue> {
        self.queue.try_pop()
    }

    /// Pop with a bounded wait, for traffic loops that would otherwise
    /// spin. Never waits past the timeout, stop or no stop.
    #[inline]
    pub fn next_message_timeout(&self, timeout: Duration) -> Option<ReceivedValue> {
        self.queue.pop_timeout(timeout)
    }

    /// One cooperative pass of the dispatcher: accept, read, decode, flush.
    pub fn service(&mut self, timeout: Duration) -> NetworkResult<()> {
        if !keep_running() && !self.break_seen {
            self.break_seen = true;
            self.queue.wake();
            if let Some(hook) = self.break_hook.take() {
                hook();
            }
        }

        let ready = self.endpoint.poll_once(timeout).map_err(NetworkError::from)?;

        for readiness in ready {
            let route = self.routes.get(&readiness.token).cloned();

            match route {
                Some(Route::InputListener(path)) => {
                    if let Some(channel) = self.inputs.get_mut(&path) {
                        match channel.socket_ready(&mut self.endpoint) {
                            Ok(created) => {
                                for token in created {
                                    self.routes.insert(token, Route::InputConn(path.clone()));
                                }
                            }
                            Err(NetworkError::Wait) => (),
                            Err(NetworkError::Fatal(error)) => {
                                logging::warn!(self.log, "input socket failed";
                                               "channel" => path, "error" => format!("{:?}", error));
                            }
                        }
                    }
                }
                Some(Route::InputConn(path)) => {
                    let keep = match self.inputs.get_mut(&path) {
                        Some(channel) => channel.connection_ready(readiness.token, self.endpoint.registry()),
                        None => false,
                    };

                    if !keep {
                        self.routes.remove(&readiness.token);
                    }
                }
                Some(Route::OutputPeer(path)) => {
                    let keep = match self.outputs.get_mut(&path) {
                        Some(channel) => channel.peer_ready(
                            readiness.token,
                            readiness.writable,
                            readiness.readable,
                            self.endpoint.registry(),
                        ),
                        None => false,
                    };

                    if !keep {
                        self.routes.remove(&readiness.token);
                    }
                }
                Some(Route::CommandListener) => self.accept_commands(),
                Some(Route::CommandConn) => self.command_ready(readiness.token),
                None => (),
            }
        }

        Ok(())
    }

    /// Yield from the traffic loop into the dispatcher.
    #[inline]
    pub fn yield_io(&mut self) {
        if let Err(error) = self.service(YIELD_SLICE) {
            logging::warn!(self.log, "dispatcher pass failed"; "error" => format!("{:?}", error));
        }
    }

    /// Encode and transmit one value on an output channel, to every
    /// attached peer. Blocks on backpressure, but honors the run flag:
    /// returns false promptly once a stop is requested, and false on any
    /// transport failure.
    pub fn send(&mut self, path: &str, value: &Value) -> bool {
        let frame = mime::package(&encode_value(value));

        match self.outputs.get_mut(path) {
            Some(channel) => {
                if channel.queue_frame(frame.as_bytes()).is_err() {
                    logging::warn!(self.log, "send failed"; "channel" => path);
                    return false;
                }
            }
            None => {
                logging::warn!(self.log, "send on unknown channel"; "channel" => path);
                return false;
            }
        }

        loop {
            let flushed = {
                let channel = self.outputs.get_mut(path).expect("Channel was just used");

                match channel.flush(self.endpoint.registry()) {
                    Ok(flushed) => flushed,
                    Err(_) => {
                        logging::warn!(self.log, "send failed"; "channel" => path);
                        return false;
                    }
                }
            };

            if flushed {
                return true;
            }
            if !keep_running() {
                return false;
            }
            if self.service(SEND_SLICE).is_err() {
                return false;
            }
        }
    }

    /// Step one of the shutdown ordering: close peer connections for every
    /// output channel, then every input channel.
    pub fn close_peer_connections(&mut self) {
        let output_paths = self.output_channel_paths();

        for path in output_paths {
            if let Some(channel) = self.outputs.get_mut(&path) {
                for token in channel.peer_tokens() {
                    self.routes.remove(&token);
                }
                channel.close(self.endpoint.registry());
            }
        }

        let input_paths = self.input_channel_paths();

        for path in input_paths {
            if let Some(channel) = self.inputs.get_mut(&path) {
                channel.close(self.endpoint.registry());
            }
        }

        logging::debug!(self.log, "peer connections closed");
    }

    fn accept_commands(&mut self) {
        loop {
            match self.command_listener.accept() {
                Ok((mut stream, origin)) => {
                    let token = self.endpoint.allocate_token();

                    if self
                        .endpoint
                        .registry()
                        .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                        .is_err()
                    {
                        continue;
                    }
                    logging::debug!(self.log, "command connection accepted"; "origin" => origin.to_string());
                    self.routes.insert(token, Route::CommandConn);
                    self.command_conns.push(CommandConnection {
                        stream,
                        token,
                        reader: FrameReader::new(),
                        replies: IoBuffer::new(),
                    });
                }
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    logging::warn!(self.log, "command accept failed"; "error" => error.to_string());
                    return;
                }
            }
        }
    }

    fn command_ready(&mut self, token: Token) {
        let index = match self.command_conns.iter().position(|connection| connection.token == token) {
            Some(index) => index,
            None => return,
        };
        let mut connection = self.command_conns.swap_remove(index);

        let closed = match connection.reader.ingest(&mut connection.stream, &self.log) {
            Ok((frames, closed)) => {
                for body in frames {
                    let reply = self.execute_command(&body);

                    connection.replies.append(mime::package(&reply).as_bytes());
                }
                closed
            }
            Err(NetworkError::Wait) => false,
            Err(NetworkError::Fatal(_)) => true,
        };

        let flush_failed = connection.replies.egress(&mut connection.stream).is_err();

        if closed || flush_failed {
            let _ = self.endpoint.registry().deregister(&mut connection.stream);
            self.routes.remove(&token);
            logging::debug!(self.log, "command connection closed");
        } else {
            self.command_conns.push(connection);
        }
    }

    /// Execute one command frame and build the reply frame.
    fn execute_command(&mut self, body: &[u8]) -> Vec<u8> {
        let (success, detail) = match decode_frame(body) {
            Some(Value::Map(request)) => self.dispatch_command(&request),
            _ => (false, "malformed command".to_string()),
        };

        let mut reply = Map::new();

        reply.add_value(Value::Integer(contract::KEY_SUCCESS), Value::Logical(success));
        reply.add_value(Value::Integer(contract::KEY_DETAIL), Value::string(&detail));

        encode_value(&Value::Map(reply))
    }

    fn dispatch_command(&mut self, request: &Map) -> (bool, String) {
        let operation = match request.get(&Value::Integer(contract::KEY_OP)) {
            Some(Value::Integer(operation)) => *operation,
            _ => return (false, "missing operation".to_string()),
        };

        match operation {
            contract::OP_CONNECT_CHANNEL => {
                let path = match request.get(&Value::Integer(contract::KEY_PATH)) {
                    Some(Value::String(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                    _ => return (false, "missing channel path".to_string()),
                };
                let address = match request.get(&Value::Integer(contract::KEY_ADDRESS)) {
                    Some(Value::Address(address)) => *address,
                    _ => return (false, "missing peer address".to_string()),
                };
                let port = match request.get(&Value::Integer(contract::KEY_PORT)) {
                    Some(Value::Integer(port)) if (1..=i64::from(u16::MAX)).contains(port) => *port as u16,
                    _ => return (false, "missing peer port".to_string()),
                };

                match self.connect_output(&path, SocketAddr::new(IpAddr::V4(address), port)) {
                    Ok(()) => (true, String::new()),
                    Err(_) => (false, format!("cannot connect '{}'", path)),
                }
            }
            contract::OP_DISCONNECT_CHANNEL => {
                let path = match request.get(&Value::Integer(contract::KEY_PATH)) {
                    Some(Value::String(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                    _ => return (false, "missing channel path".to_string()),
                };

                match self.disconnect_output(&path) {
                    Ok(()) => (true, String::new()),
                    Err(_) => (false, format!("unknown channel '{}'", path)),
                }
            }
            _ => (false, format!("unsupported operation {}", operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein::logging;

    fn quiet() -> Logger {
        logging::discard()
    }

    #[test]
    fn test_run_flags_roundtrip() {
        let _guard = test_support::run_flag_guard();

        reset_run_flags();
        assert!(keep_running());
        assert!(!pending_stop());

        request_stop();
        assert!(!keep_running());
        assert!(pending_stop());

        // Teardown re-arms the run flag while the stop stays pending.
        set_keep_running(true);
        assert!(keep_running());
        assert!(pending_stop());

        reset_run_flags();
    }

    #[test]
    fn test_channel_limits_enforced() {
        let log = quiet();
        let mut context = NodeContext::new("limits", 1, 1, false, &log).unwrap();

        context.add_input_channel("/in", Transport::Any).unwrap();
        assert_eq!(
            context.add_input_channel("/in2", Transport::Any),
            Err(NetworkError::Fatal(ErrorType::LimitExceeded))
        );

        context.add_output_channel("/out", Transport::Any).unwrap();
        assert_eq!(
            context.add_output_channel("/out2", Transport::Any),
            Err(NetworkError::Fatal(ErrorType::LimitExceeded))
        );
    }

    #[test]
    fn test_duplicate_channel_paths_refused() {
        let log = quiet();
        let mut context = NodeContext::new("dupes", 4, 4, false, &log).unwrap();

        context.add_input_channel("/in", Transport::Any).unwrap();
        assert_eq!(
            context.add_input_channel("/in", Transport::Any),
            Err(NetworkError::Fatal(ErrorType::Duplicate))
        );
    }

    #[test]
    fn test_get_next_message_is_non_blocking() {
        let log = quiet();
        let context = NodeContext::new("empty", 1, 1, false, &log).unwrap();
        let start = std::time::Instant::now();

        assert!(context.get_next_message().is_none());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_command_connection_is_reachable() {
        let log = quiet();
        let context = NodeContext::new("cmd", 1, 1, false, &log).unwrap();
        let connection = context.command_connection();

        assert_eq!(connection.address, Ipv4Addr::LOCALHOST);
        assert_ne!(connection.port, 0);
    }

    #[test]
    fn test_udp_channels_carry_datagrams() {
        let log = quiet();
        let mut context = NodeContext::new("datagrams", 1, 1, false, &log).unwrap();

        context.add_input_channel("/in", Transport::Udp).unwrap();
        context.add_output_channel("/out", Transport::Udp).unwrap();

        let port = context.input_port("/in").unwrap();

        context
            .connect_output("/out", SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
            .unwrap();
        assert!(context.is_output_connected("/out"));
        assert!(context.send("/out", &Value::string("ping")));

        let mut received = None;
        for _ in 0..500 {
            context.yield_io();
            if let Some(message) = context.get_next_message() {
                received = Some(message.value);
                break;
            }
        }

        assert_eq!(received, Some(Value::string("ping")));
    }

    /// The registry wires an output through the command endpoint; the
    /// value then travels out the output channel and back into the node's
    /// own input.
    #[test]
    fn test_connect_command_wires_an_output() {
        use crate::codec::mime::SeparatorScanner;
        use std::io::{Read, Write};

        let _guard = test_support::run_flag_guard();

        reset_run_flags();

        let log = quiet();
        let mut context = NodeContext::new("wired", 1, 1, false, &log).unwrap();

        context.add_input_channel("/in", Transport::Any).unwrap();
        context.add_output_channel("/out", Transport::Any).unwrap();

        let input_port = context.input_port("/in").unwrap();
        let command = context.command_connection();

        let mut request = Map::new();

        request.add_value(
            Value::Integer(contract::KEY_OP),
            Value::Integer(contract::OP_CONNECT_CHANNEL),
        );
        request.add_value(Value::Integer(contract::KEY_PATH), Value::string("/out"));
        request.add_value(Value::Integer(contract::KEY_ADDRESS), Value::Address(Ipv4Addr::LOCALHOST));
        request.add_value(
            Value::Integer(contract::KEY_PORT),
            Value::Integer(i64::from(input_port)),
        );

        let framed = mime::package(&encode_value(&Value::Map(request)));

        let client = std::thread::spawn(move || {
            let mut stream =
                std::net::TcpStream::connect((command.address, command.port)).expect("Command port reachable");

            stream.write_all(framed.as_bytes()).unwrap();

            let mut scanner = SeparatorScanner::new();
            let mut collected = Vec::new();
            let mut scratch = [0u8; 1024];

            'read: loop {
                let count = match stream.read(&mut scratch) {
                    Ok(0) | Err(_) => return false,
                    Ok(count) => count,
                };

                for byte in &scratch[..count] {
                    collected.push(*byte);
                    if scanner.feed(*byte) {
                        break 'read;
                    }
                }
            }

            let body = std::str::from_utf8(&collected).ok().and_then(mime::unpackage).unwrap();

            match decode_frame(&body) {
                Some(Value::Map(reply)) => matches!(
                    reply.get(&Value::Integer(contract::KEY_SUCCESS)),
                    Some(Value::Logical(true))
                ),
                _ => false,
            }
        });

        for _ in 0..1000 {
            context.yield_io();
            if client.is_finished() {
                break;
            }
        }

        assert!(client.join().unwrap(), "The connect command should succeed");

        // The command wired the output back to this node's own input.
        assert!(context.send("/out", &Value::Integer(5)));

        let mut received = None;
        for _ in 0..500 {
            context.yield_io();
            if let Some(message) = context.get_next_message() {
                received = Some(message.value);
                break;
            }
        }

        assert_eq!(received, Some(Value::Integer(5)));
    }
}
