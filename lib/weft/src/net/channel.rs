use crate::codec::message::decode_frame;
use crate::codec::mime;
use crate::net::buffer::IoBuffer;
use crate::net::endpoint::Endpoint;
use crate::net::queue::{PendingQueue, ReceivedValue};
use crate::net::{ErrorType, NetworkError, NetworkResult};
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use skein::contract::Transport;
use skein::logging::{self, Logger};
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

const UDP_DATAGRAM_LIMIT: usize = 65536;

fn loopback_any_port() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

/// Splits a byte stream into framed messages: buffered ingress plus the
/// incremental sentinel scanner. Shared by data and command connections.
pub(crate) struct FrameReader {
    buffer: IoBuffer,
    scanner: mime::SeparatorScanner,
    scan_offset: usize,
}

impl FrameReader {
    pub(crate) fn new() -> FrameReader {
        FrameReader {
            buffer: IoBuffer::new(),
            scanner: mime::SeparatorScanner::new(),
            scan_offset: 0,
        }
    }

    /// Pull everything available off the stream and peel off the complete
    /// frames. Returns the decoded message bodies and whether the peer
    /// closed the stream. Frames that fail the printable decoding are
    /// dropped with a warning.
    pub(crate) fn ingest<R: Read>(&mut self, stream: &mut R, log: &Logger) -> NetworkResult<(Vec<Vec<u8>>, bool)> {
        let (_, closed) = self.buffer.ingress(stream).map_err(NetworkError::from)?;
        let mut frames = Vec::new();
        let mut offset = self.scan_offset;

        while offset < self.buffer.len() {
            let byte = self.buffer.byte_at(offset).expect("Scan stays within the buffer");

            offset += 1;
            if self.scanner.feed(byte) {
                let framed = self.buffer.consume(offset);

                offset = 0;
                match std::str::from_utf8(&framed).ok().and_then(mime::unpackage) {
                    Some(body) => frames.push(body),
                    None => {
                        logging::warn!(log, "dropping undecodable frame"; "bytes" => framed.len());
                    }
                }
            }
        }
        self.scan_offset = offset;

        Ok((frames, closed))
    }
}

struct InputConnection {
    stream: TcpStream,
    token: Token,
    origin: SocketAddr,
    reader: FrameReader,
}

enum InputSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// An input channel: waits for upstream peers and feeds every decoded
/// message into the node's pending queue, tagged with its origin.
pub struct InputChannel {
    path: String,
    socket: InputSocket,
    token: Token,
    local_port: u16,
    connections: Vec<InputConnection>,
    queue: Arc<PendingQueue>,
    log: Logger,
}

impl InputChannel {
    pub fn open(
        path: &str,
        transport: Transport,
        endpoint: &mut Endpoint,
        queue: Arc<PendingQueue>,
        log: &Logger,
    ) -> NetworkResult<InputChannel> {
        let token = endpoint.allocate_token();
        let channel_log = log.new(logging::o!("channel" => path.to_string()));

        let (socket, local_port) = match transport {
            Transport::Udp => {
                let mut socket = UdpSocket::bind(loopback_any_port())?;

                endpoint.registry().register(&mut socket, token, Interest::READABLE)?;

                let local_port = socket.local_addr()?.port();

                (InputSocket::Udp(socket), local_port)
            }
            _ => {
                let mut listener = TcpListener::bind(loopback_any_port())?;

                endpoint.registry().register(&mut listener, token, Interest::READABLE)?;

                let local_port = listener.local_addr()?.port();

                (InputSocket::Tcp(listener), local_port)
            }
        };

        logging::debug!(channel_log, "input channel opened"; "port" => local_port);

        Ok(InputChannel {
            path: path.to_string(),
            socket,
            token,
            local_port,
            connections: Vec::new(),
            queue,
            log: channel_log,
        })
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// True once at least one upstream peer has attached (datagram inputs
    /// count as attached from the start).
    pub fn is_connected(&self) -> bool {
        match self.socket {
            InputSocket::Tcp(_) => !self.connections.is_empty(),
            InputSocket::Udp(_) => true,
        }
    }

    /// Handle readiness on the channel's own socket: accept every pending
    /// peer (stream inputs) or drain pending datagrams. Returns the tokens
    /// of any connections created, for the caller's routing table.
    pub fn socket_ready(&mut self, endpoint: &mut Endpoint) -> NetworkResult<Vec<Token>> {
        let mut created = Vec::new();

        match &mut self.socket {
            InputSocket::Tcp(listener) => loop {
                match listener.accept() {
                    Ok((mut stream, origin)) => {
                        let token = endpoint.allocate_token();

                        endpoint.registry().register(&mut stream, token, Interest::READABLE)?;
                        logging::debug!(self.log, "peer attached"; "origin" => origin.to_string());
                        self.connections.push(InputConnection {
                            stream,
                            token,
                            origin,
                            reader: FrameReader::new(),
                        });
                        created.push(token);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(error) => return Err(error.into()),
                }
            },
            InputSocket::Udp(socket) => {
                let mut scratch = vec![0u8; UDP_DATAGRAM_LIMIT];

                loop {
                    match socket.recv_from(&mut scratch) {
                        Ok((length, origin)) => {
                            let body = std::str::from_utf8(&scratch[..length]).ok().and_then(mime::unpackage);

                            match body.and_then(|bytes| decode_frame(&bytes)) {
                                Some(value) if !value.is_flaw() => {
                                    if !self.queue.push(ReceivedValue::new(value, origin)) {
                                        logging::warn!(self.log, "pending queue full, oldest message shed");
                                    }
                                }
                                _ => logging::warn!(self.log, "dropping undecodable datagram"; "origin" => origin.to_string()),
                            }
                        }
                        Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(error) => return Err(error.into()),
                    }
                }
            }
        }

        Ok(created)
    }

    /// Handle readiness on one attached peer. Returns false when the peer
    /// went away and its token should be dropped from the routing table.
    pub fn connection_ready(&mut self, token: Token, registry: &Registry) -> bool {
        let index = match self.connections.iter().position(|connection| connection.token == token) {
            Some(index) => index,
            None => return false,
        };

        let connection = &mut self.connections[index];
        let origin = connection.origin;
        let outcome = connection.reader.ingest(&mut connection.stream, &self.log);

        let closed = match outcome {
            Ok((frames, closed)) => {
                for body in frames {
                    match decode_frame(&body) {
                        Some(value) if !value.is_flaw() => {
                            if !self.queue.push(ReceivedValue::new(value, origin)) {
                                logging::warn!(self.log, "pending queue full, oldest message shed");
                            }
                        }
                        Some(flawed) => {
                            logging::warn!(self.log, "dropping flawed message";
                                           "origin" => origin.to_string(),
                                           "detail" => flawed.describe());
                        }
                        None => (),
                    }
                }
                closed
            }
            Err(NetworkError::Wait) => false,
            Err(NetworkError::Fatal(error)) => {
                logging::warn!(self.log, "peer read failed"; "error" => format!("{:?}", error));
                true
            }
        };

        if closed {
            let mut connection = self.connections.swap_remove(index);

            let _ = registry.deregister(&mut connection.stream);
            logging::debug!(self.log, "peer detached"; "origin" => origin.to_string());
            return false;
        }

        true
    }

    /// Drop every attached peer and deregister the channel's own socket.
    pub fn close(&mut self, registry: &Registry) {
        for connection in &mut self.connections {
            let _ = registry.deregister(&mut connection.stream);
        }
        self.connections.clear();
        match &mut self.socket {
            InputSocket::Tcp(listener) => {
                let _ = registry.deregister(listener);
            }
            InputSocket::Udp(socket) => {
                let _ = registry.deregister(socket);
            }
        }
        logging::debug!(self.log, "input channel closed");
    }
}

struct OutputPeer {
    stream: TcpStream,
    token: Token,
    address: SocketAddr,
    buffer: IoBuffer,
    connected: bool,
}

/// An output channel: owns the connections to downstream peers and the
/// per-peer egress buffering. Frames queue to every peer; a slow peer's
/// backpressure is visible through `has_egress`.
pub struct OutputChannel {
    path: String,
    transport: Transport,
    peers: Vec<OutputPeer>,
    udp: Option<(UdpSocket, Vec<SocketAddr>)>,
    // Latched when a peer drops uncleanly; the next flush reports it.
    failed: bool,
    log: Logger,
}

impl OutputChannel {
    pub fn new(path: &str, transport: Transport, log: &Logger) -> OutputChannel {
        OutputChannel {
            path: path.to_string(),
            transport,
            peers: Vec::new(),
            udp: None,
            failed: false,
            log: log.new(logging::o!("channel" => path.to_string())),
        }
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.peers.iter().any(|peer| peer.connected)
            || self.udp.as_ref().map(|(_, targets)| !targets.is_empty()).unwrap_or(false)
    }

    /// Attach one downstream peer. Stream transports return the token the
    /// caller must route back to this channel.
    pub fn connect_peer(&mut self, address: SocketAddr, endpoint: &mut Endpoint) -> NetworkResult<Option<Token>> {
        if self.transport == Transport::Udp {
            if self.udp.is_none() {
                let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))?;

                self.udp = Some((socket, Vec::new()));
            }
            if let Some((_, targets)) = &mut self.udp {
                targets.push(address);
            }
            logging::debug!(self.log, "datagram target attached"; "address" => address.to_string());
            return Ok(None);
        }

        let mut stream = TcpStream::connect(address)?;
        let token = endpoint.allocate_token();

        endpoint
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
        self.peers.push(OutputPeer {
            stream,
            token,
            address,
            buffer: IoBuffer::new(),
            connected: false,
        });
        logging::debug!(self.log, "peer connection started"; "address" => address.to_string());

        Ok(Some(token))
    }

    /// Handle readiness on one peer connection. Returns false when the peer
    /// is gone and its token should be forgotten.
    pub fn peer_ready(&mut self, token: Token, writable: bool, readable: bool, registry: &Registry) -> bool {
        let index = match self.peers.iter().position(|peer| peer.token == token) {
            Some(index) => index,
            None => return false,
        };

        let mut failed = false;

        {
            let peer = &mut self.peers[index];

            if writable {
                if !peer.connected {
                    peer.connected = true;
                    logging::debug!(self.log, "peer connected"; "address" => peer.address.to_string());
                }
                if peer.buffer.egress(&mut peer.stream).is_err() {
                    failed = true;
                }
            }
            if readable && !failed {
                // Output sockets only ever read end-of-stream.
                let mut scratch = [0u8; 256];

                loop {
                    match peer.stream.read(&mut scratch) {
                        Ok(0) => {
                            failed = true;
                            break;
                        }
                        Ok(_) => continue,
                        Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(_) => {
                            failed = true;
                            break;
                        }
                    }
                }
            }
        }

        if failed {
            let mut peer = self.peers.swap_remove(index);

            let _ = registry.deregister(&mut peer.stream);
            self.failed = true;
            logging::debug!(self.log, "peer dropped"; "address" => peer.address.to_string());
            return false;
        }

        true
    }

    /// Queue one framed message to every attached peer. Datagram targets
    /// are sent immediately, one datagram per target.
    pub fn queue_frame(&mut self, frame: &[u8]) -> NetworkResult<()> {
        if let Some((socket, targets)) = &mut self.udp {
            for target in targets.iter() {
                socket.send_to(frame, *target).map_err(NetworkError::from)?;
            }
            return Ok(());
        }

        for peer in &mut self.peers {
            peer.buffer.append(frame);
        }

        Ok(())
    }

    /// Push buffered egress toward the peers. Ok(true) once everything has
    /// drained; a peer failing mid-flush is fatal for the send.
    pub fn flush(&mut self, registry: &Registry) -> NetworkResult<bool> {
        if self.failed {
            self.failed = false;
            return Err(NetworkError::Fatal(ErrorType::NotConnected));
        }

        let mut drained = true;
        let mut dead = Vec::new();

        for (index, peer) in self.peers.iter_mut().enumerate() {
            if !peer.connected {
                if !peer.buffer.is_empty() {
                    drained = false;
                }
                continue;
            }
            match peer.buffer.egress(&mut peer.stream) {
                Ok(_) => {
                    if !peer.buffer.is_empty() {
                        drained = false;
                    }
                }
                Err(_) => dead.push(index),
            }
        }

        if !dead.is_empty() {
            for index in dead.into_iter().rev() {
                let mut peer = self.peers.swap_remove(index);

                let _ = registry.deregister(&mut peer.stream);
                logging::warn!(self.log, "peer write failed"; "address" => peer.address.to_string());
            }
            return Err(NetworkError::Fatal(ErrorType::NotConnected));
        }

        Ok(drained)
    }

    #[inline]
    pub fn has_egress(&self) -> bool {
        self.peers.iter().any(|peer| !peer.buffer.is_empty())
    }

    pub fn peer_tokens(&self) -> Vec<Token> {
        self.peers.iter().map(|peer| peer.token).collect()
    }

    /// Drop every peer connection.
    pub fn close(&mut self, registry: &Registry) {
        for peer in &mut self.peers {
            let _ = registry.deregister(&mut peer.stream);
        }
        self.peers.clear();
        if let Some((mut socket, _)) = self.udp.take() {
            let _ = registry.deregister(&mut socket);
        }
        logging::debug!(self.log, "output channel closed");
    }
}
