//! Blocking TCP link to the middleware.
//!
//! Requests are strictly sequential: one frame out, one frame back. A
//! request that times out or fails at the socket leaves the stream in an
//! unknown position, so the link is dropped and later requests fail with
//! [`MiddlewareError::Disconnected`].

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use tvbridge_protocol::{
    decode_header, decode_server_message, encode_client_message, ClientMessage, ErrorCode,
    ProtocolError, ServerMessage, HEADER_SIZE, PROTOCOL_VERSION,
};

use crate::error::MiddlewareError;
use crate::middleware::MwResult;

/// Smallest timeout handed to the socket; zero means "block forever" there.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Sequential request/response link.
pub struct Connection {
    peer: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    request_timeout: Duration,
}

impl Connection {
    /// Connect to `address` and perform the hello handshake.
    ///
    /// `connect_timeout` bounds each connect attempt and the handshake.
    pub fn open(
        address: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> MwResult<Self> {
        let connect_timeout = connect_timeout.max(MIN_TIMEOUT);
        let addrs: Vec<SocketAddr> = address.to_socket_addrs()?.collect();

        let mut last_err = MiddlewareError::Io(format!("no address for {}", address));
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(connect_timeout))?;
                    stream.set_write_timeout(Some(connect_timeout))?;

                    let conn = Self {
                        peer: addr,
                        stream: Mutex::new(Some(stream)),
                        request_timeout: request_timeout.max(MIN_TIMEOUT),
                    };
                    conn.send_hello()?;
                    conn.apply_request_timeout()?;
                    return Ok(conn);
                }
                Err(e) => {
                    trace!("[Connection] connect to {} failed: {}", addr, e);
                    last_err = e.into();
                }
            }
        }
        Err(last_err)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        if self.stream.lock().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Drop the socket. Pending and later requests fail.
    pub fn close(&self) {
        if self.stream.lock().take().is_some() {
            info!("[Connection] closed link to {}", self.peer);
        }
    }

    fn apply_request_timeout(&self) -> MwResult<()> {
        if let Some(stream) = self.stream.lock().as_ref() {
            stream.set_read_timeout(Some(self.request_timeout))?;
            stream.set_write_timeout(Some(self.request_timeout))?;
        }
        Ok(())
    }

    fn send_hello(&self) -> MwResult<()> {
        let resp = self.request(ClientMessage::Hello {
            version: PROTOCOL_VERSION,
        })?;

        match resp {
            ServerMessage::HelloAck { version, success } => {
                if success {
                    info!(
                        "[Connection] connected to {}, protocol version {}",
                        self.peer, version
                    );
                    Ok(())
                } else {
                    error!("[Connection] middleware rejected hello, version mismatch");
                    self.close();
                    Err(ProtocolError::VersionMismatch {
                        client: PROTOCOL_VERSION,
                        server: version,
                    }
                    .into())
                }
            }
            other => {
                error!("[Connection] invalid hello response: {:?}", other.message_type());
                self.close();
                Err(MiddlewareError::UnexpectedResponse(format!(
                    "{:?}",
                    other.message_type()
                )))
            }
        }
    }

    /// Send one request and wait for its response.
    ///
    /// An `Error` response is returned as [`MiddlewareError::Remote`].
    pub fn request(&self, msg: ClientMessage) -> MwResult<ServerMessage> {
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(MiddlewareError::Disconnected)?;

        debug!("[Connection] sending {:?}", msg.message_type());
        let result = exchange(stream, &msg);

        match result {
            Ok(ServerMessage::Error {
                error_code,
                message,
            }) => {
                let code = ErrorCode::from(error_code);
                debug!("[Connection] {:?} rejected: {:?} {}", msg.message_type(), code, message);
                Err(MiddlewareError::Remote { code, message })
            }
            Ok(resp) => {
                trace!("[Connection] received {:?}", resp.message_type());
                Ok(resp)
            }
            Err(e) => {
                warn!(
                    "[Connection] {:?} failed: {}, dropping link to {}",
                    msg.message_type(),
                    e,
                    self.peer
                );
                *guard = None;
                Err(e)
            }
        }
    }
}

/// Write one frame and read one frame back.
fn exchange(stream: &mut TcpStream, msg: &ClientMessage) -> MwResult<ServerMessage> {
    let frame = encode_client_message(msg)?;
    stream.write_all(&frame)?;
    stream.flush()?;

    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header)?;
    let header = decode_header(&header)?.ok_or(ProtocolError::IncompleteFrame {
        expected: HEADER_SIZE,
        actual: 0,
    })?;

    let mut payload = vec![0u8; header.payload_len as usize];
    stream.read_exact(&mut payload)?;
    Ok(decode_server_message(
        header.message_type,
        Bytes::from(payload),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    use tvbridge_protocol::{decode_client_message, encode_server_message};

    /// Serve `frames` in order, one per request, then hang up.
    fn scripted_server(frames: Vec<ServerMessage>) -> (String, thread::JoinHandle<Vec<ClientMessage>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            for frame in frames {
                let mut header = [0u8; HEADER_SIZE];
                stream.read_exact(&mut header).unwrap();
                let header = decode_header(&header).unwrap().unwrap();
                let mut payload = vec![0u8; header.payload_len as usize];
                stream.read_exact(&mut payload).unwrap();
                seen.push(decode_client_message(header.message_type, Bytes::from(payload)).unwrap());
                stream
                    .write_all(&encode_server_message(&frame).unwrap())
                    .unwrap();
            }
            seen
        });
        (address, handle)
    }

    fn hello_ack(success: bool) -> ServerMessage {
        ServerMessage::HelloAck {
            version: PROTOCOL_VERSION,
            success,
        }
    }

    #[test]
    fn test_handshake_and_request() {
        let (address, server) = scripted_server(vec![hello_ack(true), ServerMessage::Pong]);
        let conn = Connection::open(&address, Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.request(ClientMessage::Ping).unwrap(), ServerMessage::Pong);

        let seen = server.join().unwrap();
        assert_eq!(
            seen,
            vec![
                ClientMessage::Hello {
                    version: PROTOCOL_VERSION
                },
                ClientMessage::Ping
            ]
        );
    }

    #[test]
    fn test_rejected_hello() {
        let (address, _server) = scripted_server(vec![hello_ack(false)]);
        let result = Connection::open(&address, Duration::from_secs(2), Duration::from_secs(2));
        assert!(matches!(
            result,
            Err(MiddlewareError::Protocol(ProtocolError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn test_error_response_keeps_link() {
        let (address, _server) = scripted_server(vec![
            hello_ack(true),
            ServerMessage::Error {
                error_code: ErrorCode::ServiceNotFound.into(),
                message: "no service 9".to_string(),
            },
            ServerMessage::Pong,
        ]);
        let conn = Connection::open(&address, Duration::from_secs(2), Duration::from_secs(2)).unwrap();

        let err = conn
            .request(ClientMessage::GetServiceDescriptor { list: 0, index: 9 })
            .unwrap_err();
        assert_eq!(
            err,
            MiddlewareError::Remote {
                code: ErrorCode::ServiceNotFound,
                message: "no service 9".to_string()
            }
        );
        assert_eq!(conn.request(ClientMessage::Ping).unwrap(), ServerMessage::Pong);
    }

    #[test]
    fn test_hangup_drops_link() {
        let (address, server) = scripted_server(vec![hello_ack(true)]);
        let conn = Connection::open(&address, Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        server.join().unwrap();

        assert!(conn.request(ClientMessage::Ping).is_err());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(
            conn.request(ClientMessage::Ping),
            Err(MiddlewareError::Disconnected)
        );
    }

    #[test]
    fn test_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut header = [0u8; HEADER_SIZE];
            stream.read_exact(&mut header).unwrap();
            let mut payload = [0u8; 2];
            stream.read_exact(&mut payload).unwrap();
            stream
                .write_all(&encode_server_message(&hello_ack(true)).unwrap())
                .unwrap();
            // Read the ping but never answer it.
            stream.read_exact(&mut header).unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let conn =
            Connection::open(&address, Duration::from_secs(2), Duration::from_millis(50)).unwrap();
        assert_eq!(conn.request(ClientMessage::Ping), Err(MiddlewareError::Timeout));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(Connection::open(&address, Duration::from_millis(200), Duration::from_secs(1)).is_err());
    }
}
