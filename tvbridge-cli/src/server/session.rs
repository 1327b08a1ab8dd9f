//! One client connection to the simulator.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tvbridge_engine::{respond, ProfileMiddleware};
use tvbridge_protocol::{
    decode_client_message, decode_header, encode_server_message, ClientMessage, ErrorCode,
    ServerMessage, HEADER_SIZE,
};

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Waiting for hello.
    Initial,
    /// Handshake complete, accepting requests.
    Ready,
}

pub struct Session {
    id: u64,
    addr: SocketAddr,
    socket: TcpStream,
    read_buf: BytesMut,
    state: SessionState,
    middleware: Arc<ProfileMiddleware>,
}

impl Session {
    pub fn new(
        id: u64,
        addr: SocketAddr,
        socket: TcpStream,
        middleware: Arc<ProfileMiddleware>,
    ) -> Self {
        Self {
            id,
            addr,
            socket,
            read_buf: BytesMut::with_capacity(4096),
            state: SessionState::Initial,
            middleware,
        }
    }

    /// Serve requests until the client disconnects.
    pub async fn run(&mut self) -> std::io::Result<()> {
        while let Some(msg) = self.read_message().await? {
            self.handle_message(msg).await?;
        }
        debug!("[Session {}] {} disconnected", self.id, self.addr);
        Ok(())
    }

    /// Read the next complete frame. `None` once the peer closed the socket.
    async fn read_message(&mut self) -> std::io::Result<Option<ClientMessage>> {
        loop {
            match decode_header(&self.read_buf) {
                Ok(Some(header)) => {
                    let total_len = HEADER_SIZE + header.payload_len as usize;
                    if self.read_buf.len() >= total_len {
                        let _ = self.read_buf.split_to(HEADER_SIZE);
                        let payload = self.read_buf.split_to(header.payload_len as usize);

                        match decode_client_message(header.message_type, payload.freeze()) {
                            Ok(msg) => {
                                trace!("[Session {}] Received: {:?}", self.id, msg);
                                return Ok(Some(msg));
                            }
                            Err(e) => {
                                error!("[Session {}] Failed to decode message: {}", self.id, e);
                                self.send_error(ErrorCode::ProtocolError, &e.to_string())
                                    .await?;
                                continue;
                            }
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("[Session {}] Protocol error: {}", self.id, e);
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        e.to_string(),
                    ));
                }
            }

            let mut tmp_buf = [0u8; 4096];
            let n = self.socket.read(&mut tmp_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.read_buf.extend_from_slice(&tmp_buf[..n]);
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> std::io::Result<()> {
        let is_hello = matches!(msg, ClientMessage::Hello { .. });
        if self.state == SessionState::Initial && !is_hello {
            warn!(
                "[Session {}] {:?} before hello",
                self.id,
                msg.message_type()
            );
            return self
                .send_error(ErrorCode::InvalidState, "hello required")
                .await;
        }

        let resp = respond(self.middleware.as_ref(), msg);
        if let ServerMessage::HelloAck { version, success } = resp {
            if success {
                info!("[Session {}] handshake complete (v{})", self.id, version);
                self.state = SessionState::Ready;
            }
        }
        self.send_message(resp).await
    }

    async fn send_message(&mut self, msg: ServerMessage) -> std::io::Result<()> {
        trace!("[Session {}] Sending: {:?}", self.id, msg);

        let encoded = encode_server_message(&msg).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        self.socket.write_all(&encoded).await
    }

    async fn send_error(&mut self, code: ErrorCode, message: &str) -> std::io::Result<()> {
        self.send_message(ServerMessage::Error {
            error_code: code.into(),
            message: message.to_string(),
        })
        .await
    }
}

/// Read one server frame from `socket`. Test helper shared with the listener.
#[cfg(test)]
pub(crate) async fn read_server_message(socket: &mut TcpStream) -> ServerMessage {
    use bytes::Bytes;
    use tvbridge_protocol::decode_server_message;

    let mut header = [0u8; HEADER_SIZE];
    socket.read_exact(&mut header).await.unwrap();
    let header = decode_header(&header).unwrap().unwrap();
    let mut payload = vec![0u8; header.payload_len as usize];
    socket.read_exact(&mut payload).await.unwrap();
    decode_server_message(header.message_type, Bytes::from(payload)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tvbridge_engine::DeviceProfile;
    use tvbridge_protocol::{encode_client_message, PROTOCOL_VERSION};

    async fn session_pair() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let middleware = Arc::new(ProfileMiddleware::new(DeviceProfile::demo()));
        tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            let mut session = Session::new(1, peer, socket, middleware);
            let _ = session.run().await;
        });
        TcpStream::connect(addr).await.unwrap()
    }

    async fn send(socket: &mut TcpStream, msg: &ClientMessage) {
        socket
            .write_all(&encode_client_message(msg).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_requires_hello() {
        let mut socket = session_pair().await;

        send(&mut socket, &ClientMessage::Ping).await;
        match read_server_message(&mut socket).await {
            ServerMessage::Error { error_code, .. } => {
                assert_eq!(ErrorCode::from(error_code), ErrorCode::InvalidState)
            }
            other => panic!("unexpected response {:?}", other),
        }

        send(&mut socket, &ClientMessage::Hello { version: PROTOCOL_VERSION }).await;
        assert_eq!(
            read_server_message(&mut socket).await,
            ServerMessage::HelloAck {
                version: PROTOCOL_VERSION,
                success: true
            }
        );

        send(&mut socket, &ClientMessage::Ping).await;
        assert_eq!(read_server_message(&mut socket).await, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let mut socket = session_pair().await;

        // Both frames in a single write.
        let mut frames = BytesMut::new();
        frames.extend_from_slice(
            &encode_client_message(&ClientMessage::Hello { version: PROTOCOL_VERSION }).unwrap(),
        );
        frames.extend_from_slice(
            &encode_client_message(&ClientMessage::GetServiceCount { list: 0 }).unwrap(),
        );
        socket.write_all(&frames).await.unwrap();

        assert!(matches!(
            read_server_message(&mut socket).await,
            ServerMessage::HelloAck { success: true, .. }
        ));
        assert_eq!(
            read_server_message(&mut socket).await,
            ServerMessage::CountAck { count: 5 }
        );
    }

    #[tokio::test]
    async fn test_bad_magic_closes_session() {
        let mut socket = session_pair().await;
        socket.write_all(b"XXXX\0\0\0\0\0\0").await.unwrap();

        let mut buf = [0u8; 1];
        let n = socket.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }
}
