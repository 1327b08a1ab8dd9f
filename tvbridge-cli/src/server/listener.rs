//! TCP listener for the middleware simulator.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use tvbridge_engine::ProfileMiddleware;

use crate::server::session::Session;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

/// Accepts engine connections and answers them from one shared profile
/// middleware, so every client sees the same simulated receiver.
pub struct Server {
    config: ServerConfig,
    middleware: Arc<ProfileMiddleware>,
}

impl Server {
    pub fn new(config: ServerConfig, middleware: Arc<ProfileMiddleware>) -> Self {
        Self { config, middleware }
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("Simulator listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let slots = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let mut connection_count = 0u64;

        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            connection_count += 1;
            let session_id = connection_count;

            let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                warn!(
                    "[Session {}] Rejecting {}: {} connections active",
                    session_id, addr, self.config.max_connections
                );
                continue;
            };

            info!("[Session {}] New connection from {}", session_id, addr);
            let middleware = Arc::clone(&self.middleware);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, addr, session_id, middleware).await {
                    error!("[Session {}] Connection error: {}", session_id, e);
                }
                info!("[Session {}] Connection closed", session_id);
                drop(permit);
            });
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    session_id: u64,
    middleware: Arc<ProfileMiddleware>,
) -> std::io::Result<()> {
    socket.set_nodelay(true)?;
    let mut session = Session::new(session_id, addr, socket, middleware);
    session.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tvbridge_engine::{
        ConnectionGate, DeviceProfile, EngineConfig, MemoryChannelStore, ProbePolicy,
        RemoteLocator, RouteRole,
    };
    use tvbridge_protocol::{encode_client_message, ClientMessage, ServerMessage, SourceType, PROTOCOL_VERSION};

    use crate::server::session::read_server_message;

    async fn start(max_connections: usize) -> (SocketAddr, Arc<ProfileMiddleware>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let middleware = Arc::new(ProfileMiddleware::new(DeviceProfile::demo()));
        let server = Server::new(
            ServerConfig {
                listen_addr: addr,
                max_connections,
            },
            middleware.clone(),
        );
        tokio::spawn(async move { server.serve(listener).await });
        (addr, middleware)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_engine_connects_through_simulator() {
        let (addr, _) = start(4).await;
        let config = EngineConfig {
            address: addr.to_string(),
            probe: ProbePolicy {
                interval: Duration::from_millis(100),
                cycles: 20,
            },
            ..EngineConfig::default()
        };

        let routes = tokio::task::spawn_blocking(move || {
            let gate = ConnectionGate::new(
                Arc::new(RemoteLocator::new(&config)),
                Arc::new(MemoryChannelStore::new()),
                config.probe,
            );
            let engine = gate.request_connection(Some(Duration::from_secs(5))).unwrap();
            let routes = engine.route_manager().unwrap();
            let channels = engine.managers().unwrap().channels.len();
            gate.reset();
            (routes, channels)
        })
        .await
        .unwrap();

        let (routes, channels) = routes;
        assert_eq!(routes.source_type(), SourceType::Terrestrial);
        assert!(routes.by_role(RouteRole::Terrestrial).and_then(|b| b.live).is_some());
        assert!(routes.by_role(RouteRole::IpPrimary).and_then(|b| b.live).is_some());
        assert_eq!(channels, 3);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (addr, _) = start(1).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(&encode_client_message(&ClientMessage::Hello { version: PROTOCOL_VERSION }).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            read_server_message(&mut first).await,
            ServerMessage::HelloAck { success: true, .. }
        ));

        // The second connection is accepted and dropped immediately.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let _ = second
            .write_all(&encode_client_message(&ClientMessage::Ping).unwrap())
            .await;
        let mut buf = [0u8; 1];
        let n = tokio::io::AsyncReadExt::read(&mut second, &mut buf)
            .await
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
