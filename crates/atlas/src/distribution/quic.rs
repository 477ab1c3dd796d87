//! QUIC transport between real nodes.
//!
//! Each node binds one QUIC endpoint. A connection is established with a
//! `Hello`/`Welcome` handshake that tells each side the peer's [`NodeId`].
//! After that, every `call` opens a bidirectional stream carrying one
//! framed request and one framed reply, and every `cast` opens a
//! unidirectional stream carrying one framed message. Incoming streams are
//! dispatched to the local directory service.
//!
//! Certificates are self-signed and client verification is skipped; this
//! transport authenticates nodes by handshake only, like a closed cluster.

use super::Transport;
use crate::config::Config;
use crate::directory::DirectoryService;
use crate::runtime::Node;
use async_trait::async_trait;
use atlas_core::{frame_message, parse_frame, DirectoryMessage, GcError, NodeId};
use dashmap::DashMap;
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, ServerConfig, TransportConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// QUIC endpoint wrapper implementing the transport seam.
pub struct QuicTransport {
    /// Our node identity, sent in handshakes.
    node: NodeId,
    /// The QUIC endpoint (server and client in one).
    endpoint: Endpoint,
    /// Dispatcher for incoming messages; set before the accept loop runs.
    directory: OnceLock<Arc<DirectoryService>>,
    /// Open connections by peer node.
    peers: DashMap<NodeId, Connection>,
}

impl QuicTransport {
    /// Binds an endpoint, builds the node from `config`, and starts
    /// accepting connections.
    pub async fn serve(addr: SocketAddr, config: Config) -> Result<(Node, Arc<Self>), GcError> {
        let transport = Arc::new(Self::bind(addr, config.node_id())?);
        let node = config.build(transport.clone());

        // The dispatcher must be in place before any stream is served.
        let _ = transport.directory.set(node.directory_arc());

        let accept = transport.clone();
        tokio::spawn(async move {
            accept.accept_loop().await;
        });

        Ok((node, transport))
    }

    fn bind(addr: SocketAddr, node: NodeId) -> Result<Self, GcError> {
        let server_config = self_signed_server_config(node)?;
        let mut endpoint =
            Endpoint::server(server_config, addr).map_err(|e| GcError::Transport(e.to_string()))?;
        endpoint.set_default_client_config(client_config()?);

        tracing::info!(%addr, %node, "QUIC transport listening");

        Ok(Self {
            node,
            endpoint,
            directory: OnceLock::new(),
            peers: DashMap::new(),
        })
    }

    /// The address this endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GcError> {
        self.endpoint
            .local_addr()
            .map_err(|e| GcError::Transport(e.to_string()))
    }

    /// Connects to the node listening at `addr`.
    ///
    /// Returns the peer's identity learned from the handshake.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<NodeId, GcError> {
        let connection = self
            .endpoint
            .connect(addr, "atlas")
            .map_err(|e| GcError::Transport(e.to_string()))?
            .await
            .map_err(|e| GcError::Transport(e.to_string()))?;

        // Handshake: we say Hello, they say Welcome.
        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| GcError::Transport(e.to_string()))?;
        write_frame(&mut send, &DirectoryMessage::Hello { node: self.node }).await?;

        let peer = match read_frame(&mut recv).await? {
            DirectoryMessage::Welcome { node } => node,
            other => {
                return Err(GcError::UnexpectedReply(format!(
                    "expected Welcome, got {other:?}"
                )))
            }
        };

        self.peers.insert(peer, connection.clone());
        let transport = self.clone();
        tokio::spawn(async move {
            transport.serve_connection(peer, connection).await;
        });

        tracing::info!(%addr, %peer, "connected to remote node");
        Ok(peer)
    }

    /// Accepts incoming connections and performs the server side of the
    /// handshake.
    async fn accept_loop(self: Arc<Self>) {
        while let Some(incoming) = self.endpoint.accept().await {
            let transport = self.clone();
            tokio::spawn(async move {
                match transport.accept_one(incoming).await {
                    Ok(peer) => tracing::info!(%peer, "accepted incoming connection"),
                    Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
                }
            });
        }
    }

    async fn accept_one(self: Arc<Self>, incoming: quinn::Incoming) -> Result<NodeId, GcError> {
        let connection = incoming
            .await
            .map_err(|e| GcError::Transport(e.to_string()))?;

        // The first stream is the handshake.
        let (mut send, mut recv) = connection
            .accept_bi()
            .await
            .map_err(|e| GcError::Transport(e.to_string()))?;
        let peer = match read_frame(&mut recv).await? {
            DirectoryMessage::Hello { node } => node,
            other => {
                return Err(GcError::UnexpectedReply(format!(
                    "expected Hello, got {other:?}"
                )))
            }
        };
        write_frame(&mut send, &DirectoryMessage::Welcome { node: self.node }).await?;

        self.peers.insert(peer, connection.clone());
        let transport = self.clone();
        tokio::spawn(async move {
            transport.serve_connection(peer, connection).await;
        });

        Ok(peer)
    }

    /// Serves one connection: every bidirectional stream is a call, every
    /// unidirectional stream is a cast.
    async fn serve_connection(self: Arc<Self>, peer: NodeId, connection: Connection) {
        loop {
            tokio::select! {
                stream = connection.accept_bi() => match stream {
                    Ok((send, recv)) => {
                        let transport = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = transport.serve_call(send, recv).await {
                                tracing::warn!(error = %e, %peer, "failed to serve call");
                            }
                        });
                    }
                    Err(_) => break,
                },
                stream = connection.accept_uni() => match stream {
                    Ok(recv) => {
                        let transport = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = transport.serve_cast(recv).await {
                                tracing::warn!(error = %e, %peer, "failed to serve cast");
                            }
                        });
                    }
                    Err(_) => break,
                },
            }
        }

        // Connection closed; drop the route.
        self.peers.remove(&peer);
        tracing::info!(%peer, "connection closed");
    }

    async fn serve_call(
        &self,
        mut send: quinn::SendStream,
        mut recv: RecvStream,
    ) -> Result<(), GcError> {
        let msg = read_frame(&mut recv).await?;
        match self.dispatch(msg) {
            Some(reply) => write_frame(&mut send, &reply).await,
            None => {
                tracing::warn!(node = %self.node, "call carried a one-way message");
                Ok(())
            }
        }
    }

    async fn serve_cast(&self, mut recv: RecvStream) -> Result<(), GcError> {
        let msg = read_frame(&mut recv).await?;
        if let Some(reply) = self.dispatch(msg) {
            tracing::warn!(node = %self.node, ?reply, "cast produced a reply; dropped");
        }
        Ok(())
    }

    fn dispatch(&self, msg: DirectoryMessage) -> Option<DirectoryMessage> {
        match self.directory.get() {
            Some(directory) => directory.handle(msg),
            None => {
                tracing::error!(node = %self.node, "message received before dispatcher attached");
                None
            }
        }
    }

    fn peer(&self, target: NodeId) -> Result<Connection, GcError> {
        self.peers
            .get(&target)
            .map(|c| c.clone())
            .ok_or(GcError::NotConnected(target))
    }

    /// Closes the endpoint.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

#[async_trait]
impl Transport for QuicTransport {
    async fn call(
        &self,
        target: NodeId,
        msg: DirectoryMessage,
    ) -> Result<DirectoryMessage, GcError> {
        let connection = self.peer(target)?;
        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| GcError::Transport(e.to_string()))?;

        write_frame(&mut send, &msg).await?;
        read_frame(&mut recv).await
    }

    async fn cast(&self, target: NodeId, msg: DirectoryMessage) -> Result<(), GcError> {
        let connection = self.peer(target)?;
        let mut send = connection
            .open_uni()
            .await
            .map_err(|e| GcError::Transport(e.to_string()))?;

        write_frame(&mut send, &msg).await
    }
}

/// Writes one framed message and closes the send side.
async fn write_frame(send: &mut quinn::SendStream, msg: &DirectoryMessage) -> Result<(), GcError> {
    let frame = frame_message(msg)?;
    send.write_all(&frame)
        .await
        .map_err(|e| GcError::Transport(e.to_string()))?;
    send.finish().map_err(|e| GcError::Transport(e.to_string()))
}

/// Reads one framed message from a stream.
async fn read_frame(recv: &mut RecvStream) -> Result<DirectoryMessage, GcError> {
    let mut buf = Vec::new();

    loop {
        let mut chunk = [0u8; 4096];
        match recv.read(&mut chunk).await {
            Ok(Some(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some((msg, _consumed)) = parse_frame(&buf)? {
                    return Ok(msg);
                }
            }
            Ok(None) => {
                if let Some((msg, _)) = parse_frame(&buf)? {
                    return Ok(msg);
                }
                return Err(GcError::Transport("stream closed mid-frame".into()));
            }
            Err(e) => return Err(GcError::Transport(e.to_string())),
        }
    }
}

/// Server config with a fresh self-signed certificate.
fn self_signed_server_config(node: NodeId) -> Result<ServerConfig, GcError> {
    let cert = rcgen::generate_simple_self_signed(vec![node.to_string(), "atlas".to_string()])
        .map_err(|e| GcError::Transport(e.to_string()))?;

    let cert_der = CertificateDer::from(cert.cert);
    let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let mut server_config =
        ServerConfig::with_single_cert(vec![cert_der], PrivateKeyDer::Pkcs8(key_der))
            .map_err(|e| GcError::Transport(e.to_string()))?;
    server_config.transport_config(transport_config());

    Ok(server_config)
}

/// Client config that accepts any server certificate.
///
/// Peers are identified by the protocol handshake, not by TLS identity.
fn client_config() -> Result<ClientConfig, GcError> {
    let crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();

    let mut client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| GcError::Transport(e.to_string()))?,
    ));
    client_config.transport_config(transport_config());

    Ok(client_config)
}

fn transport_config() -> Arc<TransportConfig> {
    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(Some(Duration::from_secs(10)));
    Arc::new(transport)
}

/// Accepts any server certificate (closed-cluster deployment).
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
