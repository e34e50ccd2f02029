//! Accept loop: TCP → TLS (client-cert auth) → WebSocket upgrade → a
//! concrete `Session` handed to the broker's registry, with dedicated
//! read/write tasks per connection. Grounded on the teacher's
//! `socket/server.rs` (`SocketServer::start`/`accept_loop`) and
//! `socket/client_conn.rs` (per-connection read/write task split; a
//! dedicated outbound channel serializes frame writes onto the wire).

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::BrokerError;
use crate::message::Message;
use crate::session::Session;
use crate::transport::cert;

type FrameAck = oneshot::Sender<Result<(), BrokerError>>;

pub struct WebSocketSession {
    common_name: String,
    frame_tx: mpsc::UnboundedSender<(Vec<u8>, FrameAck)>,
    closer: Arc<Notify>,
}

#[async_trait]
impl Session for WebSocketSession {
    /// Awaits the write task's real socket write, not just enqueue onto
    /// `frame_tx` — `deliver()`'s redelivery-on-failure logic depends on
    /// this call failing only when the frame genuinely did not reach the
    /// wire (spec.md §7).
    async fn send(&self, bytes: Vec<u8>) -> Result<(), BrokerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.frame_tx
            .send((bytes, ack_tx))
            .map_err(|_| BrokerError::TransportWrite("session's write task has exited".to_string()))?;
        ack_rx
            .await
            .map_err(|_| BrokerError::TransportWrite("write task dropped without acking".to_string()))?
    }

    async fn close(&self) {
        self.closer.notify_one();
    }

    fn common_name(&self) -> &str {
        &self.common_name
    }
}

/// Bind `config.bind_addr`, perform TLS + WebSocket upgrade on every
/// accepted connection, and hand each one off to `broker.ingress`. Runs
/// until the listener errors or the process is torn down.
pub async fn serve(broker: Arc<Broker>, config: Config) -> Result<()> {
    let tls_acceptor = build_tls_acceptor(&config)?;
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("[transport] listening on {}", config.bind_addr);

    loop {
        let (stream, peer_addr) = listener.accept().await.context("accepting connection")?;
        let broker = broker.clone();
        let tls_acceptor = tls_acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(broker, tls_acceptor, stream, peer_addr).await {
                warn!("[transport] connection from {peer_addr} failed: {e:#}");
            }
        });
    }
}

fn build_tls_acceptor(config: &Config) -> Result<TlsAcceptor> {
    let cert_path = config.ssl_cert.as_deref().context("ssl_cert is required")?;
    let key_path = config.ssl_key.as_deref().context("ssl_key is required")?;
    let ca_path = config.client_ca_cert.as_deref().context("client_ca_cert is required")?;

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let mut roots = RootCertStore::empty();
    for ca_cert in load_certs(ca_path)? {
        roots.add(ca_cert).context("adding client CA certificate to root store")?;
    }
    let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .context("building client certificate verifier")?;

    let tls_config = ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(certs, key)
        .context("building TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificates from {}", path.display()))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("parsing private key from {}", path.display()))?
        .with_context(|| format!("no private key found in {}", path.display()))
}

async fn handle_connection(
    broker: Arc<Broker>,
    tls_acceptor: TlsAcceptor,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let tls_stream = tls_acceptor.accept(stream).await.context("TLS handshake")?;

    let common_name = {
        let (_, conn) = tls_stream.get_ref();
        let peer_certs = conn.peer_certificates().context("no client certificate presented")?;
        let leaf = peer_certs.first().context("empty client certificate chain")?;
        cert::common_name_from_der(leaf.as_ref()).context("client certificate has no common name")?
    };

    let ws_stream = tokio_tungstenite::accept_async(tls_stream)
        .await
        .context("WebSocket upgrade")?;
    let (mut write, mut read) = ws_stream.split();

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<(Vec<u8>, FrameAck)>();
    let closer = Arc::new(Notify::new());

    let write_closer = closer.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some((bytes, ack_tx)) => {
                            let result = write.send(WsMessage::Binary(bytes)).await;
                            let failed = result.is_err();
                            let ack = result.map_err(|e| {
                                warn!("[transport] write to {peer_addr} failed: {e}");
                                BrokerError::TransportWrite(e.to_string())
                            });
                            // The caller may have stopped waiting (e.g. it
                            // timed out); a dropped receiver is not this
                            // task's problem.
                            let _ = ack_tx.send(ack);
                            if failed {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = write_closer.notified() => break,
            }
        }
        let _ = write.close().await;
    });

    let session = Arc::new(WebSocketSession {
        common_name: common_name.clone(),
        frame_tx,
        closer: closer.clone(),
    });
    let session_id = broker.registry.add(session, common_name.clone());
    info!("[transport] accepted connection from {peer_addr} (cn={common_name})");

    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("[transport] read error from {peer_addr}: {e}");
                break;
            }
        };
        match frame {
            WsMessage::Binary(bytes) => match Message::decode(&bytes) {
                Ok(message) => broker.ingress(Some(session_id), message).await,
                Err(e) => warn!("[transport] dropping undecodable frame from {peer_addr}: {e}"),
            },
            WsMessage::Close(_) => break,
            _ => continue,
        }
    }

    closer.notify_one();
    broker.registry.remove(session_id);
    info!("[transport] connection from {peer_addr} (cn={common_name}) closed");
    Ok(())
}
