use anyhow::Context;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use pkg_constants::controller::DRAIN_TIMEOUT_SECS;
use pkg_pki::identity::peer_identity;
use pkg_types::identity::UserInfo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::tls::DynamicTls;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept TLS connections until `cancel` fires, then drain open connections.
///
/// Every connection is handshaken against the TLS config current at accept
/// time; a later rotation does not touch it. An accept failure is returned
/// to the caller as fatal.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<DynamicTls>,
    router: Router,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!("Agent log server listening on {}", listener.local_addr()?);
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (tcp, peer) = accepted.context("agent listener failed")?;
                let acceptor = TlsAcceptor::from(tls.current());
                connections.spawn(handle_connection(acceptor, tcp, peer, router.clone(), cancel.clone()));
            }
        }
    }

    info!("Draining {} agent connections", connections.len());
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(Duration::from_secs(DRAIN_TIMEOUT_SECS), drain).await.is_err() {
        warn!("Drain timed out, aborting {} connections", connections.len());
        connections.abort_all();
    }
    Ok(())
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    tcp: TcpStream,
    peer: SocketAddr,
    router: Router,
    cancel: CancellationToken,
) {
    let stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!("TLS handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            debug!("TLS handshake with {} timed out", peer);
            return;
        }
    };

    let identity = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .and_then(|cert| match peer_identity(cert) {
            Ok(id) => Some(UserInfo {
                name: id.name,
                groups: id.groups,
            }),
            Err(e) => {
                debug!("No usable identity in certificate from {}: {}", peer, e);
                None
            }
        });

    let service = hyper::service::service_fn(move |mut req: hyper::Request<Incoming>| {
        if let Some(user) = &identity {
            req.extensions_mut().insert(user.clone());
        }
        router.clone().oneshot(req)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);
    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
        }
        _ = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
        }
    }
}
