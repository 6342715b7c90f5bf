//! The accept loop: binds a `tokio::net::TcpSocket` with `SO_REUSEADDR` and
//! spawns a task running a [`ProxySession`] to completion for every accepted
//! client, logging the outcome. External to the parser/session core named
//! in spec.md §1 ("the event-loop or accept loop that spawns sessions").

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpSocket};

use crate::config::ProxyConfig;
use crate::connection::Connection;
use crate::session::ProxySession;

pub async fn bind(config: &ProxyConfig) -> std::io::Result<TcpListener> {
    let socket = match config.bind_addr {
        std::net::SocketAddr::V4(_) => TcpSocket::new_v4()?,
        std::net::SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(config.bind_addr)?;
    socket.listen(config.backlog)
}

/// Runs the accept loop forever. Each accepted connection gets its own
/// spawned task; a per-session error never stops the loop from accepting
/// further connections (spec §7: "errors terminate the affected session
/// only").
pub async fn serve(listener: TcpListener, config: ProxyConfig) {
    info!("relayproxy listening on {}", config.bind_addr);
    loop {
        let (sock, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("accept() failed: {err}");
                continue;
            }
        };

        let basic_auth = config.basic_auth.clone();
        tokio::spawn(async move {
            let host = peer.ip().to_string();
            let client = Connection::new(sock, host, peer.port());
            let mut session = ProxySession::new(client, basic_auth);
            info!("accepted client {peer}");
            session.run().await;
        });
    }
}

pub async fn run(config: ProxyConfig) -> std::io::Result<()> {
    let listener = bind(&config).await.map_err(|err| {
        error!("failed to bind {}: {err}", config.bind_addr);
        err
    })?;
    serve(listener, config).await;
    Ok(())
}
