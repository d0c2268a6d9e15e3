//! OpenBridge and IPSC (§4.8) are optional peer-network protocols that this
//! core models as additional sink types with no routing-table changes. Full
//! packet translation and HMAC authentication are out of scope here; these
//! stubs exist so the config surface and process wiring are real even though
//! nothing upstream speaks either protocol yet.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::{info, warn};

pub async fn run_openbridge_stub(bind: String) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(&bind).await?;
    info!(bind, "openbridge: listening (translation unimplemented)");
    accept_and_log(socket, "openbridge").await
}

pub async fn run_ipsc_stub(bind: String) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(&bind).await?;
    info!(bind, "ipsc: listening (translation unimplemented)");
    accept_and_log(socket, "ipsc").await
}

async fn accept_and_log(socket: UdpSocket, proto: &'static str) -> anyhow::Result<()> {
    let mut buf = [0u8; 2048];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => log_unimplemented(proto, len, from),
            Err(e) => warn!(proto, error = %e, "peer stub recv failed"),
        }
    }
}

fn log_unimplemented(proto: &'static str, len: usize, from: SocketAddr) {
    warn!(proto, len, %from, "peer protocol not implemented, dropping datagram");
}
