//! Single-peer tunnel endpoint: reads the INI config, binds the listen port,
//! and pumps datagrams through the handshake core. If the peer has a
//! configured endpoint we initiate; otherwise we wait for the peer's
//! initiation.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rand::rngs::OsRng;
use tai64::Tai64N;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use zerocopy::AsBytes;

use burrow_core::{Error, Tunnel};
use burrow_crypto::{
    encode_key, Checker, LocalIdentity, RemoteIdentity, Stamper, KEY_BASE64_LEN,
};
use burrow_types::{CookieReply, HandshakeInit, HandshakeResp};

mod config;

#[derive(Parser)]
#[command(name = "burrowd", about = "WireGuard-compatible tunnel endpoint")]
struct Args {
    /// Path to the INI configuration file.
    #[arg(short, long, default_value = "burrow.conf")]
    config: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = config::load(&args.config)?;

    let local = LocalIdentity::new(config.private_key);
    let remote = RemoteIdentity::new(config.peer.public_key, config.peer.preshared_key);

    let mut keybuf = [0u8; KEY_BASE64_LEN];
    info!(
        public_key = encode_key(local.public_key.as_bytes(), &mut keybuf),
        "local identity"
    );
    for net in &config.peer.allowed_ips {
        debug!(%net, "allowed source network");
    }

    let mut stamper = Stamper::new(&remote.public_key);
    let checker = Checker::new(&local.public_key);
    let mut tunnel = Tunnel::new(local, remote);
    tunnel
        .initialise()
        .context("peer public key is degenerate")?;

    let socket = UdpSocket::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("cannot bind udp port {}", config.listen_port))?;
    info!(port = config.listen_port, "listening");

    if let Some(addr) = config.peer.endpoint {
        let init = tunnel.initiate_handshake(Tai64N::now(), &mut OsRng)?;
        let mut bytes = init.as_bytes().to_vec();
        stamper.stamp(&mut bytes, Tai64N::now());
        socket.send_to(&bytes, addr).await?;
        info!(%addr, "sent handshake initiation");
    }

    let mut buf = vec![0u8; 2048];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        match handle_datagram(&mut tunnel, &mut stamper, &checker, &mut buf[..n]) {
            Ok(Some(reply)) => {
                socket.send_to(&reply, from).await?;
            }
            Ok(None) => {}
            Err(e) => warn!(%from, error = %e, "dropped datagram"),
        }
    }
}

/// Dispatches one datagram on its type byte, returning the reply to send
/// back, if any. Handshake messages pass the MAC gate before they reach the
/// handshake engine.
fn handle_datagram(
    tunnel: &mut Tunnel,
    stamper: &mut Stamper,
    checker: &Checker,
    datagram: &mut [u8],
) -> Result<Option<Vec<u8>>, Error> {
    match datagram.first().copied() {
        Some(1) => {
            let init = HandshakeInit::parse(datagram)?;
            checker.check_mac1(init.as_bytes())?;
            tunnel.process_handshake_init(init)?;
            let resp = tunnel.create_handshake_response(&mut OsRng)?;
            tunnel.begin_session()?;

            let mut bytes = resp.as_bytes().to_vec();
            stamper.stamp(&mut bytes, Tai64N::now());
            info!("handshake completed as responder");
            Ok(Some(bytes))
        }
        Some(2) => {
            let resp = HandshakeResp::parse(datagram)?;
            checker.check_mac1(resp.as_bytes())?;
            tunnel.process_handshake_response(resp)?;
            tunnel.begin_session()?;
            info!("handshake completed as initiator");
            Ok(None)
        }
        Some(3) => {
            let reply = CookieReply::parse(datagram)?;
            stamper.absorb_cookie_reply(reply, Tai64N::now())?;
            info!("cookie absorbed, next handshake message will carry mac2");
            Ok(None)
        }
        Some(4) => {
            let packet = tunnel.open(datagram)?;
            debug!(len = packet.len(), "opened transport packet");
            Ok(None)
        }
        _ => Err(Error::MalformedMessage),
    }
}
