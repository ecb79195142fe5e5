//! INI configuration: an `[Interface]` section for the local identity and a
//! single `[Peer]` section for the remote end of the tunnel.
//!
//! ```ini
//! [Interface]
//! PrivateKey = WEGlnZqW7a3J+AmKoDg+/L95sSIutu9ApEp3AY+l30o=
//! ListenPort = 51820
//!
//! [Peer]
//! PublicKey = doQkpj/AjVrfbTFENyj46kzYWNDdrXulSfxBdnmslCo=
//! AllowedIPs = 10.11.0.0/24
//! Endpoint = 203.0.113.5:51820
//! ```

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{anyhow, Context};
use ini::Ini;
use ipnet::IpNet;

use burrow_crypto::{
    decode_preshared_key, decode_private_key, decode_public_key, PublicKey, StaticSecret,
};

pub struct Config {
    pub private_key: StaticSecret,
    pub listen_port: u16,
    pub peer: PeerConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("private_key", &"<redacted>")
            .field("listen_port", &self.listen_port)
            .field("peer", &self.peer)
            .finish()
    }
}

#[derive(Debug)]
pub struct PeerConfig {
    pub public_key: PublicKey,
    pub preshared_key: Option<[u8; 32]>,
    pub allowed_ips: Vec<IpNet>,
    pub endpoint: Option<SocketAddr>,
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let file = Ini::load_from_file(path)
        .with_context(|| format!("cannot read config file {}", path.display()))?;

    let interface = file
        .section(Some("Interface"))
        .context("missing [Interface] section")?;
    let private_key = interface
        .get("PrivateKey")
        .context("missing Interface.PrivateKey")
        .and_then(|k| {
            decode_private_key(k).map_err(|e| anyhow!("invalid Interface.PrivateKey: {e:?}"))
        })?;
    let listen_port = interface
        .get("ListenPort")
        .context("missing Interface.ListenPort")?
        .parse()
        .context("invalid Interface.ListenPort")?;

    let peer = file.section(Some("Peer")).context("missing [Peer] section")?;
    let public_key = peer
        .get("PublicKey")
        .context("missing Peer.PublicKey")
        .and_then(|k| decode_public_key(k).map_err(|e| anyhow!("invalid Peer.PublicKey: {e:?}")))?;
    let preshared_key = peer
        .get("PresharedKey")
        .map(|k| decode_preshared_key(k).map_err(|e| anyhow!("invalid Peer.PresharedKey: {e:?}")))
        .transpose()?;
    let allowed_ips = peer
        .get("AllowedIPs")
        .unwrap_or_default()
        .split([',', ' '])
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().with_context(|| format!("invalid AllowedIPs entry {s:?}")))
        .collect::<anyhow::Result<Vec<IpNet>>>()?;
    let endpoint = peer
        .get("Endpoint")
        .map(|e| e.parse().context("invalid Peer.Endpoint"))
        .transpose()?;

    Ok(Config {
        private_key,
        listen_port,
        peer: PeerConfig {
            public_key,
            preshared_key,
            allowed_ips,
            endpoint,
        },
    })
}
