//! Server configuration: the TCP listen address and the append-log path.
//! A `Default` impl carries the documented defaults, overridable by a
//! small set of environment variables at process startup.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_PORT: u16 = 6970;
pub const DEFAULT_LOG_PATH: &str = "log.txt";

/// Everything `main` needs to bring the server up: where to listen, and
/// where the append log lives.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub log_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(DEFAULT_HOST, DEFAULT_PORT),
            log_path: DEFAULT_LOG_PATH.to_string(),
        }
    }
}

impl ServerConfig {
    /// Builds a config from defaults, overridden by `RUDIS_HOST`,
    /// `RUDIS_PORT`, and `RUDIS_LOG_PATH` when present.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("RUDIS_HOST") {
            if let Ok(ip) = host.parse::<IpAddr>() {
                config.addr.set_ip(ip);
            }
        }
        if let Ok(port) = env::var("RUDIS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.addr.set_port(port);
            }
        }
        if let Ok(path) = env::var("RUDIS_LOG_PATH") {
            config.log_path = path;
        }

        config
    }
}
