//! Daemon configuration.
//!
//! Every flag carries an environment-variable fallback; a flag given on the
//! command line beats its env counterpart.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

/// Which role this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// All-in-one: local runtime, public API and proxy on one host.
    Server,
    /// Fleet front-end: no local runtime, dispatches to registered workers.
    Orchestrator,
    /// Fleet member: local runtime exposed through the internal surface.
    Worker,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "osb-daemon", about = "Open Sandbox control plane daemon")]
pub struct Config {
    /// HTTP API listen address, e.g. `:8080` or `127.0.0.1:8080`.
    #[arg(long = "addr", env = "ADDR", default_value = ":8080")]
    pub addr: String,

    /// Comma-separated reverse-proxy listen addresses.
    #[arg(long = "proxy-addr", env = "PROXY_ADDR", default_value = ":3000")]
    pub proxy_addr: String,

    /// Base domain for `<name>.<base-domain>` proxy routing.
    #[arg(long = "base-domain", env = "BASE_DOMAIN", default_value = "localhost")]
    pub base_domain: String,

    /// Bearer key required on the public API when set.
    #[arg(long = "api-key", env = "API_KEY")]
    pub api_key: Option<String>,

    /// Shared key for the internal worker surface.
    #[arg(long = "worker-api-key", env = "WORKER_API_KEY")]
    pub worker_api_key: Option<String>,

    /// Orchestrator to self-register with (worker mode).
    #[arg(long = "orchestrator-url", env = "ORCHESTRATOR_URL")]
    pub orchestrator_url: Option<String>,

    /// Externally reachable URL of this worker, sent on registration.
    #[arg(long = "worker-url", env = "WORKER_URL")]
    pub worker_url: Option<String>,

    /// Address the host's containers are reachable on.
    #[arg(long = "host-ip", env = "HOST_IP", default_value = "0.0.0.0")]
    pub host_ip: String,

    /// SQLite database file.
    #[arg(long = "db-path", env = "DB_PATH", default_value = "opensandbox.db")]
    pub db_path: PathBuf,

    #[arg(long = "mode", env = "MODE", value_enum, default_value = "server")]
    pub mode: Mode,
}

impl Config {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.addr).context("invalid --addr")
    }

    pub fn proxy_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.proxy_addr
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| parse_listen_addr(item).context("invalid --proxy-addr"))
            .collect()
    }

    /// Port advertised in generated proxy URLs (from the first proxy
    /// address).
    pub fn proxy_port(&self) -> Option<u16> {
        self.proxy_addrs().ok()?.first().map(SocketAddr::port)
    }
}

/// Accepts both `:8080` (all interfaces) and full `host:port` forms.
fn parse_listen_addr(value: &str) -> Result<SocketAddr> {
    if let Some(port) = value.strip_prefix(':') {
        let port: u16 = port.parse().context("invalid port")?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    value.parse().context("invalid socket address")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_listens_on_all_interfaces() {
        let addr = parse_listen_addr(":8080").unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn full_addresses_parse() {
        let addr = parse_listen_addr("127.0.0.1:3000").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
        assert!(parse_listen_addr("not-an-addr").is_err());
    }

    #[test]
    fn proxy_addr_list_splits_on_commas() {
        let config = Config::parse_from([
            "osb-daemon",
            "--proxy-addr",
            ":3000, 127.0.0.1:3001",
        ]);
        let addrs = config.proxy_addrs().unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(config.proxy_port(), Some(3000));
    }
}
