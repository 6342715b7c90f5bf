//! CLI argument parsing (`clap` derive) producing an immutable
//! [`ProxyConfig`], matching the `--hostname`/`--port`/`--basic-auth`/
//! `--backlog`/`--log-level` surface named in `SPEC_FULL.md` §6.

use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use clap::Parser;
use log::LevelFilter;

const DEFAULT_BACKLOG: u32 = 128;

#[derive(Debug, Parser)]
#[command(name = "relayproxy", about = "A forward HTTP/1.x proxy")]
pub struct CliArgs {
    /// Address to bind the listener on.
    #[arg(long, default_value = "127.0.0.1")]
    pub hostname: String,

    /// Port to bind the listener on.
    #[arg(long, default_value_t = 8899)]
    pub port: u16,

    /// Require HTTP Basic proxy authentication with this USER:PASS pair.
    #[arg(long, value_name = "USER:PASS")]
    pub basic_auth: Option<String>,

    /// Listen backlog passed to the socket's `listen()` call.
    #[arg(long, default_value_t = DEFAULT_BACKLOG)]
    pub backlog: u32,

    /// Log verbosity (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Immutable, validated configuration derived from [`CliArgs`].
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    pub backlog: u32,
    /// The exact octets an incoming `Proxy-Authorization` header value must
    /// match, e.g. `Basic dXNlcjpwYXNz` -- the literal credential the
    /// session compares byte-for-byte (spec §4.5, §6).
    pub basic_auth: Option<Bytes>,
    pub log_level: LevelFilter,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid bind address {hostname}:{port}: {source}")]
    InvalidBindAddr {
        hostname: String,
        port: u16,
        source: std::net::AddrParseError,
    },
    #[error("--basic-auth must be in USER:PASS form, got {0:?}")]
    InvalidBasicAuth(String),
    #[error("unrecognized --log-level {0:?}")]
    InvalidLogLevel(String),
}

impl ProxyConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let ip: IpAddr = args
            .hostname
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                hostname: args.hostname.clone(),
                port: args.port,
                source,
            })?;
        let bind_addr = SocketAddr::new(ip, args.port);

        let basic_auth = match &args.basic_auth {
            None => None,
            Some(pair) => {
                if !pair.contains(':') {
                    return Err(ConfigError::InvalidBasicAuth(pair.clone()));
                }
                let encoded = STANDARD.encode(pair.as_bytes());
                Some(Bytes::from(format!("Basic {encoded}")))
            }
        };

        let log_level = args
            .log_level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(args.log_level.clone()))?;

        Ok(ProxyConfig {
            bind_addr,
            backlog: args.backlog,
            basic_auth,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(basic_auth: Option<&str>) -> CliArgs {
        CliArgs {
            hostname: "127.0.0.1".to_string(),
            port: 8899,
            basic_auth: basic_auth.map(str::to_string),
            backlog: DEFAULT_BACKLOG,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn encodes_basic_auth_credential() {
        let cfg = ProxyConfig::from_args(&args(Some("user:pass"))).unwrap();
        assert_eq!(
            cfg.basic_auth.unwrap(),
            Bytes::from_static(b"Basic dXNlcjpwYXNz")
        );
    }

    #[test]
    fn rejects_basic_auth_without_colon() {
        let err = ProxyConfig::from_args(&args(Some("nouserpass"))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBasicAuth(_)));
    }

    #[test]
    fn defaults_bind_addr_to_loopback() {
        let cfg = ProxyConfig::from_args(&args(None)).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:8899".parse().unwrap());
        assert!(cfg.basic_auth.is_none());
    }

    #[test]
    fn rejects_unparseable_hostname() {
        let mut a = args(None);
        a.hostname = "not-an-ip".to_string();
        let err = ProxyConfig::from_args(&a).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    }

    #[test]
    fn rejects_unrecognized_log_level() {
        let mut a = args(None);
        a.log_level = "deafening".to_string();
        let err = ProxyConfig::from_args(&a).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }
}
