//! Proxy rotation collaborator boundary.
//!
//! A [`ProxySource`] hands the loop the next proxy to use immediately
//! before a request is built. Where proxy lists come from (text files,
//! HTTP endpoints) is out of scope; [`RoundRobinProxySource`] rotates over
//! a fixed list.

use serde::{Deserialize, Serialize};

/// Protocol spoken to the proxy itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyScheme {
    /// Plain HTTP proxy.
    Http,
    /// HTTPS proxy.
    Https,
    /// SOCKS5 proxy.
    Socks5,
}

/// One upstream proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyServer {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional basic-auth user.
    pub username: Option<String>,
    /// Optional basic-auth password.
    pub password: Option<String>,
    /// Protocol spoken to the proxy.
    pub scheme: ProxyScheme,
}

impl ProxyServer {
    /// Creates an HTTP proxy without credentials.
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        ProxyServer {
            host: host.into(),
            port,
            username: None,
            password: None,
            scheme: ProxyScheme::Http,
        }
    }

    /// The proxy endpoint as a URL, credentials excluded.
    pub fn address(&self) -> String {
        let scheme = match self.scheme {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Supplier of proxies for per-task rotation.
pub trait ProxySource: Send {
    /// The proxy to use for the next request; `None` disables proxying for
    /// that request.
    fn next_proxy(&mut self) -> Option<ProxyServer>;
}

/// Rotates over a fixed proxy list, wrapping around.
pub struct RoundRobinProxySource {
    servers: Vec<ProxyServer>,
    next: usize,
}

impl RoundRobinProxySource {
    /// Creates a source over `servers`.
    pub fn new(servers: Vec<ProxyServer>) -> Self {
        RoundRobinProxySource { servers, next: 0 }
    }
}

impl ProxySource for RoundRobinProxySource {
    fn next_proxy(&mut self) -> Option<ProxyServer> {
        if self.servers.is_empty() {
            return None;
        }
        let server = self.servers[self.next % self.servers.len()].clone();
        self.next = self.next.wrapping_add(1);
        Some(server)
    }
}
