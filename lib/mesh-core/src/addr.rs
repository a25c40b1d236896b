//! Virtual names and host:port handling
use crate::{MeshError, Result};

/// Prefix of every virtual service hostname.
pub const MESH_PREFIX: &str = "meshrpc";

/// Port appended to peer addresses that don't carry one.
pub const DEFAULT_PORT: &str = "11999";

/// Virtual FQDN a service is reachable under.
pub fn service_fqdn(service: &str) -> String {
    format!("{}.{}", MESH_PREFIX, service)
}

/// Split `host:port` (or `[v6host]:port`) into its parts.
pub fn split_host_port(addr: &str) -> Result<(String, String)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| MeshError::config(addr, "missing ']' in address"))?;
        let host = &rest[..end];
        let port = rest[end + 1..]
            .strip_prefix(':')
            .ok_or_else(|| MeshError::config(addr, "missing port in address"))?;
        if port.contains(':') {
            return Err(MeshError::config(addr, "too many colons in address"));
        }
        return Ok((host.to_string(), port.to_string()));
    }

    let idx = addr
        .rfind(':')
        .ok_or_else(|| MeshError::config(addr, "missing port in address"))?;
    let (host, port) = (&addr[..idx], &addr[idx + 1..]);
    if host.contains(':') {
        return Err(MeshError::config(addr, "too many colons in address"));
    }
    Ok((host.to_string(), port.to_string()))
}

pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Append `port` when `addr` doesn't parse as host:port.
pub fn with_default_port(addr: &str, port: &str) -> String {
    match split_host_port(addr) {
        Ok(_) => addr.to_string(),
        Err(_) => format!("{}:{}", addr, port),
    }
}

/// Hosts that mean "every local interface".
pub fn is_unspecified_host(host: &str) -> bool {
    host.is_empty() || host == "0.0.0.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_fqdn() {
        assert_eq!(service_fqdn("greeter"), "meshrpc.greeter");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("0.0.0.0:9000").unwrap(),
            ("0.0.0.0".to_string(), "9000".to_string())
        );
        assert_eq!(
            split_host_port(":11999").unwrap(),
            ("".to_string(), "11999".to_string())
        );
        assert_eq!(
            split_host_port("[::1]:80").unwrap(),
            ("::1".to_string(), "80".to_string())
        );
        assert!(split_host_port("localhost").is_err());
        assert!(split_host_port("bad:addr:1").is_err());
        assert!(split_host_port("[::1]").is_err());
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("localhost", "9000"), "localhost:9000");
        assert_eq!(join_host_port("::1", "9000"), "[::1]:9000");
    }

    #[test]
    fn test_with_default_port() {
        assert_eq!(with_default_port("good", DEFAULT_PORT), "good:11999");
        assert_eq!(with_default_port("good:12000", DEFAULT_PORT), "good:12000");
        assert_eq!(with_default_port("bad:addr:1", DEFAULT_PORT), "bad:addr:1:11999");
    }
}
