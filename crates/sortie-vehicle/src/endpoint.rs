use std::fmt;

use crate::error::VehicleError;

const DEFAULT_TCP_PORT: u16 = 5760;
const DEFAULT_UDP_PORT: u16 = 14540;
const DEFAULT_BAUD: u32 = 57600;

/// Parsed connection endpoint. Immutable once parsed; a malformed url aborts
/// the run before any I/O is attempted.
///
/// Accepted grammar:
///   tcp://[server_host][:server_port]
///   udp://[bind_host][:bind_port]
///   serial:///path/to/serial/dev[:baudrate]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
    Serial { path: String, baud: u32 },
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, VehicleError> {
        if let Some(rest) = url.strip_prefix("tcp://") {
            let (host, port) = split_host_port(rest, DEFAULT_TCP_PORT)
                .ok_or_else(|| bad(url))?;
            let host = if host.is_empty() { "127.0.0.1".into() } else { host };
            Ok(Endpoint::Tcp { host, port })
        } else if let Some(rest) = url.strip_prefix("udp://") {
            let (host, port) = split_host_port(rest, DEFAULT_UDP_PORT)
                .ok_or_else(|| bad(url))?;
            // empty bind host means listen on all interfaces
            let host = if host.is_empty() { "0.0.0.0".into() } else { host };
            Ok(Endpoint::Udp { host, port })
        } else if let Some(rest) = url.strip_prefix("serial://") {
            if !rest.starts_with('/') {
                return Err(bad(url));
            }
            let (path, baud) = match rest.rsplit_once(':') {
                Some((path, baud)) => {
                    let baud = baud.parse::<u32>().map_err(|_| bad(url))?;
                    (path.to_string(), baud)
                }
                None => (rest.to_string(), DEFAULT_BAUD),
            };
            if path.len() < 2 || baud == 0 {
                return Err(bad(url));
            }
            Ok(Endpoint::Serial { path, baud })
        } else {
            Err(bad(url))
        }
    }

    /// Address string in the form the `mavlink` crate's `connect()` accepts.
    /// udp endpoints listen (the simulator pushes to us), tcp endpoints dial out.
    pub fn mav_address(&self) -> String {
        match self {
            Endpoint::Tcp { host, port } => format!("tcpout:{}:{}", host, port),
            Endpoint::Udp { host, port } => format!("udpin:{}:{}", host, port),
            Endpoint::Serial { path, baud } => format!("serial:{}:{}", path, baud),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Udp { host, port } => write!(f, "udp://{}:{}", host, port),
            Endpoint::Serial { path, baud } => write!(f, "serial://{}:{}", path, baud),
        }
    }
}

fn bad(url: &str) -> VehicleError {
    VehicleError::Endpoint(url.to_string())
}

fn split_host_port(s: &str, default_port: u16) -> Option<(String, u16)> {
    if s.contains('/') {
        return None;
    }
    match s.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().ok()?;
            Some((host.to_string(), port))
        }
        None => Some((s.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_bind_any_with_port() {
        let ep = Endpoint::parse("udp://:14540").unwrap();
        assert_eq!(ep, Endpoint::Udp { host: "0.0.0.0".into(), port: 14540 });
        assert_eq!(ep.mav_address(), "udpin:0.0.0.0:14540");
    }

    #[test]
    fn udp_defaults() {
        let ep = Endpoint::parse("udp://").unwrap();
        assert_eq!(ep, Endpoint::Udp { host: "0.0.0.0".into(), port: 14540 });
    }

    #[test]
    fn tcp_host_and_port() {
        let ep = Endpoint::parse("tcp://192.168.4.1:5761").unwrap();
        assert_eq!(ep, Endpoint::Tcp { host: "192.168.4.1".into(), port: 5761 });
        assert_eq!(ep.mav_address(), "tcpout:192.168.4.1:5761");
    }

    #[test]
    fn tcp_default_port_and_host() {
        assert_eq!(
            Endpoint::parse("tcp://gcs.local").unwrap(),
            Endpoint::Tcp { host: "gcs.local".into(), port: 5760 }
        );
        assert_eq!(
            Endpoint::parse("tcp://").unwrap(),
            Endpoint::Tcp { host: "127.0.0.1".into(), port: 5760 }
        );
    }

    #[test]
    fn serial_with_baud() {
        let ep = Endpoint::parse("serial:///dev/ttyUSB0:921600").unwrap();
        assert_eq!(ep, Endpoint::Serial { path: "/dev/ttyUSB0".into(), baud: 921600 });
        assert_eq!(ep.mav_address(), "serial:/dev/ttyUSB0:921600");
    }

    #[test]
    fn serial_default_baud() {
        assert_eq!(
            Endpoint::parse("serial:///dev/ttyACM0").unwrap(),
            Endpoint::Serial { path: "/dev/ttyACM0".into(), baud: 57600 }
        );
    }

    #[test]
    fn rejects_malformed() {
        for url in [
            "",
            "ftp://host:1",
            "udp//:14540",
            "udp://host:notaport",
            "udp://host:99999",
            "tcp://host:0x10",
            "serial://dev/ttyUSB0", // missing third slash
            "serial:///:115200",
            "serial:///dev/ttyUSB0:fast",
            "udp://host/extra",
        ] {
            assert!(Endpoint::parse(url).is_err(), "should reject {:?}", url);
        }
    }
}
