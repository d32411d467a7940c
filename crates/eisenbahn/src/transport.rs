use std::path::Path;
use std::str::FromStr;

use crate::error::EisenbahnError;

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Unix domain socket under `/tmp/certhunt/`.
    Ipc(String),

    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create an IPC transport with the given socket name.
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/certhunt/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// For IPC transports, ensure the parent directory exists.
    ///
    /// ZeroMQ requires the directory to exist before binding an IPC socket.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a stale IPC socket file left over from a previous run.
    ///
    /// No-op for TCP transports or if the file doesn't exist.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Parses `tcp://host:port` and `ipc://name` (bare socket name, or a path
/// under `/tmp/certhunt/` ending in `.sock`).
impl FromStr for Transport {
    type Err = EisenbahnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| EisenbahnError::Transport(format!("missing port in '{s}'")))?;
            let port = port
                .parse()
                .map_err(|_| EisenbahnError::Transport(format!("invalid port in '{s}'")))?;
            if host.is_empty() {
                return Err(EisenbahnError::Transport(format!("missing host in '{s}'")));
            }
            return Ok(Self::tcp(host, port));
        }

        if let Some(name) = s.strip_prefix("ipc://") {
            let name = name
                .strip_prefix("/tmp/certhunt/")
                .map(|n| n.strip_suffix(".sock").unwrap_or(n))
                .unwrap_or(name);
            if name.is_empty() || name.contains('/') {
                return Err(EisenbahnError::Transport(format!(
                    "unsupported ipc endpoint '{s}'"
                )));
            }
            return Ok(Self::ipc(name));
        }

        Err(EisenbahnError::Transport(format!(
            "unsupported endpoint '{s}', expected tcp:// or ipc://"
        )))
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("attributes");
        assert_eq!(t.endpoint(), "ipc:///tmp/certhunt/attributes.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 5600);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:5600");
    }

    #[test]
    fn parses_endpoints() {
        assert_eq!(
            "tcp://0.0.0.0:5600".parse::<Transport>().unwrap(),
            Transport::tcp("0.0.0.0", 5600)
        );
        assert_eq!(
            "ipc://attributes".parse::<Transport>().unwrap(),
            Transport::ipc("attributes")
        );
        assert_eq!(
            "ipc:///tmp/certhunt/attributes.sock".parse::<Transport>().unwrap(),
            Transport::ipc("attributes")
        );
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!("tcp://localhost".parse::<Transport>().is_err());
        assert!("tcp://localhost:http".parse::<Transport>().is_err());
        assert!("ipc:///var/run/x.sock".parse::<Transport>().is_err());
        assert!("udp://localhost:1".parse::<Transport>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let t = Transport::tcp("localhost", 9090);
        assert_eq!(t.to_string().parse::<Transport>().unwrap(), t);
    }
}
