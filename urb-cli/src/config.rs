//! Configuration file support for the URB node
//!
//! Three files describe a run:
//! - the hosts file, one `<id> <host> <port>` line per process
//! - the run config, `<messages>` for broadcast runs or
//!   `<messages> <receiver id>` for point-to-point link runs
//! - an optional TOML tuning file overriding link and broadcast defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use urb::io::TransportError;
use urb::{BroadcastConfig, Membership, ProcessId, UdpTransport};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One process entry of the hosts file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub id: ProcessId,
    pub addr: SocketAddr,
}

/// Every process of the run and its address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hosts {
    hosts: Vec<Host>,
}

impl Hosts {
    /// Load the hosts file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parse hosts file contents; blank lines are skipped
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut hosts: Vec<Host> = Vec::new();

        for (n, line) in contents.lines().enumerate() {
            let line_no = n + 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let [id, host, port] = fields[..] else {
                return Err(ConfigError::Parse {
                    line: line_no,
                    reason: format!("expected `<id> <host> <port>`, got {:?}", line),
                });
            };

            let id: ProcessId = parse_field(id, "process id", line_no)?;
            let port: u16 = parse_field(port, "port", line_no)?;
            if id == 0 {
                return Err(ConfigError::Parse {
                    line: line_no,
                    reason: "process id 0 is reserved".into(),
                });
            }
            if hosts.iter().any(|h| h.id == id) {
                return Err(ConfigError::Parse {
                    line: line_no,
                    reason: format!("duplicate process id {}", id),
                });
            }

            let addr = (host, port)
                .to_socket_addrs()?
                .find(SocketAddr::is_ipv4)
                .ok_or_else(|| ConfigError::Parse {
                    line: line_no,
                    reason: format!("cannot resolve {}", host),
                })?;
            hosts.push(Host { id, addr });
        }

        if hosts.is_empty() {
            return Err(ConfigError::Invalid("hosts file lists no process".into()));
        }
        hosts.sort_by_key(|h| h.id);
        Ok(Hosts { hosts })
    }

    /// All hosts ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    /// Number of processes
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Always false for a parsed hosts file
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Address of process `id`
    pub fn addr(&self, id: ProcessId) -> Option<SocketAddr> {
        self.hosts.iter().find(|h| h.id == id).map(|h| h.addr)
    }

    /// (id, address) pairs for building a transport
    pub fn peers(&self) -> Vec<(ProcessId, SocketAddr)> {
        self.hosts.iter().map(|h| (h.id, h.addr)).collect()
    }

    /// Membership seen from process `local`
    pub fn membership(&self, local: ProcessId) -> Result<Membership, ConfigError> {
        Membership::new(local, self.hosts.iter().map(|h| h.id))
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn parse_field<T: std::str::FromStr>(
    field: &str,
    name: &str,
    line: usize,
) -> Result<T, ConfigError> {
    field.parse().map_err(|_| ConfigError::Parse {
        line,
        reason: format!("invalid {}: {:?}", name, field),
    })
}

/// What the process does once started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunConfig {
    /// Broadcast `messages` messages
    Broadcast { messages: u32 },
    /// Send `messages` messages to `receiver` over the perfect link
    Link { messages: u32, receiver: ProcessId },
}

impl RunConfig {
    /// Load the run config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Parse run config contents
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = contents.split_whitespace().collect();
        match fields[..] {
            [messages] => Ok(RunConfig::Broadcast {
                messages: parse_field(messages, "message count", 1)?,
            }),
            [messages, receiver] => Ok(RunConfig::Link {
                messages: parse_field(messages, "message count", 1)?,
                receiver: parse_field(receiver, "receiver id", 1)?,
            }),
            _ => Err(ConfigError::Parse {
                line: 1,
                reason: "expected `<messages>` or `<messages> <receiver id>`".into(),
            }),
        }
    }

    /// Number of messages this process sends
    pub fn messages(&self) -> u32 {
        match *self {
            RunConfig::Broadcast { messages } | RunConfig::Link { messages, .. } => messages,
        }
    }
}

/// Optional overrides of the link and broadcast defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tuning {
    /// Packet size ceiling (bytes)
    pub max_packet_size: Option<usize>,
    /// Flush/retransmission period in milliseconds
    pub resend_interval_ms: Option<u64>,
    /// In-flight packets resent per tick
    pub resend_batch_size: Option<usize>,
    /// Ack batch size sent before the next tick
    pub min_acks_per_packet: Option<usize>,
    /// Socket receive timeout in milliseconds
    pub recv_timeout_ms: Option<u64>,
    /// Send worker threads
    pub worker_threads: Option<usize>,
    /// Own broadcasts allowed to await a majority at once
    pub own_batch_size: Option<usize>,
    /// Kernel send buffer of the UDP socket (bytes)
    pub socket_send_buffer: Option<usize>,
    /// Kernel receive buffer of the UDP socket (bytes)
    pub socket_recv_buffer: Option<usize>,
}

impl Tuning {
    /// Load a TOML tuning file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Overlay the set fields onto `config`
    pub fn apply(&self, config: &mut BroadcastConfig) {
        let link = &mut config.link;
        if let Some(v) = self.max_packet_size {
            link.max_packet_size = v;
        }
        if let Some(v) = self.resend_interval_ms {
            link.resend_interval = Duration::from_millis(v);
        }
        if let Some(v) = self.resend_batch_size {
            link.resend_batch_size = v;
        }
        if let Some(v) = self.min_acks_per_packet {
            link.min_acks_per_packet = v;
        }
        if let Some(v) = self.recv_timeout_ms {
            link.recv_timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.worker_threads {
            link.worker_threads = v;
        }
        if let Some(v) = self.own_batch_size {
            config.own_batch_size = v;
        }
    }

    /// Resize the socket buffers of a bound transport
    pub fn apply_socket(&self, transport: &UdpTransport) -> Result<(), TransportError> {
        if let Some(size) = self.socket_send_buffer {
            transport.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.socket_recv_buffer {
            transport.set_recv_buffer_size(size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hosts() {
        let hosts = Hosts::parse("2 127.0.0.1 11002\n1 localhost 11001\n\n3 127.0.0.1 11003\n")
            .unwrap();

        assert_eq!(hosts.len(), 3);
        let ids: Vec<_> = hosts.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(hosts.addr(1).unwrap().port(), 11001);
        assert_eq!(hosts.addr(2).unwrap(), "127.0.0.1:11002".parse().unwrap());

        let membership = hosts.membership(2).unwrap();
        assert_eq!(membership.len(), 3);
        assert!(hosts.membership(4).is_err());
    }

    #[test]
    fn test_bad_hosts_lines() {
        assert!(matches!(
            Hosts::parse("1 127.0.0.1\n"),
            Err(ConfigError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            Hosts::parse("1 127.0.0.1 11001\n1 127.0.0.1 11002\n"),
            Err(ConfigError::Parse { line: 2, .. })
        ));
        assert!(Hosts::parse("x 127.0.0.1 11001\n").is_err());
        assert!(Hosts::parse("0 127.0.0.1 11001\n").is_err());
        assert!(Hosts::parse("\n").is_err());
    }

    #[test]
    fn test_parse_run_config() {
        assert_eq!(
            RunConfig::parse("10\n").unwrap(),
            RunConfig::Broadcast { messages: 10 }
        );
        assert_eq!(
            RunConfig::parse("100 3").unwrap(),
            RunConfig::Link {
                messages: 100,
                receiver: 3
            }
        );
        assert_eq!(RunConfig::parse("100 3").unwrap().messages(), 100);
        assert!(RunConfig::parse("").is_err());
        assert!(RunConfig::parse("1 2 3").is_err());
    }

    #[test]
    fn test_tuning_overrides() {
        let tuning: Tuning = toml::from_str(
            r#"
            resend_interval_ms = 25
            own_batch_size = 8
            "#,
        )
        .unwrap();

        let mut config = BroadcastConfig::default();
        tuning.apply(&mut config);

        assert_eq!(config.link.resend_interval, Duration::from_millis(25));
        assert_eq!(config.own_batch_size, 8);
        assert_eq!(config.link.max_packet_size, 65_000);
    }

    #[test]
    fn test_tuning_socket_buffers() {
        let tuning: Tuning = toml::from_str(
            r#"
            socket_send_buffer = 65536
            socket_recv_buffer = 131072
            "#,
        )
        .unwrap();
        assert_eq!(tuning.socket_send_buffer, Some(65_536));
        assert_eq!(tuning.socket_recv_buffer, Some(131_072));

        // Socket sizes leave the protocol config alone
        let mut config = BroadcastConfig::default();
        tuning.apply(&mut config);
        assert_eq!(config, BroadcastConfig::default());

        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap(), []).unwrap();
        tuning.apply_socket(&transport).unwrap();
        Tuning::default().apply_socket(&transport).unwrap();
    }

    #[test]
    fn test_tuning_rejects_unknown_fields() {
        assert!(toml::from_str::<Tuning>("resend_every = 3").is_err());
    }
}
