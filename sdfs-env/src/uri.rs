//! `sdfs:host:port[/path]` connection strings.
//!
//! The trailing path is accepted for compatibility but does not scope the
//! session: remote paths are always absolute on the cluster.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

pub const SCHEME: &str = "sdfs:";

/// Endpoint used when the URI does not name an sdfs cluster.
pub const DEFAULT_HOST: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SdfsUri {
    pub host: String,
    pub port: u16,
}

impl SdfsUri {
    /// The client library's own default deployment.
    pub fn default_cluster() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: 0,
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        if uri.is_empty() {
            return Err(Error::InvalidArgument("empty sdfs uri".into()));
        }
        let Some(hostport) = uri.strip_prefix(SCHEME) else {
            return Ok(Self::default_cluster());
        };
        let hostport = hostport.strip_prefix("//").unwrap_or(hostport);

        let parts: Vec<&str> = hostport.split(':').collect();
        let [host, remaining] = parts[..] else {
            return Err(Error::InvalidArgument(format!("bad uri for sdfs {uri}")));
        };
        if host.is_empty() {
            return Err(Error::InvalidArgument(format!("missing host in {uri}")));
        }

        let port = remaining.split_once('/').map_or(remaining, |(port, _)| port);
        let port = match port.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(Error::InvalidArgument(format!("bad host-port for sdfs {uri}"))),
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl FromStr for SdfsUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SdfsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_and_path() {
        let uri = SdfsUri::parse("sdfs:namenode:9000/rocks/db").unwrap();
        assert_eq!(uri.host, "namenode");
        assert_eq!(uri.port, 9000);
        assert_eq!(uri.to_string(), "sdfs:namenode:9000");
        assert_eq!(uri, SdfsUri::parse("sdfs:namenode:9000").unwrap());

        let uri: SdfsUri = "sdfs://10.0.0.7:8020".parse().unwrap();
        assert_eq!((uri.host.as_str(), uri.port), ("10.0.0.7", 8020));
    }

    #[test]
    fn test_other_schemes_use_default_cluster() {
        assert_eq!(SdfsUri::parse("hdfs://nn:9000").unwrap(), SdfsUri::default_cluster());
        assert_eq!(SdfsUri::parse("/local/path").unwrap().port, 0);
    }

    #[test]
    fn test_malformed() {
        for bad in [
            "",
            "sdfs:",
            "sdfs:host",
            "sdfs:host:1:2",
            "sdfs:host:0",
            "sdfs:host:port",
            "sdfs:host:/db",
            "sdfs:host:70000",
            "sdfs::9000",
        ] {
            let err = SdfsUri::parse(bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidArgument(_)),
                "{bad:?} gave {err:?}"
            );
        }
    }
}
