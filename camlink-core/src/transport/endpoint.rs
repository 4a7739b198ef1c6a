use std::net::IpAddr;

use crate::error::CamlinkError;

/// A collector address: host plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Validate and build an endpoint.
    ///
    /// `host` must be an IP literal or a syntactically valid hostname;
    /// port 0 is rejected.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, CamlinkError> {
        let host = host.into();
        let host = host.trim();
        let bare = host.trim_start_matches('[').trim_end_matches(']');

        if port == 0 {
            return Err(CamlinkError::InvalidAddress(format!("{host}: port 0")));
        }
        if bare.parse::<IpAddr>().is_err() && !is_hostname(bare) {
            return Err(CamlinkError::InvalidAddress(host.to_string()));
        }
        Ok(Self {
            host: bare.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same host, different port.
    pub fn with_port(&self, port: u16) -> Result<Self, CamlinkError> {
        Self::new(self.host.clone(), port)
    }
}

fn is_hostname(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 253
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
