//! Backend target parsing.
//!
//! Grammar: `scheme://[service][?query]`, or a bare `host:port` which is
//! shorthand for `direct://host:port`.

use url::Url;

use crate::discovery::DiscoveryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Fixed `host:port`.
    Direct { address: String },
    /// Service name resolved by the provider registered for `scheme`.
    Discovery {
        scheme: String,
        service: String,
        /// Only instance endpoints with the same `isSecure` flag are used.
        secure: bool,
    },
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self, DiscoveryError> {
        let raw = raw.trim();
        let invalid = |reason: &str| DiscoveryError::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };

        let Some((scheme, rest)) = raw.split_once("://") else {
            return direct(raw).ok_or_else(|| invalid("expected host:port"));
        };

        if scheme.eq_ignore_ascii_case("direct") {
            return direct(rest).ok_or_else(|| invalid("expected direct://host:port"));
        }

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let service = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing service name"))?
            .to_string();

        Ok(Target::Discovery {
            scheme: url.scheme().to_string(),
            service,
            secure: secure_flag(&url),
        })
    }
}

fn direct(address: &str) -> Option<Target> {
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(Target::Direct {
        address: address.to_string(),
    })
}

/// `isSecure` query flag; absent means false.
pub fn secure_flag(url: &Url) -> bool {
    url.query_pairs()
        .find(|(key, _)| key == "isSecure")
        .is_some_and(|(_, value)| value.eq_ignore_ascii_case("true"))
}
