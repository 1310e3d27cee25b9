//! Origins and schemeful sites

use crate::error::OriginError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Host, Url};

/// A potentially trustworthy origin (`https://host[:port]`, or plain http
/// on localhost / loopback), stored in its serialized form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin {
    serialized: String,
    site: String,
}

impl Origin {
    pub fn parse(input: &str) -> Result<Self, OriginError> {
        let url = Url::parse(input)?;
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(OriginError::Opaque(input.to_string()));
        }

        let host = url
            .host()
            .ok_or_else(|| OriginError::Opaque(input.to_string()))?;

        let trustworthy = match url.scheme() {
            "https" => true,
            "http" => is_local_host(&host),
            _ => false,
        };
        if !trustworthy {
            return Err(OriginError::Untrustworthy(input.to_string()));
        }

        let site = format!("{}://{}", url.scheme(), registrable_domain(&host));

        Ok(Self {
            serialized: origin.ascii_serialization(),
            site,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Scheme plus registrable domain of this origin.
    pub fn site(&self) -> &str {
        &self.site
    }
}

fn is_local_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => *domain == "localhost" || domain.ends_with(".localhost"),
        Host::Ipv4(addr) => addr.is_loopback(),
        Host::Ipv6(addr) => addr.is_loopback(),
    }
}

// Approximates eTLD+1 as the last two labels; IP literals and single-label
// hosts are their own site. Hosts under a multi-label public suffix collapse
// together: `shop.co.uk` and `news.co.uk` are both the site `co.uk`, so they
// share per-origin capacity and rate-limit counters.
fn registrable_domain(host: &Host<&str>) -> String {
    match host {
        Host::Domain(domain) => {
            let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
            if labels.len() <= 2 {
                labels.join(".")
            } else {
                labels[labels.len() - 2..].join(".")
            }
        }
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => format!("[{}]", addr),
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

impl TryFrom<String> for Origin {
    type Error = OriginError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Origin::parse(&value)
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.serialized
    }
}

impl std::str::FromStr for Origin {
    type Err = OriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Origin::parse(s)
    }
}
