use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JidError {
    #[error("JID is empty")]
    Empty,
    #[error("domain part is empty")]
    EmptyDomain,
    #[error("local part failed nodeprep normalization")]
    InvalidLocalPart,
    #[error("domain part failed nameprep normalization")]
    InvalidDomainPart,
    #[error("resource part failed resourceprep normalization")]
    InvalidResourcePart,
}

/// A normalized `local@domain/resource` address, per RFC 6122.
///
/// Each non-empty part is run through the relevant stringprep profile at
/// construction time, so two `Jid`s that compare equal are guaranteed to
/// refer to the same address regardless of how they were originally typed
/// (case, combining characters, etc).
#[derive(Debug, Clone)]
pub struct Jid {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn new(
        local: Option<&str>,
        domain: &str,
        resource: Option<&str>,
    ) -> Result<Self, JidError> {
        if domain.is_empty() {
            return Err(JidError::EmptyDomain);
        }

        let local = match local {
            Some(local) if !local.is_empty() => Some(
                stringprep::nodeprep(local).map_err(|_| JidError::InvalidLocalPart)?
                    .to_string(),
            ),
            _ => None,
        };

        let domain = stringprep::nameprep(domain)
            .map_err(|_| JidError::InvalidDomainPart)?
            .to_string();

        let resource = match resource {
            Some(resource) if !resource.is_empty() => Some(
                stringprep::resourceprep(resource)
                    .map_err(|_| JidError::InvalidResourcePart)?
                    .to_string(),
            ),
            _ => None,
        };

        Ok(Self {
            local,
            domain,
            resource,
        })
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Returns the `local@domain` form, dropping any resource.
    pub fn to_bare(&self) -> Jid {
        Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// A server JID has no local part: it addresses a domain directly.
    pub fn is_server(&self) -> bool {
        self.local.is_none()
    }

    /// True when both node and resource are present: a full `user@domain/resource` JID.
    pub fn full_with_user(&self) -> bool {
        self.local.is_some() && self.resource.is_some()
    }

    pub fn with_resource(&self, resource: &str) -> Result<Jid, JidError> {
        Jid::new(self.local.as_deref(), &self.domain, Some(resource))
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(JidError::Empty);
        }

        let (local_and_domain, resource) = match s.split_once('/') {
            Some((head, resource)) => (head, Some(resource)),
            None => (s, None),
        };

        let (local, domain) = match local_and_domain.split_once('@') {
            Some((local, domain)) => (Some(local), domain),
            None => (None, local_and_domain),
        };

        Jid::new(local, domain, resource)
    }
}

impl Display for Jid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{}@", local)?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{}", resource)?;
        }
        Ok(())
    }
}

impl PartialEq for Jid {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.domain == other.domain && self.resource == other.resource
    }
}

impl Eq for Jid {}

impl Hash for Jid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local.hash(state);
        self.domain.hash(state);
        self.resource.hash(state);
    }
}

impl PartialOrd for Jid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Jid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.domain, &self.local, &self.resource).cmp(&(&other.domain, &other.local, &other.resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_on_empty_string() {
        assert_eq!("".parse::<Jid>(), Err(JidError::Empty));
    }

    #[test]
    fn parses_bare_jid() {
        let jid: Jid = "romeo@montague.lit".parse().unwrap();
        assert_eq!(jid.local(), Some("romeo"));
        assert_eq!(jid.domain(), "montague.lit");
        assert_eq!(jid.resource(), None);
        assert!(jid.is_bare());
    }

    #[test]
    fn parses_full_jid() {
        let jid: Jid = "romeo@montague.lit/orchard".parse().unwrap();
        assert_eq!(jid.resource(), Some("orchard"));
        assert!(!jid.is_bare());
    }

    #[test]
    fn parses_domain_only_jid() {
        let jid: Jid = "montague.lit".parse().unwrap();
        assert!(jid.is_server());
        assert_eq!(jid.local(), None);
    }

    #[test]
    fn normalizes_local_part_case() {
        let jid: Jid = "ROMeo@montague.lit/orchard".parse().unwrap();
        assert_eq!(jid.local(), Some("romeo"));
    }

    #[test]
    fn to_bare_drops_resource() {
        let jid: Jid = "romeo@montague.lit/orchard".parse().unwrap();
        let bare = jid.to_bare();
        assert_eq!(bare.resource(), None);
        assert_eq!(bare, "romeo@montague.lit".parse().unwrap());
    }

    #[test]
    fn display_round_trips() {
        let jid: Jid = "romeo@montague.lit/orchard".parse().unwrap();
        assert_eq!(jid.to_string(), "romeo@montague.lit/orchard");
    }

    #[test]
    fn with_resource_replaces_resource() {
        let jid: Jid = "romeo@montague.lit/orchard".parse().unwrap();
        let rebound = jid.with_resource("balcony").unwrap();
        assert_eq!(rebound.resource(), Some("balcony"));
    }
}
