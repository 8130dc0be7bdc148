//! Peer access control
//!
//! Rules are `any` (case-insensitive), a single address, or a CIDR network.
//! An empty rule set rejects every peer.

use crate::common::{Error, Result};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclRule {
    Any,
    Network { addr: IpAddr, prefix: u8 },
}

impl AclRule {
    pub fn matches(&self, peer: IpAddr) -> bool {
        match *self {
            AclRule::Any => true,
            AclRule::Network { addr, prefix } => match (addr, peer) {
                (IpAddr::V4(net), IpAddr::V4(peer)) => {
                    prefix_eq(&net.octets(), &peer.octets(), prefix)
                }
                (IpAddr::V6(net), IpAddr::V6(peer)) => {
                    prefix_eq(&net.octets(), &peer.octets(), prefix)
                }
                (IpAddr::V4(net), IpAddr::V6(peer)) => peer
                    .to_ipv4_mapped()
                    .is_some_and(|peer| prefix_eq(&net.octets(), &peer.octets(), prefix)),
                (IpAddr::V6(_), IpAddr::V4(_)) => false,
            },
        }
    }
}

fn prefix_eq(a: &[u8], b: &[u8], prefix: u8) -> bool {
    let full = (prefix / 8) as usize;
    let rest = prefix % 8;
    if a[..full] != b[..full] {
        return false;
    }
    if rest == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rest);
    (a[full] & mask) == (b[full] & mask)
}

impl FromStr for AclRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("any") {
            return Ok(AclRule::Any);
        }

        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| Error::Acl(format!("invalid address in rule '{}'", s)))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|&p| p <= max)
                .ok_or_else(|| Error::Acl(format!("invalid prefix in rule '{}'", s)))?,
            None => max,
        };

        Ok(AclRule::Network { addr, prefix })
    }
}

impl fmt::Display for AclRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclRule::Any => write!(f, "any"),
            AclRule::Network { addr, prefix } => write!(f, "{}/{}", addr, prefix),
        }
    }
}

/// Runtime-editable rule set
#[derive(Debug, Default)]
pub struct Acl {
    rules: RwLock<Vec<AclRule>>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Result<Self> {
        let acl = Self::new();
        for rule in rules {
            acl.add(rule.as_ref())?;
        }
        Ok(acl)
    }

    /// Add a rule. Adding an existing rule is a no-op.
    pub fn add(&self, rule: &str) -> Result<AclRule> {
        let rule: AclRule = rule.parse()?;
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        if !rules.contains(&rule) {
            rules.push(rule);
            tracing::info!("ACL rule added: {}", rule);
        }
        Ok(rule)
    }

    /// Remove a rule. Removing a rule that is not present is an error.
    pub fn del(&self, rule: &str) -> Result<AclRule> {
        let rule: AclRule = rule.parse()?;
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let pos = rules
            .iter()
            .position(|r| *r == rule)
            .ok_or_else(|| Error::NotFound(format!("ACL rule '{}'", rule)))?;
        rules.remove(pos);
        tracing::info!("ACL rule removed: {}", rule);
        Ok(rule)
    }

    pub fn verify(&self, peer: IpAddr) -> bool {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|rule| rule.matches(peer))
    }

    pub fn rules(&self) -> Vec<String> {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.to_string())
            .collect()
    }
}
