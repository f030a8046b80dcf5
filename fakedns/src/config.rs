//! The YAML configuration file and its translation into a rule table.
//!
//! Rule values come in three surface forms (bare address, address list,
//! record-type mapping) plus bare policy keywords; all of them are resolved
//! here, at load time, so the dispatch path only ever sees typed policies.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use serde_yaml::Value;

use crate::policy::{AnswerSpec, Pattern, Policy, RuleTable};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The upstream resolver queries are forwarded to.
    pub dns_server: Endpoint,
    /// The local address to serve DNS on.
    pub listening_info: Endpoint,
    /// What to do with queries no domain rule matches.
    pub default_dns_policy: DefaultPolicy,
    /// The global default answer; required iff `default_dns_policy` is
    /// `default_value`.
    #[serde(default)]
    pub default_dns_value: Option<Value>,
    /// Per-domain rules, in insertion order.
    #[serde(default)]
    pub domain_config: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultPolicy {
    Forward,
    Nxdomain,
    DefaultValue,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file `{}`", path.display()))?;

        let config = serde_yaml::from_str(&contents).context("Failed to parse configuration")?;

        Ok(config)
    }

    /// Validates the per-domain rules and the default policy into the
    /// immutable table the dispatcher reads.
    pub fn rules(&self) -> Result<RuleTable> {
        let default_answer = self
            .default_dns_value
            .as_ref()
            .map(AnswerSpec::from_value)
            .transpose()
            .context("Invalid `default_dns_value`")?;

        let mut rules = Vec::new();

        for (key, value) in self.domain_config.iter().flatten() {
            let domain = key
                .as_str()
                .context("`domain_config` keys must be domain patterns")?;
            let pattern = Pattern::new(domain)
                .with_context(|| format!("Invalid domain pattern `{domain}`"))?;
            let policy = policy_from_value(value)
                .with_context(|| format!("Invalid rule value for `{domain}`"))?;

            rules.push((pattern, policy));
        }

        let default_policy = match self.default_dns_policy {
            DefaultPolicy::Forward => Policy::Forward,
            DefaultPolicy::Nxdomain => Policy::NxDomain,
            DefaultPolicy::DefaultValue => Policy::DefaultValue,
        };

        let table = RuleTable::new(rules, default_policy, default_answer)?;

        Ok(table)
    }
}

/// A rule value is either a bare policy keyword or an answer spec.
fn policy_from_value(value: &Value) -> Result<Policy> {
    if let Some(keyword) = value.as_str() {
        match keyword {
            "forward" => return Ok(Policy::Forward),
            "nxdomain" => return Ok(Policy::NxDomain),
            "default_value" => return Ok(Policy::DefaultValue),
            _ => {}
        }
    }

    let spec = AnswerSpec::from_value(value)?;

    Ok(Policy::Custom(spec))
}
