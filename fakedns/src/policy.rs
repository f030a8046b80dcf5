//! The per-name policy model: what to answer for which domain.
//!
//! A [`RuleTable`] is built once from the configuration and read concurrently
//! by the dispatcher without synchronization; nothing in here mutates after
//! construction.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use dns_wire::{DomainName, RecordType};
use serde_yaml::Value;

pub use pattern::{Candidate, Pattern};

/// How to answer queries for a matched domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Relay the query to the upstream resolver.
    Forward,
    /// Answer with an empty NXDOMAIN response.
    NxDomain,
    /// Answer from the table's global default answer.
    DefaultValue,
    /// Answer from an inline answer spec.
    Custom(AnswerSpec),
}

/// The record values to answer with for a single domain, keyed by record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSpec {
    records: BTreeMap<RecordType, RecordSet>,
}

/// An ordered list of values for one record type.
///
/// Values are typed at configuration load so that malformed addresses and
/// names abort startup instead of failing individual queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSet {
    A(Vec<Ipv4Addr>),
    Aaaa(Vec<Ipv6Addr>),
    Mx(Vec<(u16, DomainName)>),
    Ns(Vec<DomainName>),
    /// Values for a recognized record type we cannot synthesize (yet).
    /// Kept verbatim; querying for them fails that query only.
    Verbatim(Vec<String>),
}

const RECORD_TAGS: &[(&str, RecordType)] = &[
    ("A", RecordType::A),
    ("AAAA", RecordType::AAAA),
    ("CNAME", RecordType::CNAME),
    ("MX", RecordType::MX),
    ("NS", RecordType::NS),
    ("PTR", RecordType::PTR),
    ("SOA", RecordType::SOA),
    ("SRV", RecordType::SRV),
    ("TXT", RecordType::TXT),
];

pub(crate) fn record_type_for_tag(tag: &str) -> Option<RecordType> {
    RECORD_TAGS
        .iter()
        .find_map(|(name, rtype)| (*name == tag).then_some(*rtype))
}

pub(crate) fn is_recognized_query_type(rtype: RecordType) -> bool {
    RECORD_TAGS.iter().any(|(_, known)| *known == rtype)
}

impl AnswerSpec {
    /// Builds an answer spec from one of the three configuration surface
    /// forms: a bare address, a list of addresses, or a record-type mapping.
    pub fn from_value(value: &Value) -> Result<Self, InvalidAnswer> {
        match value {
            Value::String(address) => Self::from_address(address),
            Value::Sequence(addresses) => Self::from_address_list(addresses),
            Value::Mapping(mapping) => Self::from_mapping(mapping),
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::Tagged(_) => {
                Err(InvalidAnswer::UnsupportedShape)
            }
        }
    }

    fn from_address(address: &str) -> Result<Self, InvalidAnswer> {
        let mut records = BTreeMap::new();

        if let Ok(v4) = address.parse::<Ipv4Addr>() {
            records.insert(RecordType::A, RecordSet::A(vec![v4]));
        } else if let Ok(v6) = address.parse::<Ipv6Addr>() {
            records.insert(RecordType::AAAA, RecordSet::Aaaa(vec![v6]));
        } else {
            return Err(InvalidAnswer::NotAnAddress(address.to_owned()));
        }

        Ok(Self { records })
    }

    fn from_address_list(addresses: &[Value]) -> Result<Self, InvalidAnswer> {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();

        for value in addresses {
            let address = value.as_str().ok_or(InvalidAnswer::NotAString)?;

            if let Ok(addr) = address.parse::<Ipv4Addr>() {
                v4.push(addr);
            } else if let Ok(addr) = address.parse::<Ipv6Addr>() {
                v6.push(addr);
            } else {
                return Err(InvalidAnswer::NotAnAddress(address.to_owned()));
            }
        }

        let mut records = BTreeMap::new();

        if !v4.is_empty() {
            records.insert(RecordType::A, RecordSet::A(v4));
        }
        if !v6.is_empty() {
            records.insert(RecordType::AAAA, RecordSet::Aaaa(v6));
        }
        if records.is_empty() {
            return Err(InvalidAnswer::Empty);
        }

        Ok(Self { records })
    }

    fn from_mapping(mapping: &serde_yaml::Mapping) -> Result<Self, InvalidAnswer> {
        let mut records = BTreeMap::new();

        for (key, value) in mapping {
            let tag = key.as_str().ok_or(InvalidAnswer::NotAString)?;
            let rtype = record_type_for_tag(tag)
                .ok_or_else(|| InvalidAnswer::UnknownRecordType(tag.to_owned()))?;

            // A scalar value is shorthand for a single-element list.
            let values = match value {
                Value::String(scalar) => vec![scalar.clone()],
                Value::Sequence(list) => list
                    .iter()
                    .map(|v| v.as_str().map(ToOwned::to_owned).ok_or(InvalidAnswer::NotAString))
                    .collect::<Result<Vec<_>, _>>()?,
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::Mapping(_)
                | Value::Tagged(_) => return Err(InvalidAnswer::NotAString),
            };

            if values.is_empty() {
                return Err(InvalidAnswer::Empty);
            }

            records.insert(rtype, RecordSet::from_values(rtype, values)?);
        }

        if records.is_empty() {
            return Err(InvalidAnswer::Empty);
        }

        Ok(Self { records })
    }

    pub fn get(&self, rtype: RecordType) -> Option<&RecordSet> {
        self.records.get(&rtype)
    }
}

impl RecordSet {
    fn from_values(rtype: RecordType, values: Vec<String>) -> Result<Self, InvalidAnswer> {
        let set = match rtype {
            RecordType::A => Self::A(
                values
                    .iter()
                    .map(|v| {
                        v.parse()
                            .map_err(|_| InvalidAnswer::NotAnAddress(v.clone()))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            RecordType::AAAA => Self::Aaaa(
                values
                    .iter()
                    .map(|v| {
                        v.parse()
                            .map_err(|_| InvalidAnswer::NotAnAddress(v.clone()))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            RecordType::MX => Self::Mx(
                values
                    .iter()
                    .map(|v| parse_mx(v))
                    .collect::<Result<_, _>>()?,
            ),
            RecordType::NS => Self::Ns(
                values
                    .iter()
                    .map(|v| parse_domain(v))
                    .collect::<Result<_, _>>()?,
            ),
            _ => Self::Verbatim(values),
        };

        Ok(set)
    }
}

/// Parses an MX value: either `exchange` or `preference exchange`.
///
/// The preference defaults to 0 when only an exchange is given.
fn parse_mx(value: &str) -> Result<(u16, DomainName), InvalidAnswer> {
    let mut parts = value.split_whitespace();

    let first = parts
        .next()
        .ok_or_else(|| InvalidAnswer::InvalidMxValue(value.to_owned()))?;

    match parts.next() {
        None => Ok((0, parse_domain(first)?)),
        Some(exchange) if parts.next().is_none() => {
            let preference = first
                .parse()
                .map_err(|_| InvalidAnswer::InvalidMxValue(value.to_owned()))?;

            Ok((preference, parse_domain(exchange)?))
        }
        Some(_) => Err(InvalidAnswer::InvalidMxValue(value.to_owned())),
    }
}

fn parse_domain(value: &str) -> Result<DomainName, InvalidAnswer> {
    DomainName::vec_from_str(value).map_err(|_| InvalidAnswer::InvalidDomainName(value.to_owned()))
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidAnswer {
    #[error("`{0}` is not a valid IPv4 or IPv6 address")]
    NotAnAddress(String),
    #[error("`{0}` is not a recognized DNS record type")]
    UnknownRecordType(String),
    #[error("`{0}` is not a valid domain name")]
    InvalidDomainName(String),
    #[error("`{0}` is not a valid MX value; expected `exchange` or `preference exchange`")]
    InvalidMxValue(String),
    #[error("record values must be strings")]
    NotAString,
    #[error("an answer must contain at least one record value")]
    Empty,
    #[error("an answer must be an address, a list of addresses or a record-type mapping")]
    UnsupportedShape,
}

/// The insertion-ordered rule list plus the fallback for unmatched names.
#[derive(Debug)]
pub struct RuleTable {
    rules: Vec<(Pattern, Policy)>,
    default_policy: Policy,
    default_answer: Option<AnswerSpec>,
}

impl RuleTable {
    pub fn new(
        rules: Vec<(Pattern, Policy)>,
        default_policy: Policy,
        default_answer: Option<AnswerSpec>,
    ) -> Result<Self, InvalidTable> {
        if default_policy == Policy::DefaultValue && default_answer.is_none() {
            return Err(InvalidTable::MissingDefaultAnswer);
        }

        Ok(Self {
            rules,
            default_policy,
            default_answer,
        })
    }

    /// Returns the first rule matching `name`, in insertion order.
    pub fn lookup(&self, name: &Candidate) -> Option<&Policy> {
        self.rules
            .iter()
            .find_map(|(pattern, policy)| pattern.matches(name).then_some(policy))
    }

    pub fn default_policy(&self) -> &Policy {
        &self.default_policy
    }

    pub fn default_answer(&self) -> Option<&AnswerSpec> {
        self.default_answer.as_ref()
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTable {
    #[error("`default_dns_policy` is `default_value` but no `default_dns_value` is configured")]
    MissingDefaultAnswer,
}

mod pattern {
    use std::fmt;

    use dns_wire::DomainName;
    use regex::Regex;

    /// A domain pattern: literal characters plus `*` standing for any run of
    /// characters, dots included, the empty run too.
    ///
    /// Matching is case-insensitive and anchored at the start of the name
    /// only; the pattern must cover a prefix of the candidate, not the whole
    /// name. `*foo.com` matches `barfoo.com`, `foo.*` matches `foo.com` and
    /// `foo.org`, and a literal `foo.com` does not match `a.foo.com`.
    pub struct Pattern {
        regex: Regex,
        original: String,
    }

    impl Pattern {
        pub fn new(pattern: &str) -> Result<Self, regex::Error> {
            let lowered = pattern.to_lowercase();
            let wildcards = regex::escape(&lowered).replace(r"\*", ".*");
            let regex = Regex::new(&format!("^{wildcards}"))?;

            Ok(Self {
                regex,
                original: lowered,
            })
        }

        pub fn matches(&self, name: &Candidate) -> bool {
            self.regex.is_match(name.as_str())
        }
    }

    impl fmt::Display for Pattern {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.original.fmt(f)
        }
    }

    impl fmt::Debug for Pattern {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_tuple("Pattern").field(&self.original).finish()
        }
    }

    impl PartialEq for Pattern {
        fn eq(&self, other: &Self) -> bool {
            self.original == other.original
        }
    }

    impl Eq for Pattern {}

    /// A query name prepared for matching: lowercased, trailing root dot
    /// stripped.
    pub struct Candidate(String);

    impl Candidate {
        pub fn from_domain(domain: &DomainName) -> Self {
            Self::from(domain.to_string().as_str())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl From<&str> for Candidate {
        fn from(name: &str) -> Self {
            let lowered = name.to_lowercase();
            let stripped = lowered.strip_suffix('.').unwrap_or(&lowered);

            Self(stripped.to_owned())
        }
    }

    #[cfg(test)]
    mod tests {
        use test_case::test_case;

        use super::*;

        #[test_case("foo.com", "foo.com"; "exact name")]
        #[test_case("foo.com", "FOO.com"; "case folded")]
        #[test_case("foo.com", "foo.com."; "trailing root dot stripped")]
        #[test_case("*.foobar.com", "a.foobar.com"; "wildcard subdomain")]
        #[test_case("*foo.com", "barfoo.com"; "wildcard mid name")]
        #[test_case("*foo.com", "foo.com"; "wildcard matches empty run")]
        #[test_case("foo.*", "foo.com"; "wildcard tld com")]
        #[test_case("foo.*", "foo.org"; "wildcard tld org")]
        #[test_case("foo*.bar*.com", "foobar.barfoo.com"; "multiple wildcards")]
        #[test_case("*", "anything.at.all"; "lone wildcard")]
        #[test_case("foo.com", "foo.com.org"; "prefix of longer name")]
        fn matches(pattern: &str, name: &str) {
            let pattern = Pattern::new(pattern).unwrap();

            assert!(pattern.matches(&Candidate::from(name)));
        }

        #[test_case("foo.com", "a.foo.com"; "exact name does not match subdomain")]
        #[test_case("foo.com", "foo.org"; "different tld")]
        #[test_case("*.foobar.com", "foobar.org"; "wildcard requires suffix")]
        fn rejects(pattern: &str, name: &str) {
            let pattern = Pattern::new(pattern).unwrap();

            assert!(!pattern.matches(&Candidate::from(name)));
        }

        #[test]
        fn escapes_regex_metacharacters() {
            let pattern = Pattern::new("foo.com").unwrap();

            // The dot is a literal dot, not "any character".
            assert!(!pattern.matches(&Candidate::from("fooXcom")));
        }
    }
}
