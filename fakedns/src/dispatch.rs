//! The per-query decision: classify a name against the rule table, then
//! produce the deferred answer.

use std::sync::Arc;

use anyhow::Result;
use dns_wire::{OwnedRecord, Query, Response};
use futures::{
    FutureExt as _,
    future::{self, BoxFuture},
};

use crate::{
    policy::{AnswerSpec, Candidate, Policy, RuleTable},
    synth,
    upstream::Upstream,
};

/// The raw material for a response, before finalization.
#[derive(Debug)]
pub enum Reply {
    /// Locally synthesized answer records; empty means NXDOMAIN.
    Records(Vec<OwnedRecord>),
    /// The upstream resolver's response, passed through.
    Upstream(Response),
}

/// What to do with a single query.
enum Action<'a> {
    Forward,
    NxDomain,
    Synthesize(&'a AnswerSpec),
}

pub struct Dispatcher {
    rules: Arc<RuleTable>,
    upstream: Upstream,
}

impl Dispatcher {
    pub fn new(rules: Arc<RuleTable>, upstream: Upstream) -> Self {
        Self { rules, upstream }
    }

    /// Resolves a query to its deferred answer.
    ///
    /// All policy branches expose the same future contract so the caller
    /// never branches on the action kind; the local branches are
    /// immediately ready.
    pub fn dispatch(&self, query: Query) -> BoxFuture<'static, Result<Reply>> {
        match self.action_for(&Candidate::from_domain(&query.domain())) {
            Ok(Action::Forward) => {
                let upstream = self.upstream.clone();

                async move { upstream.forward(query).await.map(Reply::Upstream) }.boxed()
            }
            Ok(Action::NxDomain) => future::ready(Ok(Reply::Records(Vec::new()))).boxed(),
            Ok(Action::Synthesize(spec)) => {
                let result = synth::synthesize(&query, spec)
                    .map(Reply::Records)
                    .map_err(anyhow::Error::new);

                future::ready(result).boxed()
            }
            Err(e) => future::ready(Err(anyhow::Error::new(e))).boxed(),
        }
    }

    fn action_for(&self, name: &Candidate) -> Result<Action<'_>, DispatchError> {
        let policy = self
            .rules
            .lookup(name)
            .unwrap_or_else(|| self.rules.default_policy());

        match policy {
            Policy::Forward => Ok(Action::Forward),
            Policy::NxDomain => Ok(Action::NxDomain),
            Policy::Custom(spec) => Ok(Action::Synthesize(spec)),
            Policy::DefaultValue => self
                .rules
                .default_answer()
                .map(Action::Synthesize)
                .ok_or(DispatchError::NoDefaultAnswer),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Guarded against at configuration load; reaching this is a bug.
    #[error("`default_value` policy is active but no default answer is configured")]
    NoDefaultAnswer,
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use dns_wire::{DomainName, RecordType};

    use super::*;
    use crate::policy::Pattern;

    #[tokio::test]
    async fn custom_rule_synthesizes_records() {
        let dispatcher = dispatcher(
            vec![(
                Pattern::new("*.foobar.com").unwrap(),
                Policy::Custom(spec("1.2.3.4")),
            )],
            Policy::NxDomain,
            None,
        );

        let reply = dispatcher
            .dispatch(query("a.foobar.com", RecordType::A))
            .await
            .unwrap();

        let Reply::Records(records) = reply else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data().to_string(), "1.2.3.4");
    }

    #[tokio::test]
    async fn nxdomain_policy_yields_empty_records() {
        let dispatcher = dispatcher(Vec::new(), Policy::NxDomain, None);

        let reply = dispatcher
            .dispatch(query("foobar.com", RecordType::A))
            .await
            .unwrap();

        let Reply::Records(records) = reply else {
            panic!("expected records");
        };
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn unmatched_name_falls_through_to_default_policy() {
        let dispatcher = dispatcher(
            vec![(Pattern::new("foo.com").unwrap(), Policy::NxDomain)],
            Policy::DefaultValue,
            Some(spec("127.0.0.1")),
        );

        // `foo.com` matches only the exact name, not subdomains.
        let reply = dispatcher
            .dispatch(query("a.foo.com", RecordType::A))
            .await
            .unwrap();

        let Reply::Records(records) = reply else {
            panic!("expected records");
        };
        assert_eq!(records[0].data().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn default_answer_without_matching_type_is_empty() {
        let dispatcher = dispatcher(Vec::new(), Policy::DefaultValue, Some(spec("127.0.0.1")));

        let reply = dispatcher
            .dispatch(query("foobar.com", RecordType::AAAA))
            .await
            .unwrap();

        let Reply::Records(records) = reply else {
            panic!("expected records");
        };
        assert!(records.is_empty());
    }

    fn dispatcher(
        rules: Vec<(Pattern, Policy)>,
        default_policy: Policy,
        default_answer: Option<AnswerSpec>,
    ) -> Dispatcher {
        let table = RuleTable::new(rules, default_policy, default_answer).unwrap();
        let upstream = Upstream::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 53)));

        Dispatcher::new(Arc::new(table), upstream)
    }

    fn query(domain: &str, rtype: RecordType) -> Query {
        Query::new(DomainName::vec_from_str(domain).unwrap(), rtype)
    }

    fn spec(value: &str) -> AnswerSpec {
        AnswerSpec::from_value(&serde_yaml::from_str(value).unwrap()).unwrap()
    }
}
