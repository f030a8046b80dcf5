//! Turns an answer spec into wire resource records for a single query.

use dns_wire::{OwnedRecord, Query, RecordType, records};

use crate::policy::{AnswerSpec, RecordSet, is_recognized_query_type};

/// Synthesized records are not meant to be cached.
const TTL: u32 = 0;

/// Builds the answer records for `query` from `spec`.
///
/// An empty result is legitimate: it means the spec holds no records of the
/// queried type, and the finalizer reports that as NXDOMAIN. Record order
/// equals value order in the spec.
pub fn synthesize(query: &Query, spec: &AnswerSpec) -> Result<Vec<OwnedRecord>, SynthesisError> {
    let qtype = query.qtype();

    if !is_recognized_query_type(qtype) {
        return Err(SynthesisError::UnsupportedQueryType(qtype));
    }

    let Some(set) = spec.get(qtype) else {
        return Ok(Vec::new());
    };

    let data = match set {
        RecordSet::A(addrs) => addrs.iter().copied().map(records::a).collect::<Vec<_>>(),
        RecordSet::Aaaa(addrs) => addrs.iter().copied().map(records::aaaa).collect(),
        RecordSet::Mx(values) => values
            .iter()
            .map(|(preference, exchange)| records::mx(*preference, exchange.clone()))
            .collect(),
        RecordSet::Ns(names) => names.iter().cloned().map(records::ns).collect(),
        RecordSet::Verbatim(_) => return Err(SynthesisError::UnsupportedRecordType(qtype)),
    };

    let owner = query.domain();

    Ok(data
        .into_iter()
        .map(|data| OwnedRecord::from((owner.clone(), TTL, data)))
        .collect())
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    #[error("query type `{0}` is not in the record-type table")]
    UnsupportedQueryType(RecordType),
    #[error("cannot synthesize records of type `{0}`")]
    UnsupportedRecordType(RecordType),
}

#[cfg(test)]
mod tests {
    use dns_wire::{DomainName, RecordClass};

    use super::*;

    #[test]
    fn one_record_per_value_in_spec_order() {
        let spec = spec(r#"{ "A": ["1.2.3.4", "2.3.4.5"] }"#);
        let query = Query::new(name("foobar.com"), RecordType::A);

        let records = synthesize(&query, &spec).unwrap();

        let rendered = records
            .iter()
            .map(|r| r.data().to_string())
            .collect::<Vec<_>>();
        assert_eq!(rendered, vec!["1.2.3.4", "2.3.4.5"]);
    }

    #[test]
    fn records_carry_query_name_type_and_class() {
        let spec = spec(r#"{ "AAAA": ["::1"] }"#);
        let query = Query::new(name("foobar.com"), RecordType::AAAA);

        let records = synthesize(&query, &spec).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner(), &name("foobar.com"));
        assert_eq!(records[0].rtype(), RecordType::AAAA);
        assert_eq!(records[0].class(), RecordClass::IN);
    }

    #[test]
    fn absent_type_yields_no_records() {
        let spec = spec("127.0.0.1");
        let query = Query::new(name("foobar.com"), RecordType::AAAA);

        let records = synthesize(&query, &spec).unwrap();

        assert!(records.is_empty());
    }

    #[test]
    fn mx_records_keep_preference() {
        let spec = spec(r#"{ "MX": ["10 mail.foobar.com"] }"#);
        let query = Query::new(name("foobar.com"), RecordType::MX);

        let records = synthesize(&query, &spec).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rtype(), RecordType::MX);
        assert_eq!(records[0].data().to_string(), "10 mail.foobar.com");
    }

    #[test]
    fn ns_records_from_names() {
        let spec = spec(r#"{ "NS": ["ns1.foobar.com", "ns2.foobar.com"] }"#);
        let query = Query::new(name("foobar.com"), RecordType::NS);

        let records = synthesize(&query, &spec).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rtype(), RecordType::NS);
    }

    #[test]
    fn unrecognized_query_type_fails() {
        let spec = spec("127.0.0.1");
        let query = Query::new(name("foobar.com"), RecordType::CAA);

        let result = synthesize(&query, &spec);

        assert_eq!(
            result,
            Err(SynthesisError::UnsupportedQueryType(RecordType::CAA))
        );
    }

    #[test]
    fn verbatim_values_fail_per_query() {
        let spec = spec(r#"{ "TXT": ["hello"] }"#);
        let query = Query::new(name("foobar.com"), RecordType::TXT);

        let result = synthesize(&query, &spec);

        assert_eq!(
            result,
            Err(SynthesisError::UnsupportedRecordType(RecordType::TXT))
        );
    }

    fn spec(s: &str) -> AnswerSpec {
        AnswerSpec::from_value(&serde_yaml::from_str(s).unwrap()).unwrap()
    }

    fn name(n: &str) -> DomainName {
        DomainName::vec_from_str(n).unwrap()
    }
}
