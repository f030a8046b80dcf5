//! Wraps a dispatch result into the wire response sent back to the client.
//!
//! The one rule that earns this module its existence: an empty answer set is
//! reported as NXDOMAIN, never as NOERROR-with-no-data. Resolvers layered in
//! front of this proxy treat NOERROR-with-no-data as a miss and retry against
//! their secondary, which would defeat an `nxdomain` policy.

use dns_wire::{Query, Response, ResponseBuilder, ResponseCode};

use crate::dispatch::Reply;

/// Builds the final response for `query`, re-stamped with its message id.
///
/// Upstream responses pass through with authority and additional sections
/// untouched; only a NOERROR response with an empty answer section is
/// rewritten to NXDOMAIN. Upstream error codes (REFUSED, SERVFAIL, ...)
/// surface unchanged.
pub fn finalize(query: &Query, reply: Reply) -> Response {
    match reply {
        Reply::Records(records) if records.is_empty() => Response::nxdomain(query),
        Reply::Records(records) => ResponseBuilder::for_query(query, ResponseCode::NOERROR)
            .with_records(records)
            .build(),
        Reply::Upstream(response)
            if response.response_code() == ResponseCode::NOERROR
                && response.answer_count() == 0 =>
        {
            response
                .with_response_code(ResponseCode::NXDOMAIN)
                .with_id(query.id())
        }
        Reply::Upstream(response) => response.with_id(query.id()),
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use dns_wire::{DomainName, OwnedRecord, RecordType, records};

    use super::*;

    #[test]
    fn empty_records_become_nxdomain() {
        let query = query();

        let response = finalize(&query, Reply::Records(Vec::new()));

        assert_eq!(response.response_code(), ResponseCode::NXDOMAIN);
        assert_eq!(response.answer_count(), 0);
    }

    #[test]
    fn records_become_noerror_in_order() {
        let query = query();
        let records = vec![
            record(Ipv4Addr::new(1, 2, 3, 4)),
            record(Ipv4Addr::new(2, 3, 4, 5)),
        ];

        let response = finalize(&query, Reply::Records(records));

        assert_eq!(response.response_code(), ResponseCode::NOERROR);
        let answers = response
            .records()
            .map(|r| r.data().to_string())
            .collect::<Vec<_>>();
        assert_eq!(answers, vec!["1.2.3.4", "2.3.4.5"]);
    }

    #[test]
    fn empty_upstream_response_is_rewritten_to_nxdomain() {
        let query = query();
        let upstream = ResponseBuilder::for_query(&query, ResponseCode::NOERROR).build();

        let response = finalize(&query, Reply::Upstream(upstream));

        assert_eq!(response.response_code(), ResponseCode::NXDOMAIN);
    }

    #[test]
    fn upstream_error_code_surfaces_unchanged() {
        let query = query();
        let upstream = ResponseBuilder::for_query(&query, ResponseCode::REFUSED).build();

        let response = finalize(&query, Reply::Upstream(upstream));

        assert_eq!(response.response_code(), ResponseCode::REFUSED);
    }

    #[test]
    fn populated_upstream_response_passes_through() {
        let query = query();
        let upstream = ResponseBuilder::for_query(&query, ResponseCode::NOERROR)
            .with_records([record(Ipv4Addr::new(1, 2, 3, 4))])
            .build();

        let response = finalize(&query, Reply::Upstream(upstream));

        assert_eq!(response.response_code(), ResponseCode::NOERROR);
        assert_eq!(response.answer_count(), 1);
        assert_eq!(response.id(), query.id());
    }

    fn query() -> Query {
        Query::new(
            DomainName::vec_from_str("foobar.com").unwrap(),
            RecordType::A,
        )
    }

    fn record(addr: Ipv4Addr) -> OwnedRecord {
        OwnedRecord::from((
            DomainName::vec_from_str("foobar.com").unwrap(),
            0,
            records::a(addr),
        ))
    }
}
