//! Single-question DNS messages on top of the `domain` codec.
//!
//! The proxy only ever deals with one question per message and answers over
//! UDP, so this crate exposes exactly that: a [`Query`] parsed from a client
//! datagram, a [`Response`] parsed from an upstream resolver or built locally
//! via [`ResponseBuilder`], and constructors for the record data we can
//! synthesize.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use domain::{
    base::{
        Message, MessageBuilder, ParsedName, Question, message_builder::AnswerBuilder,
        name::FlattenInto as _,
    },
    dep::octseq::OctetsInto as _,
    rdata::AllRecordData,
};

pub type DomainName = domain::base::Name<Vec<u8>>;
pub type RecordType = domain::base::iana::Rtype;
pub type RecordClass = domain::base::iana::Class;
pub type ResponseCode = domain::base::iana::Rcode;

pub type OwnedRecord = domain::base::Record<DomainName, AllRecordData<Vec<u8>, DomainName>>;
pub type OwnedRecordData = AllRecordData<Vec<u8>, DomainName>;

pub type ParsedRecord<'a> =
    domain::base::Record<ParsedName<&'a [u8]>, AllRecordData<&'a [u8], ParsedName<&'a [u8]>>>;

/// A DNS query: a message with the QR bit unset and exactly one question.
#[derive(Clone)]
pub struct Query {
    message: Message<Vec<u8>>,
}

impl Query {
    pub fn parse(slice: &[u8]) -> Result<Self, Error> {
        let message = Message::from_octets(slice).map_err(|_| Error::TooShort)?;

        if message.header().qr() {
            return Err(Error::NotAQuery);
        }

        let _ = message.sole_question()?;

        Ok(Self {
            message: message.octets_into(),
        })
    }

    pub fn new(domain: DomainName, rtype: RecordType) -> Self {
        let mut builder = MessageBuilder::new_vec().question();
        builder.header_mut().set_qr(false);
        builder.header_mut().set_rd(true);
        builder.header_mut().set_random_id();

        builder
            .push((domain, rtype))
            .expect("vec-backed builder never fails");

        Self {
            message: builder.into_message(),
        }
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.message.header_mut().set_id(id);

        self
    }

    pub fn id(&self) -> u16 {
        self.message.header().id()
    }

    pub fn domain(&self) -> DomainName {
        self.question().into_qname().flatten_into()
    }

    pub fn qtype(&self) -> RecordType {
        self.question().qtype()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.message.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.message.into_octets()
    }

    fn question(&self) -> Question<ParsedName<&[u8]>> {
        self.message.sole_question().expect("verified in ctor")
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id())
            .field("qtype", &self.qtype())
            .field("domain", &self.domain())
            .finish()
    }
}

/// A DNS response: a message with the QR bit set and exactly one question.
pub struct Response {
    message: Message<Vec<u8>>,
}

impl Response {
    pub fn parse(slice: &[u8]) -> Result<Self, Error> {
        let message = Message::from_octets(slice).map_err(|_| Error::TooShort)?;

        if !message.header().qr() {
            return Err(Error::NotAResponse);
        }

        let _ = message.sole_question()?;

        // Verify upfront that all answer records parse so that `records` can't fail.
        for record in message.answer()? {
            record?.into_any_record::<AllRecordData<_, _>>()?;
        }

        Ok(Self {
            message: message.octets_into(),
        })
    }

    /// An empty NXDOMAIN response for the given query.
    pub fn nxdomain(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::NXDOMAIN).build()
    }

    /// An empty SERVFAIL response for the given query.
    pub fn servfail(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::SERVFAIL).build()
    }

    pub fn id(&self) -> u16 {
        self.message.header().id()
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.message.header_mut().set_id(id);

        self
    }

    pub fn response_code(&self) -> ResponseCode {
        self.message.header().rcode()
    }

    pub fn with_response_code(mut self, code: ResponseCode) -> Self {
        self.message.header_mut().set_rcode(code);

        self
    }

    pub fn answer_count(&self) -> u16 {
        self.message.header_counts().ancount()
    }

    pub fn records(&self) -> impl Iterator<Item = ParsedRecord<'_>> {
        self.message
            .answer()
            .expect("verified in ctor")
            .into_iter()
            .map(|record| {
                record
                    .expect("verified in ctor")
                    .into_any_record::<AllRecordData<_, _>>()
                    .expect("verified in ctor")
            })
    }

    pub fn as_slice(&self) -> &[u8] {
        self.message.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.message.into_octets()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("id", &self.id())
            .field("response_code", &self.response_code())
            .field("answers", &self.answer_count())
            .finish()
    }
}

/// Builds a [`Response`] for a given [`Query`], echoing its id, opcode,
/// recursion-desired flag and question.
pub struct ResponseBuilder {
    answers: AnswerBuilder<Vec<u8>>,
}

impl ResponseBuilder {
    pub fn for_query(query: &Query, code: ResponseCode) -> Self {
        let answers = MessageBuilder::new_vec()
            .start_answer(&query.message, code)
            .expect("vec-backed builder never fails");

        Self { answers }
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item: Into<OwnedRecord>>) -> Self {
        for record in records {
            self.answers
                .push(record.into())
                .expect("vec-backed builder never fails");
        }

        self
    }

    pub fn build(self) -> Response {
        Response {
            message: self.answers.into_message(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("byte slice is too short to contain a DNS message")]
    TooShort,
    #[error("DNS message is not a query")]
    NotAQuery,
    #[error("DNS message is not a response")]
    NotAResponse,
    #[error(transparent)]
    Parse(#[from] domain::base::wire::ParseError),
}

pub mod records {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use domain::rdata::{A, Aaaa, Mx, Ns};

    use super::{DomainName, OwnedRecordData};

    pub fn a(addr: Ipv4Addr) -> OwnedRecordData {
        OwnedRecordData::A(A::new(addr))
    }

    pub fn aaaa(addr: Ipv6Addr) -> OwnedRecordData {
        OwnedRecordData::Aaaa(Aaaa::new(addr))
    }

    pub fn mx(preference: u16, exchange: DomainName) -> OwnedRecordData {
        OwnedRecordData::Mx(Mx::new(preference, exchange))
    }

    pub fn ns(nameserver: DomainName) -> OwnedRecordData {
        OwnedRecordData::Ns(Ns::new(nameserver))
    }
}
