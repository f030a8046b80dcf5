//! Drives the listener and the set of in-flight queries on one reactor.

use std::convert::Infallible;
use std::future;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Context as _, Result};
use dns_wire::{Query, Response, ResponseCode};

use crate::{
    dispatch::{Dispatcher, Reply},
    finalize::finalize,
    sockets::{Inbound, Listener},
};

/// How long a forwarded query may wait for the upstream resolver.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_INFLIGHT_QUERIES: usize = 1000;

pub struct Eventloop {
    listener: Listener,
    dispatcher: Dispatcher,

    pending: futures_bounded::FuturesTupleSet<Result<Reply>, QueryMeta>,
}

struct QueryMeta {
    source: SocketAddr,
    query: Query,
}

impl Eventloop {
    pub fn new(listener: Listener, dispatcher: Dispatcher) -> Self {
        Self {
            listener,
            dispatcher,
            pending: futures_bounded::FuturesTupleSet::new(
                || futures_bounded::Delay::tokio(UPSTREAM_TIMEOUT),
                MAX_INFLIGHT_QUERIES,
            ),
        }
    }

    pub async fn run(&mut self) -> Result<Infallible> {
        future::poll_fn(|cx| self.poll(cx)).await
    }

    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Result<Infallible>> {
        loop {
            match self.pending.poll_unpin(cx) {
                Poll::Ready((result, meta)) => {
                    self.send_reply(meta, result);
                    continue;
                }
                Poll::Pending => {}
            }

            match self.listener.poll(cx) {
                Poll::Ready(inbound) => {
                    self.accept(inbound.context("UDP listener failed")?);
                    continue;
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }

    fn accept(&mut self, inbound: Inbound) {
        let Inbound { source, message } = inbound;

        let future = self.dispatcher.dispatch(message.clone());
        let meta = QueryMeta {
            source,
            query: message.clone(),
        };

        if self.pending.try_push(future, meta).is_err() {
            tracing::warn!(client = %source, "Too many in-flight queries; answering SERVFAIL");

            self.listener
                .send_response(source, Response::servfail(&message));
        }
    }

    fn send_reply(
        &mut self,
        meta: QueryMeta,
        result: Result<Result<Reply>, futures_bounded::Timeout>,
    ) {
        let QueryMeta { source, query } = meta;

        let response = match result {
            Ok(Ok(reply)) => finalize(&query, reply),
            Ok(Err(e)) => {
                tracing::warn!(domain = %query.domain(), "Failed to answer query: {e:#}");

                Response::servfail(&query)
            }
            Err(futures_bounded::Timeout { .. }) => {
                tracing::warn!(domain = %query.domain(), "Upstream query timed out");

                Response::servfail(&query)
            }
        };

        log_query(source, &query, &response);

        self.listener.send_response(source, response);
    }
}

/// One line per processed query: who asked what, and what we answered.
fn log_query(client: SocketAddr, query: &Query, response: &Response) {
    let domain = query.domain();
    let qtype = query.qtype();

    match response.response_code() {
        ResponseCode::NXDOMAIN => tracing::info!(%client, %qtype, %domain, "NXDomain"),
        code if response.answer_count() == 0 => {
            tracing::info!(%client, %qtype, %domain, rcode = %code, "Answered query without records")
        }
        _ => {
            let answers = response
                .records()
                .map(|r| format!("{} - {} - {}", r.rtype(), r.owner(), r.data()))
                .collect::<Vec<_>>()
                .join(", ");

            tracing::info!(%client, %qtype, %domain, %answers, "Answered query");
        }
    }
}
