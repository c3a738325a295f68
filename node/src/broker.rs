// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

pub mod conf;

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use node_data::message::{payload, AsyncQueue, Message, Payload, Topics};
use smallvec::SmallVec;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::chain::ChainEngine;
use crate::database::Ledger;
use crate::{database, LongLivedService, Network};

const TOPICS: &[u8] = &[
    Topics::GetLastBlockNumber as u8,
    Topics::GetHeaders as u8,
    Topics::GetBlock as u8,
];

struct Response {
    /// A response usually consists of a single message. A header range is
    /// still a single message, but the type leaves room for multi-message
    /// answers.
    msgs: SmallVec<[Message; 1]>,

    /// Index of the peer the response is sent to.
    recv_peer: u16,
}

impl Response {
    /// Creates a new response from a single message.
    fn new_from_msg(msg: Message, recv_peer: u16) -> Self {
        Self {
            msgs: SmallVec::from_buf([msg]),
            recv_peer,
        }
    }
}

/// Implements a request-for-data service.
///
/// The data broker is the serving half of the block-sync wire protocol: it
/// answers the tip, header and block requests this node sends out when it
/// is the one catching up.
///
/// Similar to a HTTP Server, the data broker processes each request in
/// a separate tokio::task. It also limits the number of concurrent
/// requests.
pub struct DataBrokerSrv {
    /// A queue of pending requests to process.
    /// Request here is literally a GET message
    requests: AsyncQueue<Message>,

    /// Limits the number of ongoing requests.
    limit_ongoing_requests: Arc<Semaphore>,

    conf: conf::Params,
}

impl DataBrokerSrv {
    pub fn new(conf: conf::Params) -> Self {
        info!("DataBrokerSrv::new with conf {:?}", conf);
        let permits = conf.max_ongoing_requests;
        Self {
            conf,
            requests: AsyncQueue::bounded(conf.max_queue_size, "broker"),
            limit_ongoing_requests: Arc::new(Semaphore::new(permits)),
        }
    }
}

#[async_trait]
impl<N: Network, DB: database::DB, C: ChainEngine> LongLivedService<N, DB, C>
    for DataBrokerSrv
{
    async fn execute(
        &mut self,
        network: Arc<RwLock<N>>,
        db: Arc<RwLock<DB>>,
        _chain: Arc<RwLock<C>>,
    ) -> anyhow::Result<usize> {
        if self.conf.max_ongoing_requests == 0 {
            return Err(anyhow!("max_ongoing_requests must be greater than 0"));
        }

        // Register routes
        LongLivedService::<N, DB, C>::add_routes(
            self,
            TOPICS,
            self.requests.clone(),
            &network,
        )
        .await?;

        info!("data_broker service started");

        loop {
            // Wait until we can process a new request. We limit the number
            // of concurrent requests to mitigate a DoS attack.
            let permit =
                self.limit_ongoing_requests.clone().acquire_owned().await?;

            // Wait for a request to process.
            let msg = self.requests.recv().await?;

            let network = network.clone();
            let db = db.clone();
            let conf = self.conf;

            // Spawn a task to handle the request asynchronously.
            tokio::spawn(async move {
                match Self::handle_request(&db, &msg, &conf).await {
                    Ok(resp) => {
                        let net = network.read().await;
                        for msg in resp.msgs {
                            let send = net.send_to_peer(&msg, resp.recv_peer);
                            if let Err(e) = send.await {
                                warn!("Unable to send_to_peer {e}")
                            };
                        }
                    }
                    Err(e) => {
                        debug!("error on handling msg: {}", e);
                    }
                };

                // Release the permit.
                drop(permit);
            });
        }
    }

    /// Returns service name.
    fn name(&self) -> &'static str {
        "data_broker"
    }
}

impl DataBrokerSrv {
    /// Handles inbound requests.
    async fn handle_request<DB: database::DB>(
        db: &Arc<RwLock<DB>>,
        msg: &Message,
        conf: &conf::Params,
    ) -> anyhow::Result<Response> {
        // source peer of the request becomes the receiver of the response
        let recv_peer = msg
            .src_peer()
            .ok_or_else(|| anyhow!("invalid metadata src_peer"))?;

        match &msg.payload {
            // Handle GetLastBlockNumber requests
            Payload::GetLastBlockNumber => {
                let msg = Self::handle_get_last_block_number(db).await?;
                Ok(Response::new_from_msg(msg, recv_peer))
            }
            // Handle GetHeaders requests
            Payload::GetHeaders(m) => {
                let msg = Self::handle_get_headers(db, m, conf).await?;
                Ok(Response::new_from_msg(msg, recv_peer))
            }
            // Handle GetBlock requests
            Payload::GetBlock(m) => {
                let msg = Self::handle_get_block(db, m).await?;
                Ok(Response::new_from_msg(msg, recv_peer))
            }
            _ => Err(anyhow!("unhandled request message topic")),
        }
    }

    /// Handles a GetLastBlockNumber request with the tip of the persisted
    /// chain.
    async fn handle_get_last_block_number<DB: database::DB>(
        db: &Arc<RwLock<DB>>,
    ) -> Result<Message> {
        let number = db.read().await.view(|t| t.tip_number())?;
        Ok(Message::new_last_block_number(number))
    }

    /// Handles a GetHeaders request. The answer is the exact ascending run
    /// `begin..=end`, or nothing at all if any of it is unavailable; the
    /// requester's timer deals with silence.
    async fn handle_get_headers<DB: database::DB>(
        db: &Arc<RwLock<DB>>,
        m: &payload::GetHeaders,
        conf: &conf::Params,
    ) -> Result<Message> {
        if m.end < m.begin {
            bail!("invalid headers range [{}..{}]", m.begin, m.end);
        }

        let len = (m.end - m.begin + 1) as usize;
        if len > conf.max_header_entries {
            bail!("headers range [{}..{}] too wide", m.begin, m.end);
        }

        let headers = db.read().await.view(|t| {
            let mut headers = Vec::with_capacity(len);
            for number in m.begin..=m.end {
                match t.fetch_header_by_number(number)? {
                    Some(header) => headers.push(header),
                    None => bail!("header {} not found", number),
                }
            }
            Ok(headers)
        })?;

        Ok(Message::new_headers(headers))
    }

    /// Handles a GetBlock request.
    async fn handle_get_block<DB: database::DB>(
        db: &Arc<RwLock<DB>>,
        m: &payload::GetBlock,
    ) -> Result<Message> {
        let blk = db
            .read()
            .await
            .view(|t| t.fetch_block_by_number(m.number))?
            .ok_or_else(|| anyhow!("block {} not found", m.number))?;

        Ok(Message::new_block_resp(Box::new(blk)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use node_data::ledger::{Block, Header};
    use node_data::message::Metadata;

    use super::*;

    /// In-memory chain view keyed by block number.
    #[derive(Default)]
    struct MemoryDb {
        blocks: BTreeMap<u32, Block>,
    }

    impl MemoryDb {
        fn with_chain(tip: u32) -> Self {
            let mut blocks = BTreeMap::new();
            for number in 0..=tip {
                let header = Header {
                    version: 1,
                    number,
                    timestamp: number as u64,
                    prev_block_hash: [number as u8; 32],
                    merkle_root: [0; 32],
                    hash: [0; 32],
                };
                let blk = Block::new(header, vec![]).expect("valid block");
                blocks.insert(number, blk);
            }
            Self { blocks }
        }
    }

    impl database::DB for MemoryDb {
        type P<'a> = &'a MemoryDb;

        fn view<F, T>(&self, f: F) -> T
        where
            F: for<'a> FnOnce(Self::P<'a>) -> T,
        {
            f(self)
        }
    }

    impl Ledger for &MemoryDb {
        fn tip_number(&self) -> Result<u32> {
            Ok(self.blocks.keys().last().copied().unwrap_or_default())
        }

        fn fetch_header_by_number(
            &self,
            number: u32,
        ) -> Result<Option<Header>> {
            Ok(self.blocks.get(&number).map(|b| b.header().clone()))
        }

        fn fetch_block_by_number(&self, number: u32) -> Result<Option<Block>> {
            Ok(self.blocks.get(&number).cloned())
        }
    }

    fn request(payload: Payload, src_peer: u16) -> Message {
        Message {
            payload,
            metadata: Some(Metadata { src_peer }),
        }
    }

    fn db(tip: u32) -> Arc<RwLock<MemoryDb>> {
        Arc::new(RwLock::new(MemoryDb::with_chain(tip)))
    }

    #[tokio::test]
    async fn test_get_last_block_number() {
        let db = db(42);
        let msg = request(Payload::GetLastBlockNumber, 9);

        let resp =
            DataBrokerSrv::handle_request(&db, &msg, &conf::Params::default())
                .await
                .expect("response");

        assert_eq!(resp.recv_peer, 9);
        match &resp.msgs[0].payload {
            Payload::LastBlockNumber(p) => assert_eq!(p.number, 42),
            p => panic!("unexpected payload {p:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_headers_exact_run() {
        let db = db(42);
        let msg = request(
            Payload::GetHeaders(payload::GetHeaders { begin: 5, end: 14 }),
            3,
        );

        let resp =
            DataBrokerSrv::handle_request(&db, &msg, &conf::Params::default())
                .await
                .expect("response");

        match &resp.msgs[0].payload {
            Payload::Headers(batch) => {
                let numbers: Vec<u32> =
                    batch.headers.iter().map(|h| h.number).collect();
                assert_eq!(numbers, (5..=14).collect::<Vec<u32>>());
            }
            p => panic!("unexpected payload {p:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_headers_rejects_wide_or_partial_ranges() {
        let db = db(42);
        let conf = conf::Params::default();

        // Wider than a fetch window
        let msg = request(
            Payload::GetHeaders(payload::GetHeaders { begin: 1, end: 11 }),
            3,
        );
        assert!(DataBrokerSrv::handle_request(&db, &msg, &conf)
            .await
            .is_err());

        // Beyond the stored tip: answered with silence, not a short run
        let msg = request(
            Payload::GetHeaders(payload::GetHeaders { begin: 40, end: 45 }),
            3,
        );
        assert!(DataBrokerSrv::handle_request(&db, &msg, &conf)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_get_block() {
        let db = db(42);

        let msg =
            request(Payload::GetBlock(payload::GetBlock { number: 17 }), 5);
        let resp =
            DataBrokerSrv::handle_request(&db, &msg, &conf::Params::default())
                .await
                .expect("response");

        match &resp.msgs[0].payload {
            Payload::BlockResp(blk) => assert_eq!(blk.header().number, 17),
            p => panic!("unexpected payload {p:?}"),
        }

        let msg =
            request(Payload::GetBlock(payload::GetBlock { number: 77 }), 5);
        assert!(DataBrokerSrv::handle_request(
            &db,
            &msg,
            &conf::Params::default()
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_request_without_metadata_is_rejected() {
        let db = db(1);
        let msg = Message {
            payload: Payload::GetLastBlockNumber,
            metadata: None,
        };

        assert!(DataBrokerSrv::handle_request(
            &db,
            &msg,
            &conf::Params::default()
        )
        .await
        .is_err());
    }
}
