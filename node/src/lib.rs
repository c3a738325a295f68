// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

pub mod broker;
pub mod chain;
pub mod database;
pub mod sync;

use std::sync::Arc;

use async_trait::async_trait;
use node_data::message::{AsyncQueue, Message};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info};

#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Broadcasts a message to all alive peers.
    async fn broadcast(&self, msg: &Message) -> anyhow::Result<()>;

    /// Broadcasts a message to all alive peers but the listed ones.
    ///
    /// Transports without exclusion support may fall back to a plain
    /// broadcast; receivers drop messages for heights they already have.
    async fn broadcast_except(
        &self,
        msg: &Message,
        exclude: &[u16],
    ) -> anyhow::Result<()> {
        let _ = exclude;
        self.broadcast(msg).await
    }

    /// Sends a message to the peer with the specified index.
    async fn send_to_peer(
        &self,
        msg: &Message,
        peer: u16,
    ) -> anyhow::Result<()>;

    /// Routes any message of the specified type to this queue.
    async fn add_route(
        &mut self,
        msg_type: u8,
        queue: AsyncQueue<Message>,
    ) -> anyhow::Result<()>;

    /// Retrieves information about the network.
    fn get_info(&self) -> anyhow::Result<String>;
}

/// Service processes specified set of messages and eventually produces a
/// DataSource query or update.
///
/// Service is allowed to propagate a message to the network as well.
#[async_trait]
pub trait LongLivedService<N: Network, DB: database::DB, C: chain::ChainEngine>:
    Send + Sync
{
    async fn execute(
        &mut self,
        network: Arc<RwLock<N>>,
        database: Arc<RwLock<DB>>,
        chain: Arc<RwLock<C>>,
    ) -> anyhow::Result<usize>;

    async fn add_routes(
        &self,
        my_topics: &[u8],
        queue: AsyncQueue<Message>,
        network: &Arc<RwLock<N>>,
    ) -> anyhow::Result<()> {
        let mut guard = network.write().await;
        for topic in my_topics {
            guard.add_route(*topic, queue.clone()).await?
        }
        Ok(())
    }

    /// Returns service name.
    fn name(&self) -> &'static str;
}

pub struct Node<N: Network, DB: database::DB, C: chain::ChainEngine> {
    network: Arc<RwLock<N>>,
    database: Arc<RwLock<DB>>,
    chain: Arc<RwLock<C>>,
}

impl<N: Network, DB: database::DB, C: chain::ChainEngine> Clone
    for Node<N, DB, C>
{
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
            database: self.database.clone(),
            chain: self.chain.clone(),
        }
    }
}

impl<N: Network, DB: database::DB, C: chain::ChainEngine> Node<N, DB, C> {
    pub fn new(n: N, d: DB, c: C) -> Self {
        Self {
            network: Arc::new(RwLock::new(n)),
            database: Arc::new(RwLock::new(d)),
            chain: Arc::new(RwLock::new(c)),
        }
    }

    pub fn database(&self) -> Arc<RwLock<DB>> {
        self.database.clone()
    }

    pub fn network(&self) -> Arc<RwLock<N>> {
        self.network.clone()
    }

    pub fn chain(&self) -> Arc<RwLock<C>> {
        self.chain.clone()
    }

    /// Sets up and runs a list of services, join-waiting until all of them
    /// have terminated.
    ///
    /// A service that resolves with [`ABORT_RCODE`] tears the whole node
    /// down. SIGINT is folded into the same result stream as one more
    /// abort source.
    pub async fn spawn_all(
        &self,
        service_list: Vec<Box<dyn LongLivedService<N, DB, C>>>,
    ) -> anyhow::Result<()> {
        let mut set = JoinSet::new();
        set.spawn(async {
            signal(SignalKind::interrupt())?.recv().await;
            Ok(ABORT_RCODE)
        });

        for mut s in service_list.into_iter() {
            let n = self.network.clone();
            let d = self.database.clone();
            let c = self.chain.clone();

            info!("starting service {}", s.name());

            set.spawn(async move { s.execute(n, d, c).await });
        }

        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(rcode)) if rcode == ABORT_RCODE => set.abort_all(),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("service terminated with err {}", e),
                // A task cancelled by abort_all
                Err(_) => {}
            }
        }

        info!("shutdown ...");

        Ok(())
    }
}

/// Service result code that makes [`Node::spawn_all`] abort every other
/// running service.
pub const ABORT_RCODE: usize = 2;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::Result;
    use node_data::ledger;

    use super::*;
    use crate::chain::{ChainEngine, SubmitResult};
    use crate::database::Ledger;

    struct NullNetwork;

    #[async_trait]
    impl Network for NullNetwork {
        async fn broadcast(&self, _msg: &Message) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_to_peer(
            &self,
            _msg: &Message,
            _peer: u16,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn add_route(
            &mut self,
            _msg_type: u8,
            _queue: AsyncQueue<Message>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        fn get_info(&self) -> anyhow::Result<String> {
            Ok("null".into())
        }
    }

    struct NullDb;

    impl database::DB for NullDb {
        type P<'a> = &'a NullDb;

        fn view<F, T>(&self, f: F) -> T
        where
            F: for<'a> FnOnce(Self::P<'a>) -> T,
        {
            f(self)
        }
    }

    impl Ledger for &NullDb {
        fn tip_number(&self) -> Result<u32> {
            Ok(0)
        }

        fn fetch_header_by_number(
            &self,
            _number: u32,
        ) -> Result<Option<ledger::Header>> {
            Ok(None)
        }

        fn fetch_block_by_number(
            &self,
            _number: u32,
        ) -> Result<Option<ledger::Block>> {
            Ok(None)
        }
    }

    struct NullChain;

    #[async_trait]
    impl ChainEngine for NullChain {
        async fn submit(
            &self,
            _blk: &ledger::Block,
        ) -> anyhow::Result<SubmitResult> {
            Ok(SubmitResult::Success)
        }
    }

    /// Resolves with the given result code as soon as it is spawned.
    struct OneShotSrv {
        rcode: usize,
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LongLivedService<NullNetwork, NullDb, NullChain> for OneShotSrv {
        async fn execute(
            &mut self,
            _network: Arc<RwLock<NullNetwork>>,
            _database: Arc<RwLock<NullDb>>,
            _chain: Arc<RwLock<NullChain>>,
        ) -> anyhow::Result<usize> {
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(self.rcode)
        }

        fn name(&self) -> &'static str {
            "one_shot"
        }
    }

    /// Runs until aborted.
    struct PendingSrv;

    #[async_trait]
    impl LongLivedService<NullNetwork, NullDb, NullChain> for PendingSrv {
        async fn execute(
            &mut self,
            _network: Arc<RwLock<NullNetwork>>,
            _database: Arc<RwLock<NullDb>>,
            _chain: Arc<RwLock<NullChain>>,
        ) -> anyhow::Result<usize> {
            std::future::pending::<()>().await;
            Ok(0)
        }

        fn name(&self) -> &'static str {
            "pending"
        }
    }

    #[tokio::test]
    async fn test_spawn_all_aborts_on_stop_code() {
        let node = Node::new(NullNetwork, NullDb, NullChain);
        let started = Arc::new(AtomicUsize::new(0));

        // The never-ending service is only torn down by the abort code of
        // the one-shot service; spawn_all returning at all proves it
        let services: Vec<
            Box<dyn LongLivedService<NullNetwork, NullDb, NullChain>>,
        > = vec![
            Box::new(PendingSrv),
            Box::new(OneShotSrv {
                rcode: ABORT_RCODE,
                started: started.clone(),
            }),
        ];

        node.spawn_all(services).await.expect("clean shutdown");
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_all_runs_services_to_completion() {
        let node = Node::new(NullNetwork, NullDb, NullChain);
        let started = Arc::new(AtomicUsize::new(0));

        // A plain result code aborts nothing; the abort code then tears
        // down the signal watcher so the join completes
        let services: Vec<
            Box<dyn LongLivedService<NullNetwork, NullDb, NullChain>>,
        > = vec![
            Box::new(OneShotSrv {
                rcode: 0,
                started: started.clone(),
            }),
            Box::new(OneShotSrv {
                rcode: ABORT_RCODE,
                started: started.clone(),
            }),
        ];

        node.spawn_all(services).await.expect("clean shutdown");
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }
}
