// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::io::{self, Read, Write};

use async_channel::TrySendError;
use tracing::warn;

use crate::ledger;
use crate::Serializable;

/// Protocol discriminator of every block-sync packet.
pub const PROTOCOL_BLOCK: u8 = 1;

/// Message definition
#[derive(Debug, Default, Clone)]
pub struct Message {
    pub payload: Payload,

    pub metadata: Option<Metadata>,
}

/// Defines transport-related properties of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Index of the peer the transport received this message from.
    pub src_peer: u16,
}

impl Serializable for Message {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[PROTOCOL_BLOCK, self.topic() as u8])?;

        match &self.payload {
            Payload::GetLastBlockNumber => Ok(()),
            Payload::LastBlockNumber(p) => p.write(w),
            Payload::GetHeaders(p) => p.write(w),
            Payload::Headers(p) => p.write(w),
            Payload::GetBlock(p) => p.write(w),
            Payload::BlockResp(p) => p.write(w),
            Payload::Block(p) => p.write(w),
            Payload::Empty => Ok(()), /* internal message, not sent on the wire */
        }
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;

        if buf[0] != PROTOCOL_BLOCK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unknown protocol",
            ));
        }

        let topic = Topics::from(buf[1]);
        let payload = match topic {
            Topics::GetLastBlockNumber => Payload::GetLastBlockNumber,
            Topics::LastBlockNumber => {
                Payload::LastBlockNumber(payload::LastBlockNumber::read(r)?)
            }
            Topics::GetHeaders => {
                Payload::GetHeaders(payload::GetHeaders::read(r)?)
            }
            Topics::Headers => Payload::Headers(payload::HeaderBatch::read(r)?),
            Topics::GetBlock => Payload::GetBlock(payload::GetBlock::read(r)?),
            Topics::BlockResp => {
                Payload::BlockResp(Box::new(ledger::Block::read(r)?))
            }
            Topics::Block => Payload::Block(Box::new(ledger::Block::read(r)?)),
            Topics::Unknown => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unknown topic",
                ))
            }
        };

        Ok(Message {
            payload,
            metadata: Default::default(),
        })
    }
}

impl Message {
    /// Creates topics.GetLastBlockNumber message
    pub fn new_get_last_block_number() -> Message {
        Self {
            payload: Payload::GetLastBlockNumber,
            ..Default::default()
        }
    }

    /// Creates topics.LastBlockNumber message
    pub fn new_last_block_number(number: u32) -> Message {
        Self {
            payload: Payload::LastBlockNumber(payload::LastBlockNumber {
                number,
            }),
            ..Default::default()
        }
    }

    /// Creates topics.GetHeaders message
    pub fn new_get_headers(begin: u32, end: u32) -> Message {
        Self {
            payload: Payload::GetHeaders(payload::GetHeaders { begin, end }),
            ..Default::default()
        }
    }

    /// Creates topics.Headers message
    pub fn new_headers(headers: Vec<ledger::Header>) -> Message {
        Self {
            payload: Payload::Headers(payload::HeaderBatch { headers }),
            ..Default::default()
        }
    }

    /// Creates topics.GetBlock message
    pub fn new_get_block(number: u32) -> Message {
        Self {
            payload: Payload::GetBlock(payload::GetBlock { number }),
            ..Default::default()
        }
    }

    /// Creates topics.BlockResp message
    pub fn new_block_resp(payload: Box<ledger::Block>) -> Message {
        Self {
            payload: Payload::BlockResp(payload),
            ..Default::default()
        }
    }

    /// Creates topics.Block message
    pub fn new_block(payload: Box<ledger::Block>) -> Message {
        Self {
            payload: Payload::Block(payload),
            ..Default::default()
        }
    }

    pub fn topic(&self) -> Topics {
        match &self.payload {
            Payload::GetLastBlockNumber => Topics::GetLastBlockNumber,
            Payload::LastBlockNumber(_) => Topics::LastBlockNumber,
            Payload::GetHeaders(_) => Topics::GetHeaders,
            Payload::Headers(_) => Topics::Headers,
            Payload::GetBlock(_) => Topics::GetBlock,
            Payload::BlockResp(_) => Topics::BlockResp,
            Payload::Block(_) => Topics::Block,
            Payload::Empty => Topics::Unknown,
        }
    }

    pub fn src_peer(&self) -> Option<u16> {
        self.metadata.as_ref().map(|m| m.src_peer)
    }
}

#[derive(Debug, Default, Clone)]
pub enum Payload {
    GetLastBlockNumber,
    LastBlockNumber(payload::LastBlockNumber),
    GetHeaders(payload::GetHeaders),
    Headers(payload::HeaderBatch),
    GetBlock(payload::GetBlock),
    BlockResp(Box<ledger::Block>),
    Block(Box<ledger::Block>),

    #[default]
    Empty,
}

pub mod payload {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LastBlockNumber {
        pub number: u32,
    }

    impl Serializable for LastBlockNumber {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.number.to_le_bytes())
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let number = Self::read_u32_le(r)?;
            Ok(LastBlockNumber { number })
        }
    }

    /// Requests the exact ascending header run `begin..=end`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetHeaders {
        pub begin: u32,
        pub end: u32,
    }

    impl Serializable for GetHeaders {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.begin.to_le_bytes())?;
            w.write_all(&self.end.to_le_bytes())?;
            Ok(())
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let begin = Self::read_u32_le(r)?;
            let end = Self::read_u32_le(r)?;
            Ok(GetHeaders { begin, end })
        }
    }

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    pub struct HeaderBatch {
        pub headers: Vec<ledger::Header>,
    }

    impl Serializable for HeaderBatch {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            let len = self.headers.len() as u32;
            w.write_all(&len.to_le_bytes())?;

            for header in &self.headers {
                header.write(w)?;
            }

            Ok(())
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let len = Self::read_u32_le(r)?;
            let mut headers = Vec::with_capacity(len as usize);
            for _ in 0..len {
                headers.push(ledger::Header::read(r)?);
            }

            Ok(HeaderBatch { headers })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetBlock {
        pub number: u32,
    }

    impl Serializable for GetBlock {
        fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
            w.write_all(&self.number.to_le_bytes())
        }

        fn read<R: Read>(r: &mut R) -> io::Result<Self>
        where
            Self: Sized,
        {
            let number = Self::read_u32_le(r)?;
            Ok(GetBlock { number })
        }
    }
}

macro_rules! map_topic {
    ($v:expr, $enum_v:expr) => {
        if $v == $enum_v as u8 {
            return $enum_v;
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Default)]
pub enum Topics {
    // Data exchange topics.
    GetLastBlockNumber = 8,
    LastBlockNumber = 9,
    GetHeaders = 10,
    Headers = 11,
    GetBlock = 12,
    BlockResp = 13,

    // Fire-and-forget messaging
    Block = 14,

    #[default]
    Unknown = 255,
}

impl From<u8> for Topics {
    fn from(v: u8) -> Self {
        map_topic!(v, Topics::GetLastBlockNumber);
        map_topic!(v, Topics::LastBlockNumber);
        map_topic!(v, Topics::GetHeaders);
        map_topic!(v, Topics::Headers);
        map_topic!(v, Topics::GetBlock);
        map_topic!(v, Topics::BlockResp);
        map_topic!(v, Topics::Block);

        Topics::Unknown
    }
}

impl From<Topics> for u8 {
    fn from(t: Topics) -> Self {
        t as u8
    }
}

/// AsyncQueue is a thin wrapper of async_channel.
#[derive(Clone)]
pub struct AsyncQueue<M: Clone> {
    receiver: async_channel::Receiver<M>,
    sender: async_channel::Sender<M>,

    label: &'static str,
}

impl<M: Clone> AsyncQueue<M> {
    /// Creates a bounded queue. Senders over capacity are dropped with a
    /// warn, trading completeness for backpressure.
    pub fn bounded(cap: usize, label: &'static str) -> Self {
        let (sender, receiver) = async_channel::bounded(cap);
        Self {
            receiver,
            sender,
            label,
        }
    }

    pub fn send(&self, msg: M) -> async_channel::Send<'_, M> {
        self.sender.send(msg)
    }

    pub fn try_send(&self, msg: M) {
        if let Err(e) = self.sender.try_send(msg) {
            match e {
                TrySendError::Full(_) => {
                    warn!("queue ({}) is full", self.label)
                }
                TrySendError::Closed(_) => {
                    warn!("queue ({}) is closed", self.label)
                }
            };
        }
    }

    pub fn recv(&self) -> async_channel::Recv<'_, M> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, async_channel::TryRecvError> {
        self.receiver.try_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Block, Header, Transaction};

    fn sample_header(number: u32) -> Header {
        Header {
            version: 3,
            number,
            timestamp: 123456789,
            prev_block_hash: [1; 32],
            merkle_root: [2; 32],
            hash: [6; 32],
        }
    }

    #[test]
    fn test_serialize() {
        assert_serialize(sample_header(1888881));

        let sample_block = Block::new(
            sample_header(42),
            vec![Transaction::new(vec![9, 9, 9])],
        )
        .expect("should be valid block");

        assert_serialize(sample_block);

        assert_serialize(payload::LastBlockNumber { number: 717 });
        assert_serialize(payload::GetHeaders { begin: 11, end: 20 });
        assert_serialize(payload::HeaderBatch {
            headers: (11..=20).map(sample_header).collect(),
        });
        assert_serialize(payload::GetBlock { number: 12 });
    }

    #[test]
    fn test_topics() {
        let messages = [
            Message::new_get_last_block_number(),
            Message::new_last_block_number(1),
            Message::new_get_headers(1, 10),
            Message::new_headers(vec![sample_header(1)]),
            Message::new_get_block(1),
            Message::new_block_resp(Box::new(Block::default())),
            Message::new_block(Box::new(Block::default())),
        ];

        for msg in messages {
            assert_ne!(msg.topic(), Topics::Unknown);
            assert_eq!(Topics::from(msg.topic() as u8), msg.topic());

            let mut buf = vec![];
            msg.write(&mut buf).expect("all written");
            let dup = Message::read(&mut &buf[..]).expect("all read");
            assert_eq!(msg.topic(), dup.topic());
        }
    }

    fn assert_serialize<S: Serializable + PartialEq + core::fmt::Debug>(v: S) {
        let mut buf = vec![];
        assert!(v.write(&mut buf).is_ok());
        let dup = S::read(&mut &buf[..]).expect("deserialize is ok");
        assert_eq!(
            v,
            dup,
            "failed to (de)serialize {}",
            std::any::type_name::<S>()
        );
    }
}
