// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::io::{self, Read, Write};

use sha3::Digest;

use super::{Hash, Header};
use crate::Serializable;

#[derive(Default, Debug, Clone)]
pub struct Block {
    header: Header,
    txs: Vec<Transaction>,
}

impl PartialEq<Self> for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header.hash == other.header.hash
    }
}

impl Eq for Block {}

impl Block {
    /// Creates a new block and calculates block hash, if missing.
    pub fn new(header: Header, txs: Vec<Transaction>) -> io::Result<Self> {
        let mut b = Block { header, txs };
        b.calculate_hash()?;
        Ok(b)
    }

    fn calculate_hash(&mut self) -> io::Result<()> {
        // Call hasher only if header.hash is empty
        if self.header.hash != Hash::default() {
            return Ok(());
        }

        let mut hasher = sha3::Sha3_256::new();
        self.header.marshal_hashable(&mut hasher)?;

        self.header.hash = hasher.finalize().into();
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }
    pub fn txs(&self) -> &Vec<Transaction> {
        &self.txs
    }
}

impl Serializable for Block {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.write(w)?;

        let txs_num = self.txs.len() as u32;
        w.write_all(&txs_num.to_le_bytes())?;

        for tx in &self.txs {
            tx.write(w)?;
        }

        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let header = Header::read(r)?;

        let txs_num = Self::read_u32_le(r)?;
        let mut txs = Vec::with_capacity(txs_num as usize);
        for _ in 0..txs_num {
            txs.push(Transaction::read(r)?);
        }

        Ok(Block { header, txs })
    }
}

/// A transaction as carried inside a block body.
///
/// Transaction execution is not a concern of this crate; the payload is
/// opaque and round-trips byte-for-byte.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub raw: Vec<u8>,
}

impl Transaction {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }
}

impl Serializable for Transaction {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        Self::write_var_le_bytes32(w, &self.raw)
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let raw = Self::read_var_le_bytes32(r)?;
        Ok(Transaction { raw })
    }
}
