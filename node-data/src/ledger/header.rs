// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) KERYX NETWORK. All rights reserved.

use std::io::{self, Read, Write};

use super::to_str;
use crate::Serializable;

pub type Hash = [u8; 32];

#[derive(Default, Eq, PartialEq, Clone)]
pub struct Header {
    // Hashable fields
    pub version: u32,
    pub number: u32,
    pub timestamp: u64,
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,

    // Block hash
    pub hash: Hash,
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("version", &self.version)
            .field("number", &self.number)
            .field("timestamp", &self.timestamp)
            .field("prev_block_hash", &to_str(&self.prev_block_hash))
            .field("merkle_root", &to_str(&self.merkle_root))
            .field("hash", &to_str(&self.hash))
            .finish()
    }
}

impl Header {
    /// Returns true if both headers describe the very same block.
    ///
    /// Equality is defined over the hashable field set only. A received
    /// block body is matched against a locked-in header with this predicate
    /// before it may occupy a fetch-window slot.
    pub fn same_identity(&self, other: &Header) -> bool {
        self.number == other.number
            && self.version == other.version
            && self.timestamp == other.timestamp
            && self.merkle_root == other.merkle_root
            && self.prev_block_hash == other.prev_block_hash
    }

    /// Marshal hashable fields.
    pub(crate) fn marshal_hashable<W: Write>(
        &self,
        w: &mut W,
    ) -> io::Result<()> {
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.number.to_le_bytes())?;
        w.write_all(&self.timestamp.to_le_bytes())?;
        w.write_all(&self.prev_block_hash)?;
        w.write_all(&self.merkle_root)?;

        Ok(())
    }

    pub(crate) fn unmarshal_hashable<R: Read>(r: &mut R) -> io::Result<Self> {
        let version = Self::read_u32_le(r)?;
        let number = Self::read_u32_le(r)?;
        let timestamp = Self::read_u64_le(r)?;

        let prev_block_hash = Self::read_bytes(r)?;
        let merkle_root = Self::read_bytes(r)?;

        Ok(Header {
            version,
            number,
            timestamp,
            prev_block_hash,
            merkle_root,
            hash: [0; 32],
        })
    }
}

impl Serializable for Header {
    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.marshal_hashable(w)?;
        w.write_all(&self.hash)?;

        Ok(())
    }

    fn read<R: Read>(r: &mut R) -> io::Result<Self>
    where
        Self: Sized,
    {
        let mut header = Self::unmarshal_hashable(r)?;
        header.hash = Self::read_bytes(r)?;

        Ok(header)
    }
}
