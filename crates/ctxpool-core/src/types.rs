//! Chain data types carried by remote calls.
//!
//! Deliberately opaque: the pool moves these between the backend and the
//! RPC layer without interpreting them.

use core::fmt;

/// 32-byte hash (block hash, transaction hash, PoW digest).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub const ZERO: H256 = H256([0; 32]);

    /// Hash with every byte set to `byte`. Handy for fixtures.
    pub const fn repeat_byte(byte: u8) -> Self {
        H256([byte; 32])
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// A block as served to RPC callers: number, hash and encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: H256,
    pub body: Vec<u8>,
}

/// Work package handed to external miners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkPackage {
    pub header_hash: H256,
    pub seed_hash: H256,
    pub target: H256,
    pub block_number: u64,
}
