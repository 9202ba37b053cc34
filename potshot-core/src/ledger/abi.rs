//! Minimal ABI codec for the jackpot contract's static types.

use crate::error::{CoreError, Result};
use crate::types::Address;
use primitive_types::{H256, U256};
use sha3::{Digest, Keccak256};

pub const WORD: usize = 32;

pub mod sig {
    pub const HOUSE_FUNDS: &str = "houseFunds()";
    pub const WAGER_COST: &str = "wagerCost()";
    pub const SPONSOR_COST: &str = "sponsorCost()";
    pub const CURRENT_SPONSOR: &str = "getCurrentSponsor()";
    pub const RECENT_WINNERS: &str = "getRecentWinners()";
    pub const PLAYER_STATS: &str = "getPlayerStats(address)";
    pub const COOLDOWN_REMAINING: &str = "getCooldownRemaining(address)";
    pub const CAN_COMMIT: &str = "canCommit(address)";
    pub const REVEAL_DELAY: &str = "REVEAL_DELAY()";
    pub const MAX_REVEAL_DELAY: &str = "MAX_REVEAL_DELAY()";
    pub const COMMIT: &str = "commit(bytes32)";
    pub const REVEAL: &str = "reveal(bytes32)";

    pub const EVENT_COMMITTED: &str = "Committed(address,bytes32,uint256,uint256)";
    pub const EVENT_REVEALED: &str = "Revealed(address,uint256,bool)";
    pub const EVENT_JACKPOT_WON: &str = "JackpotWon(address,uint256)";
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

pub fn address_word(address: &Address) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

pub fn u256_word(value: &U256) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    value.to_big_endian(&mut word);
    word
}

/// Selector followed by each argument word.
pub fn encode_call(signature: &str, args: &[[u8; WORD]]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(arg);
    }
    data
}

/// Word-indexed view over ABI-encoded return or log data.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn word_count(&self) -> usize {
        self.data.len() / WORD
    }

    pub fn word(&self, index: usize) -> Result<&'a [u8]> {
        let start = index * WORD;
        self.data.get(start..start + WORD).ok_or_else(|| {
            CoreError::decode(format!(
                "word {} out of range ({} bytes)",
                index,
                self.data.len()
            ))
        })
    }

    pub fn u256(&self, index: usize) -> Result<U256> {
        Ok(U256::from_big_endian(self.word(index)?))
    }

    pub fn u64(&self, index: usize) -> Result<u64> {
        let value = self.u256(index)?;
        if value > U256::from(u64::MAX) {
            return Err(CoreError::decode(format!("word {} overflows u64", index)));
        }
        Ok(value.as_u64())
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        Ok(!self.u256(index)?.is_zero())
    }

    pub fn address(&self, index: usize) -> Result<Address> {
        let word = self.word(index)?;
        Ok(Address::from_slice(&word[12..]))
    }

    pub fn h256(&self, index: usize) -> Result<H256> {
        Ok(H256::from_slice(self.word(index)?))
    }

    /// Dynamic array of static tuples whose head offset sits at `index`.
    /// Returns one decoder per element.
    pub fn tuple_array(&self, index: usize, tuple_words: usize) -> Result<Vec<Decoder<'a>>> {
        let offset = self.u64(index)? as usize;
        if offset % WORD != 0 {
            return Err(CoreError::decode("unaligned array offset"));
        }
        let len_index = offset / WORD;
        let len = self.u64(len_index)? as usize;
        let first = (len_index + 1) * WORD;
        let end = len
            .checked_mul(tuple_words * WORD)
            .and_then(|size| size.checked_add(first))
            .unwrap_or(usize::MAX);
        if end > self.data.len() {
            return Err(CoreError::decode(format!(
                "array of {} elements exceeds {} bytes",
                len,
                self.data.len()
            )));
        }

        Ok((0..len)
            .map(|i| {
                let start = first + i * tuple_words * WORD;
                Decoder::new(&self.data[start..start + tuple_words * WORD])
            })
            .collect())
    }
}
