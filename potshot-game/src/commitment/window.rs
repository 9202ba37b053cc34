use potshot_core::BlockNumber;
use serde::{Deserialize, Serialize};

/// Block range in which a commitment may be revealed: `(B + d, B + max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealWindow {
    pub commit_block: BlockNumber,
    pub reveal_delay: u64,
    pub max_reveal_delay: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// Not yet revealable; `blocks_remaining` until the first valid block.
    TooEarly { blocks_remaining: u64 },
    /// Revealable; `blocks_left` more blocks after the current one.
    Open { blocks_left: u64 },
    /// Past the last valid block. The wager is forfeited.
    Expired,
}

impl RevealWindow {
    pub fn new(commit_block: BlockNumber, reveal_delay: u64, max_reveal_delay: u64) -> Self {
        Self {
            commit_block,
            reveal_delay,
            max_reveal_delay,
        }
    }

    /// Last block that is still too early.
    pub fn opens_after(&self) -> BlockNumber {
        self.commit_block.saturating_add(self.reveal_delay)
    }

    /// Last block at which a reveal is accepted.
    pub fn closes_at(&self) -> BlockNumber {
        self.commit_block.saturating_add(self.max_reveal_delay)
    }

    pub fn position(&self, current: BlockNumber) -> WindowPosition {
        if current <= self.opens_after() {
            WindowPosition::TooEarly {
                blocks_remaining: self.opens_after() - current + 1,
            }
        } else if current <= self.closes_at() {
            WindowPosition::Open {
                blocks_left: self.closes_at() - current,
            }
        } else {
            WindowPosition::Expired
        }
    }

    pub fn is_open(&self, current: BlockNumber) -> bool {
        matches!(self.position(current), WindowPosition::Open { .. })
    }
}
