pub mod window;

pub use window::{RevealWindow, WindowPosition};

use potshot_core::ledger::abi::keccak256;
use potshot_core::{Address, CommitmentHash, Secret};
use rand::{rngs::OsRng, RngCore};

/// Fresh 256-bit wager secret from the OS RNG.
pub fn generate_secret() -> Secret {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Secret::from_bytes(bytes)
}

/// `keccak256(secret ‖ player)`, packed. Matches what the contract
/// recomputes on reveal.
pub fn commitment_hash(secret: &Secret, player: &Address) -> CommitmentHash {
    let mut preimage = [0u8; 52];
    preimage[..32].copy_from_slice(secret.as_bytes());
    preimage[32..].copy_from_slice(player.as_bytes());
    CommitmentHash::from(keccak256(&preimage))
}

pub fn verify(hash: &CommitmentHash, secret: &Secret, player: &Address) -> bool {
    commitment_hash(secret, player) == *hash
}
