/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or integers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Position of a proposal in the totally-ordered log that consensus produces.
///
/// Starts at 0 for the genesis proposal and increases by 1 for every decided index. For a given
/// committed index there is exactly one committed hash across all honest replicas.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ProposalIndex(u64);

impl ProposalIndex {
    /// Create a new `ProposalIndex` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `ProposalIndex`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the little-endian representation of the inner `u64` value of this `ProposalIndex`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub(crate) fn saturating_sub(&self, rhs: u64) -> ProposalIndex {
        ProposalIndex(self.0.saturating_sub(rhs))
    }
}

impl Display for ProposalIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for ProposalIndex {
    type Output = ProposalIndex;
    fn add(self, rhs: u64) -> Self::Output {
        ProposalIndex(self.0.add(rhs))
    }
}

impl AddAssign<u64> for ProposalIndex {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Sub<ProposalIndex> for ProposalIndex {
    type Output = u64;
    fn sub(self, rhs: ProposalIndex) -> Self::Output {
        self.0 - rhs.0
    }
}

/// View number. Starts at 0 and increases monotonically; every view is associated with exactly one
/// leader assignment.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    /// Create a new `ViewNumber` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the initial `ViewNumber`, which is 0.
    pub const fn init() -> Self {
        Self(0)
    }

    /// Get the inner `u64` of this `ViewNumber`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for ViewNumber {
    type Output = ViewNumber;
    fn add(self, rhs: u64) -> Self::Output {
        ViewNumber(self.0.add(rhs))
    }
}

/// Index of a consensus node in the
/// [ascending order](super::validator_set::ValidatorSet#ordering-of-consensus-nodes) of validators'
/// verifying keys.
///
/// Replica indices appear in consensus messages in place of full public keys, which keeps the wire
/// format compact. They are only meaningful relative to a specific validator set.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ReplicaIndex(u64);

impl ReplicaIndex {
    /// Create a new `ReplicaIndex` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` of this `ReplicaIndex`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for ReplicaIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Weight of a specific consensus node's votes in consensus decisions.
///
/// The higher the weight, the more its votes count towards quorums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Weight(u64);

impl Weight {
    /// Create a new `Weight` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `Weight`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Sum of the [`Weight`]s of a set of consensus nodes.
///
/// The inner type that this newtype wraps around is `u128`, which is bigger than the inner `u64`
/// that `Weight` wraps around. This is so that summing up large `Weight`s does not cause
/// `TotalWeight`'s inner value to overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct TotalWeight(u128);

impl TotalWeight {
    /// Create a new `TotalWeight` wrapping `int`.
    pub(crate) const fn new(int: u128) -> Self {
        Self(int)
    }

    /// Get the inner `u128` value of this `TotalWeight`.
    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Weight> for TotalWeight {
    fn add_assign(&mut self, rhs: Weight) {
        self.0.add_assign(rhs.0 as u128)
    }
}

/// 32-byte cryptographic hash.
///
/// Within this crate, `CryptoHash`-es are always SHA256 hashes. The ordering derived on this type
/// is the lexicographic ordering of the inner bytes, which the view change protocol relies on for
/// deterministic tie-breaking.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ed25519 digital signature.
///
/// Within this crate, these are produced using the [`ed25519_dalek`] crate, whose main definitions
/// are re-exported from the [`crypto_primitives`](super::crypto_primitives) module.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub(crate) const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0[..].fmt(f)
    }
}

/// Opaque block payload provided by the external block builder to be agreed upon at a given index.
///
/// The engine never inspects the contents; validity is delegated to the external
/// [`ProposalValidator`](crate::validator::ProposalValidator).
#[derive(Clone, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct ProposalData(Vec<u8>);

impl ProposalData {
    /// Create a new `ProposalData` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get a reference to the inner `Vec<u8>` of this `ProposalData`.
    pub const fn bytes(&self) -> &Vec<u8> {
        &self.0
    }

    /// Get how many bytes are in this `ProposalData`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether this `ProposalData` is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
