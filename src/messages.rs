/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for structured messages that are sent between replicas, and the codec that maps
//! them to and from the wire.
//!
//! ## Messages
//!
//! The consensus protocol involves five kinds of progress messages:
//! 1. [`PrePrepare`]: broadcasted by the leader of a given (index, view), who proposes to extend
//!    the log by deciding the proposal contained in the message.
//! 2. [`Vote`]: broadcasted by a consensus node to support a proposal in the
//!    [`Prepare`](Phase::Prepare) or [`Commit`](Phase::Commit) phase. Contains a cryptographic
//!    signature over the decision voted on.
//! 3. [`ViewChange`]: broadcasted on view timeout. Carries the sender's highest committed proposal
//!    and its precommitted (prepared but not committed) proposals, so that the next leader can
//!    preserve them across the leader change.
//! 4. [`NewView`]: broadcasted by the leader of the target view once it has collected a quorum of
//!    view changes. Justifies the transition and reissues pre-prepares for unfinished indices.
//!
//! Additionally the log sync protocol defines request/response pairs for recovering committed
//! proposals ([`CommittedProposalRequest`]/[`CommittedProposalResponse`]) and precommitted proposal
//! data ([`PreparedProposalRequest`]/[`PreparedProposalResponse`]).
//!
//! ## Wire format
//!
//! Every message travels in a length-prefixed envelope:
//!
//! ```text
//! version: u32 LE | packet_type: u8 | payload_len: u32 LE | payload | signature: 64 bytes
//! ```
//!
//! The payload is the borsh encoding of the message's fields excluding the signature, which is
//! always the final field of a message struct. [`Vote`] signatures cover only the decision tuple
//! `(view, index, hash, phase)` rather than the full payload, so that they can be re-verified
//! later from a detached [`SignatureShare`](crate::types::proposal::SignatureShare); all other
//! messages sign their full payload.

use std::time::{SystemTime, UNIX_EPOCH};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::crypto_primitives::{Keypair, Signature, Verifier, VerifyingKey};
use crate::types::data_types::{
    CryptoHash, ProposalIndex, ReplicaIndex, SignatureBytes, ViewNumber,
};
use crate::types::proposal::{Phase, Proposal, SignatureShare};

/// Version of the wire envelope that this crate encodes and accepts.
pub const WIRE_VERSION: u32 = 1;

const ENVELOPE_HEADER_LENGTH: usize = 9;
const SIGNATURE_LENGTH: usize = 64;

/// Discriminant carried in the wire envelope that identifies the message variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    PrePrepare = 0,
    Prepare = 1,
    Commit = 2,
    ViewChange = 3,
    NewView = 4,
    CommittedProposalRequest = 5,
    CommittedProposalResponse = 6,
    PreparedProposalRequest = 7,
    PreparedProposalResponse = 8,
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::PrePrepare),
            1 => Ok(PacketType::Prepare),
            2 => Ok(PacketType::Commit),
            3 => Ok(PacketType::ViewChange),
            4 => Ok(PacketType::NewView),
            5 => Ok(PacketType::CommittedProposalRequest),
            6 => Ok(PacketType::CommittedProposalResponse),
            7 => Ok(PacketType::PreparedProposalRequest),
            8 => Ok(PacketType::PreparedProposalResponse),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }
}

/// A signed message must consist of:
/// 1. Message bytes [`SignedMessage::message_bytes`]: the values that the signature is over, and
/// 2. Signature bytes [`SignedMessage::signature_bytes`]: the signature in bytes.
///
/// Given the two values satisfying the above, and a public key of the signer, the signature can be
/// verified against the message.
pub(crate) trait SignedMessage: Clone {
    // The values contained in the message that should be signed (represented as a vector of bytes).
    fn message_bytes(&self) -> Vec<u8>;

    // The signature (in bytes) from the message.
    fn signature_bytes(&self) -> SignatureBytes;

    // Verifies the correctness of the signature given the values that should be signed.
    fn is_correct(&self, pk: &VerifyingKey) -> bool {
        let signature = Signature::from_bytes(&self.signature_bytes().bytes());
        pk.verify(&self.message_bytes(), &signature).is_ok()
    }
}

/// Broadcasted by the leader of a given (index, view), who proposes to decide the contained
/// proposal at that index.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PrePrepare {
    pub view: ViewNumber,
    pub index: ProposalIndex,
    pub timestamp: u64,
    pub generated_from: ReplicaIndex,
    pub proposal: Proposal,
    pub signature: SignatureBytes,
}

impl PrePrepare {
    /// Create a new `PrePrepare` for `proposal` at `(index, view)`, signed with `keypair`.
    pub(crate) fn new(
        keypair: &Keypair,
        view: ViewNumber,
        generated_from: ReplicaIndex,
        proposal: Proposal,
    ) -> PrePrepare {
        let mut msg = PrePrepare {
            view,
            index: proposal.index,
            timestamp: timestamp_now(),
            generated_from,
            proposal,
            signature: SignatureBytes::new([0u8; 64]),
        };
        msg.signature = keypair.sign(&msg.message_bytes());
        msg
    }
}

impl SignedMessage for PrePrepare {
    fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.view.serialize(&mut buf).unwrap();
        self.index.serialize(&mut buf).unwrap();
        self.timestamp.serialize(&mut buf).unwrap();
        self.generated_from.serialize(&mut buf).unwrap();
        self.proposal.serialize(&mut buf).unwrap();
        buf
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Broadcasted by a consensus node to support the proposal with `proposal_hash` at
/// `(index, view)` in the given [`Phase`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub view: ViewNumber,
    pub index: ProposalIndex,
    pub proposal_hash: CryptoHash,
    pub phase: Phase,
    pub generated_from: ReplicaIndex,
    pub signature: SignatureBytes,
}

impl Vote {
    /// Create a `Vote` for the given decision by signing over the canonical vote bytes with the
    /// provided `keypair`.
    pub(crate) fn new(
        keypair: &Keypair,
        view: ViewNumber,
        index: ProposalIndex,
        proposal_hash: CryptoHash,
        phase: Phase,
        generated_from: ReplicaIndex,
    ) -> Vote {
        let message_bytes = (view, index, proposal_hash, phase).try_to_vec().unwrap();
        let signature = keypair.sign(&message_bytes);

        Vote {
            view,
            index,
            proposal_hash,
            phase,
            generated_from,
            signature,
        }
    }

    /// Detach this vote's signature as a transferable [`SignatureShare`].
    pub(crate) fn as_share(&self) -> SignatureShare {
        SignatureShare {
            replica: self.generated_from,
            view: self.view,
            phase: self.phase,
            signature: self.signature,
        }
    }
}

impl SignedMessage for Vote {
    fn message_bytes(&self) -> Vec<u8> {
        (self.view, self.index, self.proposal_hash, self.phase)
            .try_to_vec()
            .unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Broadcasted on view timeout to ask for a transition into `view`.
///
/// `committed_proposal` is the sender's highest committed proposal (data-less).
/// `prepared_proposals` are the sender's precommitted proposals: data-less proposals carrying
/// prepare [`SignatureShare`](crate::types::proposal::SignatureShare)s that prove prepare-quorum
/// at their stated view.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ViewChange {
    pub view: ViewNumber,
    pub timestamp: u64,
    pub generated_from: ReplicaIndex,
    pub committed_proposal: Proposal,
    pub prepared_proposals: Vec<Proposal>,
    pub signature: SignatureBytes,
}

impl ViewChange {
    pub(crate) fn new(
        keypair: &Keypair,
        view: ViewNumber,
        generated_from: ReplicaIndex,
        committed_proposal: Proposal,
        prepared_proposals: Vec<Proposal>,
    ) -> ViewChange {
        let mut msg = ViewChange {
            view,
            timestamp: timestamp_now(),
            generated_from,
            committed_proposal,
            prepared_proposals,
            signature: SignatureBytes::new([0u8; 64]),
        };
        msg.signature = keypair.sign(&msg.message_bytes());
        msg
    }
}

impl SignedMessage for ViewChange {
    fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.view.serialize(&mut buf).unwrap();
        self.timestamp.serialize(&mut buf).unwrap();
        self.generated_from.serialize(&mut buf).unwrap();
        self.committed_proposal.serialize(&mut buf).unwrap();
        self.prepared_proposals.serialize(&mut buf).unwrap();
        buf
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Broadcasted by the leader of the target view once a quorum of [`ViewChange`]s has been
/// collected.
///
/// `view_changes` is the justification for the transition. `pre_prepares` reissues a pre-prepare
/// for every index between the quorum's committed index and its highest precommitted index,
/// chosen by the deterministic selection rule that every receiver re-runs to validate the message.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewView {
    pub view: ViewNumber,
    pub timestamp: u64,
    pub generated_from: ReplicaIndex,
    pub view_changes: Vec<ViewChange>,
    pub pre_prepares: Vec<PrePrepare>,
    pub signature: SignatureBytes,
}

impl NewView {
    pub(crate) fn new(
        keypair: &Keypair,
        view: ViewNumber,
        generated_from: ReplicaIndex,
        view_changes: Vec<ViewChange>,
        pre_prepares: Vec<PrePrepare>,
    ) -> NewView {
        let mut msg = NewView {
            view,
            timestamp: timestamp_now(),
            generated_from,
            view_changes,
            pre_prepares,
            signature: SignatureBytes::new([0u8; 64]),
        };
        msg.signature = keypair.sign(&msg.message_bytes());
        msg
    }
}

impl SignedMessage for NewView {
    fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.view.serialize(&mut buf).unwrap();
        self.timestamp.serialize(&mut buf).unwrap();
        self.generated_from.serialize(&mut buf).unwrap();
        self.view_changes.serialize(&mut buf).unwrap();
        self.pre_prepares.serialize(&mut buf).unwrap();
        buf
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Sync request for the committed proposals in `[start, start + offset)`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommittedProposalRequest {
    pub start: ProposalIndex,
    pub offset: u64,
    pub generated_from: ReplicaIndex,
    pub signature: SignatureBytes,
}

impl CommittedProposalRequest {
    pub(crate) fn new(
        keypair: &Keypair,
        start: ProposalIndex,
        offset: u64,
        generated_from: ReplicaIndex,
    ) -> CommittedProposalRequest {
        let mut msg = CommittedProposalRequest {
            start,
            offset,
            generated_from,
            signature: SignatureBytes::new([0u8; 64]),
        };
        msg.signature = keypair.sign(&msg.message_bytes());
        msg
    }
}

impl SignedMessage for CommittedProposalRequest {
    fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.start.serialize(&mut buf).unwrap();
        self.offset.serialize(&mut buf).unwrap();
        self.generated_from.serialize(&mut buf).unwrap();
        buf
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Sync response carrying committed proposals, each sealed with its commit signature shares.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommittedProposalResponse {
    pub proposals: Vec<Proposal>,
    pub generated_from: ReplicaIndex,
    pub signature: SignatureBytes,
}

impl CommittedProposalResponse {
    pub(crate) fn new(
        keypair: &Keypair,
        proposals: Vec<Proposal>,
        generated_from: ReplicaIndex,
    ) -> CommittedProposalResponse {
        let mut msg = CommittedProposalResponse {
            proposals,
            generated_from,
            signature: SignatureBytes::new([0u8; 64]),
        };
        msg.signature = keypair.sign(&msg.message_bytes());
        msg
    }
}

impl SignedMessage for CommittedProposalResponse {
    fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.proposals.serialize(&mut buf).unwrap();
        self.generated_from.serialize(&mut buf).unwrap();
        buf
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Sync request for the full data of the precommitted proposal with the given index and hash.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PreparedProposalRequest {
    pub index: ProposalIndex,
    pub proposal_hash: CryptoHash,
    pub generated_from: ReplicaIndex,
    pub signature: SignatureBytes,
}

impl PreparedProposalRequest {
    pub(crate) fn new(
        keypair: &Keypair,
        index: ProposalIndex,
        proposal_hash: CryptoHash,
        generated_from: ReplicaIndex,
    ) -> PreparedProposalRequest {
        let mut msg = PreparedProposalRequest {
            index,
            proposal_hash,
            generated_from,
            signature: SignatureBytes::new([0u8; 64]),
        };
        msg.signature = keypair.sign(&msg.message_bytes());
        msg
    }
}

impl SignedMessage for PreparedProposalRequest {
    fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.index.serialize(&mut buf).unwrap();
        self.proposal_hash.serialize(&mut buf).unwrap();
        self.generated_from.serialize(&mut buf).unwrap();
        buf
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// Sync response carrying the full precommitted proposal that was asked for.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PreparedProposalResponse {
    pub proposal: Proposal,
    pub generated_from: ReplicaIndex,
    pub signature: SignatureBytes,
}

impl PreparedProposalResponse {
    pub(crate) fn new(
        keypair: &Keypair,
        proposal: Proposal,
        generated_from: ReplicaIndex,
    ) -> PreparedProposalResponse {
        let mut msg = PreparedProposalResponse {
            proposal,
            generated_from,
            signature: SignatureBytes::new([0u8; 64]),
        };
        msg.signature = keypair.sign(&msg.message_bytes());
        msg
    }
}

impl SignedMessage for PreparedProposalResponse {
    fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.proposal.serialize(&mut buf).unwrap();
        self.generated_from.serialize(&mut buf).unwrap();
        buf
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// The tagged union over all consensus message variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusMessage {
    PrePrepare(PrePrepare),
    Vote(Vote),
    ViewChange(ViewChange),
    NewView(NewView),
    CommittedProposalRequest(CommittedProposalRequest),
    CommittedProposalResponse(CommittedProposalResponse),
    PreparedProposalRequest(PreparedProposalRequest),
    PreparedProposalResponse(PreparedProposalResponse),
}

impl ConsensusMessage {
    /// The [`PacketType`] discriminant that identifies this message on the wire.
    pub fn packet_type(&self) -> PacketType {
        match self {
            ConsensusMessage::PrePrepare(_) => PacketType::PrePrepare,
            ConsensusMessage::Vote(vote) => match vote.phase {
                Phase::Prepare => PacketType::Prepare,
                Phase::Commit => PacketType::Commit,
            },
            ConsensusMessage::ViewChange(_) => PacketType::ViewChange,
            ConsensusMessage::NewView(_) => PacketType::NewView,
            ConsensusMessage::CommittedProposalRequest(_) => PacketType::CommittedProposalRequest,
            ConsensusMessage::CommittedProposalResponse(_) => PacketType::CommittedProposalResponse,
            ConsensusMessage::PreparedProposalRequest(_) => PacketType::PreparedProposalRequest,
            ConsensusMessage::PreparedProposalResponse(_) => PacketType::PreparedProposalResponse,
        }
    }

    /// The replica index this message claims to have been generated from.
    pub fn generated_from(&self) -> ReplicaIndex {
        match self {
            ConsensusMessage::PrePrepare(msg) => msg.generated_from,
            ConsensusMessage::Vote(msg) => msg.generated_from,
            ConsensusMessage::ViewChange(msg) => msg.generated_from,
            ConsensusMessage::NewView(msg) => msg.generated_from,
            ConsensusMessage::CommittedProposalRequest(msg) => msg.generated_from,
            ConsensusMessage::CommittedProposalResponse(msg) => msg.generated_from,
            ConsensusMessage::PreparedProposalRequest(msg) => msg.generated_from,
            ConsensusMessage::PreparedProposalResponse(msg) => msg.generated_from,
        }
    }

    /// Verify this message's signature against `pk`, the key of the node it claims to come from.
    pub(crate) fn is_correct(&self, pk: &VerifyingKey) -> bool {
        match self {
            ConsensusMessage::PrePrepare(msg) => msg.is_correct(pk),
            ConsensusMessage::Vote(msg) => msg.is_correct(pk),
            ConsensusMessage::ViewChange(msg) => msg.is_correct(pk),
            ConsensusMessage::NewView(msg) => msg.is_correct(pk),
            ConsensusMessage::CommittedProposalRequest(msg) => msg.is_correct(pk),
            ConsensusMessage::CommittedProposalResponse(msg) => msg.is_correct(pk),
            ConsensusMessage::PreparedProposalRequest(msg) => msg.is_correct(pk),
            ConsensusMessage::PreparedProposalResponse(msg) => msg.is_correct(pk),
        }
    }
}

/// Things that can go wrong when decoding a wire envelope.
#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The envelope is shorter than its fixed header plus the trailing signature.
    TruncatedEnvelope,
    /// The envelope's version is not [`WIRE_VERSION`].
    UnsupportedVersion(u32),
    /// The envelope's packet type byte is not a known discriminant.
    UnknownPacketType(u8),
    /// The declared payload length disagrees with the envelope's actual length.
    PayloadLengthMismatch,
    /// The payload is not a valid borsh encoding of the variant named by the packet type, or a
    /// vote's phase disagrees with its packet type.
    MalformedPayload,
}

/// Encode `msg` into a wire envelope.
pub fn encode(msg: &ConsensusMessage) -> Vec<u8> {
    let body = match msg {
        ConsensusMessage::PrePrepare(m) => m.try_to_vec(),
        ConsensusMessage::Vote(m) => m.try_to_vec(),
        ConsensusMessage::ViewChange(m) => m.try_to_vec(),
        ConsensusMessage::NewView(m) => m.try_to_vec(),
        ConsensusMessage::CommittedProposalRequest(m) => m.try_to_vec(),
        ConsensusMessage::CommittedProposalResponse(m) => m.try_to_vec(),
        ConsensusMessage::PreparedProposalRequest(m) => m.try_to_vec(),
        ConsensusMessage::PreparedProposalResponse(m) => m.try_to_vec(),
    }
    .unwrap();

    // The signature is the final field of every message struct, so the envelope's payload length
    // is the borsh length minus the trailing signature.
    let payload_len = (body.len() - SIGNATURE_LENGTH) as u32;

    let mut buf = Vec::with_capacity(ENVELOPE_HEADER_LENGTH + body.len());
    buf.extend_from_slice(&WIRE_VERSION.to_le_bytes());
    buf.push(msg.packet_type() as u8);
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Decode a wire envelope into a [`ConsensusMessage`].
pub fn decode(bytes: &[u8]) -> Result<ConsensusMessage, CodecError> {
    if bytes.len() < ENVELOPE_HEADER_LENGTH + SIGNATURE_LENGTH {
        return Err(CodecError::TruncatedEnvelope);
    }

    let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if version != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let packet_type = PacketType::try_from(bytes[4])?;
    let payload_len = u32::from_le_bytes(bytes[5..9].try_into().unwrap()) as usize;
    let body = &bytes[ENVELOPE_HEADER_LENGTH..];
    if body.len() != payload_len + SIGNATURE_LENGTH {
        return Err(CodecError::PayloadLengthMismatch);
    }

    let malformed = |_| CodecError::MalformedPayload;
    let msg = match packet_type {
        PacketType::PrePrepare => {
            ConsensusMessage::PrePrepare(PrePrepare::try_from_slice(body).map_err(malformed)?)
        }
        PacketType::Prepare | PacketType::Commit => {
            let vote = Vote::try_from_slice(body).map_err(malformed)?;
            let expected = match vote.phase {
                Phase::Prepare => PacketType::Prepare,
                Phase::Commit => PacketType::Commit,
            };
            if expected != packet_type {
                return Err(CodecError::MalformedPayload);
            }
            ConsensusMessage::Vote(vote)
        }
        PacketType::ViewChange => {
            ConsensusMessage::ViewChange(ViewChange::try_from_slice(body).map_err(malformed)?)
        }
        PacketType::NewView => {
            ConsensusMessage::NewView(NewView::try_from_slice(body).map_err(malformed)?)
        }
        PacketType::CommittedProposalRequest => ConsensusMessage::CommittedProposalRequest(
            CommittedProposalRequest::try_from_slice(body).map_err(malformed)?,
        ),
        PacketType::CommittedProposalResponse => ConsensusMessage::CommittedProposalResponse(
            CommittedProposalResponse::try_from_slice(body).map_err(malformed)?,
        ),
        PacketType::PreparedProposalRequest => ConsensusMessage::PreparedProposalRequest(
            PreparedProposalRequest::try_from_slice(body).map_err(malformed)?,
        ),
        PacketType::PreparedProposalResponse => ConsensusMessage::PreparedProposalResponse(
            PreparedProposalResponse::try_from_slice(body).map_err(malformed)?,
        ),
    };
    Ok(msg)
}

/// Milliseconds since the Unix epoch, used to fill message timestamps.
pub(crate) fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock is set before the Unix Epoch.")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use crate::types::crypto_primitives::sha256;
    use crate::types::data_types::ProposalData;

    use super::*;

    fn keypair() -> Keypair {
        Keypair::new(SigningKey::generate(&mut OsRng {}))
    }

    fn proposal() -> Proposal {
        Proposal::new(
            ProposalIndex::new(7),
            sha256(b"payload"),
            ProposalData::new(b"payload".to_vec()),
        )
    }

    fn all_variants(me: &Keypair) -> Vec<ConsensusMessage> {
        let from = ReplicaIndex::new(2);
        let view = ViewNumber::new(3);
        let pre_prepare = PrePrepare::new(me, view, from, proposal());
        let view_change = ViewChange::new(
            me,
            view,
            from,
            Proposal::genesis(),
            vec![proposal().without_data()],
        );
        vec![
            ConsensusMessage::PrePrepare(pre_prepare.clone()),
            ConsensusMessage::Vote(Vote::new(
                me,
                view,
                ProposalIndex::new(7),
                sha256(b"payload"),
                Phase::Prepare,
                from,
            )),
            ConsensusMessage::Vote(Vote::new(
                me,
                view,
                ProposalIndex::new(7),
                sha256(b"payload"),
                Phase::Commit,
                from,
            )),
            ConsensusMessage::ViewChange(view_change.clone()),
            ConsensusMessage::NewView(NewView::new(
                me,
                view,
                from,
                vec![view_change],
                vec![pre_prepare],
            )),
            ConsensusMessage::CommittedProposalRequest(CommittedProposalRequest::new(
                me,
                ProposalIndex::new(1),
                10,
                from,
            )),
            ConsensusMessage::CommittedProposalResponse(CommittedProposalResponse::new(
                me,
                vec![proposal()],
                from,
            )),
            ConsensusMessage::PreparedProposalRequest(PreparedProposalRequest::new(
                me,
                ProposalIndex::new(7),
                sha256(b"payload"),
                from,
            )),
            ConsensusMessage::PreparedProposalResponse(PreparedProposalResponse::new(
                me,
                proposal(),
                from,
            )),
        ]
    }

    #[test]
    fn encode_then_decode_yields_equal_value() {
        let me = keypair();
        for msg in all_variants(&me) {
            let encoded = encode(&msg);
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(encode(&decoded), encoded);
        }
    }

    #[test]
    fn decoded_messages_verify_against_the_signer() {
        let me = keypair();
        let other = keypair();
        for msg in all_variants(&me) {
            let decoded = decode(&encode(&msg)).unwrap();
            assert!(decoded.is_correct(&me.public()));
            assert!(!decoded.is_correct(&other.public()));
        }
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let me = keypair();
        let encoded = encode(&all_variants(&me)[0]);
        assert_eq!(decode(&encoded[..8]), Err(CodecError::TruncatedEnvelope));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let me = keypair();
        let mut encoded = encode(&all_variants(&me)[0]);
        encoded[0..4].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(decode(&encoded), Err(CodecError::UnsupportedVersion(9)));
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        let me = keypair();
        let mut encoded = encode(&all_variants(&me)[0]);
        encoded[4] = 42;
        assert_eq!(decode(&encoded), Err(CodecError::UnknownPacketType(42)));
    }

    #[test]
    fn payload_length_mismatch_is_rejected() {
        let me = keypair();
        let mut encoded = encode(&all_variants(&me)[0]);
        let wrong_len = (encoded.len() as u32) + 1;
        encoded[5..9].copy_from_slice(&wrong_len.to_le_bytes());
        assert_eq!(decode(&encoded), Err(CodecError::PayloadLengthMismatch));
    }

    #[test]
    fn vote_phase_must_match_packet_type() {
        let me = keypair();
        let vote = Vote::new(
            &me,
            ViewNumber::new(0),
            ProposalIndex::new(1),
            sha256(b"x"),
            Phase::Prepare,
            ReplicaIndex::new(0),
        );
        let mut encoded = encode(&ConsensusMessage::Vote(vote));
        encoded[4] = PacketType::Commit as u8;
        assert_eq!(decode(&encoded), Err(CodecError::MalformedPayload));
    }

    #[test]
    fn tampered_payload_fails_signature_verification() {
        let me = keypair();
        let msg = &all_variants(&me)[0];
        let mut encoded = encode(msg);
        // Flip a byte inside the payload, past the envelope header.
        encoded[20] ^= 0xff;
        if let Ok(decoded) = decode(&encoded) {
            assert!(!decoded.is_correct(&me.public()));
        }
    }
}
