//! Routing identifiers and node public keys.
use rand::Rng;
use secp256k1::PublicKey;
use sha3::{Digest, Keccak256};
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

/// The size of routing ids in bytes.
pub const ID_SIZE: usize = 32;
/// The size of routing ids in bits.
pub const ID_BITS: usize = ID_SIZE * 8;
/// The size of a node id (uncompressed secp256k1 public key without the `0x04` prefix).
pub const NODE_ID_SIZE: usize = 64;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia routing id, `keccak256` of a [NodeId].
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    /// Create a random Id, mostly useful as a lookup target.
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, InvalidIdSize> {
        let bytes = bytes.as_ref();
        let array: [u8; ID_SIZE] = bytes.try_into().map_err(|_| InvalidIdSize(bytes.len()))?;

        Ok(Id(array))
    }

    /// XOR distance between this Id and `other`.
    ///
    /// Compare the returned arrays lexicographically to compare distances
    /// as big endian unsigned integers.
    pub fn xor(&self, other: &Id) -> [u8; ID_SIZE] {
        let mut result = [0_u8; ID_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        result
    }

    /// Returns the bit at `index`, counting from the most significant bit.
    pub fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = InvalidIdSize;

    fn from_str(s: &str) -> Result<Id, InvalidIdSize> {
        let bytes = hex::decode(s).map_err(|_| InvalidIdSize(s.len() / 2))?;

        Id::from_bytes(bytes)
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A node's identity on the network: its 64 byte secp256k1 public key.
pub struct NodeId(pub [u8; NODE_ID_SIZE]);

impl NodeId {
    /// Random bytes, not necessarily a point on the curve, good enough
    /// for routing and testing.
    pub fn random() -> NodeId {
        let mut bytes = [0_u8; NODE_ID_SIZE];
        rand::thread_rng().fill(&mut bytes[..]);

        NodeId(bytes)
    }

    /// Create a new NodeId from some bytes. Returns Err if `bytes` is not of length
    /// [NODE_ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<NodeId, InvalidIdSize> {
        let bytes = bytes.as_ref();
        let array: [u8; NODE_ID_SIZE] =
            bytes.try_into().map_err(|_| InvalidIdSize(bytes.len()))?;

        Ok(NodeId(array))
    }

    /// Routing [Id] of this node.
    pub fn id(&self) -> Id {
        Id(Keccak256::digest(self.0).into())
    }

    /// Parse into a secp256k1 [PublicKey], fails if the bytes are not a point on the curve.
    pub fn public_key(&self) -> Result<PublicKey, secp256k1::Error> {
        let mut uncompressed = [0_u8; NODE_ID_SIZE + 1];
        uncompressed[0] = 0x04;
        uncompressed[1..].copy_from_slice(&self.0);

        PublicKey::from_slice(&uncompressed)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<&PublicKey> for NodeId {
    fn from(public_key: &PublicKey) -> NodeId {
        let uncompressed = public_key.serialize_uncompressed();
        let mut bytes = [0_u8; NODE_ID_SIZE];
        bytes.copy_from_slice(&uncompressed[1..]);

        NodeId(bytes)
    }
}

impl From<PublicKey> for NodeId {
    fn from(public_key: PublicKey) -> NodeId {
        NodeId::from(&public_key)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Full keys make logs unreadable.
        write!(f, "NodeId({}..)", hex::encode(&self.0[..8]))
    }
}

impl FromStr for NodeId {
    type Err = InvalidIdSize;

    fn from_str(s: &str) -> Result<NodeId, InvalidIdSize> {
        let bytes = hex::decode(s).map_err(|_| InvalidIdSize(s.len() / 2))?;

        NodeId::from_bytes(bytes)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid id size, got {0} bytes")]
/// Bytes could not be turned into an [Id] or [NodeId].
pub struct InvalidIdSize(pub usize);

#[cfg(test)]
mod test {
    use secp256k1::{Secp256k1, SecretKey};

    use super::*;

    #[test]
    fn xor_distance() {
        let a = Id([0; ID_SIZE]);
        let mut b = Id([0; ID_SIZE]);
        b.0[ID_SIZE - 1] = 1;

        assert_eq!(a.xor(&a), [0; ID_SIZE]);
        assert_eq!(a.xor(&b)[ID_SIZE - 1], 1);
        assert_eq!(a.xor(&b), b.xor(&a));
    }

    #[test]
    fn bits() {
        let mut id = Id([0; ID_SIZE]);
        id.0[0] = 0b1000_0001;

        assert!(id.bit(0));
        assert!(!id.bit(1));
        assert!(id.bit(7));
        assert!(!id.bit(ID_BITS - 1));
    }

    #[test]
    fn from_str() {
        let id = Id::random();
        let parsed: Id = id.to_string().parse().unwrap();

        assert_eq!(parsed, id);
        assert!("abcd".parse::<Id>().is_err());
    }

    #[test]
    fn node_id_public_key() {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let public_key = secret_key.public_key(&secp);

        let node_id = NodeId::from(&public_key);

        assert_eq!(node_id.public_key().unwrap(), public_key);
        assert_eq!(
            node_id.id(),
            Id(Keccak256::digest(&public_key.serialize_uncompressed()[1..]).into())
        );
    }
}
