//! Signed discovery packets and their RLP payloads.
//!
//! Wire layout: `hash(32) || signature(64) || recovery id(1) || type(1) || rlp(payload)`
//! where `hash = keccak256(signature || recovery id || type || payload)` and the
//! signature covers `keccak256(type || payload)`.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::{SystemTime, UNIX_EPOCH},
};

use rlp::{Rlp, RlpStream};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message as SecpMessage, Secp256k1, SecretKey,
};
use sha3::{Digest, Keccak256};

use crate::common::{Endpoint, NodeId};

/// Maximum size of a discovery packet.
pub const MAX_PACKET_SIZE: usize = 1280;
pub const HASH_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 65;
/// Bytes preceding the RLP payload: hash, signature and type.
pub const HEADER_SIZE: usize = HASH_SIZE + SIGNATURE_SIZE + 1;
/// Seconds added to the current time to produce a packet's expiration timestamp.
pub const TIMESTAMP_TTL: u32 = 60;
/// Peer records per neighbors packet, keeps IPv6 records under [MAX_PACKET_SIZE].
pub const MAX_NEIGHBORS_PER_PACKET: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hey = 0x01,
    FindNode = 0x02,
    Neighbors = 0x03,
    RequestTicket = 0x04,
    Ticket = 0x05,
    TopicRegister = 0x06,
    TopicQuery = 0x07,
    TopicNodes = 0x08,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        Ok(match value {
            0x01 => MessageType::Hey,
            0x02 => MessageType::FindNode,
            0x03 => MessageType::Neighbors,
            0x04 => MessageType::RequestTicket,
            0x05 => MessageType::Ticket,
            0x06 => MessageType::TopicRegister,
            0x07 => MessageType::TopicQuery,
            0x08 => MessageType::TopicNodes,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Liveness probe, or the reply to one if `echo` is set.
pub struct Hey {
    pub version: u64,
    pub from: Endpoint,
    pub to: Endpoint,
    pub timestamp: u32,
    /// Packet hash of the probe this hey answers.
    pub echo: Option<[u8; HASH_SIZE]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Asks for the contacts closest to `target`.
pub struct FindNode {
    pub target: NodeId,
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub id: Vec<u8>,
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// An endpoint with the identity of the node behind it.
pub struct PeerRecord {
    pub endpoint: Endpoint,
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Payload shared by neighbors, ticket and topic packets.
pub struct PeerList {
    pub peers: Vec<PeerRecord>,
    pub timestamp: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hey(Hey),
    FindNode(FindNode),
    Neighbors(PeerList),
    RequestTicket(RequestTicket),
    Ticket(PeerList),
    TopicRegister(PeerList),
    TopicQuery(PeerList),
    TopicNodes(PeerList),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A verified, decoded packet.
pub struct Packet {
    pub hash: [u8; HASH_SIZE],
    /// Public key recovered from the signature.
    pub node_id: NodeId,
    pub message: Message,
}

/// Current unix time in seconds.
pub fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

/// Default expiration timestamp for outgoing packets.
pub fn expiration() -> u32 {
    unix_time().saturating_add(TIMESTAMP_TTL)
}

impl Hey {
    /// A liveness probe expiring in [TIMESTAMP_TTL] seconds.
    pub fn probe(version: u64, from: Endpoint, to: Endpoint) -> Self {
        Self {
            version,
            from,
            to,
            timestamp: expiration(),
            echo: None,
        }
    }

    /// Reply to the probe with packet hash `echo`.
    pub fn reply(version: u64, from: Endpoint, to: Endpoint, echo: [u8; HASH_SIZE]) -> Self {
        Self {
            echo: Some(echo),
            ..Self::probe(version, from, to)
        }
    }
}

impl PeerList {
    pub fn new(peers: Vec<PeerRecord>) -> Self {
        Self {
            peers,
            timestamp: expiration(),
        }
    }
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hey(_) => MessageType::Hey,
            Message::FindNode(_) => MessageType::FindNode,
            Message::Neighbors(_) => MessageType::Neighbors,
            Message::RequestTicket(_) => MessageType::RequestTicket,
            Message::Ticket(_) => MessageType::Ticket,
            Message::TopicRegister(_) => MessageType::TopicRegister,
            Message::TopicQuery(_) => MessageType::TopicQuery,
            Message::TopicNodes(_) => MessageType::TopicNodes,
        }
    }

    /// Expiration timestamp carried by every message.
    pub fn timestamp(&self) -> u32 {
        match self {
            Message::Hey(hey) => hey.timestamp,
            Message::FindNode(find_node) => find_node.timestamp,
            Message::RequestTicket(request) => request.timestamp,
            Message::Neighbors(list)
            | Message::Ticket(list)
            | Message::TopicRegister(list)
            | Message::TopicQuery(list)
            | Message::TopicNodes(list) => list.timestamp,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.timestamp() < unix_time()
    }

    /// Sign and serialize into a packet, returning the packet and its hash.
    pub fn to_bytes(
        &self,
        secp: &Secp256k1<All>,
        secret_key: &SecretKey,
    ) -> Result<(Vec<u8>, [u8; HASH_SIZE]), EncodeError> {
        let packet = seal(
            secp,
            secret_key,
            self.message_type() as u8,
            &self.encode_payload(),
        );

        if packet.len() > MAX_PACKET_SIZE {
            return Err(EncodeError::PacketTooLarge(packet.len()));
        }

        let mut hash = [0_u8; HASH_SIZE];
        hash.copy_from_slice(&packet[..HASH_SIZE]);

        Ok((packet, hash))
    }

    /// Verify and decode a packet.
    pub fn from_bytes(secp: &Secp256k1<All>, bytes: &[u8]) -> Result<Packet, DecodeError> {
        if bytes.len() <= HEADER_SIZE {
            return Err(DecodeError::TooShort(bytes.len()));
        }
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(DecodeError::TooLarge(bytes.len()));
        }

        let hash: [u8; HASH_SIZE] = Keccak256::digest(&bytes[HASH_SIZE..]).into();
        if hash[..] != bytes[..HASH_SIZE] {
            return Err(DecodeError::Integrity);
        }

        let message_type = MessageType::try_from(bytes[HEADER_SIZE - 1])?;

        let signed = &bytes[HASH_SIZE + SIGNATURE_SIZE..];
        let sighash: [u8; 32] = Keccak256::digest(signed).into();

        let recovery_id = RecoveryId::from_i32(bytes[HASH_SIZE + SIGNATURE_SIZE - 1] as i32)
            .map_err(|_| DecodeError::BadSignature)?;
        let signature = RecoverableSignature::from_compact(
            &bytes[HASH_SIZE..HASH_SIZE + SIGNATURE_SIZE - 1],
            recovery_id,
        )
        .map_err(|_| DecodeError::BadSignature)?;
        let public_key = secp
            .recover_ecdsa(&SecpMessage::from_digest(sighash), &signature)
            .map_err(|_| DecodeError::BadSignature)?;

        let message = Message::decode_payload(message_type, &bytes[HEADER_SIZE..])?;

        Ok(Packet {
            hash,
            node_id: NodeId::from(&public_key),
            message,
        })
    }

    pub(crate) fn encode_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();

        match self {
            Message::Hey(hey) => {
                stream.begin_list(if hey.echo.is_some() { 5 } else { 4 });
                stream.append(&hey.version);
                append_endpoint(&mut stream, &hey.from);
                append_endpoint(&mut stream, &hey.to);
                append_timestamp(&mut stream, hey.timestamp);
                if let Some(echo) = hey.echo {
                    stream.append(&echo.to_vec());
                }
            }
            Message::FindNode(find_node) => {
                stream.begin_list(2);
                stream.append(&find_node.target.to_vec());
                append_timestamp(&mut stream, find_node.timestamp);
            }
            Message::RequestTicket(request) => {
                stream.begin_list(2);
                stream.append(&request.id);
                append_timestamp(&mut stream, request.timestamp);
            }
            Message::Neighbors(list)
            | Message::Ticket(list)
            | Message::TopicRegister(list)
            | Message::TopicQuery(list)
            | Message::TopicNodes(list) => {
                stream.begin_list(2);
                stream.begin_list(list.peers.len());
                for peer in &list.peers {
                    stream.begin_list(4);
                    append_endpoint_fields(&mut stream, &peer.endpoint);
                    stream.append(&peer.node_id.to_vec());
                }
                append_timestamp(&mut stream, list.timestamp);
            }
        }

        stream.out().to_vec()
    }

    fn decode_payload(message_type: MessageType, payload: &[u8]) -> Result<Message, DecodeError> {
        let rlp = Rlp::new(payload);

        if !rlp.is_list() {
            return Err(DecodeError::MalformedField("payload"));
        }
        let length = rlp.payload_info()?.total();
        if length > payload.len() {
            return Err(DecodeError::Rlp(rlp::DecoderError::RlpIsTooShort));
        }
        if length < payload.len() {
            return Err(DecodeError::TrailingBytes(payload.len() - length));
        }

        Ok(match message_type {
            MessageType::Hey => {
                let echo = if rlp.item_count()? > 4 {
                    let bytes = bytes_field(&rlp, 4, "echo")?;
                    Some(
                        bytes
                            .try_into()
                            .map_err(|_| DecodeError::MalformedField("echo"))?,
                    )
                } else {
                    None
                };

                Message::Hey(Hey {
                    version: bytes_to_u64(bytes_field(&rlp, 0, "version")?, "version")?,
                    from: decode_endpoint(&field(&rlp, 1, "from")?)?,
                    to: decode_endpoint(&field(&rlp, 2, "to")?)?,
                    timestamp: decode_timestamp(bytes_field(&rlp, 3, "timestamp")?)?,
                    echo,
                })
            }
            MessageType::FindNode => Message::FindNode(FindNode {
                target: NodeId::from_bytes(bytes_field(&rlp, 0, "target")?)
                    .map_err(|_| DecodeError::MalformedField("target"))?,
                timestamp: decode_timestamp(bytes_field(&rlp, 1, "timestamp")?)?,
            }),
            MessageType::RequestTicket => Message::RequestTicket(RequestTicket {
                id: bytes_field(&rlp, 0, "id")?.to_vec(),
                timestamp: decode_timestamp(bytes_field(&rlp, 1, "timestamp")?)?,
            }),
            MessageType::Neighbors => Message::Neighbors(decode_peer_list(&rlp)?),
            MessageType::Ticket => Message::Ticket(decode_peer_list(&rlp)?),
            MessageType::TopicRegister => Message::TopicRegister(decode_peer_list(&rlp)?),
            MessageType::TopicQuery => Message::TopicQuery(decode_peer_list(&rlp)?),
            MessageType::TopicNodes => Message::TopicNodes(decode_peer_list(&rlp)?),
        })
    }
}

/// Hash, sign and frame an already encoded payload.
fn seal(secp: &Secp256k1<All>, secret_key: &SecretKey, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(payload.len() + 1);
    signed.push(kind);
    signed.extend_from_slice(payload);

    let sighash: [u8; 32] = Keccak256::digest(&signed).into();
    let (recovery_id, signature) = secp
        .sign_ecdsa_recoverable(&SecpMessage::from_digest(sighash), secret_key)
        .serialize_compact();

    let mut packet = vec![0_u8; HASH_SIZE];
    packet.extend_from_slice(&signature);
    packet.push(recovery_id.to_i32() as u8);
    packet.extend_from_slice(&signed);

    let hash: [u8; HASH_SIZE] = Keccak256::digest(&packet[HASH_SIZE..]).into();
    packet[..HASH_SIZE].copy_from_slice(&hash);

    packet
}

fn append_timestamp(stream: &mut RlpStream, timestamp: u32) {
    stream.append(&timestamp.to_be_bytes().to_vec());
}

fn append_endpoint(stream: &mut RlpStream, endpoint: &Endpoint) {
    stream.begin_list(3);
    append_endpoint_fields(stream, endpoint);
}

fn append_endpoint_fields(stream: &mut RlpStream, endpoint: &Endpoint) {
    let address = match endpoint.address {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    stream.append(&address);

    for port in [endpoint.udp_port, endpoint.tcp_port] {
        match port {
            Some(port) => stream.append(&port.to_be_bytes().to_vec()),
            None => stream.append_empty_data(),
        };
    }
}

fn field<'a>(rlp: &Rlp<'a>, index: usize, name: &'static str) -> Result<Rlp<'a>, DecodeError> {
    rlp.at(index)
        .map_err(|_| DecodeError::MalformedField(name))
}

fn bytes_field<'a>(
    rlp: &Rlp<'a>,
    index: usize,
    name: &'static str,
) -> Result<&'a [u8], DecodeError> {
    field(rlp, index, name)?
        .data()
        .map_err(|_| DecodeError::MalformedField(name))
}

fn bytes_to_u64(bytes: &[u8], name: &'static str) -> Result<u64, DecodeError> {
    if bytes.len() > 8 {
        return Err(DecodeError::MalformedField(name));
    }

    Ok(bytes
        .iter()
        .fold(0_u64, |acc, byte| (acc << 8) | *byte as u64))
}

fn decode_timestamp(bytes: &[u8]) -> Result<u32, DecodeError> {
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| DecodeError::MalformedField("timestamp"))?;

    Ok(u32::from_be_bytes(bytes))
}

fn decode_address(bytes: &[u8]) -> Result<IpAddr, DecodeError> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes
                .try_into()
                .map_err(|_| DecodeError::MalformedField("address"))?;
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes
                .try_into()
                .map_err(|_| DecodeError::MalformedField("address"))?;
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        // Some implementations send the textual form.
        _ => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::MalformedField("address")),
    }
}

fn decode_port(bytes: &[u8]) -> Result<Option<u16>, DecodeError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    if bytes.len() > 2 {
        return Err(DecodeError::MalformedField("port"));
    }

    Ok(Some(bytes_to_u64(bytes, "port")? as u16))
}

/// Decodes the first three items of `rlp` as `[address, udp port, tcp port]`.
fn decode_endpoint(rlp: &Rlp) -> Result<Endpoint, DecodeError> {
    Ok(Endpoint {
        address: decode_address(bytes_field(rlp, 0, "address")?)?,
        udp_port: decode_port(bytes_field(rlp, 1, "udp_port")?)?,
        tcp_port: decode_port(bytes_field(rlp, 2, "tcp_port")?)?,
    })
}

fn decode_peer_list(rlp: &Rlp) -> Result<PeerList, DecodeError> {
    let peers = field(rlp, 0, "peers")?
        .iter()
        .map(|record| {
            Ok(PeerRecord {
                endpoint: decode_endpoint(&record)?,
                node_id: NodeId::from_bytes(bytes_field(&record, 3, "node_id")?)
                    .map_err(|_| DecodeError::MalformedField("node_id"))?,
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    Ok(PeerList {
        peers,
        timestamp: decode_timestamp(bytes_field(rlp, 1, "timestamp")?)?,
    })
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors decoding a discovery packet.
pub enum DecodeError {
    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Packet exceeds 1280 bytes: {0}")]
    TooLarge(usize),

    #[error("Packet hash doesn't match its content")]
    Integrity,

    #[error("Could not recover the sender's public key from the signature")]
    BadSignature,

    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),

    #[error("Malformed field: {0}")]
    MalformedField(&'static str),

    #[error("{0} bytes after the payload list")]
    TrailingBytes(usize),

    #[error("Invalid RLP payload: {0}")]
    Rlp(#[from] rlp::DecoderError),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors encoding a discovery packet.
pub enum EncodeError {
    #[error("Packet exceeds 1280 bytes: {0}")]
    PacketTooLarge(usize),
}

#[cfg(test)]
mod test {
    use super::*;

    fn keys() -> (Secp256k1<All>, SecretKey, NodeId) {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let node_id = NodeId::from(secret_key.public_key(&secp));

        (secp, secret_key, node_id)
    }

    fn peer(address: IpAddr) -> PeerRecord {
        PeerRecord {
            endpoint: Endpoint::new(address, Some(30303), None),
            node_id: NodeId::random(),
        }
    }

    #[test]
    fn every_message_type() {
        let (secp, secret_key, node_id) = keys();

        let from = Endpoint::new([127, 0, 0, 1].into(), Some(30303), Some(30304));
        let to = Endpoint::new("::1".parse().unwrap(), Some(30305), None);
        let peers = vec![peer([10, 0, 0, 1].into()), peer("fe80::1".parse().unwrap())];

        let messages = vec![
            Message::Hey(Hey::probe(4, from, to)),
            Message::Hey(Hey::reply(4, from, to, [7; 32])),
            Message::FindNode(FindNode {
                target: NodeId::random(),
                timestamp: expiration(),
            }),
            Message::Neighbors(PeerList::new(peers.clone())),
            Message::Neighbors(PeerList::new(vec![])),
            Message::RequestTicket(RequestTicket {
                id: vec![1, 2, 3],
                timestamp: expiration(),
            }),
            Message::Ticket(PeerList::new(peers.clone())),
            Message::TopicRegister(PeerList::new(peers.clone())),
            Message::TopicQuery(PeerList::new(peers.clone())),
            Message::TopicNodes(PeerList::new(peers)),
        ];

        for message in messages {
            let (bytes, hash) = message.to_bytes(&secp, &secret_key).unwrap();
            let packet = Message::from_bytes(&secp, &bytes).unwrap();

            assert_eq!(packet.message, message);
            assert_eq!(packet.hash, hash);
            assert_eq!(packet.node_id, node_id);
            assert!(!packet.message.is_expired());
        }
    }

    #[test]
    fn tampered_packets_fail_integrity() {
        let (secp, secret_key, _) = keys();

        let message = Message::FindNode(FindNode {
            target: NodeId::random(),
            timestamp: expiration(),
        });
        let (bytes, _) = message.to_bytes(&secp, &secret_key).unwrap();

        for index in [HASH_SIZE, HASH_SIZE + 40, HEADER_SIZE - 1, bytes.len() - 1] {
            let mut tampered = bytes.clone();
            tampered[index] ^= 0xff;

            assert_eq!(
                Message::from_bytes(&secp, &tampered),
                Err(DecodeError::Integrity)
            );
        }
    }

    #[test]
    fn too_short() {
        let secp = Secp256k1::new();

        assert_eq!(
            Message::from_bytes(&secp, &[0; HEADER_SIZE]),
            Err(DecodeError::TooShort(HEADER_SIZE))
        );
    }

    #[test]
    fn too_large() {
        let (secp, secret_key, _) = keys();

        let packet = seal(&secp, &secret_key, MessageType::Neighbors as u8, &[0; MAX_PACKET_SIZE]);

        assert_eq!(
            Message::from_bytes(&secp, &packet),
            Err(DecodeError::TooLarge(packet.len()))
        );
    }

    #[test]
    fn trailing_bytes() {
        let (secp, secret_key, _) = keys();

        let mut payload = Message::FindNode(FindNode {
            target: NodeId::random(),
            timestamp: expiration(),
        })
        .encode_payload();
        payload.extend_from_slice(&[0xde, 0xad]);
        let packet = seal(&secp, &secret_key, MessageType::FindNode as u8, &payload);

        assert_eq!(
            Message::from_bytes(&secp, &packet),
            Err(DecodeError::TrailingBytes(2))
        );
    }

    #[test]
    fn unknown_type() {
        let (secp, secret_key, _) = keys();

        let packet = seal(&secp, &secret_key, 0x09, &[0xc0]);

        assert_eq!(
            Message::from_bytes(&secp, &packet),
            Err(DecodeError::UnknownType(0x09))
        );
    }

    #[test]
    fn bad_signature() {
        let (secp, secret_key, _) = keys();

        let mut packet = seal(&secp, &secret_key, MessageType::Hey as u8, &[0xc0]);
        packet[HASH_SIZE + SIGNATURE_SIZE - 1] = 9;
        let hash: [u8; 32] = Keccak256::digest(&packet[HASH_SIZE..]).into();
        packet[..HASH_SIZE].copy_from_slice(&hash);

        assert_eq!(
            Message::from_bytes(&secp, &packet),
            Err(DecodeError::BadSignature)
        );
    }

    #[test]
    fn timestamp_must_be_four_bytes() {
        let (secp, secret_key, _) = keys();

        let mut stream = RlpStream::new_list(2);
        stream.append(&NodeId::random().to_vec());
        stream.append(&vec![1_u8, 2, 3]);

        let packet = seal(
            &secp,
            &secret_key,
            MessageType::FindNode as u8,
            &stream.out(),
        );

        assert_eq!(
            Message::from_bytes(&secp, &packet),
            Err(DecodeError::MalformedField("timestamp"))
        );
    }

    #[test]
    fn textual_address() {
        assert_eq!(
            decode_address(b"192.168.1.1").unwrap(),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))
        );
        assert!(decode_address(b"localhost").is_err());
    }

    #[test]
    fn expired() {
        let message = Message::FindNode(FindNode {
            target: NodeId::random(),
            timestamp: unix_time() - 1,
        });

        assert!(message.is_expired());
    }

    #[test]
    fn full_neighbors_packet_fits() {
        let (secp, secret_key, _) = keys();

        let peers = (0..MAX_NEIGHBORS_PER_PACKET)
            .map(|_| peer("2001:db8::1".parse().unwrap()))
            .collect();

        let (bytes, _) = Message::Neighbors(PeerList::new(peers))
            .to_bytes(&secp, &secret_key)
            .unwrap();

        assert!(bytes.len() <= MAX_PACKET_SIZE);
    }
}
