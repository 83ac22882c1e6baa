//! ECIES handshake and frame encryption of an RLPx connection.
//!
//! Handshake messages are encrypted to the recipient's static key as
//! `ephemeral public key(65) || iv(16) || AES-128-CTR(payload) || HMAC-SHA256(iv || ciphertext)(32)`.
//! Once both sides know each other's ephemeral key and nonce, frames are
//! encrypted with AES-256-CTR and authenticated by a [FrameMac] per direction.

use std::fmt::{self, Debug, Formatter};

use aes::{Aes128, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::{thread_rng, RngCore};
use secp256k1::{
    ecdh::shared_secret_point,
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use crate::common::{NodeId, NODE_ID_SIZE};

use super::mac::{FrameMac, MAC_SIZE};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const NONCE_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const TAG_SIZE: usize = 32;
const PUBLIC_KEY_SIZE: usize = NODE_ID_SIZE + 1;
const SIGNATURE_SIZE: usize = 65;

/// Bytes added by [encrypt] around its plaintext.
pub const ENCRYPTION_OVERHEAD: usize = PUBLIC_KEY_SIZE + IV_SIZE + TAG_SIZE;
/// Size of the plaintext of an auth message.
const AUTH_PLAINTEXT_SIZE: usize = SIGNATURE_SIZE + 32 + NODE_ID_SIZE + NONCE_SIZE + 1;
/// Size of the plaintext of an ack message.
const ACK_PLAINTEXT_SIZE: usize = NODE_ID_SIZE + NONCE_SIZE + 1;

/// Size of an encrypted auth message.
pub const AUTH_SIZE: usize = AUTH_PLAINTEXT_SIZE + ENCRYPTION_OVERHEAD;
/// Size of an encrypted ack message.
pub const ACK_SIZE: usize = ACK_PLAINTEXT_SIZE + ENCRYPTION_OVERHEAD;
/// Size of an encrypted frame header including its MAC.
pub const HEADER_SIZE: usize = 16 + MAC_SIZE;
/// Largest body size a frame header can describe.
pub const MAX_BODY_SIZE: usize = 0xff_ffff;

/// `0xc2 0x80 0x80`, the RLP list `[0, 0]` for capability id and context id.
const HEADER_DATA: [u8; 3] = [0xc2, 0x80, 0x80];

/// Bytes to read after a header announcing a body of `body_size` bytes,
/// the body padded to 16 bytes followed by its MAC.
pub fn body_read_size(body_size: usize) -> usize {
    padded(body_size) + MAC_SIZE
}

fn padded(size: usize) -> usize {
    size.div_ceil(16) * 16
}

struct Frame {
    ingress_aes: Aes256Ctr,
    egress_aes: Aes256Ctr,
    ingress_mac: FrameMac,
    egress_mac: FrameMac,
}

/// Handshake and frame cipher state of one connection.
pub struct Ecies {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    node_id: NodeId,
    remote_public_key: Option<PublicKey>,

    ephemeral_secret_key: SecretKey,
    ephemeral_public_key: PublicKey,
    remote_ephemeral_public_key: Option<PublicKey>,

    nonce: [u8; NONCE_SIZE],
    remote_nonce: Option<[u8; NONCE_SIZE]>,

    init_msg: Option<Vec<u8>>,
    remote_init_msg: Option<Vec<u8>>,

    frame: Option<Frame>,
    body_size: Option<usize>,
}

impl Ecies {
    /// Create the state of a connection, `remote_node_id` is known for outgoing connections.
    pub fn new(secret_key: SecretKey, remote_node_id: Option<&NodeId>) -> Result<Self, EciesError> {
        let secp = Secp256k1::new();
        let node_id = NodeId::from(secret_key.public_key(&secp));

        let remote_public_key = remote_node_id
            .map(|node_id| node_id.public_key())
            .transpose()
            .map_err(|_| EciesError::InvalidPublicKey)?;

        let ephemeral_secret_key = SecretKey::new(&mut thread_rng());
        let ephemeral_public_key = ephemeral_secret_key.public_key(&secp);

        let mut nonce = [0_u8; NONCE_SIZE];
        thread_rng().fill_bytes(&mut nonce);

        Ok(Self {
            secp,
            secret_key,
            node_id,
            remote_public_key,
            ephemeral_secret_key,
            ephemeral_public_key,
            remote_ephemeral_public_key: None,
            nonce,
            remote_nonce: None,
            init_msg: None,
            remote_init_msg: None,
            frame: None,
            body_size: None,
        })
    }

    // === Getters ===

    /// Identity of the remote side, known from the start for outgoing
    /// connections, and after [Self::parse_auth] for incoming ones.
    pub fn remote_node_id(&self) -> Option<NodeId> {
        self.remote_public_key.as_ref().map(NodeId::from)
    }

    // === Handshake ===

    /// Create the initiator's auth message.
    pub fn create_auth(&mut self) -> Result<Vec<u8>, EciesError> {
        let remote_public_key = self.remote_public_key.ok_or(EciesError::UnknownRemote)?;

        let static_shared = ecdh_x(&remote_public_key, &self.secret_key);
        let digest = xor(&static_shared, &self.nonce);

        let (recovery_id, signature) = self
            .secp
            .sign_ecdsa_recoverable(&Message::from_digest(digest), &self.ephemeral_secret_key)
            .serialize_compact();

        let ephemeral = NodeId::from(&self.ephemeral_public_key);

        let mut data = Vec::with_capacity(AUTH_PLAINTEXT_SIZE);
        data.extend_from_slice(&signature);
        data.push(recovery_id.to_i32() as u8);
        data.extend_from_slice(&Keccak256::digest(ephemeral.as_bytes()));
        data.extend_from_slice(self.node_id.as_bytes());
        data.extend_from_slice(&self.nonce);
        data.push(0x00);

        let auth = encrypt(&self.secp, &remote_public_key, &data)?;
        self.init_msg = Some(auth.clone());

        Ok(auth)
    }

    /// Parse the initiator's auth message, learning its identity.
    pub fn parse_auth(&mut self, bytes: &[u8]) -> Result<(), EciesError> {
        let data = decrypt(&self.secret_key, bytes)?;

        if data.len() < AUTH_PLAINTEXT_SIZE - 1 {
            return Err(EciesError::InvalidLength(data.len()));
        }

        let signature = &data[..SIGNATURE_SIZE];
        let ephemeral_hash = &data[SIGNATURE_SIZE..SIGNATURE_SIZE + 32];
        let key_start = SIGNATURE_SIZE + 32;
        let remote_node_id = NodeId::from_bytes(&data[key_start..key_start + NODE_ID_SIZE])
            .map_err(|_| EciesError::InvalidPublicKey)?;
        let nonce_start = key_start + NODE_ID_SIZE;
        let remote_nonce: [u8; NONCE_SIZE] = data[nonce_start..nonce_start + NONCE_SIZE]
            .try_into()
            .map_err(|_| EciesError::InvalidLength(data.len()))?;

        let remote_public_key = remote_node_id
            .public_key()
            .map_err(|_| EciesError::InvalidPublicKey)?;

        let static_shared = ecdh_x(&remote_public_key, &self.secret_key);
        let digest = xor(&static_shared, &remote_nonce);

        let recovery_id = RecoveryId::from_i32(signature[SIGNATURE_SIZE - 1] as i32)
            .map_err(|_| EciesError::InvalidSignature)?;
        let signature =
            RecoverableSignature::from_compact(&signature[..SIGNATURE_SIZE - 1], recovery_id)
                .map_err(|_| EciesError::InvalidSignature)?;
        let remote_ephemeral_public_key = self
            .secp
            .recover_ecdsa(&Message::from_digest(digest), &signature)
            .map_err(|_| EciesError::InvalidSignature)?;

        let ephemeral = NodeId::from(&remote_ephemeral_public_key);
        if Keccak256::digest(ephemeral.as_bytes()).as_slice() != ephemeral_hash {
            return Err(EciesError::EphemeralKeyMismatch);
        }

        self.remote_public_key = Some(remote_public_key);
        self.remote_ephemeral_public_key = Some(remote_ephemeral_public_key);
        self.remote_nonce = Some(remote_nonce);
        self.remote_init_msg = Some(bytes.to_vec());

        Ok(())
    }

    /// Create the recipient's ack message, and set up the frame ciphers.
    pub fn create_ack(&mut self) -> Result<Vec<u8>, EciesError> {
        let remote_public_key = self.remote_public_key.ok_or(EciesError::UnknownRemote)?;

        let ephemeral = NodeId::from(&self.ephemeral_public_key);

        let mut data = Vec::with_capacity(ACK_PLAINTEXT_SIZE);
        data.extend_from_slice(ephemeral.as_bytes());
        data.extend_from_slice(&self.nonce);
        data.push(0x00);

        let ack = encrypt(&self.secp, &remote_public_key, &data)?;
        self.init_msg = Some(ack.clone());

        let remote_init_msg = self
            .remote_init_msg
            .clone()
            .ok_or(EciesError::UnexpectedState("ack before auth"))?;
        self.setup_frame(&remote_init_msg, true)?;

        Ok(ack)
    }

    /// Parse the recipient's ack message, and set up the frame ciphers.
    pub fn parse_ack(&mut self, bytes: &[u8]) -> Result<(), EciesError> {
        let data = decrypt(&self.secret_key, bytes)?;

        if data.len() < ACK_PLAINTEXT_SIZE - 1 {
            return Err(EciesError::InvalidLength(data.len()));
        }

        let remote_ephemeral = NodeId::from_bytes(&data[..NODE_ID_SIZE])
            .map_err(|_| EciesError::InvalidPublicKey)?;
        let remote_nonce: [u8; NONCE_SIZE] = data[NODE_ID_SIZE..NODE_ID_SIZE + NONCE_SIZE]
            .try_into()
            .map_err(|_| EciesError::InvalidLength(data.len()))?;

        self.remote_ephemeral_public_key = Some(
            remote_ephemeral
                .public_key()
                .map_err(|_| EciesError::InvalidPublicKey)?,
        );
        self.remote_nonce = Some(remote_nonce);

        self.setup_frame(bytes, false)
    }

    // === Frames ===

    /// Encrypt and authenticate a header announcing a body of `body_size` bytes.
    pub fn create_header(&mut self, body_size: usize) -> Result<[u8; HEADER_SIZE], EciesError> {
        if body_size > MAX_BODY_SIZE {
            return Err(EciesError::BodyTooLarge(body_size));
        }

        let frame = self.frame.as_mut().ok_or(EciesError::UnexpectedState("no frame secrets"))?;

        let mut header = [0_u8; HEADER_SIZE];
        header[..3].copy_from_slice(&(body_size as u32).to_be_bytes()[1..]);
        header[3..6].copy_from_slice(&HEADER_DATA);

        frame.egress_aes.apply_keystream(&mut header[..16]);
        frame.egress_mac.update_header(&header[..16]);
        header[16..].copy_from_slice(&frame.egress_mac.digest());

        Ok(header)
    }

    /// Verify and decrypt a header, returns the announced body size.
    pub fn parse_header(&mut self, bytes: &[u8]) -> Result<usize, EciesError> {
        if bytes.len() != HEADER_SIZE {
            return Err(EciesError::InvalidLength(bytes.len()));
        }

        let frame = self.frame.as_mut().ok_or(EciesError::UnexpectedState("no frame secrets"))?;

        let (ciphertext, mac) = bytes.split_at(16);

        frame.ingress_mac.update_header(ciphertext);
        if frame.ingress_mac.digest() != mac {
            return Err(EciesError::InvalidHeaderMac);
        }

        let mut header = [0_u8; 16];
        header.copy_from_slice(ciphertext);
        frame.ingress_aes.apply_keystream(&mut header);

        let body_size = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        self.body_size = Some(body_size);

        Ok(body_size)
    }

    /// Encrypt and authenticate a body, padded to 16 bytes.
    pub fn create_body(&mut self, data: &[u8]) -> Result<Vec<u8>, EciesError> {
        let frame = self.frame.as_mut().ok_or(EciesError::UnexpectedState("no frame secrets"))?;

        let mut body = vec![0_u8; padded(data.len())];
        body[..data.len()].copy_from_slice(data);

        frame.egress_aes.apply_keystream(&mut body);
        frame.egress_mac.update_body(&body);
        body.extend_from_slice(&frame.egress_mac.digest());

        Ok(body)
    }

    /// Verify and decrypt the body announced by the last parsed header.
    pub fn parse_body(&mut self, bytes: &[u8]) -> Result<Vec<u8>, EciesError> {
        let body_size = self
            .body_size
            .take()
            .ok_or(EciesError::UnexpectedState("body before header"))?;

        if bytes.len() != body_read_size(body_size) {
            return Err(EciesError::InvalidLength(bytes.len()));
        }

        let frame = self.frame.as_mut().ok_or(EciesError::UnexpectedState("no frame secrets"))?;

        let (ciphertext, mac) = bytes.split_at(bytes.len() - MAC_SIZE);

        frame.ingress_mac.update_body(ciphertext);
        if frame.ingress_mac.digest() != mac {
            return Err(EciesError::InvalidBodyMac);
        }

        let mut body = ciphertext.to_vec();
        frame.ingress_aes.apply_keystream(&mut body);
        body.truncate(body_size);

        Ok(body)
    }

    // === Private Methods ===

    fn setup_frame(&mut self, remote_data: &[u8], recipient: bool) -> Result<(), EciesError> {
        let remote_nonce = self
            .remote_nonce
            .ok_or(EciesError::UnexpectedState("unknown remote nonce"))?;
        let remote_ephemeral_public_key = self
            .remote_ephemeral_public_key
            .ok_or(EciesError::UnexpectedState("unknown remote ephemeral key"))?;
        let init_msg = self
            .init_msg
            .as_ref()
            .ok_or(EciesError::UnexpectedState("no handshake message sent"))?;

        let nonce_hash: [u8; 32] = if recipient {
            keccak(&[&self.nonce, &remote_nonce])
        } else {
            keccak(&[&remote_nonce, &self.nonce])
        };

        let ephemeral_shared = ecdh_x(&remote_ephemeral_public_key, &self.ephemeral_secret_key);

        let shared_secret = keccak(&[&ephemeral_shared, &nonce_hash]);
        let aes_secret = keccak(&[&ephemeral_shared, &shared_secret]);
        let mac_secret = keccak(&[&ephemeral_shared, &aes_secret]);

        let iv = [0_u8; 16];

        let mut ingress_mac = FrameMac::new(&mac_secret);
        ingress_mac.update(&xor(&mac_secret, &self.nonce));
        ingress_mac.update(remote_data);

        let mut egress_mac = FrameMac::new(&mac_secret);
        egress_mac.update(&xor(&mac_secret, &remote_nonce));
        egress_mac.update(init_msg);

        self.frame = Some(Frame {
            ingress_aes: Aes256Ctr::new(&aes_secret.into(), &iv.into()),
            egress_aes: Aes256Ctr::new(&aes_secret.into(), &iv.into()),
            ingress_mac,
            egress_mac,
        });

        Ok(())
    }
}

impl Debug for Ecies {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ecies")
            .field("node_id", &self.node_id)
            .field("remote_node_id", &self.remote_node_id())
            .field("framed", &self.frame.is_some())
            .finish()
    }
}

/// Encrypt `data` to `public_key` with a fresh ephemeral key.
pub fn encrypt(
    secp: &Secp256k1<All>,
    public_key: &PublicKey,
    data: &[u8],
) -> Result<Vec<u8>, EciesError> {
    let ephemeral_secret_key = SecretKey::new(&mut thread_rng());
    let (encryption_key, mac_key) = derive_keys(&ecdh_x(public_key, &ephemeral_secret_key));

    let mut iv = [0_u8; IV_SIZE];
    thread_rng().fill_bytes(&mut iv);

    let mut ciphertext = data.to_vec();
    Aes128Ctr::new(&encryption_key.into(), &iv.into()).apply_keystream(&mut ciphertext);

    let mut hmac = <HmacSha256 as Mac>::new_from_slice(&mac_key)
        .map_err(|_| EciesError::UnexpectedState("hmac key"))?;
    hmac.update(&iv);
    hmac.update(&ciphertext);
    let tag = hmac.finalize().into_bytes();

    let mut out = Vec::with_capacity(data.len() + ENCRYPTION_OVERHEAD);
    out.extend_from_slice(&ephemeral_secret_key.public_key(secp).serialize_uncompressed());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);

    Ok(out)
}

/// Decrypt a message encrypted to `secret_key`'s public key.
pub fn decrypt(secret_key: &SecretKey, bytes: &[u8]) -> Result<Vec<u8>, EciesError> {
    if bytes.len() < ENCRYPTION_OVERHEAD {
        return Err(EciesError::InvalidLength(bytes.len()));
    }

    if bytes[0] != 0x04 {
        return Err(EciesError::InvalidPublicKey);
    }

    let ephemeral_public_key = PublicKey::from_slice(&bytes[..PUBLIC_KEY_SIZE])
        .map_err(|_| EciesError::InvalidPublicKey)?;
    let (encryption_key, mac_key) = derive_keys(&ecdh_x(&ephemeral_public_key, secret_key));

    let iv = &bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + IV_SIZE];
    let ciphertext = &bytes[PUBLIC_KEY_SIZE + IV_SIZE..bytes.len() - TAG_SIZE];
    let tag = &bytes[bytes.len() - TAG_SIZE..];

    let mut hmac = <HmacSha256 as Mac>::new_from_slice(&mac_key)
        .map_err(|_| EciesError::UnexpectedState("hmac key"))?;
    hmac.update(iv);
    hmac.update(ciphertext);
    hmac.verify_slice(tag).map_err(|_| EciesError::InvalidTag)?;

    let iv: [u8; IV_SIZE] = iv
        .try_into()
        .map_err(|_| EciesError::InvalidLength(bytes.len()))?;

    let mut plaintext = ciphertext.to_vec();
    Aes128Ctr::new(&encryption_key.into(), &iv.into()).apply_keystream(&mut plaintext);

    Ok(plaintext)
}

/// NIST SP 800-56 concatenation KDF with SHA-256, one round for 32 bytes,
/// split into the AES-128 key and the HMAC key.
fn derive_keys(shared: &[u8; 32]) -> ([u8; 16], [u8; 32]) {
    let mut hasher = Sha256::new();
    hasher.update(1_u32.to_be_bytes());
    hasher.update(shared);
    let key = hasher.finalize();

    let mut encryption_key = [0_u8; 16];
    encryption_key.copy_from_slice(&key[..16]);

    let mac_key: [u8; 32] = Sha256::digest(&key[16..32]).into();

    (encryption_key, mac_key)
}

/// X coordinate of the ECDH shared point.
fn ecdh_x(public_key: &PublicKey, secret_key: &SecretKey) -> [u8; 32] {
    let point = shared_secret_point(public_key, secret_key);

    let mut x = [0_u8; 32];
    x.copy_from_slice(&point[..32]);

    x
}

fn keccak(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }

    hasher.finalize().into()
}

fn xor(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0_u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }

    out
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors in the handshake or frame layer, fatal to the connection.
pub enum EciesError {
    #[error("Invalid secp256k1 public key")]
    InvalidPublicKey,

    #[error("Invalid message length: {0}")]
    InvalidLength(usize),

    #[error("Handshake message failed authentication")]
    InvalidTag,

    #[error("Invalid auth signature")]
    InvalidSignature,

    #[error("Auth ephemeral key does not match its hash")]
    EphemeralKeyMismatch,

    #[error("Frame header MAC mismatch")]
    InvalidHeaderMac,

    #[error("Frame body MAC mismatch")]
    InvalidBodyMac,

    #[error("Frame body too large: {0}")]
    BodyTooLarge(usize),

    #[error("Remote identity is unknown")]
    UnknownRemote,

    #[error("Unexpected handshake state: {0}")]
    UnexpectedState(&'static str),
}

#[cfg(test)]
mod test {
    use super::*;

    fn pair() -> (Ecies, Ecies) {
        let initiator_key = SecretKey::new(&mut thread_rng());
        let recipient_key = SecretKey::new(&mut thread_rng());

        let recipient_id = NodeId::from(recipient_key.public_key(&Secp256k1::new()));

        (
            Ecies::new(initiator_key, Some(&recipient_id)).unwrap(),
            Ecies::new(recipient_key, None).unwrap(),
        )
    }

    fn handshake() -> (Ecies, Ecies) {
        let (mut initiator, mut recipient) = pair();

        let auth = initiator.create_auth().unwrap();
        assert_eq!(auth.len(), AUTH_SIZE);
        recipient.parse_auth(&auth).unwrap();

        let ack = recipient.create_ack().unwrap();
        assert_eq!(ack.len(), ACK_SIZE);
        initiator.parse_ack(&ack).unwrap();

        (initiator, recipient)
    }

    #[test]
    fn handshake_sizes() {
        assert_eq!(AUTH_SIZE, 307);
        assert_eq!(ACK_SIZE, 210);
        assert_eq!(HEADER_SIZE, 32);
    }

    #[test]
    fn body_read_sizes() {
        assert_eq!(body_read_size(20), 48);
        assert_eq!(body_read_size(16), 32);
        assert_eq!(body_read_size(1), 32);
    }

    #[test]
    fn encrypt_decrypt() {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut thread_rng());

        let encrypted = encrypt(&secp, &secret_key.public_key(&secp), b"hello").unwrap();
        assert_eq!(encrypted.len(), 5 + ENCRYPTION_OVERHEAD);

        assert_eq!(decrypt(&secret_key, &encrypted).unwrap(), b"hello");

        let other = SecretKey::new(&mut thread_rng());
        assert_eq!(
            decrypt(&other, &encrypted),
            Err(EciesError::InvalidTag)
        );
    }

    #[test]
    fn recipient_learns_initiator() {
        let (initiator, recipient) = handshake();

        assert_eq!(recipient.remote_node_id(), Some(initiator.node_id));
        assert_eq!(initiator.remote_node_id(), Some(recipient.node_id));
    }

    #[test]
    fn frames_both_ways() {
        let (mut initiator, mut recipient) = handshake();

        let payload = vec![0x80; 20];

        let header = initiator.create_header(payload.len()).unwrap();
        let body = initiator.create_body(&payload).unwrap();
        assert_eq!(body.len(), 48);

        assert_eq!(recipient.parse_header(&header).unwrap(), 20);
        assert_eq!(recipient.parse_body(&body).unwrap(), payload);

        let header = recipient.create_header(3).unwrap();
        let body = recipient.create_body(&[1, 2, 3]).unwrap();

        assert_eq!(initiator.parse_header(&header).unwrap(), 3);
        assert_eq!(initiator.parse_body(&body).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn tampered_auth() {
        let (mut initiator, mut recipient) = pair();

        let mut auth = initiator.create_auth().unwrap();
        auth[100] ^= 1;

        assert_eq!(recipient.parse_auth(&auth), Err(EciesError::InvalidTag));
    }

    #[test]
    fn tampered_header() {
        let (mut initiator, mut recipient) = handshake();

        let mut header = initiator.create_header(5).unwrap();
        header[0] ^= 1;

        assert_eq!(
            recipient.parse_header(&header),
            Err(EciesError::InvalidHeaderMac)
        );
    }

    #[test]
    fn tampered_body() {
        let (mut initiator, mut recipient) = handshake();

        let header = initiator.create_header(5).unwrap();
        let mut body = initiator.create_body(&[1, 2, 3, 4, 5]).unwrap();
        body[0] ^= 1;

        recipient.parse_header(&header).unwrap();
        assert_eq!(recipient.parse_body(&body), Err(EciesError::InvalidBodyMac));
    }

    #[test]
    fn frames_before_handshake() {
        let (mut initiator, _) = pair();

        assert!(matches!(
            initiator.create_header(1),
            Err(EciesError::UnexpectedState(_))
        ));
    }
}
