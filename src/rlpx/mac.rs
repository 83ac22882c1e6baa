//! Running frame MAC of an RLPx connection.

use std::fmt::{self, Debug, Formatter};

use aes::{
    cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit},
    Aes256,
};
use sha3::{Digest, Keccak256};

/// Size of the MAC appended to frame headers and bodies.
pub const MAC_SIZE: usize = 16;

/// Keccak256 state over everything sent (or received) on the connection,
/// mixed with AES-256-ECB of its own digest at every frame boundary.
#[derive(Clone)]
pub struct FrameMac {
    cipher: Aes256,
    hasher: Keccak256,
}

impl FrameMac {
    pub fn new(secret: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(secret)),
            hasher: Keccak256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Mix in an encrypted frame header.
    pub fn update_header(&mut self, header_ciphertext: &[u8]) {
        let mut seed = self.encrypted_digest();

        seed.iter_mut()
            .zip(header_ciphertext)
            .for_each(|(byte, header)| *byte ^= header);

        self.hasher.update(seed);
    }

    /// Mix in an encrypted frame body.
    pub fn update_body(&mut self, body_ciphertext: &[u8]) {
        self.hasher.update(body_ciphertext);

        let previous = self.digest();
        let mut seed = self.encrypted_digest();

        seed.iter_mut()
            .zip(previous)
            .for_each(|(byte, previous)| *byte ^= previous);

        self.hasher.update(seed);
    }

    /// First [MAC_SIZE] bytes of the current keccak digest.
    pub fn digest(&self) -> [u8; MAC_SIZE] {
        let mut digest = [0_u8; MAC_SIZE];
        digest.copy_from_slice(&self.hasher.clone().finalize()[..MAC_SIZE]);

        digest
    }

    fn encrypted_digest(&self) -> [u8; MAC_SIZE] {
        let mut block = self.digest();
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(&mut block));

        block
    }
}

impl Debug for FrameMac {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FrameMac({})", hex::encode(self.digest()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let mut egress = FrameMac::new(&[7; 32]);
        let mut ingress = FrameMac::new(&[7; 32]);

        egress.update(b"handshake");
        ingress.update(b"handshake");

        egress.update_header(&[1; 16]);
        ingress.update_header(&[1; 16]);
        assert_eq!(egress.digest(), ingress.digest());

        egress.update_body(&[2; 32]);
        ingress.update_body(&[2; 32]);
        assert_eq!(egress.digest(), ingress.digest());
    }

    #[test]
    fn diverges_on_different_input() {
        let mut a = FrameMac::new(&[7; 32]);
        let mut b = FrameMac::new(&[7; 32]);

        a.update_header(&[1; 16]);
        b.update_header(&[2; 16]);

        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn secret_matters() {
        let mut a = FrameMac::new(&[7; 32]);
        let mut b = FrameMac::new(&[8; 32]);

        a.update_header(&[1; 16]);
        b.update_header(&[1; 16]);

        assert_ne!(a.digest(), b.digest());
    }
}
