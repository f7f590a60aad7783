//! Cryptographic operations for the ledger
//!
//! This module provides:
//! - Keccak-256 identity hashes and purchase proofs (bit-exact with
//!   Solidity `keccak256(abi.encodePacked(..))`)
//! - Ed25519 key pairs whose address is derived the Ethereum way
//! - Signed transactions carrying an authenticated caller identity

use crate::types::{Address, CourseHash, CourseId, Proof, PublicKey, Transaction};
use crate::{Error, Result};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Keccak-256 of arbitrary bytes
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Identity hash of a purchase: `keccak256(course_id[16] || buyer[20])`
pub fn course_hash(course_id: &CourseId, buyer: &Address) -> CourseHash {
    let mut hasher = Keccak256::new();
    hasher.update(course_id.as_bytes());
    hasher.update(buyer.as_bytes());
    CourseHash::from_bytes(hasher.finalize().into())
}

/// Purchase proof built by the front-end:
/// `keccak256(keccak256(email) || course_hash)`
///
/// The ledger stores proofs verbatim and never recomputes them.
pub fn purchase_proof(email: &str, hash: &CourseHash) -> Proof {
    let mut hasher = Keccak256::new();
    hasher.update(keccak256(email.as_bytes()));
    hasher.update(hash.as_bytes());
    Proof::from_bytes(hasher.finalize().into())
}

/// Address of a public key: last 20 bytes of its Keccak-256
pub fn address_of(public_key: &PublicKey) -> Address {
    let digest = keccak256(public_key.as_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[12..]);
    Address::from_bytes(bytes)
}

/// Ed25519 signature (64 bytes)
#[derive(Clone, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;

        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(D::Error::custom)?
        } else {
            Vec::<u8>::deserialize(deserializer)?
        };

        let len = bytes.len();
        <[u8; 64]>::try_from(bytes)
            .map(Self)
            .map_err(|_| D::Error::custom(format!("signature must be 64 bytes, got {}", len)))
    }
}

/// Ed25519 key pair for signing calls
#[derive(Debug)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Create from seed (32 bytes) - deterministic generation
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();

        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_bytes(self.verifying_key.to_bytes())
    }

    /// Ledger address controlled by this key
    pub fn address(&self) -> Address {
        address_of(&self.public_key())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::from_bytes(self.signing_key.sign(message).to_bytes())
    }

    /// Sign a transaction sent from this key's address
    pub fn sign_transaction(&self, transaction: Transaction, nonce: u64) -> Result<SignedTransaction> {
        if transaction.from != self.address() {
            return Err(Error::SignatureError(format!(
                "transaction sender {} is not key address {}",
                transaction.from,
                self.address()
            )));
        }

        let message = SignedTransaction::signing_bytes(&transaction, nonce)?;
        Ok(SignedTransaction {
            signature: self.sign(&message),
            public_key: self.public_key(),
            transaction,
            nonce,
        })
    }
}

/// Transaction plus the proof that its sender authorized it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Call being authorized
    pub transaction: Transaction,

    /// Sender's signed-call counter
    pub nonce: u64,

    /// Signer's public key
    pub public_key: PublicKey,

    /// Signature over `(transaction, nonce)`
    pub signature: Signature,
}

impl SignedTransaction {
    /// Bytes covered by the signature
    pub fn signing_bytes(transaction: &Transaction, nonce: u64) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(transaction, nonce))?)
    }

    /// Verify signature and sender binding, returning the sender
    pub fn verify(&self) -> Result<Address> {
        let signer = address_of(&self.public_key);
        if signer != self.transaction.from {
            return Err(Error::SignatureError(format!(
                "signer {} does not match sender {}",
                signer, self.transaction.from
            )));
        }

        let verifying_key = VerifyingKey::from_bytes(self.public_key.as_bytes())
            .map_err(|e| Error::SignatureError(format!("Invalid public key: {}", e)))?;
        let message = Self::signing_bytes(&self.transaction, self.nonce)?;

        verifying_key
            .verify(&message, &DalekSignature::from_bytes(self.signature.as_bytes()))
            .map_err(|e| Error::SignatureError(format!("Verification failed: {}", e)))?;

        Ok(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Call;

    #[test]
    fn test_keccak_known_vectors() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(
            hex::encode(keccak256(b"abc")),
            "4e03657aea45a94fc7d47ba826c8d667c0d1e6e33a64a036ec44f58fa12d6c45"
        );
    }

    #[test]
    fn test_course_hash_is_packed_keccak() {
        let course_id: CourseId = "0x00000000000000000000000000003130".parse().unwrap();
        let buyer = Address::from_bytes([0x11; 20]);

        let mut packed = Vec::new();
        packed.extend_from_slice(course_id.as_bytes());
        packed.extend_from_slice(buyer.as_bytes());
        assert_eq!(packed.len(), 36);

        let hash = course_hash(&course_id, &buyer);
        assert_eq!(hash.as_bytes(), &keccak256(&packed));
        assert_eq!(hash, course_hash(&course_id, &buyer));
        assert_ne!(hash, course_hash(&course_id, &Address::from_bytes([0x12; 20])));
    }

    #[test]
    fn test_purchase_proof() {
        let hash = CourseHash::from_bytes([7u8; 32]);
        let proof = purchase_proof("buyer@example.com", &hash);

        let mut packed = keccak256(b"buyer@example.com").to_vec();
        packed.extend_from_slice(hash.as_bytes());
        assert_eq!(proof.as_bytes(), &keccak256(&packed));
        assert_ne!(proof, purchase_proof("other@example.com", &hash));
    }

    #[test]
    fn test_keypair_from_seed() {
        let seed = [42u8; 32];
        let keypair1 = KeyPair::from_seed(&seed);
        let keypair2 = KeyPair::from_seed(&seed);

        assert_eq!(keypair1.public_key(), keypair2.public_key());
        assert_eq!(keypair1.address(), keypair2.address());
        assert_ne!(keypair1.address(), KeyPair::from_seed(&[43u8; 32]).address());
    }

    #[test]
    fn test_signed_transaction_roundtrip() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new(keypair.address(), Call::Deposit).with_value(10);

        let signed = keypair.sign_transaction(tx, 0).unwrap();
        assert_eq!(signed.verify().unwrap(), keypair.address());
    }

    #[test]
    fn test_tampered_transaction_rejected() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new(keypair.address(), Call::Deposit).with_value(10);

        let mut signed = keypair.sign_transaction(tx, 0).unwrap();
        signed.transaction.value = 11;
        assert!(matches!(signed.verify(), Err(Error::SignatureError(_))));

        let mut replayed = keypair
            .sign_transaction(Transaction::new(keypair.address(), Call::Deposit), 3)
            .unwrap();
        replayed.nonce = 4;
        assert!(replayed.verify().is_err());
    }

    #[test]
    fn test_sender_must_match_key() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let tx = Transaction::new(other.address(), Call::StopContract);

        assert!(keypair.sign_transaction(tx.clone(), 0).is_err());

        // Forged envelope: valid signature, wrong sender
        let forged = SignedTransaction {
            signature: keypair.sign(&SignedTransaction::signing_bytes(&tx, 0).unwrap()),
            public_key: keypair.public_key(),
            transaction: tx,
            nonce: 0,
        };
        assert!(matches!(forged.verify(), Err(Error::SignatureError(_))));
    }

    #[test]
    fn test_signature_json() {
        let keypair = KeyPair::from_seed(&[1u8; 32]);
        let signed = keypair
            .sign_transaction(Transaction::new(keypair.address(), Call::Deposit), 0)
            .unwrap();

        let json = serde_json::to_string(&signed).unwrap();
        let back: SignedTransaction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signed);

        let bytes = bincode::serialize(&signed).unwrap();
        let back: SignedTransaction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.verify().unwrap(), keypair.address());
    }
}
