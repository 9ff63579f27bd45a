//! Ed25519 key handling and signature checks.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::{Account, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The account bytes do not decode to a curve point.
    #[error("invalid public key")]
    InvalidPublicKey,
    /// The signature does not verify under the given account.
    #[error("signature verification failed")]
    BadSignature,
}

/// A 32-byte Ed25519 signing key seed.
#[derive(Clone)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PrivateKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.0)
    }

    pub fn public_key(&self) -> Account {
        Account::from_bytes(self.signing_key().verifying_key().to_bytes())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A signing key together with its derived account.
#[derive(Debug, Clone)]
pub struct Keypair {
    private: PrivateKey,
    public: Account,
}

impl Keypair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self::from_private(PrivateKey(signing.to_bytes()))
    }

    /// Deterministic keypair from a fixed seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_private(PrivateKey(seed))
    }

    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    pub fn account(&self) -> Account {
        self.public
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        sign_message(&self.private, message)
    }
}

pub fn sign_message(key: &PrivateKey, message: &[u8]) -> Signature {
    Signature::from_bytes(key.signing_key().sign(message).to_bytes())
}

/// Checks `signature` over `message` under `account`.
pub fn validate_message(
    account: &Account,
    message: &[u8],
    signature: &Signature,
) -> Result<(), SignatureError> {
    let key = VerifyingKey::from_bytes(account.as_bytes())
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    key.verify(message, &sig)
        .map_err(|_| SignatureError::BadSignature)
}

/// Batch signature check. `verifications[i]` is set to 1 when entry `i`
/// verifies, 0 otherwise. Falls back to per-item checks when the batched
/// primitive rejects the set, so a single bad entry cannot poison the rest.
pub fn validate_message_batch(
    messages: &[&[u8]],
    accounts: &[Account],
    signatures: &[Signature],
    verifications: &mut [i32],
) {
    debug_assert!(
        messages.len() == accounts.len()
            && accounts.len() == signatures.len()
            && signatures.len() == verifications.len()
    );
    let mut keys = Vec::with_capacity(accounts.len());
    let mut sigs = Vec::with_capacity(signatures.len());
    let mut decodable = true;
    for (account, signature) in accounts.iter().zip(signatures) {
        match VerifyingKey::from_bytes(account.as_bytes()) {
            Ok(key) => {
                keys.push(key);
                sigs.push(ed25519_dalek::Signature::from_bytes(signature.as_bytes()));
            }
            Err(_) => {
                decodable = false;
                break;
            }
        }
    }
    if decodable && ed25519_dalek::verify_batch(messages, &sigs, &keys).is_ok() {
        verifications.fill(1);
        return;
    }
    for (i, verification) in verifications.iter_mut().enumerate() {
        let ok = validate_message(&accounts[i], messages[i], &signatures[i]).is_ok();
        *verification = i32::from(ok);
    }
}
