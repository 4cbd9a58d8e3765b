//! Opaque signing seam.
//!
//! Signature construction is an external collaborator: the protocol only
//! needs `sign(order, secret)` and `verify(order, signature, authority)`
//! over opaque byte strings. The [`KeyPair`] implementation here is a
//! deterministic placeholder binding a secret to the order identity; swap
//! it out at the [`Signer`]/[`SignatureVerifier`] seam for real
//! cryptography.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;

use crate::types::{AuthorityName, TransferOrder};

/// Opaque signature bytes, hex-rendered for the JSON wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub String);

impl Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Secret material a node signs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair(pub String);

/// Produces a signature over a transfer order.
pub trait Signer: Send + Sync {
    fn sign(&self, order: &TransferOrder) -> Signature;
}

/// Checks a signature attributed to a named authority.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, order: &TransferOrder, signature: &Signature, authority: &str) -> bool;
}

impl Signer for KeyPair {
    fn sign(&self, order: &TransferOrder) -> Signature {
        let preimage = format!("{}|{}|{}", self.0, order.order_id, order.sequence_number);
        Signature(hex::encode(preimage.as_bytes()))
    }
}

/// Verifier that recomputes placeholder signatures from the committee's
/// shared secrets. Stands in for public-key verification in deployments
/// where the crypto collaborator is not wired up.
#[derive(Debug, Default)]
pub struct SharedSecretVerifier {
    secrets: HashMap<AuthorityName, KeyPair>,
}

impl SharedSecretVerifier {
    pub fn new(secrets: HashMap<AuthorityName, KeyPair>) -> Self {
        SharedSecretVerifier { secrets }
    }
}

impl SignatureVerifier for SharedSecretVerifier {
    fn verify(&self, order: &TransferOrder, signature: &Signature, authority: &str) -> bool {
        match self.secrets.get(authority) {
            Some(keypair) => keypair.sign(order) == *signature,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;
    use uuid::Uuid;

    fn order(sequence_number: u64) -> TransferOrder {
        TransferOrder {
            order_id: Uuid::new_v4(),
            sender: "c1".into(),
            recipient: "c2".into(),
            token_address: "0xA".into(),
            amount: 5,
            sequence_number,
            timestamp: Timestamp(0.0),
            signature: None,
            epoch: 0,
            ttl_seconds: 30.0,
        }
    }

    #[test]
    fn sign_is_deterministic_per_order() {
        let keypair = KeyPair("secret-a1".into());
        let o = order(3);
        assert_eq!(keypair.sign(&o), keypair.sign(&o));
        assert_ne!(keypair.sign(&o), keypair.sign(&order(3)));
    }

    #[test]
    fn verifier_checks_authority_identity() {
        let a1 = KeyPair("secret-a1".into());
        let a2 = KeyPair("secret-a2".into());
        let verifier = SharedSecretVerifier::new(HashMap::from([
            ("a1".to_string(), a1.clone()),
            ("a2".to_string(), a2),
        ]));
        let o = order(1);
        let sig = a1.sign(&o);
        assert!(verifier.verify(&o, &sig, "a1"));
        assert!(!verifier.verify(&o, &sig, "a2"));
        assert!(!verifier.verify(&o, &sig, "a3"));
    }
}
