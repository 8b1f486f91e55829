//! The opaque `Crypto` capability the core consumes but never implements.
//! Real hashing/signing/encryption is a collaborator's concern; this module
//! only defines the trait seam and the one piece of call-site logic worth
//! calling out: a historical `verifyBroadcastMessage` polarity bug must not
//! be reproduced here.

use std::sync::Arc;

/// Verifies signatures over broadcast payment messages. A real
/// implementation (Ed25519-style, typically) lives outside this crate;
/// `supernode-server` supplies whichever one a deployment needs.
pub trait Crypto: Send + Sync {
    fn verify_signature(&self, message: &[u8], signature: &[u8], public_key_hex: &str) -> bool;
}

/// Always-reject capability: a safe default for configurations that never
/// wire in a real signer, and the one used by tests exercising the
/// decode-failure path without needing a working keypair.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCrypto;

impl Crypto for NullCrypto {
    fn verify_signature(&self, _message: &[u8], _signature: &[u8], _public_key_hex: &str) -> bool {
        false
    }
}

/// Decodes a hex-encoded signature and asks the capability to verify it.
///
/// A failed hex decode is the only reason to reject before ever consulting
/// `crypto`; a successful decode is a precondition for verification, never
/// an inversion trigger (an earlier version of this check had that
/// backwards and rejected on a *successful* decode instead).
pub fn verify_broadcast_message(crypto: &dyn Crypto, message: &[u8], signature_hex: &str, public_key_hex: &str) -> bool {
    match hex::decode(signature_hex) {
        Ok(signature) => crypto.verify_signature(message, &signature, public_key_hex),
        Err(_) => false,
    }
}

/// Shared handle stored in `AppState`/handler closures; `Arc<dyn Crypto>`
/// so a deployment can swap in a real signer without this crate knowing
/// its concrete type.
pub type CryptoHandle = Arc<dyn Crypto>;
