use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::error::CoreError;
use crate::ids::{DeviceId, JoinToken, Signature, TokenHash, TripCode};

/// Anonymous per-install identity. Generated once and persisted locally.
pub struct DeviceIdentity {
    signing_key: ed25519_dalek::SigningKey,
}

impl DeviceIdentity {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut rng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(bytes),
        }
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn device_id(&self) -> DeviceId {
        let verifying_key = self.signing_key.verifying_key();
        DeviceId::from_bytes(verifying_key.to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature::from_bytes(sig.to_bytes())
    }
}

pub fn verify_signature(
    device_id: &DeviceId,
    message: &[u8],
    signature: &Signature,
) -> Result<(), CoreError> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(device_id.as_bytes())
        .map_err(|_| CoreError::InvalidSignature)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    verifying_key
        .verify(message, &sig)
        .map_err(|_| CoreError::InvalidSignature)
}

/// Header document of a shared trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRecord {
    pub join_token_hash: TokenHash,
    pub created_by: DeviceId,
    pub created_at: Millis,
    pub version: u32,
}

impl TripRecord {
    pub fn new(join_token: &JoinToken, created_by: DeviceId, created_at: Millis) -> Self {
        Self {
            join_token_hash: join_token.hash(),
            created_by,
            created_at,
            version: 1,
        }
    }

    pub fn token_matches(&self, token: &JoinToken) -> bool {
        self.join_token_hash == token.hash()
    }
}

/// A device asking to be written into a trip's member list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRequest {
    pub trip_code: TripCode,
    pub device_id: DeviceId,
    pub join_token: JoinToken,
    pub signature: Signature,
}

impl MembershipRequest {
    pub fn new_signed(identity: &DeviceIdentity, trip_code: TripCode, join_token: JoinToken) -> Self {
        let message = Self::signing_message(&trip_code, &join_token);
        Self {
            signature: identity.sign(&message),
            device_id: identity.device_id(),
            trip_code,
            join_token,
        }
    }

    /// Check that the request was signed by the device it names.
    pub fn verify(&self) -> Result<(), CoreError> {
        let message = Self::signing_message(&self.trip_code, &self.join_token);
        verify_signature(&self.device_id, &message, &self.signature)
    }

    fn signing_message(trip_code: &TripCode, join_token: &JoinToken) -> Vec<u8> {
        let mut message = Vec::with_capacity(64);
        message.extend_from_slice(b"tripsync-membership:");
        message.extend_from_slice(trip_code.as_str().as_bytes());
        message.push(b':');
        message.extend_from_slice(join_token.as_str().as_bytes());
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let identity = DeviceIdentity::generate();
        let message = b"hello world";
        let sig = identity.sign(message);
        assert!(verify_signature(&identity.device_id(), message, &sig).is_ok());
    }

    #[test]
    fn wrong_key_fails() {
        let identity_a = DeviceIdentity::generate();
        let identity_b = DeviceIdentity::generate();
        let message = b"test message";
        let sig = identity_a.sign(message);
        assert!(verify_signature(&identity_b.device_id(), message, &sig).is_err());
    }

    #[test]
    fn secret_bytes_roundtrip() {
        let identity = DeviceIdentity::generate();
        let bytes = identity.secret_bytes();
        let restored = DeviceIdentity::from_secret_bytes(&bytes);
        assert_eq!(identity.device_id(), restored.device_id());
    }

    #[test]
    fn membership_request_verifies() {
        let identity = DeviceIdentity::generate();
        let request = MembershipRequest::new_signed(
            &identity,
            TripCode::parse("ABCD2345").unwrap(),
            JoinToken::parse("QWERTY").unwrap(),
        );
        assert!(request.verify().is_ok());
    }

    #[test]
    fn tampered_membership_request_fails() {
        let identity = DeviceIdentity::generate();
        let mut request = MembershipRequest::new_signed(
            &identity,
            TripCode::parse("ABCD2345").unwrap(),
            JoinToken::parse("QWERTY").unwrap(),
        );
        request.join_token = JoinToken::parse("ZZZZZZ").unwrap();
        assert!(request.verify().is_err());
    }

    #[test]
    fn trip_record_gates_on_token() {
        let identity = DeviceIdentity::generate();
        let token = JoinToken::parse("K7M9PQ").unwrap();
        let record = TripRecord::new(&token, identity.device_id(), 1_000);
        assert!(record.token_matches(&token));
        assert!(!record.token_matches(&JoinToken::parse("K7M9PR").unwrap()));
    }
}
