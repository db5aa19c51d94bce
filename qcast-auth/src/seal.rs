// Sealing of the login secret carried inside a credential token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use crate::TokenError;

/// AES-256-GCM with a key derived from the token signing secret.
///
/// Output is `base64url(nonce || ciphertext || tag)`. The tenant id is bound
/// as additional authenticated data, so a sealed secret cannot be replayed
/// under another tenant's claims.
pub(crate) struct SecretSealer {
    key: [u8; 32],
    rng: SystemRandom,
}

impl SecretSealer {
    pub(crate) fn new(signing_secret: &[u8]) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(digest(&SHA256, signing_secret).as_ref());
        Self {
            key,
            rng: SystemRandom::new(),
        }
    }

    fn key(&self) -> Result<LessSafeKey, TokenError> {
        UnboundKey::new(&AES_256_GCM, &self.key)
            .map(LessSafeKey::new)
            .map_err(|_| TokenError::Issue("failed to build sealing key".to_string()))
    }

    pub(crate) fn seal(&self, plaintext: &str, context: &str) -> Result<String, TokenError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| TokenError::Issue("failed to generate nonce".to_string()))?;

        let mut data = plaintext.as_bytes().to_vec();
        self.key()?
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(context.as_bytes()),
                &mut data,
            )
            .map_err(|_| TokenError::Issue("failed to seal secret".to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(data);
        Ok(URL_SAFE_NO_PAD.encode(combined))
    }

    pub(crate) fn open(&self, sealed: &str, context: &str) -> Result<String, TokenError> {
        let invalid = || TokenError::Invalid("sealed secret is malformed".to_string());

        let combined = URL_SAFE_NO_PAD.decode(sealed).map_err(|_| invalid())?;
        if combined.len() < NONCE_LEN {
            return Err(invalid());
        }
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| invalid())?;

        let mut data = ciphertext.to_vec();
        let plaintext = self
            .key()
            .map_err(|_| invalid())?
            .open_in_place(nonce, Aad::from(context.as_bytes()), &mut data)
            .map_err(|_| invalid())?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open() {
        let sealer = SecretSealer::new(b"signing-secret");
        let sealed = sealer.seal("p@ss word", "7").unwrap();
        assert!(!sealed.contains("p@ss"));
        assert_eq!(sealer.open(&sealed, "7").unwrap(), "p@ss word");
    }

    #[test]
    fn nonce_differs_per_seal() {
        let sealer = SecretSealer::new(b"signing-secret");
        assert_ne!(sealer.seal("x", "7").unwrap(), sealer.seal("x", "7").unwrap());
    }

    #[test]
    fn wrong_context_or_key_fails() {
        let sealer = SecretSealer::new(b"signing-secret");
        let sealed = sealer.seal("pw", "7").unwrap();
        assert!(matches!(sealer.open(&sealed, "8"), Err(TokenError::Invalid(_))));

        let other = SecretSealer::new(b"another-secret");
        assert!(matches!(other.open(&sealed, "7"), Err(TokenError::Invalid(_))));
        assert!(matches!(sealer.open("!!", "7"), Err(TokenError::Invalid(_))));
    }
}
