//! HMAC-SHA256 body signatures carried in the `HashSHA256` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header that carries the hex-encoded signature of the uncompressed body.
pub const HASH_HEADER: &str = "HashSHA256";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not valid hex: {0}")]
    Malformed(#[from] hex::FromHexError),

    #[error("signature does not match body")]
    Mismatch,
}

/// Signs and verifies payloads with a shared secret.
///
/// # Examples
///
/// ```
/// use pulsemon_common::signing::Signer;
///
/// let signer = Signer::new("secret");
/// let sig = signer.sign(b"[]");
/// assert_eq!(sig.len(), 64);
/// assert!(signer.verify(b"[]", &sig).is_ok());
/// assert!(signer.verify(b"[{}]", &sig).is_err());
/// ```
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        // HMAC accepts keys of any length.
        let mac = <HmacSha256 as Mac>::new_from_slice(key.as_ref())
            .unwrap_or_else(|_| unreachable!("HMAC can take key of any size"));
        Self { mac }
    }

    /// Builds a signer only when a non-empty key is configured.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(Self::new)
    }

    /// Returns the lowercase hex HMAC of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verifies a hex signature in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Malformed`] when `signature` is not hex and
    /// [`SignatureError::Mismatch`] when it does not match `body`.
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<(), SignatureError> {
        let expected = hex::decode(signature.trim())?;
        let mut mac = self.mac.clone();
        mac.update(body);
        mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}
