//! Key localization (RFC 3414 Appendix A) and HMAC authentication (RFC 3414
//! §6.3, RFC 7860).

use digest::Digest;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AuthErrorKind, Error, Result};

use super::AuthProtocol;

/// Number of octets the password is expanded to before the first digest pass.
const EXPANDED_LEN: usize = 1_048_576;

/// A master key derived directly from a password, not yet localized to a
/// specific engine.
///
/// Kept around only long enough to localize against one or more engine IDs;
/// zeroized on drop since it is directly derived from the user's password.
#[derive(Clone, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    /// Derive a master key from a password using the RFC 3414 Appendix A
    /// algorithm: the password is cyclically repeated to 2^20 octets and
    /// digested with `protocol`'s hash function.
    pub fn from_password(protocol: AuthProtocol, password: &[u8]) -> Self {
        Self(password_to_key(protocol, password))
    }

    /// Localize this master key to a specific authoritative engine.
    pub fn localize(&self, protocol: AuthProtocol, engine_id: &[u8]) -> LocalizedKey {
        LocalizedKey(localize_key(protocol, &self.0, engine_id))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An authentication or privacy key localized to a specific engine, per
/// RFC 3414 §2.6.
#[derive(Clone, ZeroizeOnDrop)]
pub struct LocalizedKey(Vec<u8>);

impl LocalizedKey {
    /// Wrap an already-localized key (e.g. one a caller stores and restores
    /// directly rather than re-deriving from a password each time).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalizedKey({} bytes, redacted)", self.0.len())
    }
}

/// The localized authentication and privacy keys for one USM user against
/// one engine.
#[derive(Clone, Default)]
pub struct MasterKeys {
    pub auth_key: Option<LocalizedKey>,
    pub priv_key: Option<LocalizedKey>,
}

impl std::fmt::Debug for MasterKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeys")
            .field("auth_key", &self.auth_key.as_ref().map(|k| k.len()))
            .field("priv_key", &self.priv_key.as_ref().map(|k| k.len()))
            .finish()
    }
}

/// Derive a user's localized auth and privacy keys for one engine.
///
/// Both the auth and privacy passwords are localized using `auth_protocol`'s
/// hash function — USM has no independent privacy digest. When the privacy
/// cipher's key requirement exceeds what that digest natively produces
/// (AES-192/256, 3DES), the localized key is extended by iterating
/// `K_{i+1} = H(K_i)` and concatenating until enough material is available.
pub(crate) fn derive_keys(
    engine_id: &[u8],
    auth_protocol: AuthProtocol,
    auth_password: &[u8],
    priv_protocol: Option<super::PrivProtocol>,
    priv_password: &[u8],
) -> MasterKeys {
    if auth_password.is_empty() {
        return MasterKeys::default();
    }

    let auth_key = MasterKey::from_password(auth_protocol, auth_password).localize(auth_protocol, engine_id);

    let priv_key = priv_protocol.map(|priv_protocol| {
        let base = MasterKey::from_password(auth_protocol, priv_password).localize(auth_protocol, engine_id);
        extend_key(auth_protocol, base.as_bytes(), priv_protocol.key_len())
    });

    MasterKeys {
        auth_key: Some(auth_key),
        priv_key,
    }
}

/// Extend `base` to at least `needed_len` bytes via iterated hashing, then
/// truncate to exactly `needed_len`.
fn extend_key(protocol: AuthProtocol, base: &[u8], needed_len: usize) -> LocalizedKey {
    let mut material = base.to_vec();
    let mut last = base.to_vec();
    while material.len() < needed_len {
        last = with_digest!(protocol, |hasher: &mut _| {
            hasher.update(&last);
        });
        material.extend_from_slice(&last);
    }
    material.truncate(needed_len);
    LocalizedKey::from_bytes(material)
}

macro_rules! with_digest {
    ($protocol:expr, $body:expr) => {
        match $protocol {
            AuthProtocol::Md5 => run_digest::<Md5>($body),
            AuthProtocol::Sha1 => run_digest::<Sha1>($body),
            AuthProtocol::Sha224 => run_digest::<Sha224>($body),
            AuthProtocol::Sha256 => run_digest::<Sha256>($body),
            AuthProtocol::Sha384 => run_digest::<Sha384>($body),
            AuthProtocol::Sha512 => run_digest::<Sha512>($body),
        }
    };
}

fn run_digest<D: Digest>(f: impl FnOnce(&mut D)) -> Vec<u8> {
    let mut hasher = D::new();
    f(&mut hasher);
    hasher.finalize().to_vec()
}

fn password_to_key(protocol: AuthProtocol, password: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        // Degenerate case; still produces a deterministic (useless) key
        // rather than panicking on the modulo below.
        return with_digest!(protocol, |hasher: &mut _| {
            hasher.update(&[0u8; 64]);
        });
    }

    with_digest!(protocol, |hasher: &mut _| {
        let mut chunk = [0u8; 64];
        let mut produced = 0usize;
        let mut pos = 0usize;
        while produced < EXPANDED_LEN {
            for b in chunk.iter_mut() {
                *b = password[pos % password.len()];
                pos += 1;
            }
            hasher.update(&chunk);
            produced += 64;
        }
    })
}

fn localize_key(protocol: AuthProtocol, digest1: &[u8], engine_id: &[u8]) -> Vec<u8> {
    with_digest!(protocol, |hasher: &mut _| {
        hasher.update(digest1);
        hasher.update(engine_id);
        hasher.update(digest1);
    })
}

/// Compute the (truncated) HMAC over `message` using `key`, per the `mac_len`
/// truncation rule for `protocol`.
pub(crate) fn compute_mac(protocol: AuthProtocol, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    macro_rules! run_hmac {
        ($Hasher:ty) => {{
            let mut mac = <Hmac<$Hasher>>::new_from_slice(key)
                .map_err(|_| Error::auth(None, AuthErrorKind::NoAuthKey))?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }};
    }

    let full = match protocol {
        AuthProtocol::Md5 => run_hmac!(Md5),
        AuthProtocol::Sha1 => run_hmac!(Sha1),
        AuthProtocol::Sha224 => run_hmac!(Sha224),
        AuthProtocol::Sha256 => run_hmac!(Sha256),
        AuthProtocol::Sha384 => run_hmac!(Sha384),
        AuthProtocol::Sha512 => run_hmac!(Sha512),
    };
    Ok(full[..protocol.mac_len()].to_vec())
}

/// Verify a received MAC against the recomputed one, in constant time.
pub(crate) fn verify_mac(
    protocol: AuthProtocol,
    key: &[u8],
    message: &[u8],
    received: &[u8],
) -> Result<()> {
    if received.len() != protocol.mac_len() {
        return Err(Error::auth(
            None,
            AuthErrorKind::WrongMacLength {
                expected: protocol.mac_len(),
                actual: received.len(),
            },
        ));
    }
    let mut computed = compute_mac(protocol, key, message)?;
    let ok: bool = computed.ct_eq(received).into();
    computed.zeroize();
    if ok {
        Ok(())
    } else {
        Err(Error::auth(None, AuthErrorKind::HmacMismatch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_to_key_deterministic_and_sized() {
        let a = MasterKey::from_password(AuthProtocol::Md5, b"maplesyrup");
        let b = MasterKey::from_password(AuthProtocol::Md5, b"maplesyrup");
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), AuthProtocol::Md5.digest_len());

        let sha1_key = MasterKey::from_password(AuthProtocol::Sha1, b"maplesyrup");
        assert_eq!(sha1_key.as_bytes().len(), AuthProtocol::Sha1.digest_len());
    }

    #[test]
    fn test_password_to_key_differs_per_password() {
        let a = MasterKey::from_password(AuthProtocol::Sha256, b"correcthorse");
        let b = MasterKey::from_password(AuthProtocol::Sha256, b"batterystaple");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_localize_key_deterministic_and_sized() {
        let master = MasterKey::from_password(AuthProtocol::Md5, b"maplesyrup");
        let engine_id: [u8; 12] = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x01, 0x02, 0x03,
        ];
        let a = master.localize(AuthProtocol::Md5, &engine_id);
        let b = master.localize(AuthProtocol::Md5, &engine_id);
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.len(), AuthProtocol::Md5.digest_len());
    }

    #[test]
    fn test_localize_key_differs_per_engine() {
        let master = MasterKey::from_password(AuthProtocol::Sha1, b"maplesyrup");
        let a = master.localize(AuthProtocol::Sha1, b"engine-one..");
        let b = master.localize(AuthProtocol::Sha1, b"engine-two..");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_mac_roundtrip() {
        let key = [0x42u8; 20];
        let message = b"some SNMPv3 message bytes";
        let mac = compute_mac(AuthProtocol::Sha1, &key, message).unwrap();
        assert_eq!(mac.len(), AuthProtocol::Sha1.mac_len());
        verify_mac(AuthProtocol::Sha1, &key, message, &mac).unwrap();
    }

    #[test]
    fn test_mac_rejects_tampered_message() {
        let key = [0x42u8; 20];
        let mac = compute_mac(AuthProtocol::Sha1, &key, b"original").unwrap();
        assert!(verify_mac(AuthProtocol::Sha1, &key, b"tampered!", &mac).is_err());
    }

    #[test]
    fn test_derive_keys_no_extension_needed() {
        let keys = derive_keys(
            b"engine-id-1",
            AuthProtocol::Sha1,
            b"authpassword",
            Some(super::super::PrivProtocol::Aes128),
            b"privpassword",
        );
        assert_eq!(keys.auth_key.unwrap().len(), AuthProtocol::Sha1.digest_len());
        assert_eq!(keys.priv_key.unwrap().len(), super::super::PrivProtocol::Aes128.key_len());
    }

    #[test]
    fn test_derive_keys_extends_for_aes256() {
        let keys = derive_keys(
            b"engine-id-1",
            AuthProtocol::Md5,
            b"authpassword",
            Some(super::super::PrivProtocol::Aes256),
            b"privpassword",
        );
        assert_eq!(
            keys.priv_key.unwrap().len(),
            super::super::PrivProtocol::Aes256.key_len()
        );
    }

    #[test]
    fn test_derive_keys_missing_auth_password_yields_empty() {
        let keys = derive_keys(b"engine-id-1", AuthProtocol::Sha1, b"", None, b"");
        assert!(keys.auth_key.is_none());
        assert!(keys.priv_key.is_none());
    }

    #[test]
    fn test_mac_rejects_wrong_length() {
        let key = [0x42u8; 20];
        let mac = compute_mac(AuthProtocol::Sha1, &key, b"msg").unwrap();
        assert!(verify_mac(AuthProtocol::Sha1, &key, b"msg", &mac[..mac.len() - 1]).is_err());
    }
}
