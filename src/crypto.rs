// mtadkim – DKIM signing and verification for mail transfer agents
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.


//! RSA keys and the SHA-256 digest used for *rsa-sha256* signatures.
//!
//! Private keys are read from PEM text, in PKCS#8 (`PRIVATE KEY`) or PKCS#1
//! (`RSA PRIVATE KEY`) format. Public keys from key records are read as
//! SubjectPublicKeyInfo, which is what OpenSSL produces and what published
//! records use in practice; failing that, as a bare PKCS#1 RSAPublicKey.

use ::rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs8::DecodePublicKey,
    traits::PublicKeyParts,
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};
use digest::Digest;
use pkcs8::{Document, PrivateKeyInfo};
use sha2::Sha256;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use tracing::trace;

/// Keys below this size are never accepted (RFC 8301, section 3.2).
pub const MIN_KEY_BITS: usize = 1024;

/// Computes the SHA-256 digest of the concatenated slices.
pub fn sha256<I>(slices: I) -> Box<[u8]>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for s in slices {
        hasher.update(s.as_ref());
    }
    hasher.finalize().to_vec().into()
}

fn pkcs1v15() -> Pkcs1v15Sign {
    Pkcs1v15Sign::new::<Sha256>()
}

/// An RSA private key for producing signatures.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningKey(RsaPrivateKey);

impl SigningKey {
    /// Reads a private key from PEM text in PKCS#8 or PKCS#1 format.
    pub fn from_pem(s: &str) -> Result<Self, SigningKeyError> {
        let (label, der) = Document::from_pem(s.trim()).map_err(|_| SigningKeyError::Pem)?;

        let key = match label {
            "PRIVATE KEY" => {
                let info = PrivateKeyInfo::try_from(der.as_bytes())
                    .map_err(|_| SigningKeyError::InvalidKey)?;
                RsaPrivateKey::try_from(info).map_err(|_| SigningKeyError::UnsupportedKeyType)?
            }
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(der.as_bytes())
                .map_err(|_| SigningKeyError::InvalidKey)?,
            _ => return Err(SigningKeyError::Pem),
        };

        Ok(Self(key))
    }

    /// Returns the key size in bits.
    pub fn key_size(&self) -> usize {
        self.0.size() * 8
    }

    /// Signs a SHA-256 digest with PKCS#1 v1.5 padding.
    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, SigningError> {
        self.0.sign(pkcs1v15(), digest).map_err(|e| {
            trace!("RSA signing failed: {e}");
            SigningError
        })
    }
}

impl From<RsaPrivateKey> for SigningKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self(key)
    }
}

/// An error that occurs when reading a private key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SigningKeyError {
    Pem,
    InvalidKey,
    UnsupportedKeyType,
}

impl Display for SigningKeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pem => write!(f, "not a PEM private key document"),
            Self::InvalidKey => write!(f, "invalid private key data"),
            Self::UnsupportedKeyType => write!(f, "not an RSA private key"),
        }
    }
}

impl Error for SigningKeyError {}

/// The private key operation failed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SigningError;

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "signing failed")
    }
}

impl Error for SigningError {}

/// An RSA public key from a key record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifyingKey(RsaPublicKey);

impl VerifyingKey {
    /// Reads the raw *p=* data of a key record.
    pub fn from_key_data(key_data: &[u8]) -> Result<Self, VerificationError> {
        let key = RsaPublicKey::from_public_key_der(key_data)
            .or_else(|_| RsaPublicKey::from_pkcs1_der(key_data))
            .map_err(|_| VerificationError::InvalidKey)?;

        let key = Self(key);
        if key.key_size() < MIN_KEY_BITS {
            return Err(VerificationError::InsufficientKeySize);
        }

        Ok(key)
    }

    /// Returns the key size in bits.
    pub fn key_size(&self) -> usize {
        self.0.size() * 8
    }

    /// Verifies a PKCS#1 v1.5 signature over a SHA-256 digest.
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<(), VerificationError> {
        self.0.verify(pkcs1v15(), digest, signature).map_err(|e| {
            trace!("RSA verification failed: {e}");
            VerificationError::VerificationFailure
        })
    }
}

impl From<RsaPublicKey> for VerifyingKey {
    fn from(key: RsaPublicKey) -> Self {
        Self(key)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationError {
    InvalidKey,
    InsufficientKeySize,
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::InsufficientKeySize => write!(f, "key too small"),
            Self::VerificationFailure => write!(f, "signature verification failed"),
        }
    }
}

impl Error for VerificationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use ::rsa::pkcs8::EncodePublicKey;

    const PKCS8_PEM: &str = include_str!("../tests/keys/rsa2048.pem");
    const PKCS1_PEM: &str = include_str!("../tests/keys/rsa2048-pkcs1.pem");
    const PUBLIC_PEM: &str = include_str!("../tests/keys/rsa2048pub.pem");

    fn public_key_der(pem: &str) -> Vec<u8> {
        RsaPublicKey::from_public_key_pem(pem)
            .unwrap()
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    #[test]
    fn signing_key_formats() {
        let k1 = SigningKey::from_pem(PKCS8_PEM).unwrap();
        let k2 = SigningKey::from_pem(PKCS1_PEM).unwrap();

        assert_eq!(k1, k2);
        assert_eq!(k1.key_size(), 2048);

        assert_eq!(SigningKey::from_pem(""), Err(SigningKeyError::Pem));
        assert_eq!(SigningKey::from_pem("not a key"), Err(SigningKeyError::Pem));
        assert_eq!(SigningKey::from_pem(PUBLIC_PEM), Err(SigningKeyError::Pem));
    }

    #[test]
    fn sign_then_verify() {
        let signing_key = SigningKey::from_pem(PKCS8_PEM).unwrap();
        let verifying_key = VerifyingKey::from_key_data(&public_key_der(PUBLIC_PEM)).unwrap();

        let digest = sha256([&b"from:me"[..], &b"\r\n"[..]]);
        let signature = signing_key.sign(&digest).unwrap();

        assert_eq!(signature.len(), 256);
        assert_eq!(verifying_key.key_size(), 2048);
        assert_eq!(verifying_key.verify(&digest, &signature), Ok(()));
        assert_eq!(
            verifying_key.verify(&sha256([b"from:you\r\n"]), &signature),
            Err(VerificationError::VerificationFailure)
        );
    }

    #[test]
    fn small_and_garbage_keys_rejected() {
        let small = public_key_der(include_str!("../tests/keys/rsa512pub.pem"));

        assert_eq!(VerifyingKey::from_key_data(&small), Err(VerificationError::InsufficientKeySize));
        assert_eq!(VerifyingKey::from_key_data(b"garbage"), Err(VerificationError::InvalidKey));
    }

    #[test]
    fn sha256_of_empty_line() {
        assert_eq!(
            crate::util::encode_base64(sha256([b"\r\n"])),
            "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY="
        );
    }
}
