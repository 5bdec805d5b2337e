// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::{
    ContentEncryptionAlgorithm, Curve, EcPrivateKey, EcPublicKey, JwsAlgorithm, Key,
    KeyManagementAlgorithm,
};

/// Boxed error type returned by [`CryptoProvider`] implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Hash functions used by the JOSE algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum HashAlgorithm {
    /// SHA-256
    #[strum(to_string = "SHA-256")]
    Sha256,
    /// SHA-384
    #[strum(to_string = "SHA-384")]
    Sha384,
    /// SHA-512
    #[strum(to_string = "SHA-512")]
    Sha512,
}

impl HashAlgorithm {
    /// Length of the digest in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// Output of an authenticated content encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedContent {
    /// The ciphertext.
    pub ciphertext: Vec<u8>,
    /// The authentication tag.
    pub tag: Vec<u8>,
}

/// Components of a freshly generated elliptic curve key pair, as big-endian
/// byte strings padded to the field width of the curve.
#[derive(Clone, PartialEq, Eq)]
pub struct EcKeyComponents {
    /// The `x` coordinate of the public point.
    pub x: Vec<u8>,
    /// The `y` coordinate of the public point.
    pub y: Vec<u8>,
    /// The private scalar.
    pub d: Vec<u8>,
}

/// Cryptographic backend performing the primitive operations behind every
/// JOSE algorithm.
///
/// The crate never implements cryptographic primitives itself; every
/// operation goes through an implementation of this trait, injected when
/// constructing an [`AlgorithmRegistry`](crate::AlgorithmRegistry). A default
/// [`openssl`] backed implementation is available as
/// [`OpensslProvider`](crate::OpensslProvider) under the default feature
/// `openssl`.
///
/// Keys passed to the provider have already been checked to fit the
/// requested algorithm (key type, curve and size), so implementations only
/// need to report failures of the primitives themselves.
///
/// Errors returned by the provider are never shown verbatim to the callers
/// of the crate; they are only kept as the source of the reported error.
pub trait CryptoProvider: Send + Sync {
    /// Compute the JWS signature of `message`.
    ///
    /// ECDSA signatures must be returned as the concatenation `R || S` of
    /// the two integers, each padded to the field width of the curve.
    fn sign(&self, algorithm: JwsAlgorithm, key: &Key, message: &[u8]) -> Result<Vec<u8>, BoxError>;

    /// Verify the JWS signature of `message`.
    ///
    /// Returns `Ok(false)` if the signature is not valid. MAC comparison must
    /// be done in constant time.
    fn verify(
        &self,
        algorithm: JwsAlgorithm,
        key: &Key,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, BoxError>;

    /// Encrypt and integrity protect `plaintext` together with the
    /// additional authenticated data `aad`.
    fn encrypt(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<EncryptedContent, BoxError>;

    /// Decrypt `ciphertext` after checking the authentication `tag`.
    ///
    /// Implementations must not release any plaintext unless the tag
    /// verifies, and must compare tags in constant time.
    fn decrypt(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, BoxError>;

    /// Encrypt or wrap the content encryption key `cek` using an RSA or AES
    /// key wrapping algorithm.
    fn wrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        cek: &[u8],
    ) -> Result<Vec<u8>, BoxError>;

    /// Decrypt or unwrap an encrypted content encryption key.
    fn unwrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>, BoxError>;

    /// Compute the ECDH shared secret `Z` of the two keys, which lie on the
    /// same curve.
    fn derive_shared_secret(
        &self,
        private_key: &EcPrivateKey,
        public_key: &EcPublicKey,
    ) -> Result<Vec<u8>, BoxError>;

    /// Generate a fresh key pair on `curve`.
    fn generate_ec_key(&self, curve: Curve) -> Result<EcKeyComponents, BoxError>;

    /// Compute the digest of `data`.
    fn digest(&self, hash: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, BoxError>;

    /// Derive `len` bytes from `password` using PBKDF2 with HMAC over
    /// `hash`, as defined in [RFC8018].
    ///
    /// [RFC8018]: https://www.rfc-editor.org/rfc/rfc8018.html#section-5.2
    fn pbkdf2(
        &self,
        hash: HashAlgorithm,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        len: usize,
    ) -> Result<Vec<u8>, BoxError>;

    /// Generate `len` bytes from a cryptographically secure random source.
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, BoxError>;

    /// Check whether the affine point `(x, y)` lies on `curve`.
    fn is_on_curve(&self, curve: Curve, x: &[u8], y: &[u8]) -> Result<bool, BoxError>;

    /// Whether the provider may be called concurrently from multiple threads.
    ///
    /// When `false`, the [`AlgorithmRegistry`](crate::AlgorithmRegistry)
    /// serializes all calls into the provider.
    fn is_reentrant(&self) -> bool {
        true
    }
}
