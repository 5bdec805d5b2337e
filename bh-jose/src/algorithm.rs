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

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bherror::{traits::ForeignBoxed as _, Error};

use crate::{
    provider::{BoxError, CryptoProvider, EncryptedContent, HashAlgorithm},
    Curve, JoseError, Key, KeyOperation, KeyType, Result,
};

/// JWS `"alg"` header parameter value for **HMAC using SHA-256**.
pub const ALG_HS256: &str = "HS256";
/// JWS `"alg"` header parameter value for **HMAC using SHA-384**.
pub const ALG_HS384: &str = "HS384";
/// JWS `"alg"` header parameter value for **HMAC using SHA-512**.
pub const ALG_HS512: &str = "HS512";
/// JWS `"alg"` header parameter value for **RSASSA-PKCS1-v1_5 using SHA-256**.
pub const ALG_RS256: &str = "RS256";
/// JWS `"alg"` header parameter value for **RSASSA-PKCS1-v1_5 using SHA-384**.
pub const ALG_RS384: &str = "RS384";
/// JWS `"alg"` header parameter value for **RSASSA-PKCS1-v1_5 using SHA-512**.
pub const ALG_RS512: &str = "RS512";
/// JWS `"alg"` header parameter value for **RSASSA-PSS using SHA-256 and MGF1
/// with SHA-256**.
pub const ALG_PS256: &str = "PS256";
/// JWS `"alg"` header parameter value for **RSASSA-PSS using SHA-384 and MGF1
/// with SHA-384**.
pub const ALG_PS384: &str = "PS384";
/// JWS `"alg"` header parameter value for **RSASSA-PSS using SHA-512 and MGF1
/// with SHA-512**.
pub const ALG_PS512: &str = "PS512";
/// JWS `"alg"` header parameter value for **ECDSA using P-256 and SHA-256**.
pub const ALG_ES256: &str = "ES256";
/// JWS `"alg"` header parameter value for **ECDSA using P-384 and SHA-384**.
pub const ALG_ES384: &str = "ES384";
/// JWS `"alg"` header parameter value for **ECDSA using P-521 and SHA-512**.
pub const ALG_ES512: &str = "ES512";
/// JWS `"alg"` header parameter value for an **Unsecured JWS**.
pub const ALG_NONE: &str = "none";

/// JWE `"alg"` header parameter value for **RSAES-PKCS1-v1_5**.
pub const ALG_RSA1_5: &str = "RSA1_5";
/// JWE `"alg"` header parameter value for **RSAES OAEP using default
/// parameters**.
pub const ALG_RSA_OAEP: &str = "RSA-OAEP";
/// JWE `"alg"` header parameter value for **RSAES OAEP using SHA-256 and MGF1
/// with SHA-256**.
pub const ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";
/// JWE `"alg"` header parameter value for **AES Key Wrap using 128-bit key**.
pub const ALG_A128KW: &str = "A128KW";
/// JWE `"alg"` header parameter value for **AES Key Wrap using 192-bit key**.
pub const ALG_A192KW: &str = "A192KW";
/// JWE `"alg"` header parameter value for **AES Key Wrap using 256-bit key**.
pub const ALG_A256KW: &str = "A256KW";
/// JWE `"alg"` header parameter value for **Direct use of a shared symmetric
/// key as the CEK**.
pub const ALG_DIR: &str = "dir";
/// JWE `"alg"` header parameter value for **ECDH-ES using Concat KDF**.
pub const ALG_ECDH_ES: &str = "ECDH-ES";
/// JWE `"alg"` header parameter value for **ECDH-ES using Concat KDF and CEK
/// wrapped with "A128KW"**.
pub const ALG_ECDH_ES_A128KW: &str = "ECDH-ES+A128KW";
/// JWE `"alg"` header parameter value for **ECDH-ES using Concat KDF and CEK
/// wrapped with "A192KW"**.
pub const ALG_ECDH_ES_A192KW: &str = "ECDH-ES+A192KW";
/// JWE `"alg"` header parameter value for **ECDH-ES using Concat KDF and CEK
/// wrapped with "A256KW"**.
pub const ALG_ECDH_ES_A256KW: &str = "ECDH-ES+A256KW";
/// JWE `"alg"` header parameter value for **PBES2 with HMAC SHA-256 and
/// "A128KW" wrapping**.
pub const ALG_PBES2_HS256_A128KW: &str = "PBES2-HS256+A128KW";
/// JWE `"alg"` header parameter value for **PBES2 with HMAC SHA-384 and
/// "A192KW" wrapping**.
pub const ALG_PBES2_HS384_A192KW: &str = "PBES2-HS384+A192KW";
/// JWE `"alg"` header parameter value for **PBES2 with HMAC SHA-512 and
/// "A256KW" wrapping**.
pub const ALG_PBES2_HS512_A256KW: &str = "PBES2-HS512+A256KW";

/// JWE `"enc"` header parameter value for **AES_128_CBC_HMAC_SHA_256**.
pub const ENC_A128CBC_HS256: &str = "A128CBC-HS256";
/// JWE `"enc"` header parameter value for **AES_192_CBC_HMAC_SHA_384**.
pub const ENC_A192CBC_HS384: &str = "A192CBC-HS384";
/// JWE `"enc"` header parameter value for **AES_256_CBC_HMAC_SHA_512**.
pub const ENC_A256CBC_HS512: &str = "A256CBC-HS512";
/// JWE `"enc"` header parameter value for **AES GCM using 128-bit key**.
pub const ENC_A128GCM: &str = "A128GCM";
/// JWE `"enc"` header parameter value for **AES GCM using 192-bit key**.
pub const ENC_A192GCM: &str = "A192GCM";
/// JWE `"enc"` header parameter value for **AES GCM using 256-bit key**.
pub const ENC_A256GCM: &str = "A256GCM";

/// JWE `"zip"` header parameter value for **DEFLATE** compression.
pub const ZIP_DEFLATE: &str = "DEF";

/// Digital signature and MAC algorithms for JWS, as defined in [section 3 of
/// RFC7518][1].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JwsAlgorithm {
    /// HMAC using SHA-256
    Hs256,
    /// HMAC using SHA-384
    Hs384,
    /// HMAC using SHA-512
    Hs512,
    /// RSASSA-PKCS1-v1_5 using SHA-256
    Rs256,
    /// RSASSA-PKCS1-v1_5 using SHA-384
    Rs384,
    /// RSASSA-PKCS1-v1_5 using SHA-512
    Rs512,
    /// RSASSA-PSS using SHA-256 and MGF1 with SHA-256
    Ps256,
    /// RSASSA-PSS using SHA-384 and MGF1 with SHA-384
    Ps384,
    /// RSASSA-PSS using SHA-512 and MGF1 with SHA-512
    Ps512,
    /// ECDSA using P-256 and SHA-256
    Es256,
    /// ECDSA using P-384 and SHA-384
    Es384,
    /// ECDSA using P-521 and SHA-512
    Es512,
    /// No digital signature or MAC performed.
    ///
    /// Only accepted when explicitly enabled, see
    /// [`JwsOptions::allow_unsecured`](crate::JwsOptions::allow_unsecured).
    None,
}

impl JwsAlgorithm {
    /// The `"alg"` header parameter value of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hs256 => ALG_HS256,
            Self::Hs384 => ALG_HS384,
            Self::Hs512 => ALG_HS512,
            Self::Rs256 => ALG_RS256,
            Self::Rs384 => ALG_RS384,
            Self::Rs512 => ALG_RS512,
            Self::Ps256 => ALG_PS256,
            Self::Ps384 => ALG_PS384,
            Self::Ps512 => ALG_PS512,
            Self::Es256 => ALG_ES256,
            Self::Es384 => ALG_ES384,
            Self::Es512 => ALG_ES512,
            Self::None => ALG_NONE,
        }
    }

    /// The hash function used by the algorithm, `None` for [`Self::None`].
    pub fn hash(&self) -> Option<HashAlgorithm> {
        match self {
            Self::Hs256 | Self::Rs256 | Self::Ps256 | Self::Es256 => Some(HashAlgorithm::Sha256),
            Self::Hs384 | Self::Rs384 | Self::Ps384 | Self::Es384 => Some(HashAlgorithm::Sha384),
            Self::Hs512 | Self::Rs512 | Self::Ps512 | Self::Es512 => Some(HashAlgorithm::Sha512),
            Self::None => None,
        }
    }

    /// The key type the algorithm operates with, `None` for [`Self::None`].
    pub fn key_type(&self) -> Option<KeyType> {
        match self {
            Self::Hs256 | Self::Hs384 | Self::Hs512 => Some(KeyType::Oct),
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512 => {
                Some(KeyType::Rsa)
            }
            Self::Es256 | Self::Es384 | Self::Es512 => Some(KeyType::Ec),
            Self::None => None,
        }
    }

    /// The curve required by the ECDSA algorithms.
    pub fn curve(&self) -> Option<Curve> {
        match self {
            Self::Es256 => Some(Curve::P256),
            Self::Es384 => Some(Curve::P384),
            Self::Es512 => Some(Curve::P521),
            _ => None,
        }
    }

    /// Check that `key` fits the algorithm and supports `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::KeyCapabilityMismatch`] if the key type, curve or
    /// size does not fit the algorithm, or the key does not support the
    /// operation. HMAC keys must be at least as long as the hash output, see
    /// [section 3.2 of RFC7518][1].
    ///
    /// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-3.2
    pub fn check_key(&self, key: &Key, operation: KeyOperation) -> Result<()> {
        let Some(key_type) = self.key_type() else {
            return Ok(());
        };
        check_key_type(self.name(), key, key_type)?;
        key.require(operation)?;

        if let Some(curve) = self.curve() {
            check_curve(self.name(), key, curve)?;
        }

        if let (Key::Symmetric(secret), Some(hash)) = (key, self.hash()) {
            if secret.len() < hash.output_len() {
                return Err(mismatch(format!(
                    "{} requires a key of at least {} bits",
                    self,
                    hash.output_len() * 8
                )));
            }
        }

        Ok(())
    }
}

/// Ways of determining the content encryption key, as defined in [section
/// 2 of RFC7516][1].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7516.html#section-2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyManagementMode {
    /// The CEK is encrypted to the recipient using an asymmetric algorithm.
    KeyEncryption,
    /// The CEK is encrypted using a symmetric key wrapping algorithm.
    KeyWrapping,
    /// The CEK is the agreed upon result of a key agreement.
    DirectKeyAgreement,
    /// The CEK is wrapped with a key resulting from a key agreement.
    KeyAgreementWithKeyWrapping,
    /// The CEK is the shared symmetric key.
    DirectEncryption,
    /// The CEK is wrapped with a key derived from a password.
    PasswordBased,
}

/// Key management algorithms for JWE, as defined in [section 4 of
/// RFC7518][1].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyManagementAlgorithm {
    /// RSAES-PKCS1-v1_5
    Rsa1_5,
    /// RSAES OAEP using SHA-1 and MGF1 with SHA-1
    RsaOaep,
    /// RSAES OAEP using SHA-256 and MGF1 with SHA-256
    RsaOaep256,
    /// AES Key Wrap with default initial value using 128-bit key
    A128Kw,
    /// AES Key Wrap with default initial value using 192-bit key
    A192Kw,
    /// AES Key Wrap with default initial value using 256-bit key
    A256Kw,
    /// Direct use of a shared symmetric key as the CEK
    Dir,
    /// Elliptic Curve Diffie-Hellman Ephemeral Static key agreement using
    /// Concat KDF
    EcdhEs,
    /// ECDH-ES using Concat KDF and CEK wrapped with "A128KW"
    EcdhEsA128Kw,
    /// ECDH-ES using Concat KDF and CEK wrapped with "A192KW"
    EcdhEsA192Kw,
    /// ECDH-ES using Concat KDF and CEK wrapped with "A256KW"
    EcdhEsA256Kw,
    /// PBES2 with HMAC SHA-256 and "A128KW" wrapping
    Pbes2Hs256A128Kw,
    /// PBES2 with HMAC SHA-384 and "A192KW" wrapping
    Pbes2Hs384A192Kw,
    /// PBES2 with HMAC SHA-512 and "A256KW" wrapping
    Pbes2Hs512A256Kw,
}

impl KeyManagementAlgorithm {
    /// The `"alg"` header parameter value of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rsa1_5 => ALG_RSA1_5,
            Self::RsaOaep => ALG_RSA_OAEP,
            Self::RsaOaep256 => ALG_RSA_OAEP_256,
            Self::A128Kw => ALG_A128KW,
            Self::A192Kw => ALG_A192KW,
            Self::A256Kw => ALG_A256KW,
            Self::Dir => ALG_DIR,
            Self::EcdhEs => ALG_ECDH_ES,
            Self::EcdhEsA128Kw => ALG_ECDH_ES_A128KW,
            Self::EcdhEsA192Kw => ALG_ECDH_ES_A192KW,
            Self::EcdhEsA256Kw => ALG_ECDH_ES_A256KW,
            Self::Pbes2Hs256A128Kw => ALG_PBES2_HS256_A128KW,
            Self::Pbes2Hs384A192Kw => ALG_PBES2_HS384_A192KW,
            Self::Pbes2Hs512A256Kw => ALG_PBES2_HS512_A256KW,
        }
    }

    /// The key management mode employed by the algorithm.
    pub fn mode(&self) -> KeyManagementMode {
        match self {
            Self::Rsa1_5 | Self::RsaOaep | Self::RsaOaep256 => KeyManagementMode::KeyEncryption,
            Self::A128Kw | Self::A192Kw | Self::A256Kw => KeyManagementMode::KeyWrapping,
            Self::Dir => KeyManagementMode::DirectEncryption,
            Self::EcdhEs => KeyManagementMode::DirectKeyAgreement,
            Self::EcdhEsA128Kw | Self::EcdhEsA192Kw | Self::EcdhEsA256Kw => {
                KeyManagementMode::KeyAgreementWithKeyWrapping
            }
            Self::Pbes2Hs256A128Kw | Self::Pbes2Hs384A192Kw | Self::Pbes2Hs512A256Kw => {
                KeyManagementMode::PasswordBased
            }
        }
    }

    /// The AES key wrapping algorithm used to wrap the CEK once the key
    /// encryption key has been derived, for the key agreement and password
    /// based algorithms, and the algorithm itself for the plain key wrapping
    /// algorithms.
    pub fn key_wrap_algorithm(&self) -> Option<KeyManagementAlgorithm> {
        match self {
            Self::A128Kw | Self::EcdhEsA128Kw | Self::Pbes2Hs256A128Kw => Some(Self::A128Kw),
            Self::A192Kw | Self::EcdhEsA192Kw | Self::Pbes2Hs384A192Kw => Some(Self::A192Kw),
            Self::A256Kw | Self::EcdhEsA256Kw | Self::Pbes2Hs512A256Kw => Some(Self::A256Kw),
            _ => None,
        }
    }

    /// Length in bytes of the AES key wrapping key, for the algorithms which
    /// use AES key wrapping.
    pub fn key_wrap_len(&self) -> Option<usize> {
        self.key_wrap_algorithm().map(|algorithm| match algorithm {
            Self::A128Kw => 16,
            Self::A192Kw => 24,
            _ => 32,
        })
    }

    /// The PRF hash of the PBES2 algorithms.
    pub fn pbes2_hash(&self) -> Option<HashAlgorithm> {
        match self {
            Self::Pbes2Hs256A128Kw => Some(HashAlgorithm::Sha256),
            Self::Pbes2Hs384A192Kw => Some(HashAlgorithm::Sha384),
            Self::Pbes2Hs512A256Kw => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// The key type the algorithm operates with.
    pub fn key_type(&self) -> KeyType {
        match self.mode() {
            KeyManagementMode::KeyEncryption => KeyType::Rsa,
            KeyManagementMode::DirectKeyAgreement
            | KeyManagementMode::KeyAgreementWithKeyWrapping => KeyType::Ec,
            KeyManagementMode::KeyWrapping
            | KeyManagementMode::DirectEncryption
            | KeyManagementMode::PasswordBased => KeyType::Oct,
        }
    }

    /// The key operation required from the sender's key.
    pub fn producer_operation(&self) -> KeyOperation {
        match self {
            Self::Dir => KeyOperation::Encrypt,
            _ => KeyOperation::WrapKey,
        }
    }

    /// The key operation required from the recipient's key.
    pub fn consumer_operation(&self) -> KeyOperation {
        match self {
            Self::Dir => KeyOperation::Decrypt,
            _ => KeyOperation::UnwrapKey,
        }
    }

    /// Whether the content encryption key is derived from the key itself and
    /// hence can not be shared between multiple recipients.
    pub fn is_direct(&self) -> bool {
        matches!(
            self.mode(),
            KeyManagementMode::DirectEncryption | KeyManagementMode::DirectKeyAgreement
        )
    }

    /// Check that `key` fits the algorithm when used together with the
    /// content encryption algorithm `enc`, and that it supports `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::KeyCapabilityMismatch`] if the key type or size
    /// does not fit the algorithm, or the key does not support the operation.
    pub fn check_key(
        &self,
        enc: ContentEncryptionAlgorithm,
        key: &Key,
        operation: KeyOperation,
    ) -> Result<()> {
        check_key_type(self.name(), key, self.key_type())?;
        key.require(operation)?;

        let required_len = match self.mode() {
            KeyManagementMode::KeyWrapping => self.key_wrap_len(),
            KeyManagementMode::DirectEncryption => Some(enc.key_len()),
            _ => None,
        };
        if let (Key::Symmetric(secret), Some(required_len)) = (key, required_len) {
            if secret.len() != required_len {
                return Err(mismatch(format!(
                    "{self} with {enc} requires a key of exactly {} bits",
                    required_len * 8
                )));
            }
        }

        Ok(())
    }
}

/// Content encryption algorithms for JWE, as defined in [section 5 of
/// RFC7518][1].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncryptionAlgorithm {
    /// AES_128_CBC_HMAC_SHA_256 authenticated encryption
    A128CbcHs256,
    /// AES_192_CBC_HMAC_SHA_384 authenticated encryption
    A192CbcHs384,
    /// AES_256_CBC_HMAC_SHA_512 authenticated encryption
    A256CbcHs512,
    /// AES GCM using 128-bit key
    A128Gcm,
    /// AES GCM using 192-bit key
    A192Gcm,
    /// AES GCM using 256-bit key
    A256Gcm,
}

impl ContentEncryptionAlgorithm {
    /// The `"enc"` header parameter value of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::A128CbcHs256 => ENC_A128CBC_HS256,
            Self::A192CbcHs384 => ENC_A192CBC_HS384,
            Self::A256CbcHs512 => ENC_A256CBC_HS512,
            Self::A128Gcm => ENC_A128GCM,
            Self::A192Gcm => ENC_A192GCM,
            Self::A256Gcm => ENC_A256GCM,
        }
    }

    /// Length in bytes of the content encryption key.
    ///
    /// For the CBC-HMAC algorithms this covers both the MAC and the
    /// encryption key.
    pub fn key_len(&self) -> usize {
        match self {
            Self::A128CbcHs256 => 32,
            Self::A192CbcHs384 => 48,
            Self::A256CbcHs512 => 64,
            Self::A128Gcm => 16,
            Self::A192Gcm => 24,
            Self::A256Gcm => 32,
        }
    }

    /// Length in bytes of the initialization vector.
    pub fn iv_len(&self) -> usize {
        if self.is_cbc_hmac() {
            16
        } else {
            12
        }
    }

    /// Length in bytes of the authentication tag.
    pub fn tag_len(&self) -> usize {
        match self {
            Self::A128CbcHs256 => 16,
            Self::A192CbcHs384 => 24,
            Self::A256CbcHs512 => 32,
            Self::A128Gcm | Self::A192Gcm | Self::A256Gcm => 16,
        }
    }

    /// The HMAC hash of the CBC-HMAC algorithms.
    pub fn hmac_hash(&self) -> Option<HashAlgorithm> {
        match self {
            Self::A128CbcHs256 => Some(HashAlgorithm::Sha256),
            Self::A192CbcHs384 => Some(HashAlgorithm::Sha384),
            Self::A256CbcHs512 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Whether this is one of the AES-CBC with HMAC algorithms of [section
    /// 5.2 of RFC7518][1].
    ///
    /// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-5.2
    pub fn is_cbc_hmac(&self) -> bool {
        self.hmac_hash().is_some()
    }
}

/// Compression algorithms for the JWE plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// DEFLATE, as defined in [RFC1951](https://www.rfc-editor.org/rfc/rfc1951.html)
    Deflate,
}

impl CompressionAlgorithm {
    /// The `"zip"` header parameter value of the algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deflate => ZIP_DEFLATE,
        }
    }
}

macro_rules! impl_algorithm_name {
    ($algorithm:ty, [$($variant:ident),+ $(,)?]) => {
        impl FromStr for $algorithm {
            type Err = Error<JoseError>;

            fn from_str(value: &str) -> Result<Self> {
                $(
                    if value == Self::$variant.name() {
                        return Ok(Self::$variant);
                    }
                )+
                Err(Error::root(JoseError::UnsupportedAlgorithm(value.to_owned())))
            }
        }

        impl fmt::Display for $algorithm {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl $algorithm {
            /// All the algorithms of this kind.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];
        }
    };
}

impl_algorithm_name!(
    JwsAlgorithm,
    [Hs256, Hs384, Hs512, Rs256, Rs384, Rs512, Ps256, Ps384, Ps512, Es256, Es384, Es512, None]
);
impl_algorithm_name!(
    KeyManagementAlgorithm,
    [
        Rsa1_5,
        RsaOaep,
        RsaOaep256,
        A128Kw,
        A192Kw,
        A256Kw,
        Dir,
        EcdhEs,
        EcdhEsA128Kw,
        EcdhEsA192Kw,
        EcdhEsA256Kw,
        Pbes2Hs256A128Kw,
        Pbes2Hs384A192Kw,
        Pbes2Hs512A256Kw,
    ]
);
impl_algorithm_name!(
    ContentEncryptionAlgorithm,
    [A128CbcHs256, A192CbcHs384, A256CbcHs512, A128Gcm, A192Gcm, A256Gcm]
);
impl_algorithm_name!(CompressionAlgorithm, [Deflate]);

impl From<JwsAlgorithm> for jwt::AlgorithmType {
    fn from(value: JwsAlgorithm) -> Self {
        match value {
            JwsAlgorithm::Hs256 => Self::Hs256,
            JwsAlgorithm::Hs384 => Self::Hs384,
            JwsAlgorithm::Hs512 => Self::Hs512,
            JwsAlgorithm::Rs256 => Self::Rs256,
            JwsAlgorithm::Rs384 => Self::Rs384,
            JwsAlgorithm::Rs512 => Self::Rs512,
            JwsAlgorithm::Ps256 => Self::Ps256,
            JwsAlgorithm::Ps384 => Self::Ps384,
            JwsAlgorithm::Ps512 => Self::Ps512,
            JwsAlgorithm::Es256 => Self::Es256,
            JwsAlgorithm::Es384 => Self::Es384,
            JwsAlgorithm::Es512 => Self::Es512,
            JwsAlgorithm::None => Self::None,
        }
    }
}

/// The three algorithm families of JOSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum AlgorithmFamily {
    /// JWS signature and MAC algorithms.
    #[strum(to_string = "signing")]
    Signing,
    /// JWE key management algorithms.
    #[strum(to_string = "key management")]
    KeyManagement,
    /// JWE content encryption algorithms.
    #[strum(to_string = "content encryption")]
    ContentEncryption,
}

/// Any algorithm known to the [`AlgorithmRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// A JWS algorithm.
    Signing(JwsAlgorithm),
    /// A JWE key management algorithm.
    KeyManagement(KeyManagementAlgorithm),
    /// A JWE content encryption algorithm.
    ContentEncryption(ContentEncryptionAlgorithm),
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signing(algorithm) => algorithm.fmt(f),
            Self::KeyManagement(algorithm) => algorithm.fmt(f),
            Self::ContentEncryption(algorithm) => algorithm.fmt(f),
        }
    }
}

/// Description of a resolved algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmDescriptor {
    /// The resolved algorithm.
    pub algorithm: Algorithm,
    /// The family the algorithm belongs to.
    pub family: AlgorithmFamily,
    /// The key type the algorithm operates with, `None` for the unsecured
    /// JWS algorithm.
    pub key_type: Option<KeyType>,
    /// Operation required from the key of the producer (signer or sender).
    pub producer_operation: KeyOperation,
    /// Operation required from the key of the consumer (verifier or
    /// recipient).
    pub consumer_operation: KeyOperation,
}

impl AlgorithmDescriptor {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Signing(alg) => Self {
                algorithm,
                family: AlgorithmFamily::Signing,
                key_type: alg.key_type(),
                producer_operation: KeyOperation::Sign,
                consumer_operation: KeyOperation::Verify,
            },
            Algorithm::KeyManagement(alg) => Self {
                algorithm,
                family: AlgorithmFamily::KeyManagement,
                key_type: Some(alg.key_type()),
                producer_operation: alg.producer_operation(),
                consumer_operation: alg.consumer_operation(),
            },
            Algorithm::ContentEncryption(_) => Self {
                algorithm,
                family: AlgorithmFamily::ContentEncryption,
                key_type: Some(KeyType::Oct),
                producer_operation: KeyOperation::Encrypt,
                consumer_operation: KeyOperation::Decrypt,
            },
        }
    }
}

/// Registry of the supported algorithms, dispatching every cryptographic
/// operation to the injected [`CryptoProvider`].
///
/// The registry is immutable once constructed and can be shared between
/// threads. Calls into a provider which is not
/// [reentrant](CryptoProvider::is_reentrant) are serialized.
///
/// Failures of the provider are reported as
/// [`JoseError::CryptographicOperationFailed`] with a coarse reason, keeping
/// the provider error only as the error source.
pub struct AlgorithmRegistry {
    provider: Arc<dyn CryptoProvider>,
    serialize_calls: Option<Mutex<()>>,
}

impl AlgorithmRegistry {
    /// Construct a registry on top of the given cryptography provider.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        let serialize_calls = (!provider.is_reentrant()).then(|| Mutex::new(()));
        Self {
            provider,
            serialize_calls,
        }
    }

    /// Construct a registry backed by the [`OpensslProvider`](crate::OpensslProvider).
    #[cfg(feature = "openssl")]
    pub fn openssl() -> Self {
        Self::new(Arc::new(crate::OpensslProvider))
    }

    /// Resolve an algorithm identifier of any family.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::UnsupportedAlgorithm`] if the identifier is
    /// unknown. Identifiers are case sensitive.
    pub fn resolve(&self, identifier: &str) -> Result<AlgorithmDescriptor> {
        let algorithm = JwsAlgorithm::ALL
            .iter()
            .find(|alg| alg.name() == identifier)
            .map(|alg| Algorithm::Signing(*alg))
            .or_else(|| {
                KeyManagementAlgorithm::ALL
                    .iter()
                    .find(|alg| alg.name() == identifier)
                    .map(|alg| Algorithm::KeyManagement(*alg))
            })
            .or_else(|| {
                ContentEncryptionAlgorithm::ALL
                    .iter()
                    .find(|enc| enc.name() == identifier)
                    .map(|enc| Algorithm::ContentEncryption(*enc))
            })
            .ok_or_else(|| Error::root(JoseError::UnsupportedAlgorithm(identifier.to_owned())))?;
        Ok(AlgorithmDescriptor::new(algorithm))
    }

    /// Resolve an identifier which must denote a JWS algorithm.
    pub fn resolve_jws(&self, identifier: &str) -> Result<JwsAlgorithm> {
        identifier.parse()
    }

    /// Resolve an identifier which must denote a JWE key management
    /// algorithm.
    pub fn resolve_key_management(&self, identifier: &str) -> Result<KeyManagementAlgorithm> {
        identifier.parse()
    }

    /// Resolve an identifier which must denote a JWE content encryption
    /// algorithm.
    pub fn resolve_content_encryption(
        &self,
        identifier: &str,
    ) -> Result<ContentEncryptionAlgorithm> {
        identifier.parse()
    }

    /// The underlying cryptography provider.
    pub fn provider(&self) -> &dyn CryptoProvider {
        self.provider.as_ref()
    }

    /// Compute the signature of `message`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::KeyCapabilityMismatch`] if the key does not fit
    /// the algorithm, or [`JoseError::CryptographicOperationFailed`] if the
    /// provider fails.
    pub fn sign(&self, algorithm: JwsAlgorithm, key: &Key, message: &[u8]) -> Result<Vec<u8>> {
        if algorithm == JwsAlgorithm::None {
            return Ok(Vec::new());
        }
        algorithm.check_key(key, KeyOperation::Sign)?;
        self.call("signing failed", |provider| {
            provider.sign(algorithm, key, message)
        })
    }

    /// Verify the signature of `message`.
    ///
    /// Returns `Ok(false)` if the signature is not valid.
    pub fn verify(
        &self,
        algorithm: JwsAlgorithm,
        key: &Key,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        if algorithm == JwsAlgorithm::None {
            return Ok(signature.is_empty());
        }
        algorithm.check_key(key, KeyOperation::Verify)?;
        self.call("signature verification failed", |provider| {
            provider.verify(algorithm, key, message, signature)
        })
    }

    /// Encrypt `plaintext` with the content encryption key `cek`.
    pub fn encrypt_content(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<EncryptedContent> {
        check_content_parameters(algorithm, cek, iv)?;
        self.call("content encryption failed", |provider| {
            provider.encrypt(algorithm, cek, iv, aad, plaintext)
        })
    }

    /// Decrypt `ciphertext` with the content encryption key `cek`.
    pub fn decrypt_content(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>> {
        check_content_parameters(algorithm, cek, iv)?;
        if tag.len() != algorithm.tag_len() {
            return Err(Error::root(JoseError::CryptographicOperationFailed(
                "authentication tag has an invalid length".to_owned(),
            )));
        }
        self.call("content decryption failed", |provider| {
            provider.decrypt(algorithm, cek, iv, aad, ciphertext, tag)
        })
    }

    /// Encrypt or wrap the content encryption key using an RSA or AES key
    /// wrapping algorithm.
    pub fn wrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        cek: &[u8],
    ) -> Result<Vec<u8>> {
        check_wrapping_algorithm(algorithm)?;
        self.call("key wrapping failed", |provider| {
            provider.wrap_key(algorithm, key, cek)
        })
    }

    /// Decrypt or unwrap an encrypted content encryption key.
    pub fn unwrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>> {
        check_wrapping_algorithm(algorithm)?;
        self.call("key unwrapping failed", |provider| {
            provider.unwrap_key(algorithm, key, encrypted_key)
        })
    }

    /// Compute the ECDH shared secret of a private and a public key.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::KeyCapabilityMismatch`] if the keys are not an
    /// elliptic curve private and public key on the same curve.
    pub fn derive_shared_secret(&self, private_key: &Key, public_key: &Key) -> Result<Vec<u8>> {
        let (Key::EcPrivate(private_key), Key::EcPublic(public_key)) = (private_key, public_key)
        else {
            return Err(mismatch(
                "key agreement requires an EC private and an EC public key".to_owned(),
            ));
        };
        if private_key.curve() != public_key.curve() {
            return Err(mismatch(format!(
                "key agreement between {} and {} keys",
                private_key.curve(),
                public_key.curve()
            )));
        }
        self.call("key agreement failed", |provider| {
            provider.derive_shared_secret(private_key, public_key)
        })
    }

    /// Generate a fresh elliptic curve key pair on `curve`.
    pub fn generate_ec_key(&self, curve: Curve) -> Result<Key> {
        let components = self.call("key generation failed", |provider| {
            provider.generate_ec_key(curve)
        })?;
        Key::ec_private(self, curve, &components.x, &components.y, &components.d)
    }

    /// Compute the digest of `data`.
    pub fn digest(&self, hash: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        self.call("digest failed", |provider| provider.digest(hash, data))
    }

    /// Derive `len` bytes from `password` using PBKDF2.
    pub fn pbkdf2(
        &self,
        hash: HashAlgorithm,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        len: usize,
    ) -> Result<Vec<u8>> {
        self.call("key derivation failed", |provider| {
            provider.pbkdf2(hash, password, salt, iterations, len)
        })
    }

    /// Generate `len` cryptographically secure random bytes.
    pub fn random_bytes(&self, len: usize) -> Result<Vec<u8>> {
        self.call("random generation failed", |provider| {
            provider.random_bytes(len)
        })
    }

    /// Check whether the affine point `(x, y)` lies on `curve`.
    pub fn is_on_curve(&self, curve: Curve, x: &[u8], y: &[u8]) -> Result<bool> {
        self.call("point validation failed", |provider| {
            provider.is_on_curve(curve, x, y)
        })
    }

    fn call<T, F>(&self, reason: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn CryptoProvider) -> std::result::Result<T, BoxError>,
    {
        let _guard = self.lock();
        f(self.provider.as_ref())
            .foreign_boxed_err(|| JoseError::CryptographicOperationFailed(reason.to_owned()))
    }

    fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        // The guarded state is empty, so a poisoned lock is still usable.
        self.serialize_calls
            .as_ref()
            .map(|mutex| mutex.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("serialized", &self.serialize_calls.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "openssl")]
impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::openssl()
    }
}

fn mismatch(message: String) -> Error<JoseError> {
    Error::root(JoseError::KeyCapabilityMismatch(message))
}

fn check_key_type(algorithm: &str, key: &Key, key_type: KeyType) -> Result<()> {
    if key.key_type() == key_type {
        return Ok(());
    }
    Err(mismatch(format!(
        "{algorithm} requires a {key_type} key, got {} key",
        key.describe()
    )))
}

fn check_curve(algorithm: &str, key: &Key, curve: Curve) -> Result<()> {
    match key.curve() {
        Some(key_curve) if key_curve == curve => Ok(()),
        _ => Err(mismatch(format!(
            "{algorithm} requires a {curve} key, got {} key",
            key.describe()
        ))),
    }
}

fn check_content_parameters(
    algorithm: ContentEncryptionAlgorithm,
    cek: &[u8],
    iv: &[u8],
) -> Result<()> {
    if cek.len() != algorithm.key_len() {
        return Err(mismatch(format!(
            "{algorithm} requires a key of exactly {} bits",
            algorithm.key_len() * 8
        )));
    }
    if iv.len() != algorithm.iv_len() {
        return Err(Error::root(JoseError::CryptographicOperationFailed(
            "initialization vector has an invalid length".to_owned(),
        )));
    }
    Ok(())
}

fn check_wrapping_algorithm(algorithm: KeyManagementAlgorithm) -> Result<()> {
    match algorithm.mode() {
        KeyManagementMode::KeyEncryption | KeyManagementMode::KeyWrapping => Ok(()),
        _ => Err(Error::root(JoseError::UnsupportedAlgorithm(format!(
            "{algorithm} does not encrypt the content encryption key directly"
        )))),
    }
}
