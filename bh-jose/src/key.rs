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

use std::{fmt, str::FromStr};

use bherror::{traits::ErrorContext as _, Error};
use serde::{Deserialize, Serialize};

use crate::{AlgorithmRegistry, JoseError, Result};

/// Minimum RSA modulus size accepted for any JOSE algorithm, as required by
/// [section 3.3 of RFC7518][1].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-3.3
pub const MIN_RSA_MODULUS_BITS: usize = 2048;

/// JWK `"crv"` parameter value for the **P-256** curve.
pub const CURVE_P256: &str = "P-256";
/// JWK `"crv"` parameter value for the **P-384** curve.
pub const CURVE_P384: &str = "P-384";
/// JWK `"crv"` parameter value for the **P-521** curve.
pub const CURVE_P521: &str = "P-521";

/// Leading byte of an uncompressed SEC1 point encoding.
const SEC1_UNCOMPRESSED: u8 = 0x04;

/// Named elliptic curves usable with `EC` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256, also known as `secp256r1` or `prime256v1`
    P256,
    /// NIST P-384, also known as `secp384r1`
    P384,
    /// NIST P-521, also known as `secp521r1`
    P521,
}

impl Curve {
    /// The JWK `"crv"` name of the curve.
    pub fn name(&self) -> &'static str {
        match self {
            Self::P256 => CURVE_P256,
            Self::P384 => CURVE_P384,
            Self::P521 => CURVE_P521,
        }
    }

    /// Length in bytes of a field element (coordinate or private scalar).
    pub fn coordinate_len(&self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }
}

impl FromStr for Curve {
    type Err = Error<JoseError>;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            CURVE_P256 => Ok(Self::P256),
            CURVE_P384 => Ok(Self::P384),
            CURVE_P521 => Ok(Self::P521),
            _ => Err(Error::root(JoseError::InvalidKeyMaterial(format!(
                "unsupported curve {value}"
            )))),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key types, as named by the JWK `"kty"` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Octet sequence (symmetric key)
    Oct,
    /// RSA key pair or public key
    Rsa,
    /// Elliptic curve key pair or public key
    Ec,
}

impl KeyType {
    /// The JWK `"kty"` name of the key type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Oct => "oct",
            Self::Rsa => "RSA",
            Self::Ec => "EC",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations a key can be used for, named as in the JWK `"key_ops"`
/// parameter ([section 4.3 of RFC7517][1]).
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7517.html#section-4.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
pub enum KeyOperation {
    /// Compute a digital signature or MAC
    #[strum(to_string = "sign")]
    Sign,
    /// Verify a digital signature or MAC
    #[strum(to_string = "verify")]
    Verify,
    /// Encrypt content or a content encryption key
    #[strum(to_string = "encrypt")]
    Encrypt,
    /// Decrypt content or a content encryption key
    #[strum(to_string = "decrypt")]
    Decrypt,
    /// Wrap a content encryption key
    #[strum(to_string = "wrapKey")]
    WrapKey,
    /// Unwrap a content encryption key
    #[strum(to_string = "unwrapKey")]
    UnwrapKey,
}

const SYMMETRIC_CAPABILITIES: &[KeyOperation] = &[
    KeyOperation::Sign,
    KeyOperation::Verify,
    KeyOperation::Encrypt,
    KeyOperation::Decrypt,
    KeyOperation::WrapKey,
    KeyOperation::UnwrapKey,
];

const PUBLIC_CAPABILITIES: &[KeyOperation] = &[
    KeyOperation::Verify,
    KeyOperation::Encrypt,
    KeyOperation::WrapKey,
];

const PRIVATE_CAPABILITIES: &[KeyOperation] = &[
    KeyOperation::Sign,
    KeyOperation::Decrypt,
    KeyOperation::UnwrapKey,
];

/// Symmetric key: a plain octet sequence.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the key in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false`, empty keys can not be constructed.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// RSA public key, as big-endian unsigned integers without leading zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    n: Vec<u8>,
    e: Vec<u8>,
}

impl RsaPublicKey {
    /// The modulus `n`.
    pub fn modulus(&self) -> &[u8] {
        &self.n
    }

    /// The public exponent `e`.
    pub fn exponent(&self) -> &[u8] {
        &self.e
    }

    /// Size of the modulus in bits.
    pub fn modulus_bits(&self) -> usize {
        bit_length(&self.n)
    }
}

/// The Chinese Remainder Theorem parameters of an RSA private key.
#[derive(Clone, PartialEq, Eq)]
pub struct RsaCrtParameters {
    /// First prime factor `p`.
    pub p: Vec<u8>,
    /// Second prime factor `q`.
    pub q: Vec<u8>,
    /// First factor CRT exponent `dp`.
    pub dp: Vec<u8>,
    /// Second factor CRT exponent `dq`.
    pub dq: Vec<u8>,
    /// First CRT coefficient `qi`.
    pub qi: Vec<u8>,
}

/// RSA private key.
#[derive(Clone, PartialEq, Eq)]
pub struct RsaPrivateKey {
    public: RsaPublicKey,
    d: Vec<u8>,
    crt: Option<RsaCrtParameters>,
}

impl RsaPrivateKey {
    /// The public part of the key.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// The private exponent `d`.
    pub fn private_exponent(&self) -> &[u8] {
        &self.d
    }

    /// The CRT parameters, if known.
    pub fn crt_parameters(&self) -> Option<&RsaCrtParameters> {
        self.crt.as_ref()
    }
}

/// Elliptic curve public key given by its affine coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPublicKey {
    curve: Curve,
    x: Vec<u8>,
    y: Vec<u8>,
}

impl EcPublicKey {
    /// The curve the point lies on.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// The `x` coordinate, padded to [`Curve::coordinate_len`] bytes.
    pub fn x(&self) -> &[u8] {
        &self.x
    }

    /// The `y` coordinate, padded to [`Curve::coordinate_len`] bytes.
    pub fn y(&self) -> &[u8] {
        &self.y
    }

    /// The uncompressed SEC1 encoding of the point, `0x04 || x || y`.
    pub fn to_uncompressed_point(&self) -> Vec<u8> {
        let mut point = Vec::with_capacity(1 + self.x.len() + self.y.len());
        point.push(SEC1_UNCOMPRESSED);
        point.extend_from_slice(&self.x);
        point.extend_from_slice(&self.y);
        point
    }
}

/// Elliptic curve private key.
#[derive(Clone, PartialEq, Eq)]
pub struct EcPrivateKey {
    public: EcPublicKey,
    d: Vec<u8>,
}

impl EcPrivateKey {
    /// The public part of the key.
    pub fn public_key(&self) -> &EcPublicKey {
        &self.public
    }

    /// The curve of the key.
    pub fn curve(&self) -> Curve {
        self.public.curve
    }

    /// The private scalar `d`, padded to [`Curve::coordinate_len`] bytes.
    pub fn d(&self) -> &[u8] {
        &self.d
    }
}

/// A cryptographic key usable with JOSE algorithms.
///
/// Keys can only be constructed through the validating constructors below
/// (or from a JWK, see [`Key::from_jwk`]) and are immutable afterwards. The
/// variant determines the set of operations the key supports, see
/// [`Key::capabilities`].
///
/// The [`Debug`] implementation never prints secret components.
#[derive(Clone, PartialEq, Eq)]
pub enum Key {
    /// Symmetric key, used with HMAC, AES key wrapping, direct encryption and
    /// as a PBES2 password.
    Symmetric(SymmetricKey),
    /// RSA public key.
    RsaPublic(RsaPublicKey),
    /// RSA private key.
    RsaPrivate(RsaPrivateKey),
    /// Elliptic curve public key.
    EcPublic(EcPublicKey),
    /// Elliptic curve private key.
    EcPrivate(EcPrivateKey),
}

impl Key {
    /// Construct a symmetric key from its raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if `bytes` is empty.
    pub fn symmetric(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(Error::root(JoseError::InvalidKeyMaterial(
                "symmetric key must not be empty".to_owned(),
            )));
        }
        Ok(Self::Symmetric(SymmetricKey { bytes }))
    }

    /// Construct an RSA public key from its modulus `n` and exponent `e`,
    /// both big-endian.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if the modulus is shorter than
    /// [`MIN_RSA_MODULUS_BITS`] or the exponent is not an odd number greater
    /// than one.
    pub fn rsa_public(n: &[u8], e: &[u8]) -> Result<Self> {
        rsa_public_key(n, e).map(Self::RsaPublic)
    }

    /// Construct an RSA private key from its components, all big-endian.
    ///
    /// The CRT parameters are optional but allow the cryptography provider to
    /// use the faster private key operations.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if the public part is invalid
    /// (see [`Key::rsa_public`]), or the private exponent or any of the CRT
    /// parameters are zero.
    pub fn rsa_private(
        n: &[u8],
        e: &[u8],
        d: &[u8],
        crt: Option<RsaCrtParameters>,
    ) -> Result<Self> {
        let public = rsa_public_key(n, e)?;

        let d = strip_leading_zeros(d);
        if d.is_empty() {
            return Err(invalid_key("RSA private exponent must not be zero"));
        }

        let crt = crt
            .map(|crt| {
                let params = [&crt.p, &crt.q, &crt.dp, &crt.dq, &crt.qi];
                if params.iter().any(|param| strip_leading_zeros(param).is_empty()) {
                    return Err(invalid_key("RSA CRT parameters must not be zero"));
                }
                Ok(RsaCrtParameters {
                    p: strip_leading_zeros(&crt.p).to_vec(),
                    q: strip_leading_zeros(&crt.q).to_vec(),
                    dp: strip_leading_zeros(&crt.dp).to_vec(),
                    dq: strip_leading_zeros(&crt.dq).to_vec(),
                    qi: strip_leading_zeros(&crt.qi).to_vec(),
                })
            })
            .transpose()?;

        Ok(Self::RsaPrivate(RsaPrivateKey {
            public,
            d: d.to_vec(),
            crt,
        }))
    }

    /// Construct an elliptic curve public key from its affine coordinates.
    ///
    /// The point is checked to lie on `curve` using the cryptography provider
    /// of the `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if a coordinate does not have
    /// the field width of the curve or the point is not on the curve.
    pub fn ec_public(
        registry: &AlgorithmRegistry,
        curve: Curve,
        x: &[u8],
        y: &[u8],
    ) -> Result<Self> {
        ec_public_key(registry, curve, x, y).map(Self::EcPublic)
    }

    /// Construct an elliptic curve public key from its uncompressed SEC1
    /// encoding `0x04 || x || y`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if `point` is not an
    /// uncompressed point of the size of `curve`, or the point is invalid
    /// (see [`Key::ec_public`]).
    pub fn ec_public_from_point(
        registry: &AlgorithmRegistry,
        curve: Curve,
        point: &[u8],
    ) -> Result<Self> {
        let len = curve.coordinate_len();
        match point.split_first() {
            Some((&SEC1_UNCOMPRESSED, coordinates)) if coordinates.len() == 2 * len => {
                let (x, y) = coordinates.split_at(len);
                Self::ec_public(registry, curve, x, y)
            }
            _ => Err(invalid_key("EC point is not uncompressed SEC1"))
                .ctx(|| format!("expected {} bytes for {curve}", 1 + 2 * len)),
        }
    }

    /// Construct an elliptic curve private key from the affine coordinates of
    /// its public point and the private scalar `d`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if the public point is
    /// invalid (see [`Key::ec_public`]), or `d` is zero or does not have the
    /// field width of the curve.
    pub fn ec_private(
        registry: &AlgorithmRegistry,
        curve: Curve,
        x: &[u8],
        y: &[u8],
        d: &[u8],
    ) -> Result<Self> {
        let public = ec_public_key(registry, curve, x, y)?;

        if d.len() != curve.coordinate_len() {
            return Err(invalid_key("EC private scalar has an invalid length"))
                .ctx(|| format!("expected {} bytes for {curve}", curve.coordinate_len()));
        }
        if d.iter().all(|byte| *byte == 0) {
            return Err(invalid_key("EC private scalar must not be zero"));
        }

        Ok(Self::EcPrivate(EcPrivateKey {
            public,
            d: d.to_vec(),
        }))
    }

    /// The key type of this key.
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Symmetric(_) => KeyType::Oct,
            Self::RsaPublic(_) | Self::RsaPrivate(_) => KeyType::Rsa,
            Self::EcPublic(_) | Self::EcPrivate(_) => KeyType::Ec,
        }
    }

    /// Whether the key holds private or secret material.
    pub fn is_secret(&self) -> bool {
        !matches!(self, Self::RsaPublic(_) | Self::EcPublic(_))
    }

    /// The operations this key supports, determined by its variant.
    ///
    /// Private keys can sign, decrypt and unwrap, public keys can verify,
    /// encrypt and wrap, and symmetric keys can do all of these.
    pub fn capabilities(&self) -> &'static [KeyOperation] {
        match self {
            Self::Symmetric(_) => SYMMETRIC_CAPABILITIES,
            Self::RsaPublic(_) | Self::EcPublic(_) => PUBLIC_CAPABILITIES,
            Self::RsaPrivate(_) | Self::EcPrivate(_) => PRIVATE_CAPABILITIES,
        }
    }

    /// Whether the key supports the given operation.
    pub fn supports(&self, operation: KeyOperation) -> bool {
        self.capabilities().contains(&operation)
    }

    /// Fails with [`JoseError::KeyCapabilityMismatch`] if the key does not
    /// support `operation`.
    pub fn require(&self, operation: KeyOperation) -> Result<()> {
        if self.supports(operation) {
            return Ok(());
        }
        Err(Error::root(JoseError::KeyCapabilityMismatch(format!(
            "{} key can not be used to {operation}",
            self.describe()
        ))))
    }

    /// The curve of an elliptic curve key, `None` for other key types.
    pub fn curve(&self) -> Option<Curve> {
        match self {
            Self::EcPublic(key) => Some(key.curve),
            Self::EcPrivate(key) => Some(key.public.curve),
            _ => None,
        }
    }

    /// The public counterpart of an asymmetric key.
    ///
    /// Public keys are returned unchanged, symmetric keys have no public
    /// counterpart and yield `None`.
    pub fn to_public(&self) -> Option<Key> {
        match self {
            Self::Symmetric(_) => None,
            Self::RsaPublic(_) | Self::EcPublic(_) => Some(self.clone()),
            Self::RsaPrivate(key) => Some(Self::RsaPublic(key.public.clone())),
            Self::EcPrivate(key) => Some(Self::EcPublic(key.public.clone())),
        }
    }

    /// Short human readable description without any key material, used in
    /// error messages.
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Symmetric(key) => format!("{}-bit symmetric", key.len() * 8),
            Self::RsaPublic(key) => format!("{}-bit RSA public", key.modulus_bits()),
            Self::RsaPrivate(key) => format!("{}-bit RSA private", key.public.modulus_bits()),
            Self::EcPublic(key) => format!("{} public", key.curve),
            Self::EcPrivate(key) => format!("{} private", key.public.curve),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric(key) => f
                .debug_struct("Symmetric")
                .field("len", &key.len())
                .finish_non_exhaustive(),
            Self::RsaPublic(key) => f.debug_tuple("RsaPublic").field(key).finish(),
            Self::RsaPrivate(key) => f
                .debug_struct("RsaPrivate")
                .field("public", &key.public)
                .finish_non_exhaustive(),
            Self::EcPublic(key) => f.debug_tuple("EcPublic").field(key).finish(),
            Self::EcPrivate(key) => f
                .debug_struct("EcPrivate")
                .field("public", &key.public)
                .finish_non_exhaustive(),
        }
    }
}

fn invalid_key(message: &str) -> Error<JoseError> {
    Error::root(JoseError::InvalidKeyMaterial(message.to_owned()))
}

fn strip_leading_zeros(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|byte| *byte != 0)
        .unwrap_or(value.len());
    &value[start..]
}

fn bit_length(value: &[u8]) -> usize {
    let value = strip_leading_zeros(value);
    match value.first() {
        Some(first) => value.len() * 8 - first.leading_zeros() as usize,
        None => 0,
    }
}

fn rsa_public_key(n: &[u8], e: &[u8]) -> Result<RsaPublicKey> {
    let n = strip_leading_zeros(n);
    let e = strip_leading_zeros(e);

    let bits = bit_length(n);
    if bits < MIN_RSA_MODULUS_BITS {
        return Err(invalid_key("RSA modulus is too short"))
            .ctx(|| format!("modulus has {bits} bits, at least {MIN_RSA_MODULUS_BITS} required"));
    }

    // `e` must be odd and greater than one.
    let odd = e.last().is_some_and(|last| last & 1 == 1);
    if !odd || e == [1] {
        return Err(invalid_key("RSA public exponent must be odd and greater than one"));
    }

    Ok(RsaPublicKey {
        n: n.to_vec(),
        e: e.to_vec(),
    })
}

fn ec_public_key(
    registry: &AlgorithmRegistry,
    curve: Curve,
    x: &[u8],
    y: &[u8],
) -> Result<EcPublicKey> {
    let len = curve.coordinate_len();
    if x.len() != len || y.len() != len {
        return Err(invalid_key("EC coordinate has an invalid length"))
            .ctx(|| format!("expected {len} bytes for {curve}"));
    }

    if !registry.is_on_curve(curve, x, y)? {
        return Err(invalid_key("EC point is not on the curve")).ctx(|| curve.to_string());
    }

    Ok(EcPublicKey {
        curve,
        x: x.to_vec(),
        y: y.to_vec(),
    })
}
