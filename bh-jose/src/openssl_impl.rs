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

use std::result::Result as StdResult;

use bherror::{
    traits::{ForeignBoxed as _, ForeignError as _},
    Error,
};
use openssl::{
    aes::{self, AesKey},
    bn::{BigNum, BigNumContext},
    derive::Deriver,
    ec::{EcGroup, EcGroupRef, EcKey, EcPointRef},
    ecdsa::EcdsaSig,
    encrypt::{Decrypter, Encrypter},
    hash::{hash, MessageDigest},
    memcmp,
    nid::Nid,
    pkcs5::pbkdf2_hmac,
    pkey::{HasPublic, Id, PKey, Private, Public},
    rand::rand_bytes,
    rsa::{Padding, Rsa, RsaPrivateKeyBuilder},
    sign::{RsaPssSaltlen, Signer, Verifier},
    symm::{self, Cipher},
};

use crate::{
    provider::{EcKeyComponents, EncryptedContent, HashAlgorithm},
    AlgorithmRegistry, BoxError, ContentEncryptionAlgorithm, CryptoProvider, Curve, EcPrivateKey,
    EcPublicKey, JoseError, JwsAlgorithm, Key, KeyManagementAlgorithm, KeyManagementMode, KeyType,
    RsaCrtParameters, RsaPrivateKey, RsaPublicKey,
};

type Result<T> = StdResult<T, BoxError>;

/// [`CryptoProvider`] implementation backed by [`openssl`], supporting every
/// algorithm of the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpensslProvider;

// X9_62_PRIME256V1 is basically an alias for secp256r1
//
// ------------------------------------------
//           Curve names chosen by
//      different standards organizations
// ------------+---------------+-------------
// SECG        |  ANSI X9.62   |  NIST
// ------------+---------------+-------------
// secp256r1   |  prime256v1   |   NIST P-256
// secp384r1   |               |   NIST P-384
// secp521r1   |               |   NIST P-521
//
// source: https://tools.ietf.org/search/rfc4492#appendix-A
fn curve_nid(curve: Curve) -> Nid {
    match curve {
        Curve::P256 => Nid::X9_62_PRIME256V1,
        Curve::P384 => Nid::SECP384R1,
        Curve::P521 => Nid::SECP521R1,
    }
}

fn nid_curve(nid: Nid) -> Option<Curve> {
    match nid {
        Nid::X9_62_PRIME256V1 => Some(Curve::P256),
        Nid::SECP384R1 => Some(Curve::P384),
        Nid::SECP521R1 => Some(Curve::P521),
        _ => None,
    }
}

fn message_digest(hash: HashAlgorithm) -> MessageDigest {
    match hash {
        HashAlgorithm::Sha256 => MessageDigest::sha256(),
        HashAlgorithm::Sha384 => MessageDigest::sha384(),
        HashAlgorithm::Sha512 => MessageDigest::sha512(),
    }
}

fn key_mismatch(algorithm: impl std::fmt::Display, key: &Key) -> BoxError {
    format!("{} can not be used with {algorithm}", key.describe()).into()
}

fn ec_group(curve: Curve) -> Result<EcGroup> {
    Ok(EcGroup::from_curve_name(curve_nid(curve))?)
}

fn ec_public_key(key: &EcPublicKey) -> Result<EcKey<Public>> {
    let group = ec_group(key.curve())?;
    let x = BigNum::from_slice(key.x())?;
    let y = BigNum::from_slice(key.y())?;
    Ok(EcKey::from_public_key_affine_coordinates(&group, &x, &y)?)
}

fn ec_private_key(key: &EcPrivateKey) -> Result<EcKey<Private>> {
    let group = ec_group(key.curve())?;
    let public = ec_public_key(key.public_key())?;
    let d = BigNum::from_slice(key.d())?;
    let private = EcKey::from_private_components(&group, &d, public.public_key())?;
    // the public point must belong to `d`
    private.check_key()?;
    Ok(private)
}

fn rsa_public_key(key: &RsaPublicKey) -> Result<PKey<Public>> {
    let n = BigNum::from_slice(key.modulus())?;
    let e = BigNum::from_slice(key.exponent())?;
    Ok(PKey::from_rsa(Rsa::from_public_components(n, e)?)?)
}

fn rsa_private_key(key: &RsaPrivateKey) -> Result<PKey<Private>> {
    let public = key.public_key();
    let mut builder = RsaPrivateKeyBuilder::new(
        BigNum::from_slice(public.modulus())?,
        BigNum::from_slice(public.exponent())?,
        BigNum::from_slice(key.private_exponent())?,
    )?;
    if let Some(crt) = key.crt_parameters() {
        builder = builder
            .set_factors(BigNum::from_slice(&crt.p)?, BigNum::from_slice(&crt.q)?)?
            .set_crt_params(
                BigNum::from_slice(&crt.dp)?,
                BigNum::from_slice(&crt.dq)?,
                BigNum::from_slice(&crt.qi)?,
            )?;
    }
    Ok(PKey::from_rsa(builder.build())?)
}

/// The RSA public key of either a public or a private key.
fn rsa_public_part(key: &Key) -> Option<&RsaPublicKey> {
    match key {
        Key::RsaPublic(public) => Some(public),
        Key::RsaPrivate(private) => Some(private.public_key()),
        _ => None,
    }
}

/// The EC public key of either a public or a private key.
fn ec_public_part(key: &Key) -> Option<&EcPublicKey> {
    match key {
        Key::EcPublic(public) => Some(public),
        Key::EcPrivate(private) => Some(private.public_key()),
        _ => None,
    }
}

fn hmac(hash: HashAlgorithm, key: &[u8], data: &[&[u8]]) -> Result<Vec<u8>> {
    let key = PKey::hmac(key)?;
    let mut signer = Signer::new(message_digest(hash), &key)?;
    for chunk in data {
        signer.update(chunk)?;
    }
    Ok(signer.sign_to_vec()?)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // `memcmp::eq` panics on inputs of different lengths
    a.len() == b.len() && memcmp::eq(a, b)
}

fn is_pss(algorithm: JwsAlgorithm) -> bool {
    matches!(
        algorithm,
        JwsAlgorithm::Ps256 | JwsAlgorithm::Ps384 | JwsAlgorithm::Ps512
    )
}

fn gcm_cipher(algorithm: ContentEncryptionAlgorithm) -> Cipher {
    match algorithm.key_len() {
        16 => Cipher::aes_128_gcm(),
        24 => Cipher::aes_192_gcm(),
        _ => Cipher::aes_256_gcm(),
    }
}

fn cbc_cipher(enc_key_len: usize) -> Cipher {
    match enc_key_len {
        16 => Cipher::aes_128_cbc(),
        24 => Cipher::aes_192_cbc(),
        _ => Cipher::aes_256_cbc(),
    }
}

/// The authentication tag of the AES-CBC with HMAC algorithms, see [section
/// 5.2.2.1 of RFC7518][1].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-5.2.2.1
fn cbc_hmac_tag(
    algorithm: ContentEncryptionAlgorithm,
    hash: HashAlgorithm,
    mac_key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let aad_bits = ((aad.len() as u64) * 8).to_be_bytes();
    let mut tag = hmac(hash, mac_key, &[aad, iv, ciphertext, &aad_bits])?;
    tag.truncate(algorithm.tag_len());
    Ok(tag)
}

fn check_cek(algorithm: ContentEncryptionAlgorithm, cek: &[u8]) -> Result<()> {
    if cek.len() != algorithm.key_len() {
        return Err(format!("{algorithm} requires a {} byte key", algorithm.key_len()).into());
    }
    Ok(())
}

fn aes_wrap(kek: &[u8], cek: &[u8]) -> Result<Vec<u8>> {
    if cek.len() % 8 != 0 || cek.len() < 16 {
        return Err("AES key wrap input must be a multiple of 8 bytes, at least 16".into());
    }
    // `aes::KeyError` does not implement `std::error::Error`
    let kek = AesKey::new_encrypt(kek).map_err(|_| "invalid AES key wrapping key")?;
    let mut wrapped = vec![0; cek.len() + 8];
    aes::wrap_key(&kek, None, &mut wrapped, cek).map_err(|_| "AES key wrap failed")?;
    Ok(wrapped)
}

fn aes_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() % 8 != 0 || wrapped.len() < 24 {
        return Err("AES wrapped key must be a multiple of 8 bytes, at least 24".into());
    }
    let kek = AesKey::new_decrypt(kek).map_err(|_| "invalid AES key wrapping key")?;
    let mut cek = vec![0; wrapped.len() - 8];
    aes::unwrap_key(&kek, None, &mut cek, wrapped).map_err(|_| "AES key unwrap failed")?;
    Ok(cek)
}

fn rsa_key_encryption_padding(algorithm: KeyManagementAlgorithm) -> Result<Padding> {
    match algorithm {
        KeyManagementAlgorithm::Rsa1_5 => Ok(Padding::PKCS1),
        KeyManagementAlgorithm::RsaOaep | KeyManagementAlgorithm::RsaOaep256 => {
            Ok(Padding::PKCS1_OAEP)
        }
        _ => Err(format!("{algorithm} is not an RSA key encryption algorithm").into()),
    }
}

fn invalid_encoding(format: &str) -> JoseError {
    JoseError::InvalidKeyMaterial(format!("malformed {format} key"))
}

fn unsupported_key_type(id: Id) -> Error<JoseError> {
    Error::root(JoseError::InvalidKeyMaterial(format!(
        "unsupported key type {id:?}, only RSA and EC keys can be imported"
    )))
}

fn ec_curve(group: &EcGroupRef) -> crate::Result<Curve> {
    group.curve_name().and_then(nid_curve).ok_or_else(|| {
        Error::root(JoseError::InvalidKeyMaterial(
            "unsupported elliptic curve, only P-256, P-384 and P-521 are supported".to_owned(),
        ))
    })
}

/// Affine coordinates of `point`, padded to [`Curve::coordinate_len`].
fn affine_coordinates(
    group: &EcGroupRef,
    point: &EcPointRef,
    curve: Curve,
) -> StdResult<(Vec<u8>, Vec<u8>), openssl::error::ErrorStack> {
    let mut x = BigNum::new()?;
    let mut y = BigNum::new()?;
    let mut ctx = BigNumContext::new()?;
    point.affine_coordinates(group, &mut x, &mut y, &mut ctx)?;

    let len = curve.coordinate_len() as i32;
    Ok((x.to_vec_padded(len)?, y.to_vec_padded(len)?))
}

fn public_key_from_pkey<T: HasPublic>(
    registry: &AlgorithmRegistry,
    pkey: &PKey<T>,
) -> crate::Result<Key> {
    let id = pkey.id();
    if id == Id::RSA {
        let rsa = pkey.rsa().foreign_err(|| invalid_encoding("RSA"))?;
        Key::rsa_public(&rsa.n().to_vec(), &rsa.e().to_vec())
    } else if id == Id::EC {
        let ec = pkey.ec_key().foreign_err(|| invalid_encoding("EC"))?;
        let curve = ec_curve(ec.group())?;
        let (x, y) = affine_coordinates(ec.group(), ec.public_key(), curve)
            .foreign_err(|| invalid_encoding("EC"))?;
        Key::ec_public(registry, curve, &x, &y)
    } else {
        Err(unsupported_key_type(id))
    }
}

fn private_key_from_pkey(registry: &AlgorithmRegistry, pkey: &PKey<Private>) -> crate::Result<Key> {
    let id = pkey.id();
    if id == Id::RSA {
        let rsa = pkey.rsa().foreign_err(|| invalid_encoding("RSA"))?;
        let crt = match (rsa.p(), rsa.q(), rsa.dmp1(), rsa.dmq1(), rsa.iqmp()) {
            (Some(p), Some(q), Some(dp), Some(dq), Some(qi)) => Some(RsaCrtParameters {
                p: p.to_vec(),
                q: q.to_vec(),
                dp: dp.to_vec(),
                dq: dq.to_vec(),
                qi: qi.to_vec(),
            }),
            _ => None,
        };
        Key::rsa_private(&rsa.n().to_vec(), &rsa.e().to_vec(), &rsa.d().to_vec(), crt)
    } else if id == Id::EC {
        let ec = pkey.ec_key().foreign_err(|| invalid_encoding("EC"))?;
        let curve = ec_curve(ec.group())?;
        let (x, y) = affine_coordinates(ec.group(), ec.public_key(), curve)
            .foreign_err(|| invalid_encoding("EC"))?;
        let d = ec
            .private_key()
            .to_vec_padded(curve.coordinate_len() as i32)
            .foreign_err(|| invalid_encoding("EC"))?;
        Key::ec_private(registry, curve, &x, &y, &d)
    } else {
        Err(unsupported_key_type(id))
    }
}

/// Import and export of keys in the PEM and DER formats, backed by
/// [`openssl`].
impl Key {
    /// Import an RSA or EC private key from PEM, either PKCS#8 or the
    /// traditional PKCS#1 and SEC1 formats.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if the PEM can not be parsed,
    /// the key type or curve is not supported, or the key is rejected by the
    /// validating constructors.
    pub fn private_key_from_pem(registry: &AlgorithmRegistry, pem: &[u8]) -> crate::Result<Self> {
        let pkey = PKey::private_key_from_pem(pem).foreign_err(|| invalid_encoding("PEM private"))?;
        private_key_from_pkey(registry, &pkey)
    }

    /// Import an RSA or EC private key from PKCS#8 DER.
    ///
    /// # Errors
    ///
    /// Same as [`Key::private_key_from_pem`].
    pub fn private_key_from_der(registry: &AlgorithmRegistry, der: &[u8]) -> crate::Result<Self> {
        let pkey = PKey::private_key_from_pkcs8(der)
            .or_else(|_| PKey::private_key_from_der(der))
            .foreign_err(|| invalid_encoding("DER private"))?;
        private_key_from_pkey(registry, &pkey)
    }

    /// Import an RSA or EC public key from PEM, either a
    /// `SubjectPublicKeyInfo` or a PKCS#1 RSA public key.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if the PEM can not be parsed,
    /// the key type or curve is not supported, or the key is rejected by the
    /// validating constructors.
    pub fn public_key_from_pem(registry: &AlgorithmRegistry, pem: &[u8]) -> crate::Result<Self> {
        let pkey = PKey::public_key_from_pem(pem)
            .or_else(|_| Rsa::public_key_from_pem_pkcs1(pem).and_then(PKey::from_rsa))
            .foreign_err(|| invalid_encoding("PEM public"))?;
        public_key_from_pkey(registry, &pkey)
    }

    /// Import an RSA or EC public key from DER, either a
    /// `SubjectPublicKeyInfo` or a PKCS#1 RSA public key.
    ///
    /// # Errors
    ///
    /// Same as [`Key::public_key_from_pem`].
    pub fn public_key_from_der(registry: &AlgorithmRegistry, der: &[u8]) -> crate::Result<Self> {
        let pkey = PKey::public_key_from_der(der)
            .or_else(|_| Rsa::public_key_from_der_pkcs1(der).and_then(PKey::from_rsa))
            .foreign_err(|| invalid_encoding("DER public"))?;
        public_key_from_pkey(registry, &pkey)
    }

    /// Export the public part of an RSA or EC key as a DER encoded
    /// `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::KeyCapabilityMismatch`] for symmetric keys.
    pub fn public_key_to_der(&self) -> crate::Result<Vec<u8>> {
        let der = if let Some(public) = rsa_public_part(self) {
            rsa_public_key(public).and_then(|pkey| Ok(pkey.public_key_to_der()?))
        } else if let Some(public) = ec_public_part(self) {
            ec_public_key(public)
                .and_then(|ec| Ok(PKey::from_ec_key(ec)?))
                .and_then(|pkey| Ok(pkey.public_key_to_der()?))
        } else {
            return Err(Error::root(JoseError::KeyCapabilityMismatch(format!(
                "{} has no public key",
                self.describe()
            ))));
        };
        der.foreign_boxed_err(|| {
            JoseError::CryptographicOperationFailed("public key encoding failed".to_owned())
        })
    }

    /// Export the public part of an RSA key as a DER encoded PKCS#1
    /// `RSAPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::KeyCapabilityMismatch`] for non-RSA keys.
    pub fn rsa_public_key_to_pkcs1_der(&self) -> crate::Result<Vec<u8>> {
        let public = rsa_public_part(self).ok_or_else(|| {
            Error::root(JoseError::KeyCapabilityMismatch(format!(
                "{} is not an RSA key",
                self.describe()
            )))
        })?;
        BigNum::from_slice(public.modulus())
            .and_then(|n| Ok((n, BigNum::from_slice(public.exponent())?)))
            .and_then(|(n, e)| Rsa::from_public_components(n, e))
            .and_then(|rsa| rsa.public_key_to_der_pkcs1())
            .foreign_err(|| {
                JoseError::CryptographicOperationFailed("public key encoding failed".to_owned())
            })
    }
}

impl CryptoProvider for OpensslProvider {
    fn sign(&self, algorithm: JwsAlgorithm, key: &Key, message: &[u8]) -> Result<Vec<u8>> {
        let Some(hash) = algorithm.hash() else {
            // `none` has an empty signature
            return Ok(Vec::new());
        };

        match (algorithm.key_type(), key) {
            (Some(KeyType::Oct), Key::Symmetric(key)) => hmac(hash, key.as_bytes(), &[message]),
            (Some(KeyType::Rsa), Key::RsaPrivate(key)) => {
                let key = rsa_private_key(key)?;
                let mut signer = Signer::new(message_digest(hash), &key)?;
                if is_pss(algorithm) {
                    signer.set_rsa_padding(Padding::PKCS1_PSS)?;
                    signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
                    signer.set_rsa_mgf1_md(message_digest(hash))?;
                }
                signer.update(message)?;
                Ok(signer.sign_to_vec()?)
            }
            (Some(KeyType::Ec), Key::EcPrivate(key)) => {
                let digest = hash_bytes(hash, message)?;
                let ec_key = ec_private_key(key)?;
                let signature = EcdsaSig::sign(&digest, &ec_key)?;

                let len = key.curve().coordinate_len() as i32;
                let mut jws = signature.r().to_vec_padded(len)?;
                jws.extend(signature.s().to_vec_padded(len)?);
                Ok(jws)
            }
            _ => Err(key_mismatch(algorithm, key)),
        }
    }

    fn verify(
        &self,
        algorithm: JwsAlgorithm,
        key: &Key,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        let Some(hash) = algorithm.hash() else {
            return Ok(signature.is_empty());
        };

        match algorithm.key_type() {
            Some(KeyType::Oct) => {
                let Key::Symmetric(key) = key else {
                    return Err(key_mismatch(algorithm, key));
                };
                let expected = hmac(hash, key.as_bytes(), &[message])?;
                Ok(constant_time_eq(&expected, signature))
            }
            Some(KeyType::Rsa) => {
                let public = rsa_public_part(key).ok_or_else(|| key_mismatch(algorithm, key))?;
                let public = rsa_public_key(public)?;
                let mut verifier = Verifier::new(message_digest(hash), &public)?;
                if is_pss(algorithm) {
                    verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
                    verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
                    verifier.set_rsa_mgf1_md(message_digest(hash))?;
                }
                verifier.update(message)?;
                // openssl reports some malformed signatures as errors
                Ok(verifier.verify(signature).unwrap_or(false))
            }
            Some(KeyType::Ec) => {
                let public = ec_public_part(key).ok_or_else(|| key_mismatch(algorithm, key))?;
                let len = public.curve().coordinate_len();
                if signature.len() != 2 * len {
                    return Ok(false);
                }

                let (r, s) = signature.split_at(len);
                let signature = EcdsaSig::from_private_components(
                    BigNum::from_slice(r)?,
                    BigNum::from_slice(s)?,
                )?;
                let digest = hash_bytes(hash, message)?;
                let ec_key = ec_public_key(public)?;
                Ok(signature.verify(&digest, &ec_key)?)
            }
            None => Err(key_mismatch(algorithm, key)),
        }
    }

    fn encrypt(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<EncryptedContent> {
        check_cek(algorithm, cek)?;

        match algorithm.hmac_hash() {
            Some(hash) => {
                let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
                let ciphertext =
                    symm::encrypt(cbc_cipher(enc_key.len()), enc_key, Some(iv), plaintext)?;
                let tag = cbc_hmac_tag(algorithm, hash, mac_key, aad, iv, &ciphertext)?;
                Ok(EncryptedContent { ciphertext, tag })
            }
            None => {
                let mut tag = vec![0; algorithm.tag_len()];
                let ciphertext = symm::encrypt_aead(
                    gcm_cipher(algorithm),
                    cek,
                    Some(iv),
                    aad,
                    plaintext,
                    &mut tag,
                )?;
                Ok(EncryptedContent { ciphertext, tag })
            }
        }
    }

    fn decrypt(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>> {
        check_cek(algorithm, cek)?;
        if tag.len() != algorithm.tag_len() {
            return Err("authentication tag has an invalid length".into());
        }

        match algorithm.hmac_hash() {
            Some(hash) => {
                let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
                let expected = cbc_hmac_tag(algorithm, hash, mac_key, aad, iv, ciphertext)?;
                if !constant_time_eq(&expected, tag) {
                    return Err("authentication tag mismatch".into());
                }
                Ok(symm::decrypt(cbc_cipher(enc_key.len()), enc_key, Some(iv), ciphertext)?)
            }
            None => Ok(symm::decrypt_aead(
                gcm_cipher(algorithm),
                cek,
                Some(iv),
                aad,
                ciphertext,
                tag,
            )?),
        }
    }

    fn wrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        cek: &[u8],
    ) -> Result<Vec<u8>> {
        match (algorithm.mode(), key) {
            (KeyManagementMode::KeyEncryption, _) => {
                let public = rsa_public_part(key).ok_or_else(|| key_mismatch(algorithm, key))?;
                let public = rsa_public_key(public)?;

                let mut encrypter = Encrypter::new(&public)?;
                encrypter.set_rsa_padding(rsa_key_encryption_padding(algorithm)?)?;
                if algorithm == KeyManagementAlgorithm::RsaOaep256 {
                    encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
                    encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;
                }

                let mut encrypted = vec![0; encrypter.encrypt_len(cek)?];
                let len = encrypter.encrypt(cek, &mut encrypted)?;
                encrypted.truncate(len);
                Ok(encrypted)
            }
            (KeyManagementMode::KeyWrapping, Key::Symmetric(kek)) => aes_wrap(kek.as_bytes(), cek),
            _ => Err(key_mismatch(algorithm, key)),
        }
    }

    fn unwrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>> {
        match (algorithm.mode(), key) {
            (KeyManagementMode::KeyEncryption, Key::RsaPrivate(private)) => {
                let private = rsa_private_key(private)?;

                let mut decrypter = Decrypter::new(&private)?;
                decrypter.set_rsa_padding(rsa_key_encryption_padding(algorithm)?)?;
                if algorithm == KeyManagementAlgorithm::RsaOaep256 {
                    decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
                    decrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;
                }

                let mut cek = vec![0; decrypter.decrypt_len(encrypted_key)?];
                let len = decrypter.decrypt(encrypted_key, &mut cek)?;
                cek.truncate(len);
                Ok(cek)
            }
            (KeyManagementMode::KeyWrapping, Key::Symmetric(kek)) => {
                aes_unwrap(kek.as_bytes(), encrypted_key)
            }
            _ => Err(key_mismatch(algorithm, key)),
        }
    }

    fn derive_shared_secret(
        &self,
        private_key: &EcPrivateKey,
        public_key: &EcPublicKey,
    ) -> Result<Vec<u8>> {
        let private = PKey::from_ec_key(ec_private_key(private_key)?)?;
        let public = PKey::from_ec_key(ec_public_key(public_key)?)?;

        let mut deriver = Deriver::new(&private)?;
        deriver.set_peer(&public)?;
        Ok(deriver.derive_to_vec()?)
    }

    fn generate_ec_key(&self, curve: Curve) -> Result<EcKeyComponents> {
        let group = ec_group(curve)?;
        let key = EcKey::generate(&group)?;
        let (x, y) = affine_coordinates(&group, key.public_key(), curve)?;

        Ok(EcKeyComponents {
            x,
            y,
            d: key.private_key().to_vec_padded(curve.coordinate_len() as i32)?,
        })
    }

    fn digest(&self, hash: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        hash_bytes(hash, data)
    }

    fn pbkdf2(
        &self,
        hash: HashAlgorithm,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        len: usize,
    ) -> Result<Vec<u8>> {
        let mut derived = vec![0; len];
        pbkdf2_hmac(
            password,
            salt,
            iterations as usize,
            message_digest(hash),
            &mut derived,
        )?;
        Ok(derived)
    }

    fn random_bytes(&self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0; len];
        rand_bytes(&mut bytes)?;
        Ok(bytes)
    }

    fn is_on_curve(&self, curve: Curve, x: &[u8], y: &[u8]) -> Result<bool> {
        let group = ec_group(curve)?;
        let x = BigNum::from_slice(x)?;
        let y = BigNum::from_slice(y)?;
        // fails for points which are not on the curve
        Ok(EcKey::from_public_key_affine_coordinates(&group, &x, &y).is_ok())
    }
}

fn hash_bytes(hash_algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    Ok(hash(message_digest(hash_algorithm), data)?.to_vec())
}
