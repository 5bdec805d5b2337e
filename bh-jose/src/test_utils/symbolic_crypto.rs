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
    borrow::Cow,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{
    provider::{BoxError, CryptoProvider, EcKeyComponents, EncryptedContent, HashAlgorithm},
    ContentEncryptionAlgorithm, Curve, EcPrivateKey, EcPublicKey, JwsAlgorithm, Key,
    KeyManagementAlgorithm,
};

/// Symbolic stand-in for a real cryptography provider.
///
/// Nothing here is secure. The operations only keep track of which key,
/// message and parameters were used, so that the engines can be tested
/// without depending on (the correctness of) a real backend:
///
/// - signatures record the algorithm, the message and the key identity;
/// - encryption is a keyed XOR stream with a symbolic tag over everything
///   that must be authenticated;
/// - EC "key pairs" use the private scalar as the `x` coordinate, which makes
///   the symbolic key agreement commutative;
/// - random bytes come from a counter, so they never repeat.
#[derive(Debug, Default)]
pub(crate) struct SymbolicProvider {
    counter: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct SymbolicSignature<'a> {
    algorithm: Cow<'a, str>,
    message: Cow<'a, [u8]>,
    key: Cow<'a, [u8]>,
}

/// Byte string identifying the key pair a key belongs to; the same for the
/// private and the public half.
fn key_identity(key: &Key) -> Vec<u8> {
    match key {
        Key::Symmetric(key) => key.as_bytes().to_vec(),
        Key::RsaPublic(key) => key.modulus().to_vec(),
        Key::RsaPrivate(key) => key.public_key().modulus().to_vec(),
        Key::EcPublic(key) => [key.x(), key.y()].concat(),
        Key::EcPrivate(key) => [key.public_key().x(), key.public_key().y()].concat(),
    }
}

/// Non-cryptographic digest of `data` stretched to `len` bytes.
pub(crate) fn symbolic_digest(data: &[u8], len: usize) -> Vec<u8> {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut state = data.iter().fold(FNV_OFFSET, |state, byte| {
        (state ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    });

    (0..len)
        .map(|index| {
            state = (state ^ index as u64).wrapping_mul(FNV_PRIME);
            (state >> 32) as u8
        })
        .collect()
}

fn xor_stream(key: &[u8], iv: &[u8], data: &[u8]) -> Vec<u8> {
    let stream = symbolic_digest(&[key, iv].concat(), data.len());
    data.iter().zip(stream).map(|(byte, mask)| byte ^ mask).collect()
}

fn content_tag(
    algorithm: ContentEncryptionAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Vec<u8> {
    let input = [algorithm.name().as_bytes(), cek, iv, aad, ciphertext].join(&0u8);
    symbolic_digest(&input, algorithm.tag_len())
}

const WRAP_CHECK_LEN: usize = 8;

impl CryptoProvider for SymbolicProvider {
    fn sign(
        &self,
        algorithm: JwsAlgorithm,
        key: &Key,
        message: &[u8],
    ) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(&SymbolicSignature {
            algorithm: algorithm.name().into(),
            message: message.into(),
            key: key_identity(key).into(),
        })?)
    }

    fn verify(
        &self,
        algorithm: JwsAlgorithm,
        key: &Key,
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool, BoxError> {
        let Ok(signature) = serde_json::from_slice::<SymbolicSignature>(signature) else {
            return Ok(false);
        };
        Ok(signature
            == SymbolicSignature {
                algorithm: algorithm.name().into(),
                message: message.into(),
                key: key_identity(key).into(),
            })
    }

    fn encrypt(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<EncryptedContent, BoxError> {
        let ciphertext = xor_stream(cek, iv, plaintext);
        let tag = content_tag(algorithm, cek, iv, aad, &ciphertext);
        Ok(EncryptedContent { ciphertext, tag })
    }

    fn decrypt(
        &self,
        algorithm: ContentEncryptionAlgorithm,
        cek: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, BoxError> {
        if content_tag(algorithm, cek, iv, aad, ciphertext) != tag {
            return Err("symbolic tag mismatch".into());
        }
        Ok(xor_stream(cek, iv, ciphertext))
    }

    fn wrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        cek: &[u8],
    ) -> Result<Vec<u8>, BoxError> {
        let kek = [algorithm.name().as_bytes(), key_identity(key).as_slice()].concat();
        let mut wrapped = symbolic_digest(&[kek.as_slice(), cek].concat(), WRAP_CHECK_LEN);
        wrapped.extend(xor_stream(&kek, &[], cek));
        Ok(wrapped)
    }

    fn unwrap_key(
        &self,
        algorithm: KeyManagementAlgorithm,
        key: &Key,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>, BoxError> {
        if encrypted_key.len() < WRAP_CHECK_LEN {
            return Err("symbolic wrapped key too short".into());
        }
        let (check, wrapped) = encrypted_key.split_at(WRAP_CHECK_LEN);
        let kek = [algorithm.name().as_bytes(), key_identity(key).as_slice()].concat();
        let cek = xor_stream(&kek, &[], wrapped);
        if symbolic_digest(&[kek.as_slice(), cek.as_slice()].concat(), WRAP_CHECK_LEN) != check {
            return Err("symbolic integrity check failed".into());
        }
        Ok(cek)
    }

    fn derive_shared_secret(
        &self,
        private_key: &EcPrivateKey,
        public_key: &EcPublicKey,
    ) -> Result<Vec<u8>, BoxError> {
        // `x` of a symbolic key is its private scalar
        Ok(private_key
            .d()
            .iter()
            .zip(public_key.x())
            .map(|(d, x)| d ^ x)
            .collect())
    }

    fn generate_ec_key(&self, curve: Curve) -> Result<EcKeyComponents, BoxError> {
        let mut d = self.random_bytes(curve.coordinate_len())?;
        d[0] |= 1;
        Ok(symbolic_ec_components(curve, d))
    }

    fn digest(&self, hash: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, BoxError> {
        Ok(symbolic_digest(data, hash.output_len()))
    }

    fn pbkdf2(
        &self,
        hash: HashAlgorithm,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        len: usize,
    ) -> Result<Vec<u8>, BoxError> {
        let input = [
            hash.to_string().as_bytes(),
            password,
            salt,
            &iterations.to_be_bytes()[..],
        ]
        .join(&0u8);
        Ok(symbolic_digest(&input, len))
    }

    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, BoxError> {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(symbolic_digest(&counter.to_be_bytes(), len))
    }

    fn is_on_curve(&self, _curve: Curve, x: &[u8], y: &[u8]) -> Result<bool, BoxError> {
        let non_zero = |value: &[u8]| value.iter().any(|byte| *byte != 0);
        Ok(non_zero(x) && non_zero(y))
    }
}

/// Components of the symbolic key pair with the private scalar `d`.
pub(crate) fn symbolic_ec_components(curve: Curve, d: Vec<u8>) -> EcKeyComponents {
    EcKeyComponents {
        x: d.clone(),
        y: vec![0xEC; curve.coordinate_len()],
        d,
    }
}
