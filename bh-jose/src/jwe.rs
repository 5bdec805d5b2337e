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

use std::io::{Read as _, Write as _};

use bherror::{traits::ForeignError as _, Error};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    base64_url_encode,
    kdf::{concat_kdf, pbes2_salt},
    AlgorithmRegistry, CompressionAlgorithm, ContentEncryptionAlgorithm, Header, JoseError, Jwk,
    Key, KeyManagementAlgorithm, KeyManagementMode, Result,
};

/// Default PBES2 iteration count, following the OWASP recommendation for
/// PBKDF2-HMAC-SHA256.
pub const DEFAULT_PBES2_ITERATIONS: u32 = 310_000;

/// Default upper bound of the PBES2 iteration count accepted when
/// decrypting.
pub const DEFAULT_MAX_PBES2_ITERATIONS: u32 = 1_000_000;

/// Default upper bound of the decompressed plaintext length, in bytes.
pub const DEFAULT_MAX_DECOMPRESSED_LEN: usize = 10 * 1024 * 1024;

const PBES2_SALT_LEN: usize = 16;

/// Options of the [`Jwe`] engine.
///
/// Deserializable, so that it can be embedded into the configuration of an
/// application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JweOptions {
    /// Extension header parameters the caller processes, which may therefore
    /// appear in `"crit"`.
    pub understood_critical: Vec<String>,
    /// PBES2 iteration count used when encrypting, unless the header already
    /// carries `"p2c"`.
    pub pbes2_iterations: u32,
    /// Largest PBES2 iteration count accepted when decrypting.
    pub max_pbes2_iterations: u32,
    /// Largest accepted length of a decompressed plaintext.
    pub max_decompressed_len: usize,
}

impl Default for JweOptions {
    fn default() -> Self {
        Self {
            understood_critical: Vec::new(),
            pbes2_iterations: DEFAULT_PBES2_ITERATIONS,
            max_pbes2_iterations: DEFAULT_MAX_PBES2_ITERATIONS,
            max_decompressed_len: DEFAULT_MAX_DECOMPRESSED_LEN,
        }
    }
}

/// A recipient of a JWE being encrypted.
#[derive(Debug, Clone)]
pub struct Recipient<'a> {
    header: Option<Header>,
    key: &'a Key,
}

impl<'a> Recipient<'a> {
    /// Recipient using `key`, whose parameters all come from the shared
    /// headers.
    pub fn new(key: &'a Key) -> Self {
        Self { header: None, key }
    }

    /// Set the per-recipient unprotected header, only representable in the
    /// general JSON serialization.
    pub fn with_header(self, header: Header) -> Self {
        Self {
            header: Some(header),
            ..self
        }
    }
}

/// One recipient of a [`JweObject`]: its unprotected header and the
/// encrypted content encryption key.
#[derive(Debug, Clone, PartialEq)]
pub struct JweRecipient {
    header: Option<Header>,
    encrypted_key: Vec<u8>,
}

impl JweRecipient {
    pub(crate) fn new(header: Option<Header>, encrypted_key: Vec<u8>) -> Self {
        Self {
            header,
            encrypted_key,
        }
    }

    /// The per-recipient unprotected header.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// The encrypted content encryption key, empty for the direct key
    /// management modes.
    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }
}

/// An encrypted JWE.
#[derive(Debug, Clone, PartialEq)]
pub struct JweObject {
    protected: Header,
    shared_unprotected: Option<Header>,
    recipients: Vec<JweRecipient>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
    aad: Option<Vec<u8>>,
}

/// Parts of a [`JweObject`], used by the serializations to assemble one.
pub(crate) struct JweParts {
    pub(crate) protected: Header,
    pub(crate) shared_unprotected: Option<Header>,
    pub(crate) recipients: Vec<JweRecipient>,
    pub(crate) iv: Vec<u8>,
    pub(crate) ciphertext: Vec<u8>,
    pub(crate) tag: Vec<u8>,
    pub(crate) aad: Option<Vec<u8>>,
}

impl From<JweParts> for JweObject {
    fn from(parts: JweParts) -> Self {
        Self {
            protected: parts.protected,
            shared_unprotected: parts.shared_unprotected,
            recipients: parts.recipients,
            iv: parts.iv,
            ciphertext: parts.ciphertext,
            tag: parts.tag,
            aad: parts.aad,
        }
    }
}

impl JweObject {
    /// The integrity protected header.
    pub fn protected(&self) -> &Header {
        &self.protected
    }

    /// The unprotected header shared by all recipients.
    pub fn shared_unprotected(&self) -> Option<&Header> {
        self.shared_unprotected.as_ref()
    }

    /// The recipients, never empty.
    pub fn recipients(&self) -> &[JweRecipient] {
        &self.recipients
    }

    /// The initialization vector.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// The ciphertext.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// The authentication tag.
    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    /// The additional authenticated data supplied by the caller, only
    /// representable in the JSON serializations.
    pub fn aad(&self) -> Option<&[u8]> {
        self.aad.as_deref()
    }

    /// The union of the protected, shared unprotected and per-recipient
    /// headers of `recipient`.
    pub fn joint_header(&self, recipient: &JweRecipient) -> Result<Header> {
        Header::joint(
            std::iter::once(&self.protected)
                .chain(self.shared_unprotected.as_ref())
                .chain(recipient.header.as_ref()),
        )
    }
}

/// The additional authenticated data of the content encryption:
/// `ASCII(BASE64URL(protected))`, followed by `'.' || BASE64URL(aad)` when
/// the caller supplied additional data.
pub(crate) fn authenticated_data(protected: &Header, aad: Option<&[u8]>) -> Vec<u8> {
    let mut data = protected.encoded().into_bytes();
    if let Some(aad) = aad {
        data.push(b'.');
        data.extend_from_slice(base64_url_encode(aad).as_bytes());
    }
    data
}

/// Header parameters produced by the key management of one recipient.
#[derive(Default)]
struct KeyManagementParameters {
    ephemeral_public_key: Option<Jwk>,
    pbes2_salt: Option<Vec<u8>>,
    pbes2_count: Option<u32>,
}

impl KeyManagementParameters {
    fn is_empty(&self) -> bool {
        self.ephemeral_public_key.is_none()
            && self.pbes2_salt.is_none()
            && self.pbes2_count.is_none()
    }

    fn apply(self, mut header: Header) -> Result<Header> {
        if let Some(epk) = self.ephemeral_public_key {
            header = header.with_parameter("epk", Value::Object(epk))?;
        }
        if let Some(p2s) = self.pbes2_salt {
            header = header.with_parameter("p2s", base64_url_encode(p2s))?;
        }
        if let Some(p2c) = self.pbes2_count {
            header = header.with_parameter("p2c", p2c)?;
        }
        Ok(header)
    }
}

/// Algorithms of one recipient, resolved from its joint header.
struct ResolvedRecipient {
    joint: Header,
    algorithm: KeyManagementAlgorithm,
    encryption: ContentEncryptionAlgorithm,
}

fn decryption_failed() -> Error<JoseError> {
    Error::root(JoseError::DecryptionFailed)
}

/// JSON Web Encryption engine, as defined in [RFC7516].
///
/// Every cryptographic operation goes through the [`AlgorithmRegistry`]; the
/// engine composes the key management, the content encryption and the
/// additional authenticated data.
///
/// Decryption never releases plaintext unless the authentication tag
/// verifies, and reports every cryptographic failure as a single
/// [`JoseError::DecryptionFailed`].
///
/// [RFC7516]: https://www.rfc-editor.org/rfc/rfc7516.html
#[derive(Debug)]
pub struct Jwe<'r> {
    registry: &'r AlgorithmRegistry,
    options: JweOptions,
}

impl<'r> Jwe<'r> {
    /// Construct an engine with the default [`JweOptions`].
    pub fn new(registry: &'r AlgorithmRegistry) -> Self {
        Self::with_options(registry, JweOptions::default())
    }

    /// Construct an engine with the given options.
    pub fn with_options(registry: &'r AlgorithmRegistry, options: JweOptions) -> Self {
        Self { registry, options }
    }

    /// The options of the engine.
    pub fn options(&self) -> &JweOptions {
        &self.options
    }

    /// Encrypt `plaintext` to a single recipient.
    ///
    /// Header parameters produced by the key management (`"epk"`, `"p2s"`,
    /// `"p2c"`) are added to the protected header.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] or
    /// [`JoseError::UnsupportedCriticalParameter`] if the header is invalid,
    /// [`JoseError::UnsupportedAlgorithm`] if `"alg"`, `"enc"` or `"zip"` is
    /// unknown, [`JoseError::KeyCapabilityMismatch`] if the key does not fit
    /// the algorithm, and [`JoseError::CryptographicOperationFailed`] if the
    /// provider fails.
    pub fn encrypt(&self, protected: &Header, plaintext: &[u8], key: &Key) -> Result<JweObject> {
        self.encrypt_for_recipients(protected, None, &[Recipient::new(key)], plaintext, None)
    }

    /// Encrypt `plaintext` to a single recipient, authenticating the
    /// additional data `aad` as well.
    ///
    /// The result is only representable in the JSON serializations.
    pub fn encrypt_with_aad(
        &self,
        protected: &Header,
        plaintext: &[u8],
        aad: &[u8],
        key: &Key,
    ) -> Result<JweObject> {
        self.encrypt_for_recipients(protected, None, &[Recipient::new(key)], plaintext, Some(aad))
    }

    /// Encrypt `plaintext` to any number of recipients sharing one content
    /// encryption key.
    ///
    /// All the recipients must agree on `"enc"`, and the direct key
    /// management modes (`"dir"`, `"ECDH-ES"`) are only allowed with a single
    /// recipient.
    ///
    /// # Errors
    ///
    /// Same as [`Jwe::encrypt`], and [`JoseError::MalformedHeader`] if the
    /// recipients can not share a content encryption key.
    pub fn encrypt_for_recipients(
        &self,
        protected: &Header,
        shared_unprotected: Option<&Header>,
        recipients: &[Recipient<'_>],
        plaintext: &[u8],
        aad: Option<&[u8]>,
    ) -> Result<JweObject> {
        if recipients.is_empty() {
            return Err(Error::root(JoseError::MalformedSerialization(
                "at least one recipient is required".to_owned(),
            )));
        }

        let resolved = recipients
            .iter()
            .map(|recipient| {
                self.resolve(protected, shared_unprotected, recipient.header.as_ref())
            })
            .collect::<Result<Vec<_>>>()?;

        let encryption = resolved[0].encryption;
        if resolved.iter().any(|r| r.encryption != encryption) {
            return Err(Error::root(JoseError::MalformedHeader(
                "all recipients must use the same \"enc\"".to_owned(),
            )));
        }
        if resolved.len() > 1 {
            if let Some(direct) = resolved.iter().find(|r| r.algorithm.is_direct()) {
                return Err(Error::root(JoseError::MalformedHeader(format!(
                    "{} can not be used with multiple recipients",
                    direct.algorithm
                ))));
            }
        }
        // `"zip"` is protected, hence the same for every recipient
        let compression = resolved
            .iter()
            .map(|r| self.compression(&r.joint, protected))
            .collect::<Result<Vec<_>>>()?
            .swap_remove(0);
        for (recipient, r) in recipients.iter().zip(&resolved) {
            r.algorithm
                .check_key(encryption, recipient.key, r.algorithm.producer_operation())?;
        }

        // parameters of a lone recipient without its own header are protected
        let into_protected = recipients.len() == 1 && recipients[0].header.is_none();
        let mut protected = protected.clone();
        let mut encrypted_recipients = Vec::with_capacity(recipients.len());

        let cek = if resolved[0].algorithm.is_direct() {
            let (cek, parameters) =
                self.direct_cek(&resolved[0], recipients[0].key)?;
            let header = if into_protected {
                protected = parameters.apply(protected)?;
                None
            } else {
                Some(parameters.apply(recipients[0].header.clone().unwrap_or_else(Header::empty))?)
            };
            encrypted_recipients.push(JweRecipient::new(header, Vec::new()));
            cek
        } else {
            let cek = self.registry.random_bytes(encryption.key_len())?;
            for (recipient, r) in recipients.iter().zip(&resolved) {
                let (encrypted_key, parameters) = self.encrypt_cek(r, recipient.key, &cek)?;
                let header = if into_protected {
                    protected = parameters.apply(protected)?;
                    None
                } else if parameters.is_empty() {
                    recipient.header.clone()
                } else {
                    Some(parameters.apply(recipient.header.clone().unwrap_or_else(Header::empty))?)
                };
                encrypted_recipients.push(JweRecipient::new(header, encrypted_key));
            }
            cek
        };

        let compressed;
        let plaintext = match compression {
            Some(CompressionAlgorithm::Deflate) => {
                compressed = deflate(plaintext)?;
                compressed.as_slice()
            }
            None => plaintext,
        };

        let iv = self.registry.random_bytes(encryption.iv_len())?;
        let content = self.registry.encrypt_content(
            encryption,
            &cek,
            &iv,
            &authenticated_data(&protected, aad),
            plaintext,
        )?;

        tracing::debug!(
            alg = %resolved[0].algorithm,
            enc = %encryption,
            recipients = recipients.len(),
            "JWE encrypted"
        );

        Ok(JweObject {
            protected,
            shared_unprotected: shared_unprotected.cloned(),
            recipients: encrypted_recipients,
            iv,
            ciphertext: content.ciphertext,
            tag: content.tag,
            aad: aad.map(<[u8]>::to_vec),
        })
    }

    /// Decrypt `object` with `key`, returning the plaintext.
    ///
    /// Every recipient whose algorithm fits the key is tried until one
    /// decrypts.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::DecryptionFailed`] for any cryptographic failure,
    /// without telling which step failed. Header errors are reported like in
    /// [`Jwe::encrypt`], and [`JoseError::KeyCapabilityMismatch`] is
    /// returned if no recipient uses an algorithm fitting the key.
    pub fn decrypt(&self, object: &JweObject, key: &Key) -> Result<Vec<u8>> {
        let mut attempted = false;

        for recipient in object.recipients() {
            let resolved = self.resolve(
                &object.protected,
                object.shared_unprotected.as_ref(),
                recipient.header.as_ref(),
            )?;
            let compression = self.compression(&resolved.joint, &object.protected)?;
            let (algorithm, encryption) = (resolved.algorithm, resolved.encryption);
            if algorithm
                .check_key(encryption, key, algorithm.consumer_operation())
                .is_err()
            {
                continue;
            }
            self.check_key_management_parameters(&resolved)?;
            attempted = true;

            // a failed unwrap continues with a random key, so that it is
            // indistinguishable from a failed tag check
            let cek = match self.decrypt_cek(&resolved, key, &recipient.encrypted_key) {
                Ok(cek) => cek,
                Err(_) => self
                    .registry
                    .random_bytes(encryption.key_len())
                    .map_err(|_| decryption_failed())?,
            };

            let Ok(plaintext) = self.registry.decrypt_content(
                encryption,
                &cek,
                &object.iv,
                &authenticated_data(&object.protected, object.aad()),
                &object.ciphertext,
                &object.tag,
            ) else {
                continue;
            };

            let plaintext = match compression {
                Some(CompressionAlgorithm::Deflate) => {
                    inflate(&plaintext, self.options.max_decompressed_len)
                        .map_err(|_| decryption_failed())?
                }
                None => plaintext,
            };

            tracing::debug!(alg = %algorithm, enc = %encryption, "JWE decrypted");
            return Ok(plaintext);
        }

        if !attempted {
            return Err(Error::root(JoseError::KeyCapabilityMismatch(format!(
                "no recipient uses an algorithm fitting the {} key",
                key.describe()
            ))));
        }

        tracing::debug!(recipients = object.recipients().len(), "JWE decryption failed");
        Err(decryption_failed())
    }

    /// Validate the joint header of one recipient and resolve its
    /// algorithms.
    fn resolve(
        &self,
        protected: &Header,
        shared_unprotected: Option<&Header>,
        recipient: Option<&Header>,
    ) -> Result<ResolvedRecipient> {
        let joint = Header::joint(
            std::iter::once(protected)
                .chain(shared_unprotected)
                .chain(recipient),
        )?;

        if shared_unprotected
            .into_iter()
            .chain(recipient)
            .any(|header| header.critical().is_some())
        {
            return Err(Error::root(JoseError::MalformedHeader(
                "\"crit\" must be integrity protected".to_owned(),
            )));
        }

        let understood: Vec<&str> = self
            .options
            .understood_critical
            .iter()
            .map(String::as_str)
            .collect();
        joint.validate(self.registry, &understood)?;

        let algorithm = self
            .registry
            .resolve_key_management(joint.algorithm().unwrap_or_default())?;
        let encryption = joint.encryption().ok_or_else(|| {
            Error::root(JoseError::MalformedHeader("\"enc\" is missing".to_owned()))
        })?;
        let encryption = self.registry.resolve_content_encryption(encryption)?;

        Ok(ResolvedRecipient {
            joint,
            algorithm,
            encryption,
        })
    }

    /// The compression algorithm of the joint header, which must be
    /// integrity protected.
    fn compression(
        &self,
        joint: &Header,
        protected: &Header,
    ) -> Result<Option<CompressionAlgorithm>> {
        let Some(zip) = &joint.parameters().compression else {
            return Ok(None);
        };
        if protected.parameters().compression.is_none() {
            return Err(Error::root(JoseError::MalformedHeader(
                "\"zip\" must be integrity protected".to_owned(),
            )));
        }
        zip.parse().map(Some)
    }

    /// Check that the header parameters required to recover the content
    /// encryption key are present.
    fn check_key_management_parameters(&self, resolved: &ResolvedRecipient) -> Result<()> {
        let parameters = resolved.joint.parameters();
        match resolved.algorithm.mode() {
            KeyManagementMode::DirectKeyAgreement
            | KeyManagementMode::KeyAgreementWithKeyWrapping => {
                if parameters.ephemeral_public_key.is_none() {
                    return Err(Error::root(JoseError::MalformedHeader(
                        "\"epk\" is missing".to_owned(),
                    )));
                }
            }
            KeyManagementMode::PasswordBased => {
                let (Some(_), Some(count)) = (&parameters.pbes2_salt, parameters.pbes2_count)
                else {
                    return Err(Error::root(JoseError::MalformedHeader(
                        "\"p2s\" and \"p2c\" are required".to_owned(),
                    )));
                };
                if count > self.options.max_pbes2_iterations {
                    return Err(Error::root(JoseError::MalformedHeader(format!(
                        "\"p2c\" exceeds the maximum of {}",
                        self.options.max_pbes2_iterations
                    ))));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Content encryption key of the direct key management modes.
    fn direct_cek(
        &self,
        resolved: &ResolvedRecipient,
        key: &Key,
    ) -> Result<(Vec<u8>, KeyManagementParameters)> {
        match key {
            Key::Symmetric(secret) if resolved.algorithm == KeyManagementAlgorithm::Dir => {
                Ok((secret.as_bytes().to_vec(), KeyManagementParameters::default()))
            }
            _ => self.agree_as_sender(
                &resolved.joint,
                key,
                resolved.encryption.name(),
                resolved.encryption.key_len(),
            ),
        }
    }

    /// Encrypt the content encryption key to one recipient.
    fn encrypt_cek(
        &self,
        resolved: &ResolvedRecipient,
        key: &Key,
        cek: &[u8],
    ) -> Result<(Vec<u8>, KeyManagementParameters)> {
        let algorithm = resolved.algorithm;
        match algorithm.mode() {
            KeyManagementMode::KeyEncryption | KeyManagementMode::KeyWrapping => {
                let encrypted_key = self.registry.wrap_key(algorithm, key, cek)?;
                Ok((encrypted_key, KeyManagementParameters::default()))
            }
            KeyManagementMode::KeyAgreementWithKeyWrapping => {
                let (kek, parameters) = self.agree_as_sender(
                    &resolved.joint,
                    key,
                    algorithm.name(),
                    self.key_wrap_len(algorithm)?,
                )?;
                Ok((self.wrap_with_kek(algorithm, kek, cek)?, parameters))
            }
            KeyManagementMode::PasswordBased => {
                let parameters = resolved.joint.parameters();
                let mut generated = KeyManagementParameters::default();

                let salt_input = match &parameters.pbes2_salt {
                    Some(salt_input) => salt_input.clone(),
                    None => {
                        let salt_input = self.registry.random_bytes(PBES2_SALT_LEN)?;
                        generated.pbes2_salt = Some(salt_input.clone());
                        salt_input
                    }
                };
                let count = match parameters.pbes2_count {
                    Some(count) => count,
                    None => {
                        generated.pbes2_count = Some(self.options.pbes2_iterations);
                        self.options.pbes2_iterations
                    }
                };

                let kek = self.pbes2_kek(algorithm, key, &salt_input, count)?;
                Ok((self.wrap_with_kek(algorithm, kek, cek)?, generated))
            }
            KeyManagementMode::DirectEncryption | KeyManagementMode::DirectKeyAgreement => {
                Err(Error::root(JoseError::UnsupportedAlgorithm(format!(
                    "{algorithm} does not encrypt the content encryption key"
                ))))
            }
        }
    }

    /// Recover the content encryption key of one recipient.
    fn decrypt_cek(
        &self,
        resolved: &ResolvedRecipient,
        key: &Key,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>> {
        let algorithm = resolved.algorithm;
        let encryption = resolved.encryption;
        let parameters = resolved.joint.parameters();

        if algorithm.is_direct() && !encrypted_key.is_empty() {
            return Err(decryption_failed());
        }

        let cek = match algorithm.mode() {
            KeyManagementMode::DirectEncryption => match key {
                Key::Symmetric(secret) => secret.as_bytes().to_vec(),
                _ => return Err(decryption_failed()),
            },
            KeyManagementMode::KeyEncryption | KeyManagementMode::KeyWrapping => {
                self.registry.unwrap_key(algorithm, key, encrypted_key)?
            }
            KeyManagementMode::DirectKeyAgreement => self.agree_as_recipient(
                &resolved.joint,
                key,
                encryption.name(),
                encryption.key_len(),
            )?,
            KeyManagementMode::KeyAgreementWithKeyWrapping => {
                let kek = self.agree_as_recipient(
                    &resolved.joint,
                    key,
                    algorithm.name(),
                    self.key_wrap_len(algorithm)?,
                )?;
                self.unwrap_with_kek(algorithm, kek, encrypted_key)?
            }
            KeyManagementMode::PasswordBased => {
                let (Some(salt_input), Some(count)) =
                    (&parameters.pbes2_salt, parameters.pbes2_count)
                else {
                    return Err(decryption_failed());
                };
                let kek = self.pbes2_kek(algorithm, key, salt_input, count)?;
                self.unwrap_with_kek(algorithm, kek, encrypted_key)?
            }
        };

        if cek.len() != encryption.key_len() {
            return Err(decryption_failed());
        }
        Ok(cek)
    }

    /// ECDH-ES on the sender side: generate an ephemeral key pair on the
    /// curve of the recipient key and derive `len` bytes.
    fn agree_as_sender(
        &self,
        joint: &Header,
        recipient_key: &Key,
        algorithm_id: &str,
        len: usize,
    ) -> Result<(Vec<u8>, KeyManagementParameters)> {
        let curve = recipient_key.curve().ok_or_else(|| {
            Error::root(JoseError::KeyCapabilityMismatch(format!(
                "key agreement requires an EC key, got {} key",
                recipient_key.describe()
            )))
        })?;

        let ephemeral = self.registry.generate_ec_key(curve)?;
        let shared_secret = self.registry.derive_shared_secret(&ephemeral, recipient_key)?;
        let derived = self.concat_kdf(joint, &shared_secret, algorithm_id, len)?;

        let parameters = KeyManagementParameters {
            ephemeral_public_key: ephemeral.to_public_jwk(),
            ..Default::default()
        };
        Ok((derived, parameters))
    }

    /// ECDH-ES on the recipient side, with the ephemeral public key of the
    /// `"epk"` header parameter.
    fn agree_as_recipient(
        &self,
        joint: &Header,
        key: &Key,
        algorithm_id: &str,
        len: usize,
    ) -> Result<Vec<u8>> {
        let epk = joint
            .parameters()
            .ephemeral_public_key
            .as_ref()
            .ok_or_else(decryption_failed)?;
        let ephemeral = Key::from_jwk(self.registry, epk)?;
        let shared_secret = self.registry.derive_shared_secret(key, &ephemeral)?;
        self.concat_kdf(joint, &shared_secret, algorithm_id, len)
    }

    fn concat_kdf(
        &self,
        joint: &Header,
        shared_secret: &[u8],
        algorithm_id: &str,
        len: usize,
    ) -> Result<Vec<u8>> {
        let parameters = joint.parameters();
        concat_kdf(
            self.registry,
            shared_secret,
            algorithm_id,
            parameters.agreement_party_u_info.as_deref().unwrap_or_default(),
            parameters.agreement_party_v_info.as_deref().unwrap_or_default(),
            len,
        )
    }

    fn pbes2_kek(
        &self,
        algorithm: KeyManagementAlgorithm,
        password: &Key,
        salt_input: &[u8],
        count: u32,
    ) -> Result<Vec<u8>> {
        let (Key::Symmetric(password), Some(hash)) = (password, algorithm.pbes2_hash()) else {
            return Err(Error::root(JoseError::KeyCapabilityMismatch(format!(
                "{algorithm} requires a password"
            ))));
        };
        self.registry.pbkdf2(
            hash,
            password.as_bytes(),
            &pbes2_salt(algorithm.name(), salt_input),
            count,
            self.key_wrap_len(algorithm)?,
        )
    }

    fn key_wrap_len(&self, algorithm: KeyManagementAlgorithm) -> Result<usize> {
        algorithm.key_wrap_len().ok_or_else(|| {
            Error::root(JoseError::UnsupportedAlgorithm(format!(
                "{algorithm} does not wrap the content encryption key"
            )))
        })
    }

    fn wrap_with_kek(
        &self,
        algorithm: KeyManagementAlgorithm,
        kek: Vec<u8>,
        cek: &[u8],
    ) -> Result<Vec<u8>> {
        let (Some(wrap_algorithm), kek) = (algorithm.key_wrap_algorithm(), Key::symmetric(kek)?)
        else {
            return Err(Error::root(JoseError::UnsupportedAlgorithm(algorithm.to_string())));
        };
        self.registry.wrap_key(wrap_algorithm, &kek, cek)
    }

    fn unwrap_with_kek(
        &self,
        algorithm: KeyManagementAlgorithm,
        kek: Vec<u8>,
        encrypted_key: &[u8],
    ) -> Result<Vec<u8>> {
        let (Some(wrap_algorithm), kek) = (algorithm.key_wrap_algorithm(), Key::symmetric(kek)?)
        else {
            return Err(Error::root(JoseError::UnsupportedAlgorithm(algorithm.to_string())));
        };
        self.registry.unwrap_key(wrap_algorithm, &kek, encrypted_key)
    }
}

/// Compress `data` using raw `DEFLATE`, see [RFC1951].
///
/// [RFC1951]: https://www.rfc-editor.org/rfc/rfc1951.html
fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let compress = || -> std::io::Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()
    };
    compress().foreign_err(|| {
        JoseError::CryptographicOperationFailed("plaintext compression failed".to_owned())
    })
}

/// Decompress raw `DEFLATE` data, failing if the result exceeds `max_len`
/// bytes.
fn inflate(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    DeflateDecoder::new(data)
        .take((max_len as u64).saturating_add(1))
        .read_to_end(&mut decompressed)
        .foreign_err(|| JoseError::DecryptionFailed)?;
    if decompressed.len() > max_len {
        return Err(decryption_failed());
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        test_utils::{symbolic_ec_private_key, symbolic_registry, symbolic_rsa_key_pair},
        Curve,
    };

    const PLAINTEXT: &[u8] = b"Live long and prosper.";

    fn fast_pbes2() -> JweOptions {
        JweOptions {
            pbes2_iterations: 1000,
            ..Default::default()
        }
    }

    /// Key pairs `(sender key, recipient key)` for every key management
    /// algorithm used together with `enc`.
    fn key_pairs(
        registry: &AlgorithmRegistry,
        enc: ContentEncryptionAlgorithm,
    ) -> Vec<(KeyManagementAlgorithm, Key, Key)> {
        use KeyManagementAlgorithm::*;

        let (rsa_private, rsa_public) = symbolic_rsa_key_pair();
        let ec_private = symbolic_ec_private_key(registry, Curve::P384, 11);
        let ec_public = ec_private.to_public().unwrap();
        let symmetric = |len: usize| Key::symmetric(vec![0x33; len]).unwrap();
        let password =
            Key::symmetric(b"Thus from my lips, by yours, my sin is purged.".to_vec()).unwrap();

        let mut pairs = vec![
            (Dir, symmetric(enc.key_len()), symmetric(enc.key_len())),
            (A128Kw, symmetric(16), symmetric(16)),
            (A192Kw, symmetric(24), symmetric(24)),
            (A256Kw, symmetric(32), symmetric(32)),
            (Pbes2Hs256A128Kw, password.clone(), password.clone()),
            (Pbes2Hs384A192Kw, password.clone(), password.clone()),
            (Pbes2Hs512A256Kw, password.clone(), password),
        ];
        for alg in [Rsa1_5, RsaOaep, RsaOaep256] {
            pairs.push((alg, rsa_public.clone(), rsa_private.clone()));
        }
        for alg in [EcdhEs, EcdhEsA128Kw, EcdhEsA192Kw, EcdhEsA256Kw] {
            pairs.push((alg, ec_public.clone(), ec_private.clone()));
        }
        pairs
    }

    #[test]
    fn encrypt_then_decrypt_every_algorithm() {
        let registry = symbolic_registry();
        let jwe = Jwe::with_options(&registry, fast_pbes2());

        for enc in ContentEncryptionAlgorithm::ALL {
            for (alg, sender, recipient) in key_pairs(&registry, *enc) {
                let header = Header::jwe(alg, *enc);
                let object = jwe.encrypt(&header, PLAINTEXT, &sender).unwrap();

                assert_eq!(object.iv().len(), enc.iv_len(), "{alg} {enc}");
                assert_eq!(object.tag().len(), enc.tag_len(), "{alg} {enc}");
                assert_eq!(
                    object.recipients()[0].encrypted_key().is_empty(),
                    alg.is_direct(),
                    "{alg} {enc}"
                );
                assert_eq!(jwe.decrypt(&object, &recipient).unwrap(), PLAINTEXT, "{alg} {enc}");
            }
        }
    }

    #[test]
    fn key_management_parameters_are_protected() {
        let registry = symbolic_registry();
        let jwe = Jwe::with_options(&registry, fast_pbes2());

        let recipient = symbolic_ec_private_key(&registry, Curve::P256, 5);
        let header =
            Header::jwe(KeyManagementAlgorithm::EcdhEs, ContentEncryptionAlgorithm::A128Gcm)
                .with_agreement_party_info(Some(&b"Alice"[..]), Some(&b"Bob"[..]));
            let object = jwe
            .encrypt(&header, PLAINTEXT, &recipient.to_public().unwrap())
            .unwrap();

        let epk = object.protected().parameters().ephemeral_public_key.as_ref().unwrap();
        assert_eq!(epk["crv"], "P-256");
        assert!(!epk.contains_key("d"));
        assert_eq!(jwe.decrypt(&object, &recipient).unwrap(), PLAINTEXT);

        let password =
            Key::symmetric(b"entrap_o\xe2\x80\x93peter_long\xe2\x80\x93credit_tun".to_vec())
                .unwrap();
        let header = Header::jwe(
            KeyManagementAlgorithm::Pbes2Hs256A128Kw,
            ContentEncryptionAlgorithm::A128CbcHs256,
        );
        let object = jwe.encrypt(&header, PLAINTEXT, &password).unwrap();

        let parameters = object.protected().parameters();
        assert_eq!(parameters.pbes2_salt.as_ref().map(Vec::len), Some(16));
        assert_eq!(parameters.pbes2_count, Some(1000));
    }

    #[test]
    fn caller_supplied_pbes2_parameters_are_used() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let password = Key::symmetric(b"password".to_vec()).unwrap();

        let header = Header::jwe(
            KeyManagementAlgorithm::Pbes2Hs512A256Kw,
            ContentEncryptionAlgorithm::A256Gcm,
        )
        .with_parameter("p2s", "8Q1SzinasR3xchYz6ZZcHA")
        .unwrap()
        .with_parameter("p2c", 8192)
        .unwrap();
            let object = jwe.encrypt(&header, PLAINTEXT, &password).unwrap();

        assert_eq!(object.protected(), &header);
        assert_eq!(jwe.decrypt(&object, &password).unwrap(), PLAINTEXT);
    }

    #[test]
    fn pbes2_iteration_count_is_bounded() {
        let registry = symbolic_registry();
        let password = Key::symmetric(b"password".to_vec()).unwrap();
        let header = Header::jwe(
            KeyManagementAlgorithm::Pbes2Hs256A128Kw,
            ContentEncryptionAlgorithm::A128Gcm,
        );

        let object = Jwe::with_options(
            &registry,
            JweOptions {
                pbes2_iterations: 5000,
                ..Default::default()
            },
        )
        .encrypt(&header, PLAINTEXT, &password)
        .unwrap();

        let strict = Jwe::with_options(
            &registry,
            JweOptions {
                max_pbes2_iterations: 4999,
                ..Default::default()
            },
        );
        let err = strict.decrypt(&object, &password).unwrap_err();
        assert_matches!(err.error, JoseError::MalformedHeader(_));
    }

    #[test]
    fn tampering_fails_with_decryption_failed() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let key = Key::symmetric(vec![7; 16]).unwrap();
        let header = Header::jwe(
            KeyManagementAlgorithm::A128Kw,
            ContentEncryptionAlgorithm::A128CbcHs256,
        );
        let object = jwe.encrypt_with_aad(&header, PLAINTEXT, b"additional", &key).unwrap();
        assert_eq!(jwe.decrypt(&object, &key).unwrap(), PLAINTEXT);

        let mut tampered = Vec::new();

        let mut object_tag = object.clone();
        object_tag.tag[0] ^= 1;
        tampered.push(object_tag);

        let mut object_ciphertext = object.clone();
        object_ciphertext.ciphertext[3] ^= 0x80;
        tampered.push(object_ciphertext);

        let mut object_iv = object.clone();
        object_iv.iv[0] ^= 1;
        tampered.push(object_iv);

        let mut object_aad = object.clone();
        object_aad.aad = Some(b"Additional".to_vec());
        tampered.push(object_aad);

        let mut object_header = object.clone();
        object_header.protected = header.clone().with_key_id("other");
        tampered.push(object_header);

        let mut object_key = object.clone();
        object_key.recipients[0].encrypted_key[9] ^= 1;
        tampered.push(object_key);

        for object in tampered {
            assert_eq!(jwe.decrypt(&object, &key).unwrap_err().error, JoseError::DecryptionFailed);
        }

        let wrong_key = Key::symmetric(vec![8; 16]).unwrap();
        assert_eq!(
            jwe.decrypt(&object, &wrong_key).unwrap_err().error,
            JoseError::DecryptionFailed
        );
    }

    #[test]
    fn direct_modes_reject_an_encrypted_key() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let key = Key::symmetric(vec![7; 32]).unwrap();
        let object = jwe
            .encrypt(
                &Header::jwe(KeyManagementAlgorithm::Dir, ContentEncryptionAlgorithm::A256Gcm),
                PLAINTEXT,
                &key,
            )
            .unwrap();

        let mut tampered = object.clone();
        tampered.recipients[0].encrypted_key = vec![1, 2, 3];
        assert_eq!(jwe.decrypt(&tampered, &key).unwrap_err().error, JoseError::DecryptionFailed);
    }

    #[test]
    fn compressed_plaintext() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let key = Key::symmetric(vec![7; 32]).unwrap();
        let plaintext = b"You can trust us to stick with you through thick and thin".repeat(20);

        let header =
            Header::jwe(KeyManagementAlgorithm::A256Kw, ContentEncryptionAlgorithm::A128Gcm)
                .with_compression(CompressionAlgorithm::Deflate);
            let object = jwe.encrypt(&header, &plaintext, &key).unwrap();

        assert!(object.ciphertext().len() < plaintext.len());
        assert_eq!(jwe.decrypt(&object, &key).unwrap(), plaintext);

        let limited = Jwe::with_options(
            &registry,
            JweOptions {
                max_decompressed_len: plaintext.len() - 1,
                ..Default::default()
            },
        );
        assert_eq!(
            limited.decrypt(&object, &key).unwrap_err().error,
            JoseError::DecryptionFailed
        );
    }

    #[test]
    fn unbounded_decompression_keeps_the_plaintext() {
        let registry = symbolic_registry();
        let key = Key::symmetric(vec![7; 32]).unwrap();
        let header =
            Header::jwe(KeyManagementAlgorithm::A256Kw, ContentEncryptionAlgorithm::A128Gcm)
                .with_compression(CompressionAlgorithm::Deflate);
        let object = Jwe::new(&registry)
            .encrypt(&header, b"hello hello hello", &key)
            .unwrap();

        let unbounded = Jwe::with_options(
            &registry,
            JweOptions {
                max_decompressed_len: usize::MAX,
                ..Default::default()
            },
        );
        assert_eq!(unbounded.decrypt(&object, &key).unwrap(), b"hello hello hello");
    }

    #[test]
    fn compression_must_be_protected() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let key = Key::symmetric(vec![7; 32]).unwrap();

        let shared = Header::empty().with_compression(CompressionAlgorithm::Deflate);
        let err = jwe
            .encrypt_for_recipients(
                &Header::jwe(KeyManagementAlgorithm::A256Kw, ContentEncryptionAlgorithm::A128Gcm),
                Some(&shared),
                &[Recipient::new(&key)],
                PLAINTEXT,
                None,
            )
            .unwrap_err();
        assert_matches!(err.error, JoseError::MalformedHeader(_));
    }

    #[test]
    fn multiple_recipients_share_the_content_key() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let (rsa_private, rsa_public) = symbolic_rsa_key_pair();
        let aes = Key::symmetric(vec![0x21; 16]).unwrap();
        let ec_private = symbolic_ec_private_key(&registry, Curve::P521, 3);
        let ec_public = ec_private.to_public().unwrap();

        let protected = Header::empty().with_parameter("enc", "A128CBC-HS256").unwrap();
        let shared = Header::empty()
            .with_parameter("jku", "https://server.example.com/keys.jwks")
            .unwrap();
        let recipients = [
            Recipient::new(&rsa_public).with_header(
                Header::empty().with_parameter("alg", "RSA-OAEP-256").unwrap().with_key_id("rsa"),
            ),
            Recipient::new(&aes)
                .with_header(Header::empty().with_parameter("alg", "A128KW").unwrap()),
            Recipient::new(&ec_public).with_header(
                Header::empty().with_parameter("alg", "ECDH-ES+A256KW").unwrap(),
            ),
        ];

        let object = jwe
            .encrypt_for_recipients(&protected, Some(&shared), &recipients, PLAINTEXT, None)
            .unwrap();

        assert_eq!(object.recipients().len(), 3);
        // the ephemeral key of a recipient goes into its own header
        assert!(object.recipients()[2]
            .header()
            .unwrap()
            .parameters()
            .ephemeral_public_key
            .is_some());
        assert!(object.protected().parameters().ephemeral_public_key.is_none());

        assert_eq!(jwe.decrypt(&object, &rsa_private).unwrap(), PLAINTEXT);
        assert_eq!(jwe.decrypt(&object, &aes).unwrap(), PLAINTEXT);
        assert_eq!(jwe.decrypt(&object, &ec_private).unwrap(), PLAINTEXT);

        let joint = object.joint_header(&object.recipients()[0]).unwrap();
        assert_eq!(joint.key_id(), Some("rsa"));
        assert_eq!(joint.encryption(), Some("A128CBC-HS256"));
    }

    #[test]
    fn multiple_recipients_restrictions() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let key = Key::symmetric(vec![0x21; 32]).unwrap();
        let with_alg = |alg: &str| Header::empty().with_parameter("alg", alg).unwrap();

        let protected = Header::empty().with_parameter("enc", "A256GCM").unwrap();
        let recipients = [
            Recipient::new(&key).with_header(with_alg("dir")),
            Recipient::new(&key).with_header(with_alg("A256KW")),
        ];
        let err = jwe
            .encrypt_for_recipients(&protected, None, &recipients, PLAINTEXT, None)
            .unwrap_err();
        assert_matches!(err.error, JoseError::MalformedHeader(_));

        let recipients = [
            Recipient::new(&key)
                .with_header(with_alg("A256KW").with_parameter("enc", "A256GCM").unwrap()),
            Recipient::new(&key)
                .with_header(with_alg("A256KW").with_parameter("enc", "A128GCM").unwrap()),
        ];
        let err = jwe
            .encrypt_for_recipients(&Header::empty(), None, &recipients, PLAINTEXT, None)
            .unwrap_err();
        assert_matches!(err.error, JoseError::MalformedHeader(_));

        let err = jwe
            .encrypt_for_recipients(&protected, None, &[], PLAINTEXT, None)
            .unwrap_err();
        assert_matches!(err.error, JoseError::MalformedSerialization(_));
    }

    #[test]
    fn header_errors_are_specific() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let key = Key::symmetric(vec![0x21; 16]).unwrap();

        let header = Header::empty().with_parameter("alg", "A128KW").unwrap();
        let err = jwe.encrypt(&header, PLAINTEXT, &key).unwrap_err();
        assert_eq!(err.error, JoseError::MalformedHeader("\"enc\" is missing".to_owned()));

        let header = Header::empty()
            .with_parameter("alg", "A128KW")
            .unwrap()
            .with_parameter("enc", "A128CTR")
            .unwrap();
        let err = jwe.encrypt(&header, PLAINTEXT, &key).unwrap_err();
        assert_eq!(err.error, JoseError::UnsupportedAlgorithm("A128CTR".to_owned()));

        let header = Header::empty()
            .with_parameter("alg", "HS256")
            .unwrap()
            .with_parameter("enc", "A128GCM")
            .unwrap();
        let err = jwe.encrypt(&header, PLAINTEXT, &key).unwrap_err();
        assert_eq!(err.error, JoseError::UnsupportedAlgorithm("HS256".to_owned()));

        let header =
            Header::jwe(KeyManagementAlgorithm::A128Kw, ContentEncryptionAlgorithm::A128Gcm)
                .with_parameter("exp", 1363284000)
                .unwrap()
                .with_critical(["exp"]);
            let err = jwe.encrypt(&header, PLAINTEXT, &key).unwrap_err();
        assert_eq!(err.error, JoseError::UnsupportedCriticalParameter("exp".to_owned()));

        let understanding = Jwe::with_options(
            &registry,
            JweOptions {
                understood_critical: vec!["exp".to_owned()],
                ..Default::default()
            },
        );
        let object = understanding.encrypt(&header, PLAINTEXT, &key).unwrap();
        assert_eq!(understanding.decrypt(&object, &key).unwrap(), PLAINTEXT);
        assert_eq!(
            jwe.decrypt(&object, &key).unwrap_err().error,
            JoseError::UnsupportedCriticalParameter("exp".to_owned())
        );
    }

    #[test]
    fn key_capability_is_checked() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let (rsa_private, rsa_public) = symbolic_rsa_key_pair();
        let header = Header::jwe(
            KeyManagementAlgorithm::RsaOaep,
            ContentEncryptionAlgorithm::A256Gcm,
        );

        // wrapping needs the public key, unwrapping the private one
        let err = jwe.encrypt(&header, PLAINTEXT, &rsa_private).unwrap_err();
        assert_matches!(err.error, JoseError::KeyCapabilityMismatch(_));

        let object = jwe.encrypt(&header, PLAINTEXT, &rsa_public).unwrap();
        let err = jwe.decrypt(&object, &rsa_public).unwrap_err();
        assert_matches!(err.error, JoseError::KeyCapabilityMismatch(_));

        let err = jwe
            .encrypt(
                &Header::jwe(KeyManagementAlgorithm::Dir, ContentEncryptionAlgorithm::A256Gcm),
                PLAINTEXT,
                &Key::symmetric(vec![1; 16]).unwrap(),
            )
            .unwrap_err();
        assert_matches!(err.error, JoseError::KeyCapabilityMismatch(_));
    }

    #[test]
    fn missing_ephemeral_key_is_a_header_error() {
        let registry = symbolic_registry();
        let jwe = Jwe::new(&registry);
        let recipient = symbolic_ec_private_key(&registry, Curve::P256, 5);
        let header = Header::jwe(
            KeyManagementAlgorithm::EcdhEs,
            ContentEncryptionAlgorithm::A128Gcm,
        );
        let object = jwe.encrypt(&header, PLAINTEXT, &recipient.to_public().unwrap()).unwrap();

        let mut stripped = object.clone();
        stripped.protected = header;
        let err = jwe.decrypt(&stripped, &recipient).unwrap_err();
        assert_matches!(err.error, JoseError::MalformedHeader(_));
    }

    #[test]
    fn authenticated_data_layout() {
        let header = Header::from_bytes(br#"{"alg":"dir","enc":"A128GCM"}"#).unwrap();

        assert_eq!(
            authenticated_data(&header, None),
            b"eyJhbGciOiJkaXIiLCJlbmMiOiJBMTI4R0NNIn0"
        );
        assert_eq!(
            authenticated_data(&header, Some(b"aad")),
            b"eyJhbGciOiJkaXIiLCJlbmMiOiJBMTI4R0NNIn0.YWFk"
        );
    }

    #[test]
    fn options_deserialize_from_configuration() {
        let options: JweOptions =
            serde_json::from_str(r#"{"max_pbes2_iterations": 20000}"#).unwrap();

        assert_eq!(options.max_pbes2_iterations, 20000);
        assert_eq!(options.pbes2_iterations, DEFAULT_PBES2_ITERATIONS);
        assert_eq!(options.max_decompressed_len, DEFAULT_MAX_DECOMPRESSED_LEN);
    }
}
