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

use bherror::Error;
use serde::Deserialize;

use crate::{
    base64_url_encode, AlgorithmRegistry, Header, JoseError, JwsAlgorithm, Key, KeyOperation,
    Result,
};

/// Header parameter extensions the JWS engine processes itself.
const ENGINE_UNDERSTOOD_CRITICAL: &[&str] = &["b64"];

/// Options of the [`Jws`] engine.
///
/// Deserializable, so that it can be embedded into the configuration of an
/// application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JwsOptions {
    /// Accept the `"none"` algorithm when signing and verifying.
    ///
    /// Unsecured JWS objects carry no integrity protection at all, so this is
    /// off unless explicitly enabled.
    pub allow_unsecured: bool,
    /// Extension header parameters the caller processes, which may therefore
    /// appear in `"crit"`.
    pub understood_critical: Vec<String>,
}

/// One signature of a [`JwsObject`], together with its headers.
#[derive(Debug, Clone, PartialEq)]
pub struct JwsSignature {
    protected: Header,
    unprotected: Option<Header>,
    signature: Vec<u8>,
}

impl JwsSignature {
    pub(crate) fn new(protected: Header, unprotected: Option<Header>, signature: Vec<u8>) -> Self {
        Self {
            protected,
            unprotected,
            signature,
        }
    }

    /// The integrity protected header.
    pub fn protected(&self) -> &Header {
        &self.protected
    }

    /// The unprotected header, only representable in the JSON serialization.
    pub fn unprotected(&self) -> Option<&Header> {
        self.unprotected.as_ref()
    }

    /// The raw signature bytes.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The union of the protected and unprotected headers.
    pub fn joint_header(&self) -> Result<Header> {
        Header::joint(std::iter::once(&self.protected).chain(self.unprotected.as_ref()))
    }
}

/// A signed JWS: a payload with one or more signatures.
///
/// The payload is absent for a JWS with [detached content][1]; such an
/// object is verified with [`Jws::verify_detached`].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7515.html#appendix-F
#[derive(Debug, Clone, PartialEq)]
pub struct JwsObject {
    payload: Option<Vec<u8>>,
    signatures: Vec<JwsSignature>,
}

impl JwsObject {
    pub(crate) fn new(payload: Option<Vec<u8>>, signatures: Vec<JwsSignature>) -> Self {
        Self {
            payload,
            signatures,
        }
    }

    /// The payload, `None` if detached.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// All the signatures, never empty.
    pub fn signatures(&self) -> &[JwsSignature] {
        &self.signatures
    }

    /// The first signature.
    pub fn signature(&self) -> &JwsSignature {
        &self.signatures[0]
    }

    /// The same object with the payload detached.
    pub fn detached(&self) -> Self {
        Self {
            payload: None,
            signatures: self.signatures.clone(),
        }
    }

    /// Whether the payload is detached.
    pub fn is_detached(&self) -> bool {
        self.payload.is_none()
    }
}

/// The JWS signing input: `ASCII(BASE64URL(protected) || '.' || payload)`,
/// with the payload `base64url` encoded unless the header says `"b64": false`.
pub(crate) fn signing_input(protected: &Header, payload: &[u8]) -> Vec<u8> {
    let mut input = protected.encoded().into_bytes();
    input.push(b'.');
    if protected.base64_payload() {
        input.extend_from_slice(base64_url_encode(payload).as_bytes());
    } else {
        input.extend_from_slice(payload);
    }
    input
}

/// JSON Web Signature engine, as defined in [RFC7515].
///
/// Every cryptographic operation goes through the [`AlgorithmRegistry`]; the
/// engine itself only deals with headers, signing inputs and the structure
/// of the JWS.
///
/// [RFC7515]: https://www.rfc-editor.org/rfc/rfc7515.html
#[derive(Debug)]
pub struct Jws<'r> {
    registry: &'r AlgorithmRegistry,
    options: JwsOptions,
}

impl<'r> Jws<'r> {
    /// Construct an engine with the default [`JwsOptions`].
    pub fn new(registry: &'r AlgorithmRegistry) -> Self {
        Self::with_options(registry, JwsOptions::default())
    }

    /// Construct an engine with the given options.
    pub fn with_options(registry: &'r AlgorithmRegistry, options: JwsOptions) -> Self {
        Self { registry, options }
    }

    /// The options of the engine.
    pub fn options(&self) -> &JwsOptions {
        &self.options
    }

    /// Sign `payload`, producing a JWS with a single signature.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] or
    /// [`JoseError::UnsupportedCriticalParameter`] if the header is invalid,
    /// [`JoseError::UnsupportedAlgorithm`] if `"alg"` is unknown (or
    /// `"none"` while [`JwsOptions::allow_unsecured`] is off),
    /// [`JoseError::KeyCapabilityMismatch`] if the key does not fit the
    /// algorithm, and [`JoseError::CryptographicOperationFailed`] if the
    /// provider fails.
    pub fn sign(&self, protected: &Header, payload: &[u8], key: &Key) -> Result<JwsObject> {
        self.sign_with_unprotected(protected, None, payload, key)
    }

    /// Sign `payload` with additional unprotected header parameters, only
    /// representable in the JSON serialization.
    pub fn sign_with_unprotected(
        &self,
        protected: &Header,
        unprotected: Option<&Header>,
        payload: &[u8],
        key: &Key,
    ) -> Result<JwsObject> {
        let signature = self.create_signature(protected, unprotected, payload, key)?;
        Ok(JwsObject::new(Some(payload.to_vec()), vec![signature]))
    }

    /// Add another signature over the payload of `object`.
    ///
    /// # Errors
    ///
    /// Same as [`Jws::sign`], and [`JoseError::MalformedSerialization`] if the
    /// payload of `object` is detached, or the `"b64"` parameter of the new
    /// header disagrees with the existing signatures.
    pub fn add_signature(
        &self,
        object: &JwsObject,
        protected: &Header,
        unprotected: Option<&Header>,
        key: &Key,
    ) -> Result<JwsObject> {
        let payload = object.payload().ok_or_else(|| {
            Error::root(JoseError::MalformedSerialization(
                "can not add a signature to a detached payload".to_owned(),
            ))
        })?;
        if object.signature().protected().base64_payload() != protected.base64_payload() {
            return Err(Error::root(JoseError::MalformedSerialization(
                "all signatures must agree on the \"b64\" header parameter".to_owned(),
            )));
        }

        let signature = self.create_signature(protected, unprotected, payload, key)?;
        let mut signatures = object.signatures.clone();
        signatures.push(signature);
        Ok(JwsObject::new(object.payload.clone(), signatures))
    }

    /// Verify `object` with `key`, returning the payload.
    ///
    /// The object is valid if any of its signatures verifies with the key.
    /// Signatures using an algorithm which does not fit the key are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::SignatureVerificationFailed`] if no signature
    /// verifies, regardless of whether the key or the signature was wrong.
    /// Header errors are reported like in [`Jws::sign`], and
    /// [`JoseError::KeyCapabilityMismatch`] is returned if no signature uses
    /// an algorithm fitting the key.
    pub fn verify(&self, object: &JwsObject, key: &Key) -> Result<Vec<u8>> {
        let payload = object.payload().ok_or_else(|| {
            Error::root(JoseError::MalformedSerialization(
                "payload is detached, use detached verification".to_owned(),
            ))
        })?;
        self.verify_payload(object, payload, key)?;
        Ok(payload.to_vec())
    }

    /// Verify `object` against the detached `payload`.
    ///
    /// A payload attached to `object` is ignored.
    ///
    /// # Errors
    ///
    /// Same as [`Jws::verify`].
    pub fn verify_detached(&self, object: &JwsObject, payload: &[u8], key: &Key) -> Result<()> {
        self.verify_payload(object, payload, key)
    }

    fn create_signature(
        &self,
        protected: &Header,
        unprotected: Option<&Header>,
        payload: &[u8],
        key: &Key,
    ) -> Result<JwsSignature> {
        let algorithm = self.check_headers(protected, unprotected)?;
        let input = signing_input(protected, payload);
        let signature = self.registry.sign(algorithm, key, &input)?;

        tracing::debug!(alg = %algorithm, kid = protected.key_id(), "JWS signed");

        Ok(JwsSignature::new(
            protected.clone(),
            unprotected.cloned(),
            signature,
        ))
    }

    fn verify_payload(&self, object: &JwsObject, payload: &[u8], key: &Key) -> Result<()> {
        let mut attempted = false;

        for signature in object.signatures() {
            let algorithm =
                self.check_headers(&signature.protected, signature.unprotected.as_ref())?;
            if algorithm != JwsAlgorithm::None
                && algorithm.check_key(key, KeyOperation::Verify).is_err()
            {
                continue;
            }
            attempted = true;

            let input = signing_input(&signature.protected, payload);
            // provider failures are indistinguishable from invalid signatures
            if let Ok(true) = self
                .registry
                .verify(algorithm, key, &input, &signature.signature)
            {
                tracing::debug!(alg = %algorithm, "JWS signature verified");
                return Ok(());
            }
        }

        if !attempted {
            return Err(Error::root(JoseError::KeyCapabilityMismatch(format!(
                "no signature uses an algorithm fitting the {} key",
                key.describe()
            ))));
        }

        tracing::debug!(
            signatures = object.signatures().len(),
            "JWS signature verification failed"
        );
        Err(Error::root(JoseError::SignatureVerificationFailed))
    }

    /// Check the headers of one signature, returning its algorithm.
    fn check_headers(
        &self,
        protected: &Header,
        unprotected: Option<&Header>,
    ) -> Result<JwsAlgorithm> {
        let joint = Header::joint(std::iter::once(protected).chain(unprotected))?;

        if unprotected.is_some_and(|header| header.critical().is_some()) {
            return Err(Error::root(JoseError::MalformedHeader(
                "\"crit\" must be integrity protected".to_owned(),
            )));
        }
        if unprotected.is_some_and(|header| header.parameters().base64_payload.is_some()) {
            return Err(Error::root(JoseError::MalformedHeader(
                "\"b64\" must be integrity protected".to_owned(),
            )));
        }

        let understood: Vec<&str> = ENGINE_UNDERSTOOD_CRITICAL
            .iter()
            .copied()
            .chain(self.options.understood_critical.iter().map(String::as_str))
            .collect();
        joint.validate(self.registry, &understood)?;

        let algorithm = self.registry.resolve_jws(joint.algorithm().unwrap_or_default())?;

        if !protected.base64_payload()
            && !protected.critical().is_some_and(|crit| crit.iter().any(|name| name == "b64"))
        {
            return Err(Error::root(JoseError::MalformedHeader(
                "\"b64\": false requires \"b64\" to be listed in \"crit\"".to_owned(),
            )));
        }

        if algorithm == JwsAlgorithm::None && !self.options.allow_unsecured {
            tracing::warn!("rejected unsecured JWS");
            return Err(Error::root(JoseError::UnsupportedAlgorithm(algorithm.to_string())));
        }

        Ok(algorithm)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{
        test_utils::{symbolic_ec_private_key, symbolic_registry, symbolic_rsa_key_pair},
        Curve,
    };

    fn hmac_key() -> Key {
        Key::symmetric(vec![0x42; 32]).unwrap()
    }

    #[test]
    fn sign_then_verify_returns_payload() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);
        let key = hmac_key();

        for payload in [&b""[..], b"{\"iss\":\"joe\"}", &[0, 159, 146, 150]] {
            let object = jws.sign(&Header::jws(JwsAlgorithm::Hs256), payload, &key).unwrap();
            assert_eq!(jws.verify(&object, &key).unwrap(), payload);
        }
    }

    #[test]
    fn asymmetric_keys_sign_and_verify() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);

        let ec_private = symbolic_ec_private_key(&registry, Curve::P521, 4);
        let object = jws.sign(&Header::jws(JwsAlgorithm::Es512), b"payload", &ec_private).unwrap();
        assert_eq!(jws.verify(&object, &ec_private.to_public().unwrap()).unwrap(), b"payload");

        let (rsa_private, rsa_public) = symbolic_rsa_key_pair();
        let object = jws.sign(&Header::jws(JwsAlgorithm::Ps384), b"payload", &rsa_private).unwrap();
        assert_eq!(jws.verify(&object, &rsa_public).unwrap(), b"payload");
    }

    #[test]
    fn signing_input_uses_protected_header_bytes() {
        let header = Header::from_bytes(b"{\"typ\":\"JWT\",\r\n \"alg\":\"HS256\"}").unwrap();

        assert_eq!(
            signing_input(&header, b"payload"),
            b"eyJ0eXAiOiJKV1QiLA0KICJhbGciOiJIUzI1NiJ9.cGF5bG9hZA"
        );
    }

    #[test]
    fn tampering_fails_with_signature_verification_failed() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);
        let key = hmac_key();
        let object = jws.sign(&Header::jws(JwsAlgorithm::Hs256), b"payload", &key).unwrap();

        let mut tampered_payload = object.clone();
        tampered_payload.payload = Some(b"pAyload".to_vec());
        assert_eq!(
            jws.verify(&tampered_payload, &key).unwrap_err().error,
            JoseError::SignatureVerificationFailed
        );

        let mut tampered_signature = object.clone();
        tampered_signature.signatures[0].signature[0] ^= 1;
        assert_eq!(
            jws.verify(&tampered_signature, &key).unwrap_err().error,
            JoseError::SignatureVerificationFailed
        );

        let mut tampered_header = object.clone();
        tampered_header.signatures[0].protected =
            Header::jws(JwsAlgorithm::Hs256).with_key_id("other");
        assert_eq!(
            jws.verify(&tampered_header, &key).unwrap_err().error,
            JoseError::SignatureVerificationFailed
        );

        let wrong_key = Key::symmetric(vec![0x43; 32]).unwrap();
        assert_eq!(
            jws.verify(&object, &wrong_key).unwrap_err().error,
            JoseError::SignatureVerificationFailed
        );
    }

    #[test]
    fn unknown_algorithm_fails_before_key_use() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);
        // a key which would not fit any HMAC algorithm
        let (_, rsa_public) = symbolic_rsa_key_pair();

        let header = Header::empty().with_parameter("alg", "HS1024").unwrap();
        let err = jws.sign(&header, b"payload", &rsa_public).unwrap_err();
        assert_eq!(err.error, JoseError::UnsupportedAlgorithm("HS1024".to_owned()));

        let header = Header::jwe(
            crate::KeyManagementAlgorithm::Dir,
            crate::ContentEncryptionAlgorithm::A128Gcm,
        );
        let err = jws.sign(&header, b"payload", &hmac_key()).unwrap_err();
        assert_eq!(err.error, JoseError::UnsupportedAlgorithm("dir".to_owned()));
    }

    #[test]
    fn key_capability_is_checked() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);
        let (rsa_private, rsa_public) = symbolic_rsa_key_pair();

        let err = jws
            .sign(&Header::jws(JwsAlgorithm::Rs256), b"payload", &rsa_public)
            .unwrap_err();
        assert_matches!(err.error, JoseError::KeyCapabilityMismatch(_));

        let err = jws
            .sign(&Header::jws(JwsAlgorithm::Es256), b"payload", &rsa_private)
            .unwrap_err();
        assert_matches!(err.error, JoseError::KeyCapabilityMismatch(_));

        // the HMAC key is shorter than the SHA-512 output
        let err = jws
            .sign(&Header::jws(JwsAlgorithm::Hs512), b"payload", &hmac_key())
            .unwrap_err();
        assert_matches!(err.error, JoseError::KeyCapabilityMismatch(_));

        let object = jws.sign(&Header::jws(JwsAlgorithm::Hs256), b"payload", &hmac_key()).unwrap();
        let err = jws.verify(&object, &rsa_public).unwrap_err();
        assert_matches!(err.error, JoseError::KeyCapabilityMismatch(_));
    }

    #[test]
    fn unsecured_jws_requires_opt_in() {
        let registry = symbolic_registry();
        let key = hmac_key();
        let header = Header::jws(JwsAlgorithm::None);

        let err = Jws::new(&registry).sign(&header, b"payload", &key).unwrap_err();
        assert_eq!(err.error, JoseError::UnsupportedAlgorithm("none".to_owned()));

        let permissive = Jws::with_options(
            &registry,
            JwsOptions {
                allow_unsecured: true,
                ..Default::default()
            },
        );
        let object = permissive.sign(&header, b"payload", &key).unwrap();
        assert!(object.signature().signature().is_empty());
        assert_eq!(permissive.verify(&object, &key).unwrap(), b"payload");

        let err = Jws::new(&registry).verify(&object, &key).unwrap_err();
        assert_eq!(err.error, JoseError::UnsupportedAlgorithm("none".to_owned()));
    }

    #[test]
    fn critical_extensions_must_be_understood() {
        let registry = symbolic_registry();
        let key = hmac_key();
        let header = Header::jws(JwsAlgorithm::Hs256)
            .with_parameter("exp", 1363284000)
            .unwrap()
            .with_critical(["exp"]);

        let err = Jws::new(&registry).sign(&header, b"payload", &key).unwrap_err();
        assert_eq!(
            err.error,
            JoseError::UnsupportedCriticalParameter("exp".to_owned())
        );

        let jws = Jws::with_options(
            &registry,
            JwsOptions {
                understood_critical: vec!["exp".to_owned()],
                ..Default::default()
            },
        );
        let object = jws.sign(&header, b"payload", &key).unwrap();
        jws.verify(&object, &key).unwrap();

        // a verifier which does not understand the extension rejects it
        let err = Jws::new(&registry).verify(&object, &key).unwrap_err();
        assert_eq!(
            err.error,
            JoseError::UnsupportedCriticalParameter("exp".to_owned())
        );
    }

    #[test]
    fn critical_must_be_protected() {
        let registry = symbolic_registry();
        let jws = Jws::with_options(
            &registry,
            JwsOptions {
                understood_critical: vec!["exp".to_owned()],
                ..Default::default()
            },
        );
        let unprotected = Header::empty()
            .with_parameter("exp", 1363284000)
            .unwrap()
            .with_critical(["exp"]);

        let err = jws
            .sign_with_unprotected(
                &Header::jws(JwsAlgorithm::Hs256),
                Some(&unprotected),
                b"p",
                &hmac_key(),
            )
            .unwrap_err();
        assert_matches!(err.error, JoseError::MalformedHeader(_));
    }

    #[test]
    fn unencoded_payload() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);
        let key = hmac_key();
        let header = Header::jws(JwsAlgorithm::Hs256)
            .with_base64_payload(false)
            .with_critical(["b64"]);

        let object = jws.sign(&header, b"$.02", &key).unwrap();
        assert_eq!(jws.verify(&object, &key).unwrap(), b"$.02");

        // the unencoded payload is part of the signing input verbatim
        let input = signing_input(object.signature().protected(), b"$.02");
        assert!(input.ends_with(b".$.02"));

        // "b64" must be listed in "crit"
        let err = jws
            .sign(&Header::jws(JwsAlgorithm::Hs256).with_base64_payload(false), b"$.02", &key)
            .unwrap_err();
        assert_matches!(err.error, JoseError::MalformedHeader(_));
    }

    #[test]
    fn detached_payload() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);
        let key = hmac_key();

        let object = jws
            .sign(&Header::jws(JwsAlgorithm::Hs256), b"payload", &key)
            .unwrap()
            .detached();
        assert!(object.is_detached());

        jws.verify_detached(&object, b"payload", &key).unwrap();
        assert_eq!(
            jws.verify_detached(&object, b"other", &key).unwrap_err().error,
            JoseError::SignatureVerificationFailed
        );
        assert_matches!(
            jws.verify(&object, &key).unwrap_err().error,
            JoseError::MalformedSerialization(_)
        );
    }

    #[test]
    fn multiple_signatures() {
        let registry = symbolic_registry();
        let jws = Jws::new(&registry);
        let hmac = hmac_key();
        let ec_private = symbolic_ec_private_key(&registry, Curve::P256, 8);
        let ec_public = ec_private.to_public().unwrap();

        let object = jws.sign(&Header::jws(JwsAlgorithm::Hs256), b"payload", &hmac).unwrap();
        let object = jws
            .add_signature(
                &object,
                &Header::jws(JwsAlgorithm::Es256),
                Some(&Header::empty().with_key_id("ec")),
                &ec_private,
            )
            .unwrap();

        assert_eq!(object.signatures().len(), 2);
        assert_eq!(object.signatures()[1].joint_header().unwrap().key_id(), Some("ec"));

        // each key finds its own signature
        assert_eq!(jws.verify(&object, &hmac).unwrap(), b"payload");
        assert_eq!(jws.verify(&object, &ec_public).unwrap(), b"payload");

        let other = symbolic_ec_private_key(&registry, Curve::P256, 9).to_public().unwrap();
        assert_eq!(
            jws.verify(&object, &other).unwrap_err().error,
            JoseError::SignatureVerificationFailed
        );
    }

    #[test]
    fn options_deserialize_from_configuration() {
        let options: JwsOptions = serde_json::from_str(r#"{"allow_unsecured": true}"#).unwrap();
        assert!(options.allow_unsecured);
        assert!(options.understood_critical.is_empty());

        assert!(serde_json::from_str::<JwsOptions>(r#"{"allow_none": true}"#).is_err());
    }
}
