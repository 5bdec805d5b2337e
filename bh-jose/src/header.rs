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

use std::fmt;

use bherror::{
    traits::{ForeignError as _, PropagateError as _},
    Error,
};
use iref::UriBuf;
use serde::{
    de::{self, MapAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;

use crate::{
    base64_url_decode, base64_url_encode, AlgorithmDescriptor, AlgorithmRegistry,
    CompressionAlgorithm, ContentEncryptionAlgorithm, JoseError, JsonObject, Jwk, JwsAlgorithm,
    KeyManagementAlgorithm, Result,
};

const ALG: &str = "alg";
const ENC: &str = "enc";
const ZIP: &str = "zip";
const JKU: &str = "jku";
const JWK: &str = "jwk";
const KID: &str = "kid";
const X5U: &str = "x5u";
const X5C: &str = "x5c";
const X5T: &str = "x5t";
const X5T_S256: &str = "x5t#S256";
const TYP: &str = "typ";
const CTY: &str = "cty";
const CRIT: &str = "crit";
const B64: &str = "b64";
const EPK: &str = "epk";
const APU: &str = "apu";
const APV: &str = "apv";
const P2S: &str = "p2s";
const P2C: &str = "p2c";

/// Header parameter names with a meaning defined by the JWS, JWE and JWA
/// specifications, which must never be listed in `"crit"`.
///
/// `"b64"` is deliberately absent, since [RFC7797] requires it to be listed.
///
/// [RFC7797]: https://www.rfc-editor.org/rfc/rfc7797.html#section-6
const REGISTERED: &[&str] = &[
    ALG, ENC, ZIP, JKU, JWK, KID, X5U, X5C, X5T, X5T_S256, TYP, CTY, CRIT, EPK, APU, APV, P2S,
    P2C,
];

/// Header parameters with a type enforced when parsing.
///
/// Values of the `"alg"`, `"enc"` and `"zip"` parameters are kept as strings,
/// so that a header naming an unknown algorithm still parses and can be
/// rejected with [`JoseError::UnsupportedAlgorithm`] once the algorithm is
/// resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderParameters {
    /// `"alg"`: the signature or key management algorithm.
    pub algorithm: Option<String>,
    /// `"enc"`: the content encryption algorithm.
    pub encryption: Option<String>,
    /// `"zip"`: the compression algorithm applied before encryption.
    pub compression: Option<String>,
    /// `"jku"`: URL of a JWK Set containing the key.
    pub jwk_set_url: Option<UriBuf>,
    /// `"jwk"`: the public key as a JWK.
    pub jwk: Option<Jwk>,
    /// `"kid"`: hint identifying the key.
    pub key_id: Option<String>,
    /// `"x5u"`: URL of an X.509 certificate chain.
    pub x509_url: Option<UriBuf>,
    /// `"x5c"`: X.509 certificate chain, as standard `base64` DER
    /// certificates.
    pub x509_chain: Option<Vec<String>>,
    /// `"x5t"`: SHA-1 thumbprint of the X.509 certificate.
    pub x509_thumbprint: Option<Vec<u8>>,
    /// `"x5t#S256"`: SHA-256 thumbprint of the X.509 certificate.
    pub x509_thumbprint_s256: Option<Vec<u8>>,
    /// `"typ"`: media type of the complete object.
    pub typ: Option<String>,
    /// `"cty"`: media type of the secured content.
    pub content_type: Option<String>,
    /// `"crit"`: extensions which must be understood and processed.
    pub critical: Option<Vec<String>>,
    /// `"b64"`: whether the JWS payload is `base64url` encoded, see
    /// [RFC7797](https://www.rfc-editor.org/rfc/rfc7797.html).
    pub base64_payload: Option<bool>,
    /// `"epk"`: ephemeral public key of ECDH-ES, as a JWK.
    pub ephemeral_public_key: Option<Jwk>,
    /// `"apu"`: agreement PartyUInfo of ECDH-ES.
    pub agreement_party_u_info: Option<Vec<u8>>,
    /// `"apv"`: agreement PartyVInfo of ECDH-ES.
    pub agreement_party_v_info: Option<Vec<u8>>,
    /// `"p2s"`: PBES2 salt input.
    pub pbes2_salt: Option<Vec<u8>>,
    /// `"p2c"`: PBES2 iteration count.
    pub pbes2_count: Option<u32>,
    /// Any other (private or public extension) parameters.
    pub extensions: JsonObject,
}

fn malformed(message: String) -> Error<JoseError> {
    Error::root(JoseError::MalformedHeader(message))
}

fn type_error(name: &str, expected: &str) -> Error<JoseError> {
    malformed(format!("\"{name}\" must be {expected}"))
}

fn string_value(name: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| type_error(name, "a string"))
}

fn string_array_value(name: &str, value: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .and_then(|values| {
            values
                .iter()
                .map(|value| value.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| type_error(name, "an array of strings"))
}

fn object_value(name: &str, value: &Value) -> Result<JsonObject> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| type_error(name, "a JSON object"))
}

fn bytes_value(name: &str, value: &Value) -> Result<Vec<u8>> {
    base64_url_decode(string_value(name, value)?)
        .with_err(|| JoseError::MalformedHeader(format!("\"{name}\" must be base64url")))
}

fn uri_value(name: &str, value: &Value) -> Result<UriBuf> {
    UriBuf::new(string_value(name, value)?.into_bytes())
        .map_err(|_| type_error(name, "a URI"))
}

impl HeaderParameters {
    /// Type the parameters of a header JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] if a registered parameter has a
    /// value of the wrong type.
    pub fn from_object(object: &JsonObject) -> Result<Self> {
        let mut parameters = Self::default();

        for (name, value) in object {
            match name.as_str() {
                ALG => parameters.algorithm = Some(string_value(name, value)?),
                ENC => parameters.encryption = Some(string_value(name, value)?),
                ZIP => parameters.compression = Some(string_value(name, value)?),
                JKU => parameters.jwk_set_url = Some(uri_value(name, value)?),
                JWK => parameters.jwk = Some(object_value(name, value)?),
                KID => parameters.key_id = Some(string_value(name, value)?),
                X5U => parameters.x509_url = Some(uri_value(name, value)?),
                X5C => parameters.x509_chain = Some(string_array_value(name, value)?),
                X5T => parameters.x509_thumbprint = Some(bytes_value(name, value)?),
                X5T_S256 => parameters.x509_thumbprint_s256 = Some(bytes_value(name, value)?),
                TYP => parameters.typ = Some(string_value(name, value)?),
                CTY => parameters.content_type = Some(string_value(name, value)?),
                CRIT => parameters.critical = Some(string_array_value(name, value)?),
                B64 => {
                    let b64 = value.as_bool().ok_or_else(|| type_error(name, "a boolean"))?;
                    parameters.base64_payload = Some(b64);
                }
                EPK => parameters.ephemeral_public_key = Some(object_value(name, value)?),
                APU => parameters.agreement_party_u_info = Some(bytes_value(name, value)?),
                APV => parameters.agreement_party_v_info = Some(bytes_value(name, value)?),
                P2S => parameters.pbes2_salt = Some(bytes_value(name, value)?),
                P2C => {
                    let count = value
                        .as_u64()
                        .and_then(|count| u32::try_from(count).ok())
                        .filter(|count| *count > 0)
                        .ok_or_else(|| type_error(name, "a positive integer"))?;
                    parameters.pbes2_count = Some(count);
                }
                _ => {
                    parameters.extensions.insert(name.clone(), value.clone());
                }
            }
        }

        Ok(parameters)
    }

    /// The header JSON object of the parameters.
    ///
    /// Registered parameters come first, in a fixed order, followed by the
    /// extension parameters.
    pub fn to_object(&self) -> JsonObject {
        let mut object = JsonObject::new();

        let mut put = |name: &str, value: Option<Value>| {
            if let Some(value) = value {
                object.insert(name.to_owned(), value);
            }
        };
        let bytes = |value: &Option<Vec<u8>>| -> Option<Value> {
            value.as_ref().map(|bytes| base64_url_encode(bytes).into())
        };
        let uri = |value: &Option<UriBuf>| -> Option<Value> {
            value.as_ref().map(|uri| uri.as_str().into())
        };

        put(ALG, self.algorithm.clone().map(Value::from));
        put(ENC, self.encryption.clone().map(Value::from));
        put(ZIP, self.compression.clone().map(Value::from));
        put(JKU, uri(&self.jwk_set_url));
        put(JWK, self.jwk.clone().map(Value::Object));
        put(KID, self.key_id.clone().map(Value::from));
        put(X5U, uri(&self.x509_url));
        put(X5C, self.x509_chain.clone().map(Value::from));
        put(X5T, bytes(&self.x509_thumbprint));
        put(X5T_S256, bytes(&self.x509_thumbprint_s256));
        put(TYP, self.typ.clone().map(Value::from));
        put(CTY, self.content_type.clone().map(Value::from));
        put(CRIT, self.critical.clone().map(Value::from));
        put(B64, self.base64_payload.map(Value::from));
        put(EPK, self.ephemeral_public_key.clone().map(Value::Object));
        put(APU, bytes(&self.agreement_party_u_info));
        put(APV, bytes(&self.agreement_party_v_info));
        put(P2S, bytes(&self.pbes2_salt));
        put(P2C, self.pbes2_count.map(Value::from));

        for (name, value) in &self.extensions {
            object.insert(name.clone(), value.clone());
        }

        object
    }
}

/// JSON object which fails to deserialize when a member name is repeated.
///
/// `serde_json` silently keeps the last duplicate, while a repeated header
/// parameter must be rejected, see [section 4 of RFC7515][1].
///
/// [1]: https://www.rfc-editor.org/rfc/rfc7515.html#section-4
struct StrictObject(JsonObject);

impl<'de> Deserialize<'de> for StrictObject {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StrictObjectVisitor;

        impl<'de> Visitor<'de> for StrictObjectVisitor {
            type Value = StrictObject;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON object")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut object = JsonObject::new();
                while let Some(name) = map.next_key::<String>()? {
                    if object.contains_key(&name) {
                        return Err(de::Error::custom(format!("duplicate member \"{name}\"")));
                    }
                    let value = map.next_value::<Value>()?;
                    object.insert(name, value);
                }
                Ok(StrictObject(object))
            }
        }

        deserializer.deserialize_map(StrictObjectVisitor)
    }
}

/// A JOSE header: a set of typed [`HeaderParameters`] together with the exact
/// JSON bytes they were parsed from or serialized to.
///
/// The bytes of a protected header are what gets `base64url` encoded into the
/// signing input of a JWS and the additional authenticated data of a JWE, so
/// a parsed header keeps its original bytes verbatim and re-serializing it is
/// byte-exact.
///
/// Headers are immutable; the `with_*` methods return a new header.
#[derive(Clone, PartialEq)]
pub struct Header {
    parameters: HeaderParameters,
    encoded: Vec<u8>,
}

impl Header {
    /// Construct a header from typed parameters.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] if an extension parameter uses
    /// the name of a registered parameter.
    pub fn new(parameters: HeaderParameters) -> Result<Self> {
        if let Some(name) = parameters
            .extensions
            .keys()
            .find(|name| REGISTERED.contains(&name.as_str()) || name.as_str() == B64)
        {
            return Err(malformed(format!(
                "extension parameter \"{name}\" shadows a registered parameter"
            )));
        }
        Ok(Self::from_parameters(parameters))
    }

    fn from_parameters(parameters: HeaderParameters) -> Self {
        let encoded = Value::Object(parameters.to_object()).to_string().into_bytes();
        Self {
            parameters,
            encoded,
        }
    }

    /// Empty header, mostly useful as a base for unprotected headers.
    pub fn empty() -> Self {
        Self::from_parameters(HeaderParameters::default())
    }

    /// Header of a JWS with the given algorithm.
    pub fn jws(algorithm: JwsAlgorithm) -> Self {
        Self::from_parameters(HeaderParameters {
            algorithm: Some(algorithm.name().to_owned()),
            ..Default::default()
        })
    }

    /// Header of a JWE with the given key management and content encryption
    /// algorithms.
    pub fn jwe(algorithm: KeyManagementAlgorithm, encryption: ContentEncryptionAlgorithm) -> Self {
        Self::from_parameters(HeaderParameters {
            algorithm: Some(algorithm.name().to_owned()),
            encryption: Some(encryption.name().to_owned()),
            ..Default::default()
        })
    }

    /// Parse a header from its JSON bytes, keeping the bytes verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] if the bytes are not a UTF-8
    /// JSON object, a member name is repeated, or a registered parameter has
    /// a value of the wrong type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let StrictObject(object) = serde_json::from_slice(bytes).foreign_err(|| {
            JoseError::MalformedHeader("not a JSON object with unique member names".to_owned())
        })?;
        let parameters = HeaderParameters::from_object(&object)?;
        Ok(Self {
            parameters,
            encoded: bytes.to_vec(),
        })
    }

    /// Construct a header from a JSON object, as found in the unprotected
    /// header members of the JSON serializations.
    pub fn from_object(object: &JsonObject) -> Result<Self> {
        let parameters = HeaderParameters::from_object(object)?;
        Ok(Self {
            parameters,
            encoded: Value::Object(object.clone()).to_string().into_bytes(),
        })
    }

    /// The typed parameters.
    pub fn parameters(&self) -> &HeaderParameters {
        &self.parameters
    }

    /// The exact JSON bytes of the header.
    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// The `base64url` encoding of the JSON bytes, as used in the
    /// serializations.
    pub fn encoded(&self) -> String {
        base64_url_encode(&self.encoded)
    }

    /// The header as a JSON object.
    pub fn to_object(&self) -> JsonObject {
        self.parameters.to_object()
    }

    /// Whether the header has no parameters.
    pub fn is_empty(&self) -> bool {
        self.parameters == HeaderParameters::default()
    }

    /// Whether the header contains the parameter `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.to_object().contains_key(name)
    }

    /// The `"alg"` parameter.
    pub fn algorithm(&self) -> Option<&str> {
        self.parameters.algorithm.as_deref()
    }

    /// The `"enc"` parameter.
    pub fn encryption(&self) -> Option<&str> {
        self.parameters.encryption.as_deref()
    }

    /// The `"kid"` parameter.
    pub fn key_id(&self) -> Option<&str> {
        self.parameters.key_id.as_deref()
    }

    /// The `"typ"` parameter.
    pub fn typ(&self) -> Option<&str> {
        self.parameters.typ.as_deref()
    }

    /// The `"cty"` parameter.
    pub fn content_type(&self) -> Option<&str> {
        self.parameters.content_type.as_deref()
    }

    /// The `"crit"` parameter.
    pub fn critical(&self) -> Option<&[String]> {
        self.parameters.critical.as_deref()
    }

    /// Whether the JWS payload is `base64url` encoded, `true` unless the
    /// header contains `"b64": false`.
    pub fn base64_payload(&self) -> bool {
        self.parameters.base64_payload.unwrap_or(true)
    }

    /// An extension parameter.
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.parameters.extensions.get(name)
    }

    fn with(self, f: impl FnOnce(&mut HeaderParameters)) -> Self {
        let mut parameters = self.parameters;
        f(&mut parameters);
        Self::from_parameters(parameters)
    }

    /// Set the `"kid"` parameter.
    pub fn with_key_id(self, kid: impl Into<String>) -> Self {
        self.with(|parameters| parameters.key_id = Some(kid.into()))
    }

    /// Set the `"typ"` parameter.
    pub fn with_type(self, typ: impl Into<String>) -> Self {
        self.with(|parameters| parameters.typ = Some(typ.into()))
    }

    /// Set the `"cty"` parameter.
    pub fn with_content_type(self, cty: impl Into<String>) -> Self {
        self.with(|parameters| parameters.content_type = Some(cty.into()))
    }

    /// Set the `"crit"` parameter.
    pub fn with_critical<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.with(|parameters| parameters.critical = Some(names))
    }

    /// Set the `"b64"` parameter.
    ///
    /// An unencoded payload also requires `"b64"` to be listed in `"crit"`.
    pub fn with_base64_payload(self, b64: bool) -> Self {
        self.with(|parameters| parameters.base64_payload = Some(b64))
    }

    /// Set the `"zip"` parameter.
    pub fn with_compression(self, zip: CompressionAlgorithm) -> Self {
        self.with(|parameters| parameters.compression = Some(zip.name().to_owned()))
    }

    /// Set the `"jwk"` parameter.
    pub fn with_jwk(self, jwk: Jwk) -> Self {
        self.with(|parameters| parameters.jwk = Some(jwk))
    }

    /// Set the `"apu"` and `"apv"` parameters of ECDH-ES.
    pub fn with_agreement_party_info(self, apu: Option<&[u8]>, apv: Option<&[u8]>) -> Self {
        self.with(|parameters| {
            parameters.agreement_party_u_info = apu.map(<[u8]>::to_vec);
            parameters.agreement_party_v_info = apv.map(<[u8]>::to_vec);
        })
    }

    /// Set an arbitrary parameter.
    ///
    /// The value of a registered parameter is type checked like when parsing.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] if a registered parameter gets
    /// a value of the wrong type.
    pub fn with_parameter(self, name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let mut object = self.to_object();
        object.insert(name.into(), value.into());
        let parameters = HeaderParameters::from_object(&object)?;
        Ok(Self::from_parameters(parameters))
    }

    /// The joint header of a JWS signature or JWE recipient: the union of the
    /// protected and unprotected headers.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] if a parameter appears in more
    /// than one of the headers, see [section 7.2.1 of RFC7516][1].
    ///
    /// [1]: https://www.rfc-editor.org/rfc/rfc7516.html#section-7.2.1
    pub fn joint<'a>(headers: impl IntoIterator<Item = &'a Header>) -> Result<Header> {
        let mut joint = JsonObject::new();
        for header in headers {
            for (name, value) in header.to_object() {
                if joint.contains_key(&name) {
                    return Err(malformed(format!(
                        "parameter \"{name}\" appears in more than one header"
                    )));
                }
                joint.insert(name, value);
            }
        }
        Header::from_object(&joint)
    }

    /// Check the `"crit"` parameter, see [section 4.1.11 of RFC7515][1].
    ///
    /// `understood` lists the extensions the caller knows how to process.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedHeader`] if `"crit"` is empty, contains
    /// duplicates or registered parameter names, or lists a parameter absent
    /// from the header, and [`JoseError::UnsupportedCriticalParameter`] if it
    /// lists an extension which is not understood.
    ///
    /// [1]: https://www.rfc-editor.org/rfc/rfc7515.html#section-4.1.11
    pub fn check_critical(&self, understood: &[&str]) -> Result<()> {
        let Some(critical) = self.critical() else {
            return Ok(());
        };
        if critical.is_empty() {
            return Err(malformed("\"crit\" must not be empty".to_owned()));
        }

        for (index, name) in critical.iter().enumerate() {
            if critical[..index].contains(name) {
                return Err(malformed(format!("\"crit\" lists \"{name}\" more than once")));
            }
            if REGISTERED.contains(&name.as_str()) {
                return Err(malformed(format!(
                    "\"crit\" lists registered parameter \"{name}\""
                )));
            }
            if !understood.contains(&name.as_str()) {
                return Err(Error::root(JoseError::UnsupportedCriticalParameter(
                    name.clone(),
                )));
            }
            if !self.contains(name) {
                return Err(malformed(format!(
                    "critical parameter \"{name}\" is missing"
                )));
            }
        }

        Ok(())
    }

    /// Validate the header against the `registry`: the `"alg"` parameter must
    /// be present and resolve, `"enc"` and `"zip"` must resolve if present,
    /// and `"crit"` must pass [`Header::check_critical`].
    ///
    /// Returns the descriptor of the `"alg"` algorithm.
    pub fn validate(
        &self,
        registry: &AlgorithmRegistry,
        understood: &[&str],
    ) -> Result<AlgorithmDescriptor> {
        let algorithm = self
            .algorithm()
            .ok_or_else(|| malformed("\"alg\" is missing".to_owned()))?;
        let descriptor = registry.resolve(algorithm)?;

        if let Some(encryption) = self.encryption() {
            registry.resolve_content_encryption(encryption)?;
        }
        if let Some(compression) = &self.parameters.compression {
            compression.parse::<CompressionAlgorithm>()?;
        }
        self.check_critical(understood)?;

        Ok(descriptor)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("parameters", &self.parameters)
            .field("encoded", &String::from_utf8_lossy(&self.encoded))
            .finish()
    }
}
