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

//! Compact and JSON serializations of [`JwsObject`] and [`JweObject`], as
//! defined in [section 7 of RFC7515][1] and [section 7 of RFC7516][2].
//!
//! Parsing is strict: a wrong number of compact segments, a segment which is
//! not valid `base64url`, or a JSON member of the wrong type fails with
//! [`JoseError::MalformedSerialization`]. Headers are parsed with
//! [`Header::from_bytes`], so their errors are reported as
//! [`JoseError::MalformedHeader`].
//!
//! [1]: https://www.rfc-editor.org/rfc/rfc7515.html#section-7
//! [2]: https://www.rfc-editor.org/rfc/rfc7516.html#section-7

use bherror::{
    traits::{ForeignError as _, PropagateError as _},
    Error,
};
use serde_json::Value;

use crate::{
    base64_url_decode, base64_url_encode,
    jwe::{JweParts, JweRecipient},
    jws::JwsSignature,
    Header, JoseError, JsonObject, JweObject, JwsObject, Result,
};

/// The two JSON serializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonForm {
    /// Flattened JSON serialization, with a single signature or recipient.
    Flattened,
    /// General JSON serialization, with any number of signatures or
    /// recipients.
    General,
}

/// The compact serialization: dot separated `base64url` segments.
pub trait CompactSerialization: Sized {
    /// Serialize into the compact form.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedSerialization`] if the object uses
    /// features the compact form can not represent, such as unprotected
    /// headers or multiple signatures.
    fn to_compact(&self) -> Result<String>;

    /// Parse the compact form.
    fn from_compact(compact: &str) -> Result<Self>;
}

/// The JSON serializations.
pub trait JsonSerialization: Sized {
    /// Serialize into the given JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::MalformedSerialization`] if the flattened form is
    /// requested for an object with more than one signature or recipient.
    fn to_json(&self, form: JsonForm) -> Result<String>;

    /// Parse either of the JSON forms, detected from the members present.
    fn from_json(json: &str) -> Result<Self>;
}

fn malformed(message: impl Into<String>) -> Error<JoseError> {
    Error::root(JoseError::MalformedSerialization(message.into()))
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>> {
    base64_url_decode(segment)
        .with_err(|| JoseError::MalformedSerialization(format!("{name} is not base64url")))
}

fn split_compact<const N: usize>(compact: &str) -> Result<[&str; N]> {
    let segments: Vec<&str> = compact.split('.').collect();
    let count = segments.len();
    segments
        .try_into()
        .map_err(|_| malformed(format!("expected {N} segments, found {count}")))
}

fn parse_object(json: &str) -> Result<JsonObject> {
    serde_json::from_str(json)
        .foreign_err(|| JoseError::MalformedSerialization("not a JSON object".to_owned()))
}

fn string_member<'a>(object: &'a JsonObject, name: &str) -> Result<Option<&'a str>> {
    object
        .get(name)
        .map(|value| {
            value
                .as_str()
                .ok_or_else(|| malformed(format!("\"{name}\" must be a string")))
        })
        .transpose()
}

fn required_string_member<'a>(object: &'a JsonObject, name: &str) -> Result<&'a str> {
    string_member(object, name)?.ok_or_else(|| malformed(format!("\"{name}\" is missing")))
}

fn bytes_member(object: &JsonObject, name: &str) -> Result<Option<Vec<u8>>> {
    string_member(object, name)?
        .map(|value| decode_segment(value, &format!("\"{name}\"")))
        .transpose()
}

fn required_bytes_member(object: &JsonObject, name: &str) -> Result<Vec<u8>> {
    decode_segment(required_string_member(object, name)?, &format!("\"{name}\""))
}

fn header_member(object: &JsonObject, name: &str) -> Result<Option<Header>> {
    object
        .get(name)
        .map(|value| {
            value
                .as_object()
                .ok_or_else(|| malformed(format!("\"{name}\" must be a JSON object")))
                .and_then(Header::from_object)
        })
        .transpose()
}

fn protected_member(object: &JsonObject) -> Result<Header> {
    Header::from_bytes(&required_bytes_member(object, "protected")?)
}

fn array_member<'a>(object: &'a JsonObject, name: &str) -> Result<Vec<&'a JsonObject>> {
    let values = object
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(format!("\"{name}\" must be an array")))?;
    if values.is_empty() {
        return Err(malformed(format!("\"{name}\" must not be empty")));
    }
    values
        .iter()
        .map(|value| {
            value
                .as_object()
                .ok_or_else(|| malformed(format!("\"{name}\" must contain JSON objects")))
        })
        .collect()
}

fn put_header(object: &mut JsonObject, name: &str, header: Option<&Header>) {
    if let Some(header) = header {
        object.insert(name.to_owned(), Value::Object(header.to_object()));
    }
}

/// The payload as it appears in a serialization: `base64url` encoded, or
/// verbatim if the protected header says `"b64": false`.
fn encode_payload(payload: &[u8], protected: &Header) -> Result<String> {
    if protected.base64_payload() {
        return Ok(base64_url_encode(payload));
    }
    String::from_utf8(payload.to_vec()).foreign_err(|| {
        JoseError::MalformedSerialization("unencoded payload is not UTF-8".to_owned())
    })
}

fn decode_payload(payload: &str, protected: &Header) -> Result<Vec<u8>> {
    if protected.base64_payload() {
        decode_segment(payload, "payload")
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

fn jws_signature_object(signature: &JwsSignature) -> JsonObject {
    let mut object = JsonObject::new();
    object.insert("protected".to_owned(), signature.protected().encoded().into());
    put_header(&mut object, "header", signature.unprotected());
    object.insert(
        "signature".to_owned(),
        base64_url_encode(signature.signature()).into(),
    );
    object
}

fn parse_jws_signature(object: &JsonObject) -> Result<JwsSignature> {
    Ok(JwsSignature::new(
        protected_member(object)?,
        header_member(object, "header")?,
        required_bytes_member(object, "signature")?,
    ))
}

impl CompactSerialization for JwsObject {
    /// A detached payload yields an empty payload segment, see [appendix F of
    /// RFC7515][1].
    ///
    /// [1]: https://www.rfc-editor.org/rfc/rfc7515.html#appendix-F
    fn to_compact(&self) -> Result<String> {
        let [signature] = self.signatures() else {
            return Err(malformed("compact form requires exactly one signature"));
        };
        if signature.unprotected().is_some() {
            return Err(malformed("compact form can not carry an unprotected header"));
        }

        let payload = match self.payload() {
            Some(payload) => encode_payload(payload, signature.protected())?,
            None => String::new(),
        };
        if payload.contains('.') {
            return Err(malformed("unencoded payload must not contain '.'"));
        }

        Ok(format!(
            "{}.{}.{}",
            signature.protected().encoded(),
            payload,
            base64_url_encode(signature.signature())
        ))
    }

    /// An empty payload segment yields an empty payload; verify JWS objects
    /// with detached content using
    /// [`Jws::verify_detached`](crate::Jws::verify_detached).
    fn from_compact(compact: &str) -> Result<Self> {
        let [header, payload, signature] = split_compact(compact)?;

        let protected = Header::from_bytes(&decode_segment(header, "header")?)?;
        let payload = decode_payload(payload, &protected)?;
        let signature = decode_segment(signature, "signature")?;

        Ok(JwsObject::new(
            Some(payload),
            vec![JwsSignature::new(protected, None, signature)],
        ))
    }
}

impl JsonSerialization for JwsObject {
    fn to_json(&self, form: JsonForm) -> Result<String> {
        let mut object = JsonObject::new();
        if let Some(payload) = self.payload() {
            let payload = encode_payload(payload, self.signature().protected())?;
            object.insert("payload".to_owned(), payload.into());
        }

        match (form, self.signatures()) {
            (JsonForm::Flattened, [signature]) => object.extend(jws_signature_object(signature)),
            (JsonForm::Flattened, _) => {
                return Err(malformed("flattened form requires exactly one signature"))
            }
            (JsonForm::General, signatures) => {
                let signatures = signatures
                    .iter()
                    .map(|signature| Value::Object(jws_signature_object(signature)))
                    .collect::<Vec<_>>();
                object.insert("signatures".to_owned(), signatures.into());
            }
        }

        Ok(Value::Object(object).to_string())
    }

    fn from_json(json: &str) -> Result<Self> {
        let object = parse_object(json)?;

        let signatures = if object.contains_key("signatures") {
            array_member(&object, "signatures")?
                .into_iter()
                .map(parse_jws_signature)
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![parse_jws_signature(&object)?]
        };

        let b64 = signatures[0].protected().base64_payload();
        if signatures
            .iter()
            .any(|signature| signature.protected().base64_payload() != b64)
        {
            return Err(malformed(
                "all signatures must agree on the \"b64\" header parameter",
            ));
        }

        let payload = string_member(&object, "payload")?
            .map(|payload| decode_payload(payload, signatures[0].protected()))
            .transpose()?;

        Ok(JwsObject::new(payload, signatures))
    }
}

impl CompactSerialization for JweObject {
    fn to_compact(&self) -> Result<String> {
        let [recipient] = self.recipients() else {
            return Err(malformed("compact form requires exactly one recipient"));
        };
        if recipient.header().is_some() || self.shared_unprotected().is_some() {
            return Err(malformed("compact form can not carry unprotected headers"));
        }
        if self.aad().is_some() {
            return Err(malformed(
                "compact form can not carry additional authenticated data",
            ));
        }

        Ok([
            self.protected().encoded(),
            base64_url_encode(recipient.encrypted_key()),
            base64_url_encode(self.iv()),
            base64_url_encode(self.ciphertext()),
            base64_url_encode(self.tag()),
        ]
        .join("."))
    }

    fn from_compact(compact: &str) -> Result<Self> {
        let [header, encrypted_key, iv, ciphertext, tag] = split_compact(compact)?;

        let protected = Header::from_bytes(&decode_segment(header, "header")?)?;
        let encrypted_key = decode_segment(encrypted_key, "encrypted key")?;

        Ok(JweParts {
            protected,
            shared_unprotected: None,
            recipients: vec![JweRecipient::new(None, encrypted_key)],
            iv: decode_segment(iv, "initialization vector")?,
            ciphertext: decode_segment(ciphertext, "ciphertext")?,
            tag: decode_segment(tag, "authentication tag")?,
            aad: None,
        }
        .into())
    }
}

fn jwe_recipient_object(recipient: &JweRecipient) -> JsonObject {
    let mut object = JsonObject::new();
    put_header(&mut object, "header", recipient.header());
    if !recipient.encrypted_key().is_empty() {
        object.insert(
            "encrypted_key".to_owned(),
            base64_url_encode(recipient.encrypted_key()).into(),
        );
    }
    object
}

fn parse_jwe_recipient(object: &JsonObject) -> Result<JweRecipient> {
    Ok(JweRecipient::new(
        header_member(object, "header")?,
        bytes_member(object, "encrypted_key")?.unwrap_or_default(),
    ))
}

impl JsonSerialization for JweObject {
    fn to_json(&self, form: JsonForm) -> Result<String> {
        let mut object = JsonObject::new();
        object.insert("protected".to_owned(), self.protected().encoded().into());
        put_header(&mut object, "unprotected", self.shared_unprotected());

        match (form, self.recipients()) {
            (JsonForm::Flattened, [recipient]) => object.extend(jwe_recipient_object(recipient)),
            (JsonForm::Flattened, _) => {
                return Err(malformed("flattened form requires exactly one recipient"))
            }
            (JsonForm::General, recipients) => {
                let recipients = recipients
                    .iter()
                    .map(|recipient| Value::Object(jwe_recipient_object(recipient)))
                    .collect::<Vec<_>>();
                object.insert("recipients".to_owned(), recipients.into());
            }
        }

        if let Some(aad) = self.aad() {
            object.insert("aad".to_owned(), base64_url_encode(aad).into());
        }
        object.insert("iv".to_owned(), base64_url_encode(self.iv()).into());
        object.insert(
            "ciphertext".to_owned(),
            base64_url_encode(self.ciphertext()).into(),
        );
        object.insert("tag".to_owned(), base64_url_encode(self.tag()).into());

        Ok(Value::Object(object).to_string())
    }

    fn from_json(json: &str) -> Result<Self> {
        let object = parse_object(json)?;

        let recipients = if object.contains_key("recipients") {
            array_member(&object, "recipients")?
                .into_iter()
                .map(parse_jwe_recipient)
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![parse_jwe_recipient(&object)?]
        };

        Ok(JweParts {
            protected: protected_member(&object)?,
            shared_unprotected: header_member(&object, "unprotected")?,
            recipients,
            iv: required_bytes_member(&object, "iv")?,
            ciphertext: required_bytes_member(&object, "ciphertext")?,
            tag: required_bytes_member(&object, "tag")?,
            aad: bytes_member(&object, "aad")?,
        }
        .into())
    }
}
