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

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! This crate provides functions and types for working with [JSON Web
//! Signatures (JWS)][1] and [JSON Web Encryption (JWE)][2], using the
//! algorithms of [JSON Web Algorithms (JWA)][3] and keys given as [JSON Web
//! Keys (JWK)][4].
//!
//! [1]: https://www.rfc-editor.org/rfc/rfc7515.html
//! [2]: https://www.rfc-editor.org/rfc/rfc7516.html
//! [3]: https://www.rfc-editor.org/rfc/rfc7518.html
//! [4]: https://www.rfc-editor.org/rfc/rfc7517.html
//!
//! # Details
//!
//! All cryptographic primitives are performed by a [`CryptoProvider`],
//! injected into an [`AlgorithmRegistry`]. A default [`openssl`] backed
//! implementation is available as [`OpensslProvider`] under the default
//! feature `openssl`, which can be disabled and replaced by a custom
//! implementation.
//!
//! The [`Jws`] and [`Jwe`] engines produce and consume [`JwsObject`]s and
//! [`JweObject`]s, which are converted to and from their textual forms with
//! the [`CompactSerialization`] and [`JsonSerialization`] traits. Protected
//! headers keep their exact bytes, so parsing and re-serializing is
//! byte-exact.
//!
//! JWTs built with the [`jwt`] crate can be signed and verified with the keys
//! of this crate using [`sign_jwt`] and [`verify_jwt_signature`].
//!
//! # Examples
//!
//! ## Sign and verify a JWS
//!
//! ```
//! use bh_jose::{
//!     AlgorithmRegistry, CompactSerialization, Header, Jws, JwsAlgorithm, JwsObject, Key,
//! };
//!
//! let registry = AlgorithmRegistry::openssl();
//! let key = Key::symmetric(vec![42; 32]).unwrap();
//! let jws = Jws::new(&registry);
//!
//! // Sign the payload and serialize the result
//! let object = jws
//!     .sign(&Header::jws(JwsAlgorithm::Hs256), b"Hello, world!", &key)
//!     .unwrap();
//! let compact = object.to_compact().unwrap();
//!
//! // Parse and verify
//! let parsed = JwsObject::from_compact(&compact).unwrap();
//! assert_eq!(jws.verify(&parsed, &key).unwrap(), b"Hello, world!");
//! ```
//!
//! ## Encrypt and decrypt a JWE
//!
//! ```
//! use bh_jose::{
//!     AlgorithmRegistry, CompactSerialization, ContentEncryptionAlgorithm, Curve, Header, Jwe,
//!     JweObject, KeyManagementAlgorithm,
//! };
//!
//! let registry = AlgorithmRegistry::openssl();
//! let recipient_key = registry.generate_ec_key(Curve::P256).unwrap();
//! let jwe = Jwe::new(&registry);
//!
//! // Encrypt to the public key of the recipient
//! let header = Header::jwe(
//!     KeyManagementAlgorithm::EcdhEs,
//!     ContentEncryptionAlgorithm::A256Gcm,
//! );
//! let public_key = recipient_key.to_public().unwrap();
//! let object = jwe.encrypt(&header, b"top secret", &public_key).unwrap();
//! let compact = object.to_compact().unwrap();
//!
//! // The recipient decrypts with its private key
//! let parsed = JweObject::from_compact(&compact).unwrap();
//! assert_eq!(jwe.decrypt(&parsed, &recipient_key).unwrap(), b"top secret");
//! ```

#[cfg(feature = "openssl")]
mod openssl_impl;

mod algorithm;
mod base64url;
mod error;
mod header;
mod jwe;
mod jwk;
mod jws;
mod jwt_compat;
mod kdf;
mod key;
mod provider;
mod serializer;

#[cfg(test)]
mod test_utils;

pub use algorithm::*;
pub use base64url::*;
pub use error::*;
pub use header::*;
pub use jwe::*;
pub use jwk::*;
pub use jws::*;
pub use jwt_compat::*;
pub use key::*;
// Re-export the `jwt` crate
pub use jwt;
#[cfg(feature = "openssl")]
pub use openssl_impl::*;
pub use provider::*;
pub use serializer::*;

/// A JSON object, as used for JOSE headers and JWKs.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Helper macro with the same syntax as [`serde_json::json`] specialized for
/// constructing JSON objects.
///
/// It will construct a more specific type ([`serde_json::Map<String,Value>`])
/// than just [`serde_json::Value`] when constructing an object, and panic if
/// the syntax is valid JSON but not an object.
#[macro_export]
macro_rules! json_object {
    ($stuff:tt) => {
        match ::serde_json::json!($stuff) {
            ::serde_json::Value::Object(o) => o,
            _ => unreachable!("JSON literal wasn't an object"),
        }
    };
}
