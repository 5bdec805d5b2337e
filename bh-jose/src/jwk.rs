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

use std::collections::HashSet;

use bherror::{traits::PropagateError as _, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    base64_url_decode, base64_url_encode, provider::HashAlgorithm, AlgorithmRegistry, JoseError,
    JsonObject, Key, RsaCrtParameters, Result,
};

/// A JSON object representing a JWK, see [RFC7517].
///
/// Convert it into a typed [`Key`] with [`Key::from_jwk`], which enforces the
/// schema of the key type.
///
/// [RFC7517]: https://datatracker.ietf.org/doc/html/rfc7517
pub type Jwk = JsonObject;

fn missing_member(name: &str) -> Error<JoseError> {
    Error::root(JoseError::InvalidKeyMaterial(format!(
        "JWK member \"{name}\" is missing or not a string"
    )))
}

fn string_member<'a>(jwk: &'a Jwk, name: &str) -> Result<&'a str> {
    jwk.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| missing_member(name))
}

fn bytes_member(jwk: &Jwk, name: &str) -> Result<Vec<u8>> {
    base64_url_decode(string_member(jwk, name)?).with_err(|| {
        JoseError::InvalidKeyMaterial(format!("JWK member \"{name}\" is not base64url"))
    })
}

fn optional_bytes_member(jwk: &Jwk, name: &str) -> Result<Option<Vec<u8>>> {
    if jwk.contains_key(name) {
        bytes_member(jwk, name).map(Some)
    } else {
        Ok(None)
    }
}

const RSA_CRT_MEMBERS: [&str; 5] = ["p", "q", "dp", "dq", "qi"];

impl Key {
    /// Construct a key from its JWK representation.
    ///
    /// Supports the `"oct"`, `"RSA"` and `"EC"` key types of [section 6 of
    /// RFC7518][1]. Key metadata such as `"kid"`, `"use"` or `"key_ops"` is
    /// ignored; the operations of the key are determined by the key type and
    /// whether private members are present.
    ///
    /// # Errors
    ///
    /// Returns [`JoseError::InvalidKeyMaterial`] if the key type is not
    /// supported, a required member is missing or not valid `base64url`, or
    /// the key components are invalid (see the constructors of [`Key`]).
    ///
    /// [1]: https://www.rfc-editor.org/rfc/rfc7518.html#section-6
    pub fn from_jwk(registry: &AlgorithmRegistry, jwk: &Jwk) -> Result<Self> {
        match string_member(jwk, "kty")? {
            "oct" => Key::symmetric(bytes_member(jwk, "k")?),
            "RSA" => {
                let n = bytes_member(jwk, "n")?;
                let e = bytes_member(jwk, "e")?;
                let Some(d) = optional_bytes_member(jwk, "d")? else {
                    return Key::rsa_public(&n, &e);
                };

                if jwk.contains_key("oth") {
                    return Err(Error::root(JoseError::InvalidKeyMaterial(
                        "RSA keys with more than two primes are not supported".to_owned(),
                    )));
                }

                let present = RSA_CRT_MEMBERS
                    .iter()
                    .filter(|name| jwk.contains_key(**name))
                    .count();
                let crt = match present {
                    0 => None,
                    5 => Some(RsaCrtParameters {
                        p: bytes_member(jwk, "p")?,
                        q: bytes_member(jwk, "q")?,
                        dp: bytes_member(jwk, "dp")?,
                        dq: bytes_member(jwk, "dq")?,
                        qi: bytes_member(jwk, "qi")?,
                    }),
                    _ => {
                        return Err(Error::root(JoseError::InvalidKeyMaterial(
                            "RSA CRT parameters must be given all or none".to_owned(),
                        )))
                    }
                };

                Key::rsa_private(&n, &e, &d, crt)
            }
            "EC" => {
                let curve = string_member(jwk, "crv")?.parse()?;
                let x = bytes_member(jwk, "x")?;
                let y = bytes_member(jwk, "y")?;
                match optional_bytes_member(jwk, "d")? {
                    Some(d) => Key::ec_private(registry, curve, &x, &y, &d),
                    None => Key::ec_public(registry, curve, &x, &y),
                }
            }
            kty => Err(Error::root(JoseError::InvalidKeyMaterial(format!(
                "unsupported key type \"{kty}\""
            )))),
        }
    }

    /// The JWK representation of the key, including any private members.
    pub fn to_jwk(&self) -> Jwk {
        let mut jwk = Jwk::new();
        jwk.insert("kty".to_owned(), self.key_type().name().into());
        if let Some(curve) = self.curve() {
            jwk.insert("crv".to_owned(), curve.name().into());
        }

        let mut put = |name: &str, value: &[u8]| {
            jwk.insert(name.to_owned(), base64_url_encode(value).into());
        };

        match self {
            Key::Symmetric(key) => put("k", key.as_bytes()),
            Key::RsaPublic(key) => {
                put("n", key.modulus());
                put("e", key.exponent());
            }
            Key::RsaPrivate(key) => {
                put("n", key.public_key().modulus());
                put("e", key.public_key().exponent());
                put("d", key.private_exponent());
                if let Some(crt) = key.crt_parameters() {
                    put("p", &crt.p);
                    put("q", &crt.q);
                    put("dp", &crt.dp);
                    put("dq", &crt.dq);
                    put("qi", &crt.qi);
                }
            }
            Key::EcPublic(key) => {
                put("x", key.x());
                put("y", key.y());
            }
            Key::EcPrivate(key) => {
                put("x", key.public_key().x());
                put("y", key.public_key().y());
                put("d", key.d());
            }
        }

        jwk
    }

    /// The JWK representation of the public counterpart of the key, `None`
    /// for symmetric keys.
    pub fn to_public_jwk(&self) -> Option<Jwk> {
        self.to_public().map(|key| key.to_jwk())
    }

    /// Canonical JSON of the required public members of the key, as hashed
    /// by [`Key::thumbprint`].
    fn thumbprint_input(&self) -> String {
        let jwk = match self {
            Key::Symmetric(_) => self.to_jwk(),
            _ => self.to_public_jwk().unwrap_or_default(),
        };
        let members: &[&str] = match self.key_type() {
            crate::KeyType::Oct => &["k", "kty"],
            crate::KeyType::Rsa => &["e", "kty", "n"],
            crate::KeyType::Ec => &["crv", "kty", "x", "y"],
        };

        let canonical = members
            .iter()
            .map(|name| {
                format!(
                    "{}:{}",
                    Value::from(*name),
                    jwk.get(*name).unwrap_or(&Value::Null)
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        format!("{{{canonical}}}")
    }

    /// The JWK thumbprint of the key, as defined in [RFC7638], encoded as
    /// `base64url`.
    ///
    /// The thumbprint only depends on the public members of the key, so a
    /// private key and its public counterpart share the same thumbprint.
    ///
    /// [RFC7638]: https://www.rfc-editor.org/rfc/rfc7638.html
    pub fn thumbprint(&self, registry: &AlgorithmRegistry, hash: HashAlgorithm) -> Result<String> {
        let digest = registry.digest(hash, self.thumbprint_input().as_bytes())?;
        Ok(base64_url_encode(digest))
    }
}

/// Models JWK Set. A JSON object that represents a set of JWKs.
///
/// If any of the JWKs in the JWK Set have parameter `kid` then all of them
/// should have `kid` parameter and different keys within the JWK Set SHOULD use
/// distinct `kid` values.
///
/// NOTE: The notion of different keys can be somewhat subtle. The [RFC] gives
/// the following example - different keys might use the same `kid` value if
/// they have different "kty" (key type) values but are considered to be
/// equivalent alternatives by the application using them. This implementation
/// currently does not support this example, uniqueness of keys is checked if
/// they contain `kid` values and equality between them is checked using only
/// `kid` values.
///
/// For more details see [RFC7517][RFC].
///
/// [RFC]: https://datatracker.ietf.org/doc/html/rfc7517#section-5
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "JwkSetUnverified")]
pub struct JwkSet {
    keys: Vec<Jwk>,
}

impl JwkSet {
    /// Create empty `JwkSet`.
    pub fn empty() -> Self {
        JwkSet { keys: vec![] }
    }

    /// The JWKs of the set.
    pub fn keys(&self) -> &[Jwk] {
        &self.keys
    }

    /// Find the JWK with the given `kid`.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|jwk| jwk.get("kid").and_then(Value::as_str) == Some(kid))
    }

    /// Find the JWK with the given `kid` and convert it into a [`Key`].
    ///
    /// Returns `Ok(None)` if no JWK has the `kid`.
    pub fn find_key(&self, registry: &AlgorithmRegistry, kid: &str) -> Result<Option<Key>> {
        self.find(kid)
            .map(|jwk| Key::from_jwk(registry, jwk))
            .transpose()
    }
}

impl TryFrom<Vec<Jwk>> for JwkSet {
    type Error = &'static str;

    fn try_from(keys: Vec<Jwk>) -> std::result::Result<Self, Self::Error> {
        JwkSetUnverified { keys }.try_into()
    }
}

/// This is a "shadow" type whose sole purpose of existence is to be able to
/// verify validity of deserialized [JwkSet] without writing deserialization
/// manually. This is achieved with misuse of `TryFrom` trait. For more info see
/// this [github issue].
///
/// [github issue]: https://github.com/serde-rs/serde/issues/642
#[derive(Deserialize, Debug)]
struct JwkSetUnverified {
    keys: Vec<Jwk>,
}

impl TryFrom<JwkSetUnverified> for JwkSet {
    type Error = &'static str;

    fn try_from(value: JwkSetUnverified) -> std::result::Result<Self, Self::Error> {
        let keys = value.keys;
        let jwk_with_kid_cnt = keys.iter().filter(|jwk| jwk.contains_key("kid")).count();

        if jwk_with_kid_cnt == 0 {
            return Ok(JwkSet { keys });
        }
        if jwk_with_kid_cnt != keys.len() {
            return Err("Some of the provided JWKs contain kid parameter values and some don't");
        }

        let mut uniq = HashSet::new();
        for key in keys.iter() {
            let kid = key
                .get("kid")
                .and_then(Value::as_str)
                .ok_or("JWK contains a `kid` parameter that is not a string")?;
            if !uniq.insert(kid) {
                return Err("Provided JWKs contain duplicate kid parameter values");
            }
        }

        Ok(JwkSet { keys })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::{
        json_object,
        test_utils::{symbolic_ec_private_key, symbolic_registry, test_rsa_modulus},
        Curve, KeyOperation,
    };

    /// RSA public key of [RFC7517] appendix A.1, also used by the thumbprint
    /// example of [RFC7638].
    ///
    /// [RFC7517]: https://datatracker.ietf.org/doc/html/rfc7517#appendix-A.1
    /// [RFC7638]: https://www.rfc-editor.org/rfc/rfc7638.html#section-3.1
    pub(crate) const RFC7517_RSA_N: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    // https://datatracker.ietf.org/doc/html/rfc7517#appendix-A.1
    #[test]
    fn jwk_set_example_serialization() {
        let jwk_set = json!({"keys":
          [
            {"kty":"EC",
             "crv":"P-256",
             "x":"MKBCTNIcKUSDii11ySs3526iDZ8AiTo7Tu6KPAqv7D4",
             "y":"4Etl6SRW2YiLUrN5vfvVHuhp7x8PxltmWWlbbM4IFyM",
             "use":"enc",
             "kid":"1"},

            {"kty":"RSA",
             "n": RFC7517_RSA_N,
             "e":"AQAB",
             "alg":"RS256",
             "kid":"2011-04-29"}
          ]
        });

        let deserialized = serde_json::from_str::<JwkSet>(jwk_set.to_string().as_str()).unwrap();
        let serialized = serde_json::to_string(&deserialized).unwrap();

        assert_eq!(deserialized.find("1").unwrap()["kty"], "EC");
        assert_eq!(deserialized.find("2011-04-29").unwrap()["kty"], "RSA");
        assert!(deserialized.find("2").is_none());
        assert_eq!(serialized, jwk_set.to_string().as_str());
    }

    #[test]
    fn invalid_jwk_set_duplicate_kid() {
        let jwk_set = json!({"keys":
          [
            { "kid": "1" },
            { "kid": "1" }
          ]
        });

        let error = serde_json::from_str::<JwkSet>(jwk_set.to_string().as_str());

        assert_eq!(
            error.unwrap_err().to_string(),
            "Provided JWKs contain duplicate kid parameter values"
        );
    }

    #[test]
    fn invalid_jwk_set_some_jwks_without_kid() {
        let keys = vec![json_object!({ "kid": "1" }), json_object!({ "key": "1" })];

        assert_eq!(
            JwkSet::try_from(keys).unwrap_err(),
            "Some of the provided JWKs contain kid parameter values and some don't"
        );
    }

    #[test]
    fn rsa_public_jwk_is_parsed() {
        let registry = symbolic_registry();
        let jwk = json_object!({
            "kty": "RSA",
            "n": RFC7517_RSA_N,
            "e": "AQAB",
            "kid": "2011-04-29",
        });

        let key = Key::from_jwk(&registry, &jwk).unwrap();

        let Key::RsaPublic(rsa) = &key else {
            unreachable!("RSA public key expected")
        };
        assert_eq!(rsa.modulus_bits(), 2048);
        assert_eq!(rsa.exponent(), &[1, 0, 1]);

        // metadata is not part of the key
        assert_eq!(
            key.to_jwk(),
            json_object!({"kty": "RSA", "n": RFC7517_RSA_N, "e": "AQAB"})
        );
    }

    #[test]
    fn rfc7638_thumbprint_input() {
        let registry = symbolic_registry();
        let jwk = json_object!({"kty": "RSA", "n": RFC7517_RSA_N, "e": "AQAB", "alg": "RS256"});
        let key = Key::from_jwk(&registry, &jwk).unwrap();

        assert_eq!(
            key.thumbprint_input(),
            format!("{{\"e\":\"AQAB\",\"kty\":\"RSA\",\"n\":\"{RFC7517_RSA_N}\"}}")
        );
    }

    #[test]
    fn private_and_public_keys_share_thumbprint() {
        let registry = symbolic_registry();
        let private = symbolic_ec_private_key(&registry, Curve::P384, 5);
        let public = private.to_public().unwrap();

        assert_eq!(
            private.thumbprint(&registry, HashAlgorithm::Sha256).unwrap(),
            public.thumbprint(&registry, HashAlgorithm::Sha256).unwrap(),
        );
        assert!(!private.thumbprint_input().contains("\"d\""));
    }

    #[test]
    fn ec_private_jwk_round_trip() {
        let registry = symbolic_registry();
        let key = symbolic_ec_private_key(&registry, Curve::P256, 7);

        let jwk = key.to_jwk();
        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["crv"], "P-256");
        assert!(jwk.contains_key("d"));

        assert_eq!(Key::from_jwk(&registry, &jwk).unwrap(), key);

        let public_jwk = key.to_public_jwk().unwrap();
        assert!(!public_jwk.contains_key("d"));
        let public = Key::from_jwk(&registry, &public_jwk).unwrap();
        assert!(public.supports(KeyOperation::Verify));
    }

    #[test]
    fn symmetric_jwk() {
        let registry = symbolic_registry();
        // RFC 7515 appendix A.1
        let jwk = json_object!({
            "kty": "oct",
            "k": "AyM1SysPpbyDfgZld3umj1qzKObwVMkoqQ-EstJQLr_T-1qS0gZH75aKtMN3Yj0iPS4hcgUuTwjAzZr1Z9CAow"
        });

        let key = Key::from_jwk(&registry, &jwk).unwrap();

        let Key::Symmetric(secret) = &key else {
            unreachable!("symmetric key expected")
        };
        assert_eq!(secret.len(), 64);
        assert_eq!(key.to_jwk(), jwk);
        assert!(key.to_public_jwk().is_none());
    }

    #[test]
    fn rsa_private_jwk_crt_members_all_or_none() {
        let registry = symbolic_registry();
        let n = base64_url_encode(test_rsa_modulus(2048));
        let part = base64_url_encode([3u8; 128]);

        let jwk = json_object!({"kty": "RSA", "n": n, "e": "AQAB", "d": part});
        let key = Key::from_jwk(&registry, &jwk).unwrap();
        assert!(key.supports(KeyOperation::Sign));
        assert_eq!(key.to_jwk(), jwk);

        let with_crt = json_object!({
            "kty": "RSA", "n": n, "e": "AQAB", "d": part,
            "p": part, "q": part, "dp": part, "dq": part, "qi": part
        });
        let key = Key::from_jwk(&registry, &with_crt).unwrap();
        assert_eq!(key.to_jwk(), with_crt);

        let partial = json_object!({"kty": "RSA", "n": n, "e": "AQAB", "d": part, "p": part});
        let err = Key::from_jwk(&registry, &partial).unwrap_err();
        assert_eq!(
            err.error,
            JoseError::InvalidKeyMaterial("RSA CRT parameters must be given all or none".to_owned())
        );
    }

    #[test]
    fn invalid_jwks_are_rejected() {
        let registry = symbolic_registry();

        let cases = [
            json_object!({"k": "AAAA"}),
            json_object!({"kty": "OKP", "crv": "Ed25519", "x": "AAAA"}),
            json_object!({"kty": "oct"}),
            json_object!({"kty": "oct", "k": 42}),
            json_object!({"kty": "oct", "k": "AAAA="}),
            json_object!({"kty": "EC", "crv": "P-256", "x": "AAAA", "y": "AAAA"}),
            json_object!({"kty": "EC", "crv": "secp256k1", "x": "AAAA", "y": "AAAA"}),
            json_object!({"kty": "RSA", "n": "AAAA", "e": "AQAB"}),
        ];

        for jwk in cases {
            let err = Key::from_jwk(&registry, &jwk).unwrap_err();
            assert_matches!(err.error, JoseError::InvalidKeyMaterial(_), "{jwk:?}");
        }
    }

    #[test]
    fn jwk_set_finds_keys() {
        let registry = symbolic_registry();
        let key = symbolic_ec_private_key(&registry, Curve::P256, 9);
        let mut jwk = key.to_public_jwk().unwrap();
        jwk.insert("kid".to_owned(), "signing".into());

        let set = JwkSet::try_from(vec![jwk]).unwrap();

        assert_eq!(set.keys().len(), 1);
        assert_eq!(
            set.find_key(&registry, "signing").unwrap(),
            key.to_public()
        );
        assert_eq!(set.find_key(&registry, "other").unwrap(), None);
        assert_eq!(JwkSet::empty().find("signing"), None);
    }
}
