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

use std::sync::Arc;

use crate::{AlgorithmRegistry, Curve, Key};

pub(crate) mod symbolic_crypto;

pub(crate) use symbolic_crypto::SymbolicProvider;

/// Registry backed by the [`SymbolicProvider`].
pub(crate) fn symbolic_registry() -> AlgorithmRegistry {
    AlgorithmRegistry::new(Arc::new(SymbolicProvider::default()))
}

/// Symbolic EC private key, with all bytes of the private scalar set to
/// `seed`. Only meaningful with the [`SymbolicProvider`].
pub(crate) fn symbolic_ec_private_key(
    registry: &AlgorithmRegistry,
    curve: Curve,
    seed: u8,
) -> Key {
    assert_ne!(seed, 0, "the private scalar must not be zero");
    let components =
        symbolic_crypto::symbolic_ec_components(curve, vec![seed; curve.coordinate_len()]);
    Key::ec_private(registry, curve, &components.x, &components.y, &components.d).unwrap()
}

/// Dummy RSA modulus of exactly `bits` bits. Not a product of two primes, so
/// only usable with the [`SymbolicProvider`].
pub(crate) fn test_rsa_modulus(bits: usize) -> Vec<u8> {
    let mut modulus = vec![0xA7; bits / 8];
    modulus[0] = 0xC5;
    modulus
}

/// Symbolic RSA key pair with a 2048-bit modulus.
pub(crate) fn symbolic_rsa_key_pair() -> (Key, Key) {
    let n = test_rsa_modulus(2048);
    let private = Key::rsa_private(&n, &[1, 0, 1], &[0x5D; 256], None).unwrap();
    let public = private.to_public().unwrap();
    (private, public)
}
