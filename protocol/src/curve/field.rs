//! Big-integer helpers over the prime field and the group order.
//!
//! Only the operations the RustCrypto curve crates do not expose on plain
//! integers live here: evaluating the curve equation for an arbitrary `x`,
//! square roots (used by the value encoding's search for `x`) and modular
//! inversion of blinding scalars.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use super::CurveParams;

/// `x³ + a·x + b mod p`.
pub fn curve_rhs(params: &CurveParams, x: &BigUint) -> BigUint {
    let p = &params.p;
    let x = x % p;
    let x3 = x.modpow(&BigUint::from(3u32), p);
    (x3 + &params.a * &x + &params.b) % p
}

/// Square root of `v` modulo `p`, if `v` is a quadratic residue.
///
/// Every supported prime satisfies `p ≡ 3 (mod 4)`, so the root is
/// `v^((p+1)/4)`; the result is squared back to reject non-residues.
pub fn sqrt(v: &BigUint, p: &BigUint) -> Option<BigUint> {
    let v = v % p;
    if v.is_zero() {
        return Some(BigUint::zero());
    }
    let exponent = (p + BigUint::one()) >> 2;
    let root = v.modpow(&exponent, p);
    if (&root * &root) % p == v {
        Some(root)
    } else {
        None
    }
}

/// `k⁻¹ mod n` for a prime `n`, via Fermat's little theorem.
pub fn mod_inverse(k: &BigUint, n: &BigUint) -> Option<BigUint> {
    let k = k % n;
    if k.is_zero() {
        return None;
    }
    Some(k.modpow(&(n - BigUint::from(2u32)), n))
}
