//! Constant-time point arithmetic backed by the RustCrypto curve crates.
//!
//! Every function is generic over the curve so the dispatch in
//! [`NamedCurve`](super::NamedCurve) stays a one-liner per curve. Coordinates
//! are fixed-width big-endian byte strings whose length is the field size of
//! `C`.

use elliptic_curve::{
    ff::PrimeField,
    group::Curve as _,
    sec1::{EncodedPoint, FromEncodedPoint, ModulusSize, ToEncodedPoint},
    AffinePoint, CurveArithmetic, FieldBytes, FieldBytesSize, ProjectivePoint,
};

use crate::error::{PseudoError, Result};

fn field_bytes<C>(bytes: &[u8]) -> Result<FieldBytes<C>>
where
    C: CurveArithmetic,
    FieldBytesSize<C>: ModulusSize,
{
    if bytes.len() != FieldBytes::<C>::default().len() {
        return Err(PseudoError::InvalidPseudonym(format!(
            "expected {} bytes per field element, got {}",
            FieldBytes::<C>::default().len(),
            bytes.len()
        )));
    }
    Ok(FieldBytes::<C>::clone_from_slice(bytes))
}

fn decode_affine<C>(x: &[u8], y: &[u8]) -> Result<AffinePoint<C>>
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let x = field_bytes::<C>(x)?;
    let y = field_bytes::<C>(y)?;
    let encoded = EncodedPoint::<C>::from_affine_coordinates(&x, &y, false);
    Option::from(AffinePoint::<C>::from_encoded_point(&encoded))
        .ok_or_else(|| PseudoError::InvalidPseudonym("point is not on the curve".to_string()))
}

fn affine_coordinates<C>(point: &AffinePoint<C>) -> Option<(Vec<u8>, Vec<u8>)>
where
    C: CurveArithmetic,
    AffinePoint<C>: ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let encoded = point.to_encoded_point(false);
    match (encoded.x(), encoded.y()) {
        (Some(x), Some(y)) => Some((x.to_vec(), y.to_vec())),
        _ => None,
    }
}

/// Fail unless `(x, y)` is a point of `C`.
pub fn validate<C>(x: &[u8], y: &[u8]) -> Result<()>
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    decode_affine::<C>(x, y).map(|_| ())
}

/// Compute `k·(x, y)` and return the affine coordinates of the product.
pub fn multiply<C>(x: &[u8], y: &[u8], k: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let point = decode_affine::<C>(x, y)?;
    let repr = field_bytes::<C>(k)
        .map_err(|_| PseudoError::Crypto("scalar has the wrong length".to_string()))?;
    let scalar: C::Scalar = Option::from(C::Scalar::from_repr(repr))
        .ok_or_else(|| PseudoError::Crypto("scalar is not reduced modulo n".to_string()))?;

    let product = (ProjectivePoint::<C>::from(point) * scalar).to_affine();
    affine_coordinates::<C>(&product).ok_or_else(|| {
        PseudoError::Crypto("scalar multiplication reached the point at infinity".to_string())
    })
}

/// Decode a SEC1 point (`02`/`03` compressed or `04` uncompressed) into its
/// affine coordinates. The identity is rejected.
pub fn decode_sec1<C>(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)>
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let encoded = EncodedPoint::<C>::from_bytes(bytes)
        .map_err(|e| PseudoError::InvalidPseudonym(format!("invalid SEC1 representation of the point: {e}")))?;
    let point: AffinePoint<C> = Option::from(AffinePoint::<C>::from_encoded_point(&encoded))
        .ok_or_else(|| PseudoError::InvalidPseudonym("point is not on the curve".to_string()))?;
    affine_coordinates::<C>(&point)
        .ok_or_else(|| PseudoError::InvalidPseudonym("point at infinity".to_string()))
}

/// SEC1 encoding of `(x, y)`, compressed to the parity of `y` when asked.
/// Coordinates shorter than the field size are left-padded.
pub fn encode_sec1<C>(x: &[u8], y: &[u8], compress: bool) -> Vec<u8>
where
    C: CurveArithmetic,
    FieldBytesSize<C>: ModulusSize,
{
    let x = padded_field_bytes::<C>(x);
    let y = padded_field_bytes::<C>(y);
    EncodedPoint::<C>::from_affine_coordinates(&x, &y, compress)
        .as_bytes()
        .to_vec()
}

fn padded_field_bytes<C>(bytes: &[u8]) -> FieldBytes<C>
where
    C: CurveArithmetic,
{
    let mut out = FieldBytes::<C>::default();
    let len = out.len();
    let bytes = &bytes[bytes.len().saturating_sub(len)..];
    out[len - bytes.len()..].copy_from_slice(bytes);
    out
}
