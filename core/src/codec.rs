//! Variable-byte gap encoding of sorted feature vectors.
//!
//! Gaps between successive feature ids (with an implicit leading zero) are
//! split into 7-bit groups written most-significant group first. The high bit
//! is clear on every byte except the last byte of each number, which carries
//! the terminator bit. See the Stanford IR book on variable byte codes.

use crate::error::{Error, Result};
use crate::FeatureId;

/// Hard cap on features per document; more indicates a corrupt record.
pub const MAX_FEATURES: usize = 1000;

/// Encode a strictly increasing feature vector as variable-byte gaps.
pub fn vb_encode(features: &[FeatureId]) -> Result<Vec<u8>> {
    if features.len() > MAX_FEATURES {
        return Err(Error::MalformedRecord(format!(
            "feature vector has {} entries, cap is {MAX_FEATURES}",
            features.len()
        )));
    }
    let mut out = Vec::with_capacity(features.len() * 2);
    let mut last: FeatureId = 0;
    for (i, &feat) in features.iter().enumerate() {
        if i > 0 && feat <= last {
            return Err(Error::MalformedRecord(format!(
                "feature ids must be strictly increasing: {feat} after {last}"
            )));
        }
        let mut gap = feat - last;
        last = feat;
        // Little-end group first into scratch, then reversed so the
        // most-significant group leads and the terminator byte trails.
        let mut groups = [0u8; 5];
        groups[0] = 0x80 | (gap & 0x7f) as u8;
        let mut len = 1;
        gap >>= 7;
        while gap > 0 {
            groups[len] = (gap & 0x7f) as u8;
            len += 1;
            gap >>= 7;
        }
        out.extend(groups[..len].iter().rev());
    }
    Ok(out)
}

/// Decode a variable-byte gap stream into `out` (cleared first).
///
/// Fails if the stream ends mid-number, if a decoded value does not strictly
/// increase, or if more than [`MAX_FEATURES`] values are produced.
pub fn vb_decode(bytes: &[u8], out: &mut Vec<FeatureId>) -> Result<()> {
    out.clear();
    let mut gap: u64 = 0;
    let mut last: FeatureId = 0;
    let mut mid_number = false;
    for &byte in bytes {
        gap = (gap << 7) | u64::from(byte & 0x7f);
        if gap > u64::from(u32::MAX) {
            return Err(Error::MalformedRecord(
                "encoded gap exceeds 32 bits".into(),
            ));
        }
        mid_number = true;
        if byte & 0x80 != 0 {
            if !out.is_empty() && gap == 0 {
                return Err(Error::MalformedRecord(
                    "decoded feature ids are not strictly increasing".into(),
                ));
            }
            last = last.checked_add(gap as FeatureId).ok_or_else(|| {
                Error::MalformedRecord("decoded feature id exceeds 32 bits".into())
            })?;
            if out.len() == MAX_FEATURES {
                return Err(Error::MalformedRecord(format!(
                    "encoded vector exceeds the {MAX_FEATURES}-feature cap"
                )));
            }
            out.push(last);
            gap = 0;
            mid_number = false;
        }
    }
    if mid_number {
        return Err(Error::MalformedRecord(
            "encoded vector ends without a terminator byte".into(),
        ));
    }
    Ok(())
}
