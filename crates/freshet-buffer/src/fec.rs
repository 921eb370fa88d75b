#![forbid(unsafe_code)]

use bytes::Bytes;
#[cfg(test)]
use mockall::automock;

/// Forward-error-correction collaborator.
///
/// Given the data segments fetched so far (`None` where missing), the
/// parity segments, and the expected data segment count, an implementation
/// either reconstructs the full frame bytes or reports failure.
#[cfg_attr(test, automock)]
pub trait FecDecoder: Send + Sync {
    fn decode(
        &self,
        data: &[Option<Bytes>],
        parity: &[Option<Bytes>],
        n_data: usize,
    ) -> Option<Bytes>;
}

/// Decoder used when FEC is disabled: never recovers anything.
pub struct NoFec;

impl FecDecoder for NoFec {
    fn decode(
        &self,
        _data: &[Option<Bytes>],
        _parity: &[Option<Bytes>],
        _n_data: usize,
    ) -> Option<Bytes> {
        None
    }
}

/// Single-erasure XOR parity decoder.
///
/// Producers emitting XOR parity pad all segments of a frame to one size;
/// any single missing data segment is the XOR of the parity segment with
/// the remaining data segments.
pub struct XorParityFec;

impl FecDecoder for XorParityFec {
    fn decode(
        &self,
        data: &[Option<Bytes>],
        parity: &[Option<Bytes>],
        n_data: usize,
    ) -> Option<Bytes> {
        let missing: Vec<usize> = (0..n_data)
            .filter(|&i| data.get(i).map_or(true, |s| s.is_none()))
            .collect();

        let mut frame = Vec::new();
        match missing.as_slice() {
            [] => {
                for segment in data.iter().take(n_data) {
                    frame.extend_from_slice(segment.as_ref()?);
                }
            }
            [lost] => {
                let pad = parity.iter().flatten().next()?;
                let mut recovered = pad.to_vec();
                for segment in data.iter().take(n_data).flatten() {
                    if segment.len() != recovered.len() {
                        return None;
                    }
                    for (out, byte) in recovered.iter_mut().zip(segment.iter()) {
                        *out ^= byte;
                    }
                }
                for (i, segment) in data.iter().take(n_data).enumerate() {
                    if i == *lost {
                        frame.extend_from_slice(&recovered);
                    } else {
                        frame.extend_from_slice(segment.as_ref()?);
                    }
                }
            }
            _ => return None,
        }
        Some(Bytes::from(frame))
    }
}
