//! Reversal of the prediction schemes applied before compression.
//!
//! Horizontal differencing stores each sample as the difference from the
//! sample one pixel to the left, restarting at every row. The floating
//! point scheme differences at the byte level and additionally splits each
//! row into byte planes ordered most significant first, so undoing it
//! happens on raw bytes before samples are assembled.

pub(crate) trait Wrapping: Copy {
    fn wrapping_add(self, other: Self) -> Self;
}

macro_rules! impl_wrapping {
    ($($ty:ty),*) => {
        $(impl Wrapping for $ty {
            fn wrapping_add(self, other: Self) -> Self {
                <$ty>::wrapping_add(self, other)
            }
        })*
    };
}

impl_wrapping!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Undo horizontal differencing in place.
///
/// `row_samples` is the length of one differencing run and `interleave` the
/// number of samples woven per pixel, so a sample accumulates onto the
/// sample one whole pixel earlier.
pub(crate) fn unpredict_horizontal<T: Wrapping>(
    samples: &mut [T],
    row_samples: usize,
    interleave: usize,
) {
    if row_samples == 0 || interleave == 0 {
        return;
    }
    for row in samples.chunks_mut(row_samples) {
        for i in interleave..row.len() {
            row[i] = row[i].wrapping_add(row[i - interleave]);
        }
    }
}

/// Undo floating point prediction in place over rows of `row_bytes` bytes.
///
/// Each row is first accumulated bytewise with a stride of `interleave`,
/// then gathered out of its byte planes. The output holds big-endian
/// samples of `byte_len` bytes regardless of the file's byte order; the
/// caller assembles elements accordingly.
pub(crate) fn unpredict_float(
    buf: &mut [u8],
    row_bytes: usize,
    interleave: usize,
    byte_len: usize,
) {
    if row_bytes == 0 || interleave == 0 || byte_len == 0 {
        return;
    }
    let mut scratch = vec![0u8; row_bytes];
    for row in buf.chunks_mut(row_bytes) {
        for i in interleave..row.len() {
            row[i] = row[i].wrapping_add(row[i - interleave]);
        }
        let scratch = &mut scratch[..row.len()];
        scratch.copy_from_slice(row);
        let plane = row.len() / byte_len;
        for sample in 0..plane {
            for byte in 0..byte_len {
                row[sample * byte_len + byte] = scratch[byte * plane + sample];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_restarts_at_each_row() {
        let mut samples = [1u8, 1, 1, 10, 1, 1];
        unpredict_horizontal(&mut samples, 3, 1);
        assert_eq!(samples, [1, 2, 3, 10, 11, 12]);
    }

    #[test]
    fn horizontal_strides_by_pixel() {
        let mut samples = [1u16, 2, 1, 1, 1, 1];
        unpredict_horizontal(&mut samples, 6, 2);
        assert_eq!(samples, [1, 2, 2, 3, 3, 4]);
    }

    #[test]
    fn horizontal_wraps_signed_samples() {
        let mut samples = [127i8, 1, -2];
        unpredict_horizontal(&mut samples, 3, 1);
        assert_eq!(samples, [127, -128, 126]);
    }

    /// Difference and shuffle one row the way a writer would.
    fn predict_row(values: &[f32], interleave: usize) -> Vec<u8> {
        let be: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let plane = values.len();
        let mut shuffled = vec![0u8; be.len()];
        for sample in 0..plane {
            for byte in 0..4 {
                shuffled[byte * plane + sample] = be[sample * 4 + byte];
            }
        }
        for i in (interleave..shuffled.len()).rev() {
            shuffled[i] = shuffled[i].wrapping_sub(shuffled[i - interleave]);
        }
        shuffled
    }

    #[test]
    fn float_prediction_round_trips() {
        let values = [1.5f32, -0.25, 1024.0, 0.0009765625];
        let mut row = predict_row(&values, 1);
        unpredict_float(&mut row, 16, 1, 4);
        let decoded: Vec<f32> = row
            .chunks_exact(4)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn float_rows_are_independent() {
        let top = [0.5f32, 2.0];
        let bottom = [-8.0f32, 0.125];
        let mut rows = predict_row(&top, 1);
        rows.extend(predict_row(&bottom, 1));
        unpredict_float(&mut rows, 8, 1, 4);
        let decoded: Vec<f32> = rows
            .chunks_exact(4)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(decoded, [0.5, 2.0, -8.0, 0.125]);
    }
}
