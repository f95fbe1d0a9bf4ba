//! Reversible 5/3 Discrete Wavelet Transform for JPEG 2000 (annex F).
//!
//! Lifting is done in place on an interleaved signal with whole-sample
//! symmetric extension, then split into low (even) and high (odd) halves.

/// Dimensions of the four subbands produced by one 2D decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubbandDims {
    /// LL and LH width (low-pass columns).
    pub low_width: u32,
    /// HL and HH width (high-pass columns).
    pub high_width: u32,
    /// LL and HL height (low-pass rows).
    pub low_height: u32,
    /// LH and HH height (high-pass rows).
    pub high_height: u32,
}

impl SubbandDims {
    pub fn of(width: u32, height: u32) -> Self {
        Self {
            low_width: width.div_ceil(2),
            high_width: width / 2,
            low_height: height.div_ceil(2),
            high_height: height / 2,
        }
    }

    pub fn ll_len(&self) -> usize {
        self.low_width as usize * self.low_height as usize
    }

    pub fn hl_len(&self) -> usize {
        self.high_width as usize * self.low_height as usize
    }

    pub fn lh_len(&self) -> usize {
        self.low_width as usize * self.high_height as usize
    }

    pub fn hh_len(&self) -> usize {
        self.high_width as usize * self.high_height as usize
    }

    pub fn detail_len(&self) -> usize {
        self.hl_len() + self.lh_len() + self.hh_len()
    }
}

/// Width and height of the image after `level` decompositions.
pub fn level_dims(width: u32, height: u32, level: u8) -> (u32, u32) {
    let mut dims = (width, height);
    for _ in 0..level {
        dims = (dims.0.div_ceil(2), dims.1.div_ceil(2));
    }
    dims
}

/// The four subbands of one decomposition level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subbands {
    pub ll: Vec<i32>,
    pub hl: Vec<i32>,
    pub lh: Vec<i32>,
    pub hh: Vec<i32>,
}

pub struct Dwt53;

impl Dwt53 {
    /// Forward 5/3 transform (1D). `out_l` gets ceil(n/2) values, `out_h` floor(n/2).
    pub fn forward(signal: &[i32], out_l: &mut [i32], out_h: &mut [i32]) {
        let len = signal.len();
        if len == 0 {
            return;
        }
        if len == 1 {
            out_l[0] = signal[0];
            return;
        }
        let mut x = signal.to_vec();

        // Prediction: y[2n+1] = x[2n+1] - floor((x[2n] + x[2n+2]) / 2)
        for i in (1..len).step_by(2) {
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] -= (x[i - 1] + right) >> 1;
        }
        // Update: y[2n] = x[2n] + floor((y[2n-1] + y[2n+1] + 2) / 4)
        for i in (0..len).step_by(2) {
            let left = if i > 0 { x[i - 1] } else { x[i + 1] };
            let right = if i + 1 < len { x[i + 1] } else { x[i - 1] };
            x[i] += (left + right + 2) >> 2;
        }

        for (i, value) in x.into_iter().enumerate() {
            if i % 2 == 0 {
                out_l[i / 2] = value;
            } else {
                out_h[i / 2] = value;
            }
        }
    }

    /// Inverse 5/3 transform (1D).
    pub fn inverse(in_l: &[i32], in_h: &[i32], output: &mut [i32]) {
        let len = output.len();
        if len == 0 {
            return;
        }
        if len == 1 {
            output[0] = in_l[0];
            return;
        }
        for (i, value) in output.iter_mut().enumerate() {
            *value = if i % 2 == 0 { in_l[i / 2] } else { in_h[i / 2] };
        }

        // Reverse update
        for i in (0..len).step_by(2) {
            let left = if i > 0 { output[i - 1] } else { output[i + 1] };
            let right = if i + 1 < len { output[i + 1] } else { output[i - 1] };
            output[i] -= (left + right + 2) >> 2;
        }
        // Reverse prediction
        for i in (1..len).step_by(2) {
            let right = if i + 1 < len { output[i + 1] } else { output[i - 1] };
            output[i] += (output[i - 1] + right) >> 1;
        }
    }

    /// Forward 2D transform: horizontal pass on rows, then vertical on columns.
    ///
    /// ```text
    /// +-------+-------+
    /// |  LL   |  HL   |  <- low-pass rows (top half)
    /// +-------+-------+
    /// |  LH   |  HH   |  <- high-pass rows (bottom half)
    /// +-------+-------+
    /// ```
    pub fn forward_2d(input: &[i32], width: u32, height: u32) -> Subbands {
        let w = width as usize;
        let h = height as usize;
        let dims = SubbandDims::of(width, height);
        let lw = dims.low_width as usize;
        let hw = dims.high_width as usize;

        // Rows: left half low-pass, right half high-pass.
        let mut temp = vec![0i32; w * h];
        let mut row_l = vec![0i32; lw];
        let mut row_h = vec![0i32; hw];
        for y in 0..h {
            Self::forward(&input[y * w..(y + 1) * w], &mut row_l, &mut row_h);
            temp[y * w..y * w + lw].copy_from_slice(&row_l);
            temp[y * w + lw..(y + 1) * w].copy_from_slice(&row_h);
        }

        let mut bands = Subbands {
            ll: vec![0; dims.ll_len()],
            hl: vec![0; dims.hl_len()],
            lh: vec![0; dims.lh_len()],
            hh: vec![0; dims.hh_len()],
        };
        let mut column = vec![0i32; h];
        let mut col_l = vec![0i32; dims.low_height as usize];
        let mut col_h = vec![0i32; dims.high_height as usize];
        for x in 0..w {
            for (y, value) in column.iter_mut().enumerate() {
                *value = temp[y * w + x];
            }
            Self::forward(&column, &mut col_l, &mut col_h);
            let (low, high, stride, cx) = if x < lw {
                (&mut bands.ll, &mut bands.lh, lw, x)
            } else {
                (&mut bands.hl, &mut bands.hh, hw, x - lw)
            };
            for (y, &value) in col_l.iter().enumerate() {
                low[y * stride + cx] = value;
            }
            for (y, &value) in col_h.iter().enumerate() {
                high[y * stride + cx] = value;
            }
        }
        bands
    }

    /// Inverse 2D transform: vertical pass on columns, then horizontal on rows.
    pub fn inverse_2d(bands: &Subbands, width: u32, height: u32, output: &mut [i32]) {
        let w = width as usize;
        let h = height as usize;
        let dims = SubbandDims::of(width, height);
        let lw = dims.low_width as usize;
        let hw = dims.high_width as usize;

        let mut temp = vec![0i32; w * h];
        let mut col_l = vec![0i32; dims.low_height as usize];
        let mut col_h = vec![0i32; dims.high_height as usize];
        let mut column = vec![0i32; h];
        for x in 0..w {
            let (low, high, stride, cx) = if x < lw {
                (&bands.ll, &bands.lh, lw, x)
            } else {
                (&bands.hl, &bands.hh, hw, x - lw)
            };
            for (y, value) in col_l.iter_mut().enumerate() {
                *value = low[y * stride + cx];
            }
            for (y, value) in col_h.iter_mut().enumerate() {
                *value = high[y * stride + cx];
            }
            Self::inverse(&col_l, &col_h, &mut column);
            for (y, &value) in column.iter().enumerate() {
                temp[y * w + x] = value;
            }
        }

        for y in 0..h {
            let row = &temp[y * w..(y + 1) * w];
            Self::inverse(&row[..lw], &row[lw..], &mut output[y * w..(y + 1) * w]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_1d(input: &[i32]) -> Vec<i32> {
        let len = input.len();
        let mut l = vec![0i32; len.div_ceil(2)];
        let mut h = vec![0i32; len / 2];
        Dwt53::forward(input, &mut l, &mut h);
        let mut output = vec![0i32; len];
        Dwt53::inverse(&l, &h, &mut output);
        output
    }

    #[test]
    fn test_dwt_53_roundtrip() {
        let input = [10, 20, 30, 40, 50, 60, 70, 80];
        assert_eq!(roundtrip_1d(&input), input);
    }

    #[test]
    fn test_dwt_53_odd_length() {
        let input = [10, -20, 30, 45, 50];
        assert_eq!(roundtrip_1d(&input), input);
    }

    #[test]
    fn test_dwt_53_short_signals() {
        assert_eq!(roundtrip_1d(&[-7]), vec![-7]);
        assert_eq!(roundtrip_1d(&[3, 9]), vec![3, 9]);
    }

    #[test]
    fn test_constant_signal_has_no_detail() {
        let input = [42; 9];
        let mut l = vec![0i32; 5];
        let mut h = vec![0i32; 4];
        Dwt53::forward(&input, &mut l, &mut h);
        assert!(h.iter().all(|&v| v == 0));
        assert!(l.iter().all(|&v| v == 42));
    }

    #[test]
    fn test_dwt_53_2d_roundtrip() {
        for (width, height) in [(8u32, 8u32), (7, 5), (1, 6), (5, 1), (1, 1)] {
            let input: Vec<i32> = (0..width * height)
                .map(|i| ((i * 37 + 11) % 255) as i32 - 128)
                .collect();
            let bands = Dwt53::forward_2d(&input, width, height);
            let dims = SubbandDims::of(width, height);
            assert_eq!(bands.ll.len(), dims.ll_len());
            assert_eq!(bands.hh.len(), dims.hh_len());

            let mut output = vec![0i32; input.len()];
            Dwt53::inverse_2d(&bands, width, height, &mut output);
            assert_eq!(output, input, "{width}x{height}");
        }
    }

    #[test]
    fn test_level_dims() {
        assert_eq!(level_dims(256, 256, 5), (8, 8));
        assert_eq!(level_dims(5, 3, 1), (3, 2));
        assert_eq!(level_dims(1, 1, 4), (1, 1));
    }
}
