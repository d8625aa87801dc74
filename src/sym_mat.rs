//! Packed symmetric 8×8 matrix.
//!
//! The covariance of an 8-parameter state is symmetric, so only the lower
//! triangle is stored: 36 elements, row by row. The packed index arithmetic
//! lives here and nowhere else; the rest of the crate goes through
//! [`SymMat8::at`] / [`SymMat8::at_mut`] or, in the hot combination loops,
//! through the documented raw layout of [`SymMat8::packed`].

/// Symmetric 8×8 matrix stored as the 36-element lower triangle.
///
/// Element `(i, j)` with `i ≥ j` lives at packed index `i(i+1)/2 + j`:
///
/// ```text
///  0
///  1  2
///  3  4  5
///  6  7  8  9
/// 10 11 12 13 14
/// 15 16 17 18 19 20
/// 21 22 23 24 25 26 27
/// 28 29 30 31 32 33 34 35
/// ```
///
/// Symmetry is unconditional by construction: there is no way to store an
/// asymmetric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymMat8 {
    m: [f64; 36],
}

impl SymMat8 {
    /// Packed index of element `(i, j)`, valid for any order of the indices.
    #[inline]
    pub const fn idx(i: usize, j: usize) -> usize {
        if i >= j {
            i * (i + 1) / 2 + j
        } else {
            j * (j + 1) / 2 + i
        }
    }

    /// All-zero matrix.
    pub const fn zeros() -> Self {
        Self { m: [0.0; 36] }
    }

    /// Build from an already packed lower triangle.
    pub const fn from_packed(m: [f64; 36]) -> Self {
        Self { m }
    }

    /// Diagonal matrix from 8 variances.
    pub fn from_diagonal(d: [f64; 8]) -> Self {
        let mut out = Self::zeros();
        for (i, v) in d.into_iter().enumerate() {
            out.m[Self::idx(i, i)] = v;
        }
        out
    }

    /// Read element `(i, j)`.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.m[Self::idx(i, j)]
    }

    /// Mutable access to element `(i, j)`.
    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize) -> &mut f64 {
        &mut self.m[Self::idx(i, j)]
    }

    /// The packed lower triangle.
    #[inline]
    pub fn packed(&self) -> &[f64; 36] {
        &self.m
    }

    /// Mutable packed lower triangle.
    #[inline]
    pub fn packed_mut(&mut self) -> &mut [f64; 36] {
        &mut self.m
    }

    /// Similarity transform `F · C · Fᵀ` with a full 8×8 Jacobian.
    ///
    /// This is the covariance transport sandwich: the result stays symmetric
    /// and, for well-conditioned inputs, positive semi-definite. Total
    /// function, defined for every real Jacobian.
    pub fn similarity(&self, f: &[[f64; 8]; 8]) -> SymMat8 {
        // A = F * C, full storage
        let mut a = [[0.0; 8]; 8];
        for (i, fi) in f.iter().enumerate() {
            for j in 0..8 {
                let mut s = 0.0;
                for (k, fik) in fi.iter().enumerate() {
                    s += fik * self.at(k, j);
                }
                a[i][j] = s;
            }
        }
        // out(i,j) = sum_k A[i][k] * F[j][k], lower triangle only
        let mut out = SymMat8::zeros();
        for i in 0..8 {
            for j in 0..=i {
                let mut s = 0.0;
                for k in 0..8 {
                    s += a[i][k] * f[j][k];
                }
                out.m[Self::idx(i, j)] = s;
            }
        }
        out
    }
}

#[cfg(test)]
mod sym_mat_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_packed_index_layout() {
        assert_eq!(SymMat8::idx(0, 0), 0);
        assert_eq!(SymMat8::idx(2, 1), 4);
        assert_eq!(SymMat8::idx(3, 3), 9);
        assert_eq!(SymMat8::idx(7, 0), 28);
        assert_eq!(SymMat8::idx(7, 7), 35);
        // order of indices must not matter
        assert_eq!(SymMat8::idx(1, 5), SymMat8::idx(5, 1));
    }

    #[test]
    fn test_at_roundtrip() {
        let mut c = SymMat8::zeros();
        *c.at_mut(4, 2) = 3.5;
        assert_eq!(c.at(2, 4), 3.5);
        assert_eq!(c.packed()[SymMat8::idx(4, 2)], 3.5);
    }

    #[test]
    fn test_similarity_against_dense_product() {
        // pseudo-random symmetric C and dense F, compare with a naive
        // triple product on full 8x8 storage
        let mut c = SymMat8::zeros();
        let mut f = [[0.0; 8]; 8];
        let mut seed = 1u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 11) as f64 / (1u64 << 53) as f64 - 0.5
        };
        for i in 0..8 {
            for j in 0..=i {
                *c.at_mut(i, j) = next();
            }
        }
        for row in f.iter_mut() {
            for v in row.iter_mut() {
                *v = next();
            }
        }

        let got = c.similarity(&f);

        for i in 0..8 {
            for j in 0..8 {
                let mut want = 0.0;
                for k in 0..8 {
                    for l in 0..8 {
                        want += f[i][k] * c.at(k, l) * f[j][l];
                    }
                }
                assert_relative_eq!(got.at(i, j), want, max_relative = 1e-12, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_similarity_identity() {
        let c = SymMat8::from_diagonal([1., 2., 3., 4., 5., 6., 7., 8.]);
        let mut id = [[0.0; 8]; 8];
        for (i, row) in id.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        assert_eq!(c.similarity(&id), c);
    }
}
