//! Small dense row-major matrix for the least-squares fits used by PSF
//! fitting and transform estimation.

use std::ops::{Index, IndexMut, Mul};

/// Pivots smaller than this fraction of the largest entry count as singular.
const SINGULAR_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "Matrix data length {} does not match {}x{}",
            data.len(),
            rows,
            cols
        );
        Self { rows, cols, data }
    }

    pub fn from_rows<const C: usize>(rows: &[[f64; C]]) -> Self {
        Self {
            rows: rows.len(),
            cols: C,
            data: rows.iter().flatten().copied().collect(),
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    pub fn transpose(&self) -> Matrix {
        let mut t = Matrix::zeros(self.cols, self.rows);
        for r in 0..self.rows {
            for c in 0..self.cols {
                t[(c, r)] = self[(r, c)];
            }
        }
        t
    }

    pub fn mul_mat(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            self.cols, other.rows,
            "Cannot multiply {}x{} by {}x{}",
            self.rows, self.cols, other.rows, other.cols
        );
        let mut out = Matrix::zeros(self.rows, other.cols);
        for r in 0..self.rows {
            for k in 0..self.cols {
                let a = self[(r, k)];
                if a == 0.0 {
                    continue;
                }
                for c in 0..other.cols {
                    out[(r, c)] += a * other[(k, c)];
                }
            }
        }
        out
    }

    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.cols, v.len(), "Vector length must equal column count");
        (0..self.rows)
            .map(|r| self.row(r).iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// Determinant via LU decomposition with partial pivoting.
    pub fn determinant(&self) -> f64 {
        assert_eq!(self.rows, self.cols, "Determinant needs a square matrix");
        let n = self.rows;
        let mut a = self.data.clone();
        let mut det = 1.0;

        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|&i, &j| a[i * n + col].abs().total_cmp(&a[j * n + col].abs()))
                .unwrap_or(col);
            let pivot = a[pivot_row * n + col];
            if pivot == 0.0 {
                return 0.0;
            }
            if pivot_row != col {
                for c in 0..n {
                    a.swap(col * n + c, pivot_row * n + c);
                }
                det = -det;
            }
            det *= pivot;
            for row in (col + 1)..n {
                let factor = a[row * n + col] / pivot;
                for c in col..n {
                    a[row * n + c] -= factor * a[col * n + c];
                }
            }
        }
        det
    }

    /// Inverse by Gauss-Jordan elimination with partial pivoting.
    /// Returns `None` for singular matrices.
    pub fn inverse(&self) -> Option<Matrix> {
        assert_eq!(self.rows, self.cols, "Inverse needs a square matrix");
        let n = self.rows;
        let scale = self.max_abs();
        if scale == 0.0 {
            return None;
        }
        let mut a = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            let pivot_row = a.pivot_row(col);
            if a[(pivot_row, col)].abs() <= SINGULAR_EPS * scale {
                return None;
            }
            a.swap_rows(col, pivot_row);
            inv.swap_rows(col, pivot_row);

            let pivot = a[(col, col)];
            for c in 0..n {
                a[(col, c)] /= pivot;
                inv[(col, c)] /= pivot;
            }
            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = a[(row, col)];
                if factor == 0.0 {
                    continue;
                }
                for c in 0..n {
                    a[(row, c)] -= factor * a[(col, c)];
                    inv[(row, c)] -= factor * inv[(col, c)];
                }
            }
        }
        Some(inv)
    }

    /// Solves the square system `self * x = b`.
    pub fn solve(&self, b: &[f64]) -> Option<Vec<f64>> {
        assert_eq!(self.rows, self.cols, "Solve needs a square matrix");
        assert_eq!(self.rows, b.len(), "Right-hand side length mismatch");
        let n = self.rows;
        let scale = self.max_abs();
        if scale == 0.0 {
            return None;
        }
        let mut a = self.clone();
        let mut rhs = b.to_vec();

        for col in 0..n {
            let pivot_row = a.pivot_row(col);
            if a[(pivot_row, col)].abs() <= SINGULAR_EPS * scale {
                return None;
            }
            a.swap_rows(col, pivot_row);
            rhs.swap(col, pivot_row);

            for row in (col + 1)..n {
                let factor = a[(row, col)] / a[(col, col)];
                for c in col..n {
                    a[(row, c)] -= factor * a[(col, c)];
                }
                rhs[row] -= factor * rhs[col];
            }
        }

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let sum: f64 = ((i + 1)..n).map(|j| a[(i, j)] * x[j]).sum();
            x[i] = (rhs[i] - sum) / a[(i, i)];
        }
        Some(x)
    }

    /// Least-squares solution of the overdetermined system `self * x ≈ b`
    /// through the normal equations. `None` when the columns are linearly dependent.
    pub fn least_squares(&self, b: &[f64]) -> Option<Vec<f64>> {
        assert_eq!(self.rows, b.len(), "Right-hand side length mismatch");
        if self.rows < self.cols {
            return None;
        }
        let at = self.transpose();
        let ata = at.mul_mat(self);
        let atb = at.mul_vec(b);
        ata.solve(&atb)
    }

    fn pivot_row(&self, col: usize) -> usize {
        (col..self.rows)
            .max_by(|&i, &j| self[(i, col)].abs().total_cmp(&self[(j, col)].abs()))
            .unwrap_or(col)
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for c in 0..self.cols {
            self.data.swap(a * self.cols + c, b * self.cols + c);
        }
    }

    fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0f64, |m, v| m.max(v.abs()))
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    #[inline]
    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline]
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.cols + c]
    }
}

impl Mul for &Matrix {
    type Output = Matrix;

    fn mul(self, rhs: &Matrix) -> Matrix {
        self.mul_mat(rhs)
    }
}
