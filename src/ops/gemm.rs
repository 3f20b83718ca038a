//! General matrix multiply: `C = alpha * op(A) * op(B) + beta * C`.
//!
//! All matrices are row-major with explicit leading strides. `op(X)` is `X` or
//! `X^T`, chosen independently for `A` and `B`. With the `blas` feature the
//! call is forwarded to `cblas::sgemm`; otherwise a portable loop kernel runs.

/// Row-major GEMM with optional transposes.
///
/// `op(A)` is `m × k`, `op(B)` is `k × n` and `C` is `m × n`.
///
/// * `beta == 0.0` overwrites `C` (previous contents, NaN included, are discarded)
/// * `beta == 1.0` accumulates into `C`
///
/// # Panics
///
/// Panics if any slice is too short for the declared dimensions and strides,
/// or if a leading stride is smaller than the row length it must cover.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
    transpose_a: bool,
    transpose_b: bool,
    alpha: f32,
    beta: f32,
) {
    if m == 0 || n == 0 {
        return;
    }
    let (a_rows, a_cols) = if transpose_a { (k, m) } else { (m, k) };
    let (b_rows, b_cols) = if transpose_b { (n, k) } else { (k, n) };
    check_operand("A", a.len(), a_rows, a_cols, lda);
    check_operand("B", b.len(), b_rows, b_cols, ldb);
    check_operand("C", c.len(), m, n, ldc);

    #[cfg(feature = "blas")]
    {
        if k > 0 {
            blas_sgemm(m, n, k, a, lda, b, ldb, c, ldc, transpose_a, transpose_b, alpha, beta);
            return;
        }
    }

    scale_output(m, n, c, ldc, beta);
    if k == 0 || alpha == 0.0 {
        return;
    }

    match (transpose_a, transpose_b) {
        (false, false) => gemm_nn(m, n, k, alpha, a, lda, b, ldb, c, ldc),
        (false, true) => gemm_nt(m, n, k, alpha, a, lda, b, ldb, c, ldc),
        (true, false) => gemm_tn(m, n, k, alpha, a, lda, b, ldb, c, ldc),
        (true, true) => gemm_tt(m, n, k, alpha, a, lda, b, ldb, c, ldc),
    }
}

fn check_operand(name: &str, len: usize, rows: usize, cols: usize, ld: usize) {
    if rows == 0 || cols == 0 {
        return;
    }
    assert!(
        ld >= cols,
        "gemm: leading dimension of {} ({}) is smaller than its row length ({})",
        name,
        ld,
        cols
    );
    let needed = (rows - 1) * ld + cols;
    assert!(
        len >= needed,
        "gemm: {} holds {} elements, {}x{} with stride {} needs {}",
        name,
        len,
        rows,
        cols,
        ld,
        needed
    );
}

fn scale_output(m: usize, n: usize, c: &mut [f32], ldc: usize, beta: f32) {
    if beta == 1.0 {
        return;
    }
    for row in c.chunks_mut(ldc).take(m) {
        let row = &mut row[..n];
        if beta == 0.0 {
            row.fill(0.0);
        } else {
            row.iter_mut().for_each(|value| *value *= beta);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm_nn(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
) {
    for i in 0..m {
        let c_row = &mut c[i * ldc..i * ldc + n];
        for p in 0..k {
            let a_part = alpha * a[i * lda + p];
            let b_row = &b[p * ldb..p * ldb + n];
            for (out, &value) in c_row.iter_mut().zip(b_row) {
                *out += a_part * value;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm_nt(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
) {
    for i in 0..m {
        let a_row = &a[i * lda..i * lda + k];
        for j in 0..n {
            let b_row = &b[j * ldb..j * ldb + k];
            let mut sum = 0.0f32;
            for (&x, &y) in a_row.iter().zip(b_row) {
                sum += x * y;
            }
            c[i * ldc + j] += alpha * sum;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm_tn(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
) {
    for i in 0..m {
        let c_row = &mut c[i * ldc..i * ldc + n];
        for p in 0..k {
            let a_part = alpha * a[p * lda + i];
            let b_row = &b[p * ldb..p * ldb + n];
            for (out, &value) in c_row.iter_mut().zip(b_row) {
                *out += a_part * value;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm_tt(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
) {
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a[p * lda + i] * b[j * ldb + p];
            }
            c[i * ldc + j] += alpha * sum;
        }
    }
}

#[cfg(feature = "blas")]
#[allow(clippy::too_many_arguments)]
fn blas_sgemm(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
    transpose_a: bool,
    transpose_b: bool,
    alpha: f32,
    beta: f32,
) {
    use cblas::{sgemm, Layout, Transpose};

    let trans_a = if transpose_a {
        Transpose::Ordinary
    } else {
        Transpose::None
    };
    let trans_b = if transpose_b {
        Transpose::Ordinary
    } else {
        Transpose::None
    };

    // BLAS scales C by beta itself; clear it first so beta == 0 never reads stale data.
    if beta == 0.0 {
        scale_output(m, n, c, ldc, 0.0);
    }

    unsafe {
        sgemm(
            Layout::RowMajor,
            trans_a,
            trans_b,
            m as i32,
            n as i32,
            k as i32,
            alpha,
            a,
            lda as i32,
            b,
            ldb as i32,
            beta,
            c,
            ldc as i32,
        );
    }
}
