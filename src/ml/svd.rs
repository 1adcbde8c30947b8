use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Subspace iteration passes; enough for the small interaction matrices this
/// pipeline sees between write-back cycles.
const POWER_ITERATIONS: usize = 30;

/// Factorization of a user x video interaction matrix.
///
/// `user_factors` is the projection of the matrix onto the top right-singular
/// subspace (rows align with matrix rows), `video_factors` holds the basis
/// itself (rows align with matrix columns). Inner products of corresponding
/// rows approximate the original matrix entries.
#[derive(Debug, Clone)]
pub struct SvdFactors {
    pub user_factors: Array2<f32>,
    pub video_factors: Array2<f32>,
    pub rank: usize,
}

/// Truncated SVD via seeded randomized subspace iteration.
///
/// The requested rank is clamped to the matrix dimensions. Known limitation:
/// the input is dense, which only scales to small catalogs; the factor shapes
/// are the contract, so a sparse decomposition can replace this internally.
pub fn truncated_svd(matrix: &Array2<f32>, rank: usize, seed: u64) -> SvdFactors {
    let (rows, cols) = matrix.dim();
    let rank = rank.min(rows).min(cols).max(1);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    // Gram matrix of the columns; its dominant eigenvectors are the top
    // right-singular vectors of the input.
    let gram = matrix.t().dot(matrix);

    let mut basis = Array2::<f32>::zeros((cols, rank));
    for value in basis.iter_mut() {
        *value = rng.gen_range(-1.0..1.0);
    }
    orthonormalize(&mut basis);

    for _ in 0..POWER_ITERATIONS {
        basis = gram.dot(&basis);
        orthonormalize(&mut basis);
    }

    let user_factors = matrix.dot(&basis);

    SvdFactors {
        user_factors,
        video_factors: basis,
        rank,
    }
}

/// Modified Gram-Schmidt over the columns. Columns that collapse to zero
/// (rank-deficient input) are left as zero vectors rather than renormalized.
fn orthonormalize(matrix: &mut Array2<f32>) {
    let cols = matrix.ncols();
    for j in 0..cols {
        for i in 0..j {
            let prev = matrix.index_axis(Axis(1), i).to_owned();
            let current = matrix.index_axis(Axis(1), j);
            let projection = prev.dot(&current);
            let adjusted: Array1<f32> = current.to_owned() - projection * &prev;
            matrix.index_axis_mut(Axis(1), j).assign(&adjusted);
        }

        let column = matrix.index_axis(Axis(1), j);
        let norm = column.dot(&column).sqrt();
        if norm > 1e-8 {
            matrix.index_axis_mut(Axis(1), j).mapv_inplace(|v| v / norm);
        } else {
            matrix.index_axis_mut(Axis(1), j).fill(0.0);
        }
    }
}
