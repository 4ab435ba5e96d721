// Polynomial feature expansion
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// All monomials of the inputs up to `degree`, without the constant term.
///
/// Column order is degree-major, then lexicographic over non-decreasing
/// index tuples, e.g. for degree 2: `x0, x1, x0², x0·x1, x1²`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialExpansion {
    degree: usize,
    n_input: usize,
    terms: Vec<Vec<usize>>,
}

impl PolynomialExpansion {
    pub fn new(n_input: usize, degree: usize) -> Self {
        let degree = degree.max(1);
        let mut terms = Vec::new();
        for d in 1..=degree {
            let mut current = Vec::with_capacity(d);
            push_combinations(n_input, d, 0, &mut current, &mut terms);
        }
        Self {
            degree,
            n_input,
            terms,
        }
    }

    pub fn n_output(&self) -> usize {
        self.terms.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((x.nrows(), self.n_output()));
        for (i, row) in x.rows().into_iter().enumerate() {
            for (k, term) in self.terms.iter().enumerate() {
                out[[i, k]] = monomial(row, term);
            }
        }
        out
    }
}

fn monomial(row: ArrayView1<f64>, term: &[usize]) -> f64 {
    term.iter().map(|&j| row[j]).product()
}

fn push_combinations(
    n: usize,
    remaining: usize,
    start: usize,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if remaining == 0 {
        out.push(current.clone());
        return;
    }
    for j in start..n {
        current.push(j);
        push_combinations(n, remaining - 1, j, current, out);
        current.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_degree_two_terms() {
        let poly = PolynomialExpansion::new(2, 2);
        assert_eq!(poly.n_output(), 5);

        let out = poly.transform(&array![[2.0, 3.0]]);
        assert_eq!(out.row(0).to_vec(), vec![2.0, 3.0, 4.0, 6.0, 9.0]);
    }

    #[test]
    fn test_output_width_matches_combinatorics() {
        // n + n(n+1)/2 for degree two
        let poly = PolynomialExpansion::new(31, 2);
        assert_eq!(poly.n_output(), 31 + 31 * 32 / 2);
    }
}
