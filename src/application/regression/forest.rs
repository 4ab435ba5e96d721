// Regression trees and random forest
use crate::application::error::{PipelineError, PipelineResult};
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

/// CART regression tree (squared-error criterion), stored as a flat node arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    params: TreeParams,
    nodes: Vec<Node>,
    n_features: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            n_features: 0,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, rng: &mut ChaCha8Rng) -> PipelineResult<()> {
        if x.nrows() != y.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "feature rows ({}) and targets ({}) differ",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(PipelineError::DataQuality("no training rows".to_string()));
        }

        self.n_features = x.ncols();
        self.nodes.clear();
        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.grow(x, y, indices, 0, rng);
        Ok(())
    }

    /// Appends the subtree for `indices` and returns its root slot
    fn grow(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: Vec<usize>,
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let n = indices.len();
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let mean = sum / n as f64;

        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        let pure = indices.iter().all(|&i| (y[i] - y[indices[0]]).abs() < 1e-12);
        if depth_reached || pure || n < self.params.min_samples_split || n < 2 * self.params.min_samples_leaf {
            return slot;
        }

        let Some(split) = self.best_split(x, y, &indices, sum, rng) else {
            return slot;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);

        let left = self.grow(x, y, left_idx, depth + 1, rng);
        let right = self.grow(x, y, right_idx, depth + 1, rng);
        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }

    /// Best split by squared-error reduction. Each candidate feature is sorted
    /// once and scanned with running sums.
    fn best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        total_sum: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent_score = total_sum * total_sum / n as f64;

        let mut features: Vec<usize> = (0..self.n_features).collect();
        if let Some(k) = self.params.max_features.filter(|&k| k < self.n_features) {
            let (chosen, _) = features.partial_shuffle(rng, k.max(1));
            features = chosen.to_vec();
        }

        let mut best: Option<SplitCandidate> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in features {
            pairs.clear();
            pairs.extend(indices.iter().map(|&i| (x[[i, feature]], y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            for k in 0..n - 1 {
                left_sum += pairs[k].1;
                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                if pairs[k].0 == pairs[k + 1].0 {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let score = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64;
                if score > parent_score + 1e-12 && best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (pairs[k].0 + pairs[k + 1].0) / 2.0,
                        score,
                    });
                }
            }
        }

        best
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut slot = 0;
        loop {
            match &self.nodes[slot] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    slot = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        if self.nodes.is_empty() {
            return Err(PipelineError::NotFitted("regression tree"));
        }
        if x.ncols() != self.n_features {
            return Err(PipelineError::InvalidArgument(format!(
                "tree expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        Ok(x.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    #[cfg(test)]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }
}

/// Bagged ensemble of regression trees, built in parallel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub n_estimators: usize,
    pub tree_params: TreeParams,
    pub bootstrap: bool,
    pub seed: u64,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(n_estimators: usize, tree_params: TreeParams, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            tree_params,
            bootstrap: true,
            seed,
            trees: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> PipelineResult<()> {
        let n_samples = x.nrows();
        if n_samples == 0 {
            return Err(PipelineError::DataQuality("no training rows".to_string()));
        }

        let trees: PipelineResult<Vec<RegressionTree>> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(tree_idx as u64));
                let mut tree = RegressionTree::new(self.tree_params);

                if self.bootstrap {
                    let sample: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    let x_boot = x.select(ndarray::Axis(0), &sample);
                    let y_boot: Array1<f64> = sample.iter().map(|&i| y[i]).collect();
                    tree.fit(&x_boot, &y_boot, &mut rng)?;
                } else {
                    tree.fit(x, y, &mut rng)?;
                }
                Ok(tree)
            })
            .collect();

        self.trees = trees?;
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(PipelineError::NotFitted("random forest"));
        }

        let per_tree: Vec<Array1<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict(x))
            .collect::<PipelineResult<_>>()?;

        let mut total = Array1::zeros(x.nrows());
        for pred in &per_tree {
            total += pred;
        }
        Ok(total / self.trees.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tree_fits_step_function() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![5.0, 5.0, 5.0, 20.0, 20.0, 20.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let mut tree = RegressionTree::new(TreeParams::default());
        tree.fit(&x, &y, &mut rng).unwrap();

        let pred = tree.predict(&array![[0.0], [2.5], [9.0], [50.0]]).unwrap();
        assert_eq!(pred.to_vec(), vec![5.0, 5.0, 20.0, 20.0]);
        assert_eq!(tree.n_nodes(), 3);
    }

    #[test]
    fn test_min_samples_leaf_is_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 0.0, 0.0, 100.0];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let params = TreeParams {
            min_samples_leaf: 2,
            ..TreeParams::default()
        };
        let mut tree = RegressionTree::new(params);
        tree.fit(&x, &y, &mut rng).unwrap();

        // the lone outlier cannot get its own leaf
        let pred = tree.predict(&array![[4.0]]).unwrap();
        assert_eq!(pred[0], 50.0);
    }

    #[test]
    fn test_forest_is_reproducible_for_a_seed() {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| ((i * (j + 3)) % 17) as f64);
        let y: Array1<f64> = x.rows().into_iter().map(|r| r[0] * 2.0 + r[1]).collect();

        let params = TreeParams {
            max_depth: Some(6),
            ..TreeParams::default()
        };
        let mut a = RandomForestRegressor::new(8, params, 7);
        let mut b = RandomForestRegressor::new(8, params, 7);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_forest_tracks_signal() {
        let x = Array2::from_shape_fn((200, 1), |(i, _)| i as f64 / 10.0);
        let y: Array1<f64> = x.column(0).mapv(|v| v.sin() * 10.0);

        let mut forest = RandomForestRegressor::new(20, TreeParams::default(), 42);
        forest.fit(&x, &y).unwrap();
        let pred = forest.predict(&x).unwrap();

        let mse = (&pred - &y).mapv(|v| v * v).mean().unwrap();
        assert!(mse < 1.0, "in-sample mse {mse}");
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let forest = RandomForestRegressor::new(3, TreeParams::default(), 1);
        assert!(matches!(
            forest.predict(&array![[1.0]]),
            Err(PipelineError::NotFitted(_))
        ));
    }
}
