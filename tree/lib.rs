/*!
This crate implements gradient boosted regression trees. Continuous features are binned into histograms once, trees are grown against per-bin gradient statistics, and the finished ensemble is compiled into an [`Evaluator`](trait.Evaluator.html) for fast repeated inference.

```no_run
use jittrees_tree::{FitOptions, Regressor, RegressorOptions};
use ndarray::prelude::*;

let features_train = Array2::from_shape_fn((1000, 1), |(i, _)| i as f64 / 100.0 - 5.0);
let labels_train = features_train.column(0).mapv(|x| 2.0 * x + 3.0);
let features_valid = Array2::from_shape_fn((200, 1), |(i, _)| i as f64 / 20.0 - 5.0);
let labels_valid = features_valid.column(0).mapv(|x| 2.0 * x + 3.0);
let mut regressor = Regressor::new(RegressorOptions::default()).unwrap();
let history = regressor
	.fit(
		features_train.view(),
		labels_train.view(),
		features_valid.view(),
		labels_valid.view(),
		&FitOptions::default(),
	)
	.unwrap();
println!("{} trees, {:?}", regressor.n_trees(), history.best_round);
println!("{}", regressor.predict_one(&[1.0]).unwrap());
```
*/

#![allow(clippy::tabs_in_doc_comments)]

macro_rules! pzip {
	($($e:expr),* $(,)*) => {
		rayon::iter::IntoParallelIterator::into_par_iter(($($e,)*))
	};
}

mod compile;
mod error;
mod regressor;
mod store;
mod train;

pub use self::compile::{compile, Evaluator, EvaluatorType};
pub use self::error::{Error, Result};
pub use self::regressor::Regressor;
pub use self::train::{
	bin::{BinMap, FeatureBins},
	History,
};

use self::train::bin::BinnedFeatures;

/// These are the options passed to `Regressor::new`. They stay fixed for the lifetime of the model.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RegressorOptions {
	/// When computing the bin thresholds for a feature, at least this many thresholds are created, unless the feature has fewer distinct values.
	pub min_bins: usize,
	/// When computing the bin thresholds for a feature, at most this many thresholds are created. A feature with `max_bins` thresholds has `max_bins + 1` bins.
	pub max_bins: usize,
	/// If this many rounds pass in a row without the validation loss improving, training stops.
	pub patience: usize,
	/// If true, every one of `tree_count` rounds is trained and the ensemble is not truncated.
	pub no_early_stopping: bool,
	/// This is the number of threads used by `fit`.
	pub thread_cnt: usize,
	/// This selects how the fitted ensemble is compiled for prediction.
	pub evaluator_type: EvaluatorType,
}

impl Default for RegressorOptions {
	fn default() -> Self {
		Self {
			min_bins: 32,
			max_bins: 255,
			patience: 3,
			no_early_stopping: false,
			thread_cnt: 1,
			evaluator_type: EvaluatorType::Table,
		}
	}
}

impl RegressorOptions {
	pub fn validate(&self) -> Result<()> {
		if self.min_bins < 1 {
			return Err(invalid_option("min_bins", "must be at least 1"));
		}
		if self.min_bins > self.max_bins {
			return Err(invalid_option(
				"min_bins",
				format!(
					"{} is greater than max_bins ({})",
					self.min_bins, self.max_bins
				),
			));
		}
		if self.max_bins > MAX_BINS {
			return Err(invalid_option(
				"max_bins",
				format!("must be at most {}", MAX_BINS),
			));
		}
		if self.thread_cnt < 1 {
			return Err(invalid_option("thread_cnt", "must be at least 1"));
		}
		if !self.no_early_stopping && self.patience < 1 {
			return Err(invalid_option(
				"patience",
				"must be at least 1 when early stopping is enabled",
			));
		}
		Ok(())
	}
}

/// A feature never has more than this many thresholds, so every bin index fits in a `u16`.
pub const MAX_BINS: usize = u16::MAX as usize;

/// The deepest tree `fit` will grow.
pub const MAX_TREE_DEPTH: usize = 32;

/// These are the options passed to `Regressor::fit`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FitOptions {
	/// This is the maximum number of rounds of training. Fewer trees are kept if early stopping is enabled.
	pub tree_count: usize,
	/// The depth of a single tree will never exceed this value. A tree of depth 1 has a single branch.
	pub tree_depth: usize,
	/// The fraction of the features that may be split on in a round.
	pub feature_fold_size: f64,
	/// The learning rate scales the leaf values to control the effect each tree has on the output.
	pub learning_rate: f64,
	/// A round only counts as an improvement if the validation loss decreases by more than this value.
	pub early_stopping_delta: f64,
	/// The fraction of the training rows each tree is grown on.
	pub batch_part: f64,
	/// This controls how the rows for each tree are drawn.
	pub batch_strategy: BatchStrategy,
	/// The L2 regularization added to the sum of hessians when scoring splits and computing leaf values.
	pub regularization_param: f64,
	/// If true, bin thresholds are sampled from the candidate split points instead of placed at quantiles.
	pub random_hist_thresholds: bool,
	/// If true, trees are grown with `regularization_param`, but their leaf values are computed without it.
	pub remove_regularization_later: bool,
	/// If true, the best gain of each feature is multiplied by a random factor in `[0.5, 1.5)` before the features are compared.
	pub spoil_split_scores: bool,
	/// This seeds every random choice made by `fit`.
	pub random_state: u64,
	/// If true, a new feature fold is drawn for every node instead of once per round.
	pub resample_features_per_node: bool,
}

impl Default for FitOptions {
	fn default() -> Self {
		Self {
			tree_count: 1000,
			tree_depth: 6,
			feature_fold_size: 1.0,
			learning_rate: 0.4,
			early_stopping_delta: 0.0,
			batch_part: 1.0,
			batch_strategy: BatchStrategy::Full,
			regularization_param: 0.0,
			random_hist_thresholds: false,
			remove_regularization_later: false,
			spoil_split_scores: false,
			random_state: 12,
			resample_features_per_node: false,
		}
	}
}

impl FitOptions {
	pub fn validate(&self) -> Result<()> {
		if self.tree_count < 1 {
			return Err(invalid_option("tree_count", "must be at least 1"));
		}
		if self.tree_depth < 1 || self.tree_depth > MAX_TREE_DEPTH {
			return Err(invalid_option(
				"tree_depth",
				format!("must be between 1 and {}", MAX_TREE_DEPTH),
			));
		}
		if !(self.feature_fold_size > 0.0 && self.feature_fold_size <= 1.0) {
			return Err(invalid_option("feature_fold_size", "must be in (0, 1]"));
		}
		if !(self.batch_part > 0.0 && self.batch_part <= 1.0) {
			return Err(invalid_option("batch_part", "must be in (0, 1]"));
		}
		if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
			return Err(invalid_option(
				"learning_rate",
				"must be finite and positive",
			));
		}
		if !(self.regularization_param.is_finite() && self.regularization_param >= 0.0) {
			return Err(invalid_option(
				"regularization_param",
				"must be finite and non-negative",
			));
		}
		if !(self.early_stopping_delta.is_finite() && self.early_stopping_delta >= 0.0) {
			return Err(invalid_option(
				"early_stopping_delta",
				"must be finite and non-negative",
			));
		}
		Ok(())
	}
}

fn invalid_option(name: &'static str, reason: impl Into<String>) -> Error {
	Error::InvalidOption {
		name,
		reason: reason.into(),
	}
}

/// This controls which training rows each tree is grown on. The batch size is `max(1, round(n_examples * batch_part))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BatchStrategy {
	/// Every tree is grown on every training row. `batch_part` is ignored.
	Full,
	/// Each tree is grown on the next contiguous window of rows, wrapping around at the end of the training set.
	Sequential,
	/// Each tree is grown on the next slice of a seeded random permutation of the rows. The permutation is reshuffled when fewer than a batch of rows remain.
	Random,
}

/// An `Ensemble` is the output of `fit`. A prediction is the bias plus the sum of the outputs of each tree, added in order.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Ensemble {
	/// This is the mean of the training labels.
	pub bias: f64,
	pub trees: Vec<Tree>,
	/// These are the thresholds computed from the training data, used to map split bins back to feature values.
	pub bin_map: BinMap,
	pub n_features: usize,
}

impl Ensemble {
	/// Make a prediction by walking every tree.
	pub fn predict(&self, features: &[f64]) -> f64 {
		let mut output = self.bias;
		for tree in self.trees.iter() {
			output += tree.predict(features);
		}
		output
	}
}

/// Trees are stored as a `Vec` of `Node`s with the root at index 0. Each branch in the tree has two indexes into the `Vec`, one for each of its children, and both are greater than the branch's own index.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
	pub nodes: Vec<Node>,
}

impl Tree {
	/// Make a prediction for a given example.
	pub fn predict(&self, features: &[f64]) -> f64 {
		// Start at the root node.
		let mut node_index = 0;
		// Traverse the tree until we get to a leaf.
		loop {
			match &self.nodes[node_index] {
				Node::Branch(BranchNode {
					feature_index,
					split_value,
					left_child_index,
					right_child_index,
					..
				}) => {
					// NaN compares false, so it goes left.
					node_index = if features[*feature_index] >= *split_value {
						*right_child_index
					} else {
						*left_child_index
					};
				}
				// We made it to a leaf! The prediction is the leaf's value.
				Node::Leaf(LeafNode { value }) => return *value,
			}
		}
	}

	/// Make a prediction for the example at `example_index` in the binned features it was trained on. This always reaches the same leaf as `predict` does for the example's raw feature values.
	pub(crate) fn predict_binned(
		&self,
		binned_features: &BinnedFeatures,
		example_index: usize,
	) -> f64 {
		let mut node_index = 0;
		loop {
			match &self.nodes[node_index] {
				Node::Branch(BranchNode {
					feature_index,
					bin_index,
					left_child_index,
					right_child_index,
					..
				}) => {
					let bin = binned_features.columns[*feature_index].get(example_index);
					node_index = if bin <= *bin_index {
						*left_child_index
					} else {
						*right_child_index
					};
				}
				Node::Leaf(LeafNode { value }) => return *value,
			}
		}
	}

	pub fn n_leaves(&self) -> usize {
		self.nodes.iter().filter(|node| node.as_leaf().is_some()).count()
	}
}

/// A node is either a branch or a leaf.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
	Branch(BranchNode),
	Leaf(LeafNode),
}

impl Node {
	pub fn as_branch(&self) -> Option<&BranchNode> {
		match self {
			Node::Branch(branch) => Some(branch),
			Node::Leaf(_) => None,
		}
	}

	pub fn as_leaf(&self) -> Option<&LeafNode> {
		match self {
			Node::Branch(_) => None,
			Node::Leaf(leaf) => Some(leaf),
		}
	}
}

/// A `BranchNode` is a branch in a tree. An example whose value for `feature_index` is `>= split_value` is sent right. Every other example, including one whose value is NaN, is sent left.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BranchNode {
	/// This is the index of the feature to get the value for.
	pub feature_index: usize,
	/// The same split expressed on binned features: examples in bins `<= bin_index` are sent left.
	pub bin_index: usize,
	/// This is the threshold value of the split. It is equal to `bin_map.features[feature_index].thresholds[bin_index]`.
	pub split_value: f64,
	/// This is the index in the tree's node vector for this node's left child.
	pub left_child_index: usize,
	/// This is the index in the tree's node vector for this node's right child.
	pub right_child_index: usize,
}

/// The leaves in a tree hold the values to output for examples that get sent to them. The learning rate is already applied.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeafNode {
	pub value: f64,
}
