use super::{
	bin::{BinMap, BinnedFeatures},
	bin_stats::{compute_bin_stats, compute_bin_stats_subtraction, BinStats, CHUNK_SIZE},
	examples_index::rearrange_examples_index,
	sample::sample_feature_fold,
	split::{choose_best_split, ChooseBestSplitOutput},
};
use crate::{BranchNode, LeafNode, Node, Tree};
use num_traits::ToPrimitive;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
use std::ops::Range;

pub struct TrainTreeOptions {
	pub max_depth: usize,
	pub learning_rate: f64,
	pub regularization: f64,
	pub remove_regularization_later: bool,
	pub spoil_split_scores: bool,
	pub resample_features_per_node: bool,
	pub feature_fold_size: f64,
}

struct StackItem {
	/// The index in the tree's node vector that this item will fill.
	node_index: usize,
	/// The depth of the item in the tree. The root has depth 0.
	depth: usize,
	/// The range of the examples index holding the examples in this node.
	examples_index_range: Range<usize>,
	sum_gradients: f64,
	sum_hessians: f64,
	/// The bin stats are computed ahead of time when the node's parent is split and the subtraction trick applies. Otherwise they are computed when the item is popped.
	bin_stats: Option<BinStats>,
}

/// Grow a single tree on the examples in `examples_index`. Nodes are split depth first, so at most one pending histogram per level is held at once. `examples_index` is rearranged in place so each node's examples are contiguous.
#[allow(clippy::too_many_arguments)]
pub fn train_tree(
	binned_features: &BinnedFeatures,
	bin_map: &BinMap,
	gradients: &[f64],
	examples_index: &mut [usize],
	feature_indexes: &[usize],
	rng: &mut Xoshiro256Plus,
	options: &TrainTreeOptions,
) -> Tree {
	let n_features = bin_map.features.len();
	let (sum_gradients, sum_hessians) = compute_sums(gradients, examples_index);
	// Every node is pushed as a placeholder leaf and replaced when its item is popped.
	let mut tree = Tree {
		nodes: vec![placeholder_node()],
	};
	let mut stack = vec![StackItem {
		node_index: 0,
		depth: 0,
		examples_index_range: 0..examples_index.len(),
		sum_gradients,
		sum_hessians,
		bin_stats: None,
	}];
	while let Some(item) = stack.pop() {
		let StackItem {
			node_index,
			depth,
			examples_index_range,
			sum_gradients,
			sum_hessians,
			bin_stats,
		} = item;
		let n_examples = examples_index_range.len();
		if depth >= options.max_depth || n_examples < 2 {
			tree.nodes[node_index] = leaf_node(sum_gradients, sum_hessians, options);
			continue;
		}
		let bin_stats = match bin_stats {
			Some(bin_stats) => bin_stats,
			None => {
				let feature_indexes = if options.resample_features_per_node {
					sample_feature_fold(n_features, options.feature_fold_size, rng)
				} else {
					feature_indexes.to_owned()
				};
				compute_bin_stats(
					binned_features,
					bin_map,
					&feature_indexes,
					gradients,
					&examples_index[examples_index_range.clone()],
				)
			}
		};
		let spoil_rng = if options.spoil_split_scores {
			Some(&mut *rng)
		} else {
			None
		};
		let split = choose_best_split(
			&bin_stats,
			sum_gradients,
			sum_hessians,
			n_examples,
			options.regularization,
			spoil_rng,
		);
		let ChooseBestSplitOutput {
			feature_index,
			bin_index,
			left_sum_gradients,
			left_sum_hessians,
			left_n_examples,
			right_sum_gradients,
			right_sum_hessians,
			right_n_examples,
			..
		} = match split {
			Some(split) => split,
			None => {
				tree.nodes[node_index] = leaf_node(sum_gradients, sum_hessians, options);
				continue;
			}
		};
		let (left, right) = rearrange_examples_index(
			&binned_features.columns[feature_index],
			bin_index,
			&mut examples_index[examples_index_range.clone()],
		);
		let offset = examples_index_range.start;
		let left_examples_index_range = offset + left.start..offset + left.end;
		let right_examples_index_range = offset + right.start..offset + right.end;
		let left_child_index = tree.nodes.len();
		let right_child_index = left_child_index + 1;
		tree.nodes.push(placeholder_node());
		tree.nodes.push(placeholder_node());
		tree.nodes[node_index] = Node::Branch(BranchNode {
			feature_index,
			bin_index,
			split_value: bin_map.features[feature_index].thresholds[bin_index],
			left_child_index,
			right_child_index,
		});
		// When the fold is fixed for the whole tree, compute the smaller child's bin stats directly and derive the larger child's by subtraction.
		let child_depth = depth + 1;
		let will_split = |n_examples: usize| child_depth < options.max_depth && n_examples >= 2;
		let (left_bin_stats, right_bin_stats) = if options.resample_features_per_node {
			(None, None)
		} else {
			let examples_index: &[usize] = examples_index;
			let compute = |range: &Range<usize>| {
				compute_bin_stats(
					binned_features,
					bin_map,
					feature_indexes,
					gradients,
					&examples_index[range.clone()],
				)
			};
			match (will_split(left_n_examples), will_split(right_n_examples)) {
				(true, true) => {
					if left_n_examples <= right_n_examples {
						let left_bin_stats = compute(&left_examples_index_range);
						let right_bin_stats =
							compute_bin_stats_subtraction(&bin_stats, &left_bin_stats);
						(Some(left_bin_stats), Some(right_bin_stats))
					} else {
						let right_bin_stats = compute(&right_examples_index_range);
						let left_bin_stats =
							compute_bin_stats_subtraction(&bin_stats, &right_bin_stats);
						(Some(left_bin_stats), Some(right_bin_stats))
					}
				}
				(true, false) => (Some(compute(&left_examples_index_range)), None),
				(false, true) => (None, Some(compute(&right_examples_index_range))),
				(false, false) => (None, None),
			}
		};
		// Push the right child first so the left child is grown first.
		stack.push(StackItem {
			node_index: right_child_index,
			depth: child_depth,
			examples_index_range: right_examples_index_range,
			sum_gradients: right_sum_gradients,
			sum_hessians: right_sum_hessians,
			bin_stats: right_bin_stats,
		});
		stack.push(StackItem {
			node_index: left_child_index,
			depth: child_depth,
			examples_index_range: left_examples_index_range,
			sum_gradients: left_sum_gradients,
			sum_hessians: left_sum_hessians,
			bin_stats: left_bin_stats,
		});
	}
	tree
}

/// Sum the gradients of the examples in fixed chunks, adding the chunk sums in order.
fn compute_sums(gradients: &[f64], examples_index: &[usize]) -> (f64, f64) {
	let chunk_sums: Vec<f64> = examples_index
		.par_chunks(CHUNK_SIZE)
		.map(|examples_index| {
			examples_index
				.iter()
				.map(|example_index| gradients[*example_index])
				.sum()
		})
		.collect();
	let sum_gradients = chunk_sums.iter().sum();
	let sum_hessians = examples_index.len().to_f64().unwrap();
	(sum_gradients, sum_hessians)
}

fn placeholder_node() -> Node {
	Node::Leaf(LeafNode { value: 0.0 })
}

fn leaf_node(sum_gradients: f64, sum_hessians: f64, options: &TrainTreeOptions) -> Node {
	Node::Leaf(LeafNode {
		value: compute_leaf_value(sum_gradients, sum_hessians, options),
	})
}

/// The leaf value is the shrunk Newton step `-learning_rate * G / (H + lambda)`. With `remove_regularization_later`, the tree was grown with `lambda` but the leaf value omits it.
fn compute_leaf_value(sum_gradients: f64, sum_hessians: f64, options: &TrainTreeOptions) -> f64 {
	let regularization = if options.remove_regularization_later {
		0.0
	} else {
		options.regularization
	};
	-options.learning_rate * sum_gradients / (sum_hessians + regularization)
}

#[cfg(test)]
use super::bin::{BinnedFeaturesColumn, FeatureBins};
#[cfg(test)]
use rand::SeedableRng;

#[cfg(test)]
fn train_tree_options(max_depth: usize, regularization: f64) -> TrainTreeOptions {
	TrainTreeOptions {
		max_depth,
		learning_rate: 1.0,
		regularization,
		remove_regularization_later: false,
		spoil_split_scores: false,
		resample_features_per_node: false,
		feature_fold_size: 1.0,
	}
}

#[cfg(test)]
fn clusters_fixture() -> (BinnedFeatures, BinMap, Vec<f64>) {
	// Feature 0 separates the two clusters. Feature 1 is noise.
	let binned_features = BinnedFeatures {
		columns: vec![
			BinnedFeaturesColumn::U8(vec![0, 0, 0, 1, 1, 1]),
			BinnedFeaturesColumn::U8(vec![0, 1, 0, 1, 0, 1]),
		],
	};
	let bin_map = BinMap {
		features: vec![
			FeatureBins {
				thresholds: vec![5.0],
			},
			FeatureBins {
				thresholds: vec![0.5],
			},
		],
	};
	let gradients = vec![4.0, 4.0, 4.0, -4.0, -4.0, -4.0];
	(binned_features, bin_map, gradients)
}

#[test]
fn test_train_tree_depth_one() {
	let (binned_features, bin_map, gradients) = clusters_fixture();
	let mut examples_index: Vec<usize> = (0..6).collect();
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let tree = train_tree(
		&binned_features,
		&bin_map,
		&gradients,
		&mut examples_index,
		&[0, 1],
		&mut rng,
		&train_tree_options(1, 0.0),
	);
	insta::assert_debug_snapshot!(tree, @r###"
 Tree {
     nodes: [
         Branch(
             BranchNode {
                 feature_index: 0,
                 bin_index: 0,
                 split_value: 5.0,
                 left_child_index: 1,
                 right_child_index: 2,
             },
         ),
         Leaf(
             LeafNode {
                 value: -4.0,
             },
         ),
         Leaf(
             LeafNode {
                 value: 4.0,
             },
         ),
     ],
 }
 "###);
	for example_index in 0..6 {
		let expected = -gradients[example_index];
		assert_eq!(tree.predict_binned(&binned_features, example_index), expected);
	}
}

#[test]
fn test_train_tree_regularization() {
	let (binned_features, bin_map, gradients) = clusters_fixture();
	let leaf_values = |regularization: f64, remove_regularization_later: bool| {
		let mut examples_index: Vec<usize> = (0..6).collect();
		let mut rng = Xoshiro256Plus::seed_from_u64(0);
		let mut options = train_tree_options(1, regularization);
		options.remove_regularization_later = remove_regularization_later;
		let tree = train_tree(
			&binned_features,
			&bin_map,
			&gradients,
			&mut examples_index,
			&[0, 1],
			&mut rng,
			&options,
		);
		tree.nodes
			.iter()
			.filter_map(|node| node.as_leaf().map(|leaf| leaf.value))
			.collect::<Vec<f64>>()
	};
	// -12 / (3 + 1) and 12 / (3 + 1).
	assert_eq!(leaf_values(1.0, false), vec![-3.0, 3.0]);
	assert_eq!(leaf_values(1.0, true), vec![-4.0, 4.0]);
	assert_eq!(leaf_values(0.0, false), vec![-4.0, 4.0]);
}

#[test]
fn test_train_tree_depth_limit() {
	let n_examples = 64;
	let binned_features = BinnedFeatures {
		columns: vec![BinnedFeaturesColumn::U8(
			(0..n_examples).map(|i| i as u8).collect(),
		)],
	};
	let bin_map = BinMap {
		features: vec![FeatureBins {
			thresholds: (1..n_examples).map(|i| i as f64).collect(),
		}],
	};
	let gradients: Vec<f64> = (0..n_examples).map(|i| ((i * 7) % 11) as f64 - 5.0).collect();
	for max_depth in 1..=4 {
		let mut examples_index: Vec<usize> = (0..n_examples).collect();
		let mut rng = Xoshiro256Plus::seed_from_u64(0);
		let tree = train_tree(
			&binned_features,
			&bin_map,
			&gradients,
			&mut examples_index,
			&[0],
			&mut rng,
			&train_tree_options(max_depth, 0.0),
		);
		assert!(tree.n_leaves() <= 1 << max_depth);
		assert!(tree.n_leaves() > 1);
		// Children are always stored after their parent.
		for (node_index, node) in tree.nodes.iter().enumerate() {
			if let Some(branch) = node.as_branch() {
				assert!(branch.left_child_index > node_index);
				assert!(branch.right_child_index > node_index);
			}
		}
		let mut sorted_examples_index = examples_index.clone();
		sorted_examples_index.sort_unstable();
		assert_eq!(sorted_examples_index, (0..n_examples).collect::<Vec<_>>());
	}
}

#[test]
fn test_train_tree_per_node_features() {
	let (binned_features, bin_map, gradients) = clusters_fixture();
	let train = |seed: u64| {
		let mut examples_index: Vec<usize> = (0..6).collect();
		let mut rng = Xoshiro256Plus::seed_from_u64(seed);
		let mut options = train_tree_options(2, 0.0);
		options.resample_features_per_node = true;
		options.feature_fold_size = 0.5;
		train_tree(
			&binned_features,
			&bin_map,
			&gradients,
			&mut examples_index,
			&[0, 1],
			&mut rng,
			&options,
		)
	};
	assert_eq!(train(3), train(3));
}
