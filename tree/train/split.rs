use super::bin_stats::{BinStats, BinStatsEntry};
use rand::Rng;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub struct ChooseBestSplitOutput {
	pub gain: f64,
	pub feature_index: usize,
	/// Examples in bins `<= bin_index` go to the left child.
	pub bin_index: usize,
	pub left_sum_gradients: f64,
	pub left_sum_hessians: f64,
	pub left_n_examples: usize,
	pub right_sum_gradients: f64,
	pub right_sum_hessians: f64,
	pub right_n_examples: usize,
}

/// Find the split with the highest gain across all features in the fold, if a valid one exists. A split is valid if both children receive at least one example and its gain is positive. Ties go to the lower feature index, then the lower bin index.
///
/// If `spoil_rng` is given, the best gain of each feature is multiplied by a factor drawn uniformly from `[0.5, 1.5)` before the features are compared. The factors are drawn in feature order, so the choice stays deterministic.
pub fn choose_best_split(
	bin_stats: &BinStats,
	sum_gradients: f64,
	sum_hessians: f64,
	n_examples: usize,
	regularization: f64,
	spoil_rng: Option<&mut Xoshiro256Plus>,
) -> Option<ChooseBestSplitOutput> {
	// Each feature is scanned on its own worker, but the results are compared in order on this thread.
	let best_split_for_each_feature: Vec<Option<ChooseBestSplitOutput>> = bin_stats
		.feature_indexes
		.par_iter()
		.zip(bin_stats.entries.par_iter())
		.map(|(feature_index, bin_stats_for_feature)| {
			choose_best_split_for_feature(
				*feature_index,
				bin_stats_for_feature,
				sum_gradients,
				sum_hessians,
				n_examples,
				regularization,
			)
		})
		.collect();
	let mut spoil_rng = spoil_rng;
	let mut best_split: Option<ChooseBestSplitOutput> = None;
	for split in best_split_for_each_feature.into_iter().flatten() {
		let mut split = split;
		if let Some(rng) = spoil_rng.as_mut() {
			split.gain *= rng.gen_range(0.5, 1.5);
		}
		let is_better = match &best_split {
			Some(best_split) => split.gain > best_split.gain,
			None => true,
		};
		if is_better {
			best_split = Some(split);
		}
	}
	best_split
}

/// Find the best split for this feature by iterating over the bins in sorted order, adding bins to the left child and removing them from the right.
fn choose_best_split_for_feature(
	feature_index: usize,
	bin_stats_for_feature: &[BinStatsEntry],
	sum_gradients_parent: f64,
	sum_hessians_parent: f64,
	n_examples_parent: usize,
	regularization: f64,
) -> Option<ChooseBestSplitOutput> {
	let score_parent = compute_score(sum_gradients_parent, sum_hessians_parent, regularization);
	let mut best_split_so_far: Option<ChooseBestSplitOutput> = None;
	let mut left_sum_gradients = 0.0;
	let mut left_sum_hessians = 0.0;
	let mut left_n_examples = 0;
	// The last bin cannot be sent left, because there would be no bins left to send right.
	let n_candidate_bins = bin_stats_for_feature.len().saturating_sub(1);
	for (bin_index, entry) in bin_stats_for_feature[..n_candidate_bins].iter().enumerate() {
		left_sum_gradients += entry.sum_gradients;
		left_sum_hessians += entry.sum_hessians;
		left_n_examples += entry.count;
		if left_n_examples == 0 {
			continue;
		}
		let right_n_examples = n_examples_parent - left_n_examples;
		if right_n_examples == 0 {
			break;
		}
		let right_sum_gradients = sum_gradients_parent - left_sum_gradients;
		let right_sum_hessians = sum_hessians_parent - left_sum_hessians;
		let gain = compute_score(left_sum_gradients, left_sum_hessians, regularization)
			+ compute_score(right_sum_gradients, right_sum_hessians, regularization)
			- score_parent;
		if !(gain > 0.0) {
			continue;
		}
		if let Some(best_split_so_far) = &best_split_so_far {
			if gain <= best_split_so_far.gain {
				continue;
			}
		}
		best_split_so_far = Some(ChooseBestSplitOutput {
			gain,
			feature_index,
			bin_index,
			left_sum_gradients,
			left_sum_hessians,
			left_n_examples,
			right_sum_gradients,
			right_sum_hessians,
			right_n_examples,
		});
	}
	best_split_so_far
}

/// The score of a node is `G^2 / (H + lambda)`. It is the reduction in loss from giving the node its optimal unshrunk value.
fn compute_score(sum_gradients: f64, sum_hessians: f64, regularization: f64) -> f64 {
	(sum_gradients * sum_gradients) / (sum_hessians + regularization)
}

#[cfg(test)]
use rand::SeedableRng;

#[cfg(test)]
fn entry(sum_gradients: f64, count: usize) -> BinStatsEntry {
	BinStatsEntry {
		sum_gradients,
		sum_hessians: count as f64,
		count,
	}
}

#[test]
fn test_choose_best_split() {
	// Gradients of +1 in the first two bins and -1 in the last two are best separated after bin 1.
	let bin_stats = BinStats {
		feature_indexes: vec![0],
		entries: vec![vec![
			entry(2.0, 2),
			entry(2.0, 2),
			entry(-2.0, 2),
			entry(-2.0, 2),
		]],
	};
	let split = choose_best_split(&bin_stats, 0.0, 8.0, 8, 0.0, None).unwrap();
	assert_eq!(split.feature_index, 0);
	assert_eq!(split.bin_index, 1);
	assert_eq!(split.gain, 8.0);
	assert_eq!(split.left_n_examples, 4);
	assert_eq!(split.right_n_examples, 4);
	assert_eq!(split.left_sum_gradients, 4.0);
	assert_eq!(split.right_sum_gradients, -4.0);
}

#[test]
fn test_choose_best_split_ties() {
	// Both features separate the examples equally well, so the lower feature index wins.
	let bins = vec![entry(3.0, 3), entry(0.0, 0), entry(-3.0, 3)];
	let bin_stats = BinStats {
		feature_indexes: vec![2, 5],
		entries: vec![bins.clone(), bins],
	};
	let split = choose_best_split(&bin_stats, 0.0, 6.0, 6, 0.0, None).unwrap();
	assert_eq!(split.feature_index, 2);
	// Bins 0 and 1 send the same examples left, so the lower bin wins.
	assert_eq!(split.bin_index, 0);
}

#[test]
fn test_choose_best_split_invalid() {
	// All examples are in one bin, so every split leaves a child empty.
	let bin_stats = BinStats {
		feature_indexes: vec![0],
		entries: vec![vec![entry(0.0, 0), entry(5.0, 4), entry(0.0, 0)]],
	};
	assert!(choose_best_split(&bin_stats, 5.0, 4.0, 4, 0.0, None).is_none());
	// A feature with a single bin has no candidate splits.
	let bin_stats = BinStats {
		feature_indexes: vec![0],
		entries: vec![vec![entry(5.0, 4)]],
	};
	assert!(choose_best_split(&bin_stats, 5.0, 4.0, 4, 0.0, None).is_none());
	// Identical gradients have zero gain everywhere.
	let bin_stats = BinStats {
		feature_indexes: vec![0],
		entries: vec![vec![entry(1.0, 1), entry(1.0, 1)]],
	};
	assert!(choose_best_split(&bin_stats, 2.0, 2.0, 2, 0.0, None).is_none());
}

#[test]
fn test_choose_best_split_regularization() {
	let bin_stats = BinStats {
		feature_indexes: vec![0],
		entries: vec![vec![entry(2.0, 2), entry(-2.0, 2)]],
	};
	let split = choose_best_split(&bin_stats, 0.0, 4.0, 4, 0.0, None).unwrap();
	let regularized_split = choose_best_split(&bin_stats, 0.0, 4.0, 4, 2.0, None).unwrap();
	assert_eq!(split.gain, 4.0);
	assert_eq!(regularized_split.gain, 2.0);
}

#[test]
fn test_choose_best_split_spoiled() {
	let bin_stats = BinStats {
		feature_indexes: vec![0, 1],
		entries: vec![
			vec![entry(2.0, 2), entry(-2.0, 2)],
			vec![entry(1.0, 2), entry(-1.0, 2)],
		],
	};
	let mut rng = Xoshiro256Plus::seed_from_u64(7);
	let a = choose_best_split(&bin_stats, 0.0, 4.0, 4, 0.0, Some(&mut rng)).unwrap();
	let mut rng = Xoshiro256Plus::seed_from_u64(7);
	let b = choose_best_split(&bin_stats, 0.0, 4.0, 4, 0.0, Some(&mut rng)).unwrap();
	assert_eq!(a, b);
	assert!(a.gain >= 0.5 && a.gain < 6.0);
}
