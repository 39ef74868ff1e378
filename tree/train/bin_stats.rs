use super::bin::{BinMap, BinnedFeatures, BinnedFeaturesColumn};
use itertools::izip;
use rayon::prelude::*;

/// The examples index for a node is split into chunks of this many examples. Each chunk is accumulated into its own histogram and the histograms are merged in chunk order, so the sums never depend on the number of threads.
pub const CHUNK_SIZE: usize = 4096;

/// `BinStats` holds a histogram for each feature in a fold. `entries[i]` is the histogram for the feature `feature_indexes[i]`.
#[derive(Clone, Debug)]
pub struct BinStats {
	pub feature_indexes: Vec<usize>,
	pub entries: Vec<Vec<BinStatsEntry>>,
}

/// The aggregate statistics of the training examples in a single bin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BinStatsEntry {
	pub sum_gradients: f64,
	pub sum_hessians: f64,
	pub count: usize,
}

impl BinStatsEntry {
	fn merge(&mut self, other: &BinStatsEntry) {
		self.sum_gradients += other.sum_gradients;
		self.sum_hessians += other.sum_hessians;
		self.count += other.count;
	}
}

/// Compute the bin stats for the examples in `examples_index`, for each feature in `feature_indexes`. The squared error loss has a constant hessian of one, so each example adds one to `sum_hessians`.
pub fn compute_bin_stats(
	binned_features: &BinnedFeatures,
	bin_map: &BinMap,
	feature_indexes: &[usize],
	gradients: &[f64],
	examples_index: &[usize],
) -> BinStats {
	let entries = feature_indexes
		.par_iter()
		.map(|feature_index| {
			let n_bins = bin_map.features[*feature_index].n_bins();
			let binned_feature_values = &binned_features.columns[*feature_index];
			let partial_bin_stats: Vec<Vec<BinStatsEntry>> = examples_index
				.par_chunks(CHUNK_SIZE)
				.map(|examples_index_chunk| {
					let mut bin_stats_for_feature = vec![BinStatsEntry::default(); n_bins];
					match binned_feature_values {
						BinnedFeaturesColumn::U8(binned_feature_values) => {
							compute_bin_stats_for_feature_no_hessians(
								gradients,
								binned_feature_values,
								&mut bin_stats_for_feature,
								examples_index_chunk,
							)
						}
						BinnedFeaturesColumn::U16(binned_feature_values) => {
							compute_bin_stats_for_feature_no_hessians(
								gradients,
								binned_feature_values,
								&mut bin_stats_for_feature,
								examples_index_chunk,
							)
						}
					}
					bin_stats_for_feature
				})
				.collect();
			let mut partial_bin_stats = partial_bin_stats.into_iter();
			let mut bin_stats_for_feature = partial_bin_stats
				.next()
				.unwrap_or_else(|| vec![BinStatsEntry::default(); n_bins]);
			for partial in partial_bin_stats {
				for (entry, partial_entry) in izip!(bin_stats_for_feature.iter_mut(), partial.iter()) {
					entry.merge(partial_entry);
				}
			}
			bin_stats_for_feature
		})
		.collect();
	BinStats {
		feature_indexes: feature_indexes.to_owned(),
		entries,
	}
}

fn compute_bin_stats_for_feature_no_hessians<T>(
	gradients: &[f64],
	binned_feature_values: &[T],
	bin_stats_for_feature: &mut [BinStatsEntry],
	examples_index: &[usize],
) where
	T: Copy + Into<usize>,
{
	for example_index in examples_index {
		let bin_index: usize = binned_feature_values[*example_index].into();
		let entry = &mut bin_stats_for_feature[bin_index];
		entry.sum_gradients += gradients[*example_index];
		entry.sum_hessians += 1.0;
		entry.count += 1;
	}
}

/// The bin stats for a node's larger child are computed by subtracting the bin stats of its smaller child from its parent's. Both must cover the same features.
pub fn compute_bin_stats_subtraction(parent: &BinStats, smaller_child: &BinStats) -> BinStats {
	let entries = izip!(parent.entries.iter(), smaller_child.entries.iter())
		.map(|(parent_entries, smaller_child_entries)| {
			izip!(parent_entries.iter(), smaller_child_entries.iter())
				.map(|(parent_entry, smaller_child_entry)| BinStatsEntry {
					sum_gradients: parent_entry.sum_gradients - smaller_child_entry.sum_gradients,
					sum_hessians: parent_entry.sum_hessians - smaller_child_entry.sum_hessians,
					count: parent_entry.count - smaller_child_entry.count,
				})
				.collect()
		})
		.collect();
	BinStats {
		feature_indexes: parent.feature_indexes.clone(),
		entries,
	}
}

#[cfg(test)]
use super::bin::FeatureBins;

#[cfg(test)]
fn two_feature_fixture() -> (BinnedFeatures, BinMap, Vec<f64>) {
	let binned_features = BinnedFeatures {
		columns: vec![
			BinnedFeaturesColumn::U8(vec![0, 1, 1, 2, 0, 2]),
			BinnedFeaturesColumn::U16(vec![1, 1, 0, 0, 1, 0]),
		],
	};
	let bin_map = BinMap {
		features: vec![
			FeatureBins {
				thresholds: vec![1.0, 2.0],
			},
			FeatureBins {
				thresholds: vec![0.5],
			},
		],
	};
	let gradients = vec![1.0, -2.0, 0.5, 4.0, 1.0, -1.0];
	(binned_features, bin_map, gradients)
}

#[test]
fn test_compute_bin_stats() {
	let (binned_features, bin_map, gradients) = two_feature_fixture();
	let bin_stats = compute_bin_stats(&binned_features, &bin_map, &[0, 1], &gradients, &[0, 1, 3, 4]);
	let entry = |sum_gradients: f64, count: usize| BinStatsEntry {
		sum_gradients,
		sum_hessians: count as f64,
		count,
	};
	assert_eq!(
		bin_stats.entries[0],
		vec![entry(2.0, 2), entry(-2.0, 1), entry(4.0, 1)]
	);
	assert_eq!(bin_stats.entries[1], vec![entry(4.0, 1), entry(0.0, 3)]);
}

#[test]
fn test_compute_bin_stats_feature_fold() {
	let (binned_features, bin_map, gradients) = two_feature_fixture();
	let bin_stats = compute_bin_stats(&binned_features, &bin_map, &[1], &gradients, &[0, 1, 2, 3, 4, 5]);
	assert_eq!(bin_stats.feature_indexes, vec![1]);
	assert_eq!(bin_stats.entries.len(), 1);
	assert_eq!(bin_stats.entries[0][0].count, 3);
	assert_eq!(bin_stats.entries[0][1].count, 3);
}

#[test]
fn test_compute_bin_stats_subtraction() {
	let (binned_features, bin_map, gradients) = two_feature_fixture();
	let parent = compute_bin_stats(&binned_features, &bin_map, &[0, 1], &gradients, &[0, 1, 2, 3, 4, 5]);
	let left = compute_bin_stats(&binned_features, &bin_map, &[0, 1], &gradients, &[0, 4]);
	let right = compute_bin_stats(&binned_features, &bin_map, &[0, 1], &gradients, &[1, 2, 3, 5]);
	let subtracted = compute_bin_stats_subtraction(&parent, &left);
	assert_eq!(subtracted.entries, right.entries);
}

#[test]
fn test_compute_bin_stats_chunked() {
	// Spanning several chunks must give the same counts as a single pass.
	let n_examples = 3 * CHUNK_SIZE + 17;
	let binned_features = BinnedFeatures {
		columns: vec![BinnedFeaturesColumn::U8(
			(0..n_examples).map(|i| (i % 3) as u8).collect(),
		)],
	};
	let bin_map = BinMap {
		features: vec![FeatureBins {
			thresholds: vec![1.0, 2.0],
		}],
	};
	let gradients = vec![1.0; n_examples];
	let examples_index: Vec<usize> = (0..n_examples).collect();
	let bin_stats = compute_bin_stats(&binned_features, &bin_map, &[0], &gradients, &examples_index);
	let counts: Vec<usize> = bin_stats.entries[0].iter().map(|entry| entry.count).collect();
	assert_eq!(counts, vec![4102, 4102, 4101]);
	assert_eq!(bin_stats.entries[0][0].sum_gradients, 4102.0);
}
