use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{seq::index, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

/// This is the maximum number of examples to consider when determining the bin thresholds for a feature.
const MAX_EXAMPLES_FOR_COMPUTING_BIN_THRESHOLDS: usize = 200_000;

/// The target number of thresholds for a feature is the number of values divided by this, clamped to `min_bins..=max_bins`.
const EXAMPLES_PER_BIN: usize = 32;

/// A `BinMap` holds the thresholds for every feature. It is computed once from the training data and reused unchanged for validation and inference.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BinMap {
	pub features: Vec<FeatureBins>,
}

/// The thresholds for a single feature. They are finite and strictly increasing. A value's bin is the number of thresholds less than or equal to it, so bin `k` covers `[thresholds[k - 1], thresholds[k])`, and NaN goes to bin 0.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureBins {
	pub thresholds: Vec<f64>,
}

impl FeatureBins {
	pub fn n_bins(&self) -> usize {
		self.thresholds.len() + 1
	}

	pub fn bin(&self, value: f64) -> usize {
		self.thresholds.partition_point(|threshold| *threshold <= value)
	}
}

/// Binned features are stored column-major. A column uses `u8` bin indexes if the feature has at most 256 bins and `u16` otherwise.
#[derive(Debug)]
pub struct BinnedFeatures {
	pub columns: Vec<BinnedFeaturesColumn>,
}

#[derive(Debug)]
pub enum BinnedFeaturesColumn {
	U8(Vec<u8>),
	U16(Vec<u16>),
}

impl BinnedFeaturesColumn {
	#[inline(always)]
	pub fn get(&self, example_index: usize) -> usize {
		match self {
			BinnedFeaturesColumn::U8(values) => values[example_index].to_usize().unwrap(),
			BinnedFeaturesColumn::U16(values) => values[example_index].to_usize().unwrap(),
		}
	}
}

pub struct BinningOptions {
	pub min_bins: usize,
	pub max_bins: usize,
	pub random_hist_thresholds: bool,
	pub random_state: u64,
}

/// Compute the thresholds for every feature. Features are binned in parallel, and the result does not depend on the number of threads.
pub fn compute_bin_map(features: ArrayView2<f64>, options: &BinningOptions) -> BinMap {
	let feature_bins = (0..features.ncols())
		.into_par_iter()
		.map(|feature_index| {
			compute_feature_bins(features.column(feature_index), feature_index, options)
		})
		.collect();
	BinMap {
		features: feature_bins,
	}
}

fn compute_feature_bins(
	column: ArrayView1<f64>,
	feature_index: usize,
	options: &BinningOptions,
) -> FeatureBins {
	let BinningOptions {
		min_bins,
		max_bins,
		random_hist_thresholds,
		random_state,
	} = *options;
	// Collect the distinct finite values and how often each appears.
	let mut values: Vec<f64> = column
		.iter()
		.take(MAX_EXAMPLES_FOR_COMPUTING_BIN_THRESHOLDS)
		.cloned()
		.filter(|value| value.is_finite())
		.collect();
	let n_values = values.len();
	values.sort_unstable_by(|a, b| a.total_cmp(b));
	let mut histogram: Vec<(f64, usize)> = Vec::new();
	for value in values {
		match histogram.last_mut() {
			Some((last, count)) if *last == value => *count += 1,
			_ => histogram.push((value, 1)),
		}
	}
	// A constant column has a single bin.
	if histogram.len() < 2 {
		return FeatureBins {
			thresholds: Vec::new(),
		};
	}
	let n_thresholds = usize::min(
		usize::max(n_values / EXAMPLES_PER_BIN, min_bins),
		max_bins,
	);
	let n_boundaries = histogram.len() - 1;
	let midpoint =
		|boundary: usize| histogram[boundary].0 / 2.0 + histogram[boundary + 1].0 / 2.0;
	let mut thresholds: Vec<f64> = if n_boundaries <= n_thresholds {
		// If there are few distinct values, give each its own bin.
		(0..n_boundaries).map(midpoint).collect()
	} else if random_hist_thresholds {
		let seed = random_state.wrapping_add(feature_index.to_u64().unwrap());
		let mut rng = Xoshiro256Plus::seed_from_u64(seed);
		let mut boundaries = index::sample(&mut rng, n_boundaries, n_thresholds).into_vec();
		boundaries.sort_unstable();
		boundaries.into_iter().map(midpoint).collect()
	} else {
		let mut boundaries = compute_quantile_boundaries(&histogram, n_values, n_thresholds);
		split_most_populated_bins(&histogram, &mut boundaries, n_thresholds);
		boundaries.into_iter().map(midpoint).collect()
	};
	// Midpoints of adjacent floats can round onto a value, so drop any repeats.
	thresholds.dedup();
	FeatureBins { thresholds }
}

/// For each quantile `i / (n_thresholds + 1)`, choose the first boundary between distinct values at which the cumulative count reaches the quantile. Each boundary is chosen at most once.
fn compute_quantile_boundaries(
	histogram: &[(f64, usize)],
	n_values: usize,
	n_thresholds: usize,
) -> Vec<usize> {
	let n_values = n_values.to_f64().unwrap();
	let n_quantiles = (n_thresholds + 1).to_f64().unwrap();
	let quantile_count = |quantile_index: usize| {
		quantile_index.to_f64().unwrap() / n_quantiles * n_values
	};
	let mut boundaries = Vec::with_capacity(n_thresholds);
	let mut quantile_index = 1;
	let mut cumulative_count = 0;
	for (boundary, (_, count)) in histogram[..histogram.len() - 1].iter().enumerate() {
		cumulative_count += count;
		let cumulative_count = cumulative_count.to_f64().unwrap();
		if cumulative_count < quantile_count(quantile_index) {
			continue;
		}
		boundaries.push(boundary);
		while quantile_index <= n_thresholds && quantile_count(quantile_index) <= cumulative_count {
			quantile_index += 1;
		}
		if quantile_index > n_thresholds {
			break;
		}
	}
	boundaries
}

/// A value repeated many times can cover several quantiles at once, leaving fewer than `n_thresholds` boundaries. Until there are `n_thresholds`, split the bin with the largest count among those holding more than one distinct value at its median boundary.
fn split_most_populated_bins(
	histogram: &[(f64, usize)],
	boundaries: &mut Vec<usize>,
	n_thresholds: usize,
) {
	let last = histogram.len() - 1;
	while boundaries.len() < n_thresholds {
		// Each bin spans the distinct values `start..=end`.
		let mut largest_bin: Option<(usize, usize, usize)> = None;
		let mut start = 0;
		for end in boundaries.iter().cloned().chain(std::iter::once(last)) {
			if end > start {
				let count = histogram[start..=end].iter().map(|(_, count)| count).sum();
				match largest_bin {
					Some((largest_count, _, _)) if largest_count >= count => {}
					_ => largest_bin = Some((count, start, end)),
				}
			}
			start = end + 1;
		}
		let (count, start, end) = match largest_bin {
			Some(largest_bin) => largest_bin,
			None => break,
		};
		let mut boundary = end - 1;
		let mut cumulative_count = 0;
		for (offset, (_, value_count)) in histogram[start..end].iter().enumerate() {
			cumulative_count += value_count;
			if 2 * cumulative_count >= count {
				boundary = start + offset;
				break;
			}
		}
		let position = boundaries.partition_point(|chosen| *chosen < boundary);
		boundaries.insert(position, boundary);
	}
}

/// Map every value to its bin using the thresholds in `bin_map`.
pub fn compute_binned_features(features: ArrayView2<f64>, bin_map: &BinMap) -> BinnedFeatures {
	let columns = bin_map
		.features
		.par_iter()
		.enumerate()
		.map(|(feature_index, feature_bins)| {
			let column = features.column(feature_index);
			if feature_bins.n_bins() <= 256 {
				BinnedFeaturesColumn::U8(
					column
						.iter()
						.map(|value| feature_bins.bin(*value).to_u8().unwrap())
						.collect(),
				)
			} else {
				BinnedFeaturesColumn::U16(
					column
						.iter()
						.map(|value| feature_bins.bin(*value).to_u16().unwrap())
						.collect(),
				)
			}
		})
		.collect();
	BinnedFeatures { columns }
}

#[cfg(test)]
fn binning_options(min_bins: usize, max_bins: usize) -> BinningOptions {
	BinningOptions {
		min_bins,
		max_bins,
		random_hist_thresholds: false,
		random_state: 0,
	}
}

#[test]
fn test_constant_column() {
	let features = Array2::from_elem((100, 1), 3.5);
	let bin_map = compute_bin_map(features.view(), &binning_options(4, 16));
	assert!(bin_map.features[0].thresholds.is_empty());
	let binned_features = compute_binned_features(features.view(), &bin_map);
	assert!((0..100).all(|i| binned_features.columns[0].get(i) == 0));
}

#[test]
fn test_few_distinct_values() {
	let features = arr2(&[[1.0], [2.0], [2.0], [4.0], [f64::NAN], [1.0]]);
	let bin_map = compute_bin_map(features.view(), &binning_options(4, 16));
	assert_eq!(bin_map.features[0].thresholds, vec![1.5, 3.0]);
	let binned_features = compute_binned_features(features.view(), &bin_map);
	let bins: Vec<usize> = (0..6).map(|i| binned_features.columns[0].get(i)).collect();
	assert_eq!(bins, vec![0, 1, 1, 2, 0, 0]);
}

#[test]
fn test_bin_boundaries() {
	let feature_bins = FeatureBins {
		thresholds: vec![1.0, 2.0],
	};
	assert_eq!(feature_bins.bin(f64::NEG_INFINITY), 0);
	assert_eq!(feature_bins.bin(0.5), 0);
	assert_eq!(feature_bins.bin(1.0), 1);
	assert_eq!(feature_bins.bin(1.5), 1);
	assert_eq!(feature_bins.bin(2.0), 2);
	assert_eq!(feature_bins.bin(f64::INFINITY), 2);
	assert_eq!(feature_bins.bin(f64::NAN), 0);
}

#[test]
fn test_quantile_thresholds() {
	let features = Array2::from_shape_fn((1000, 1), |(i, _)| i.to_f64().unwrap());
	let bin_map = compute_bin_map(features.view(), &binning_options(4, 4));
	// The quantiles of 0..1000 at 1/5, 2/5, 3/5 and 4/5.
	assert_eq!(bin_map.features[0].thresholds, vec![199.5, 399.5, 599.5, 799.5]);
}

#[test]
fn test_bin_count_limits() {
	let features = Array2::from_shape_fn((10_000, 2), |(i, j)| {
		(i * (j + 1)).to_f64().unwrap().sin()
	});
	for (min_bins, max_bins) in &[(8, 8), (16, 64), (300, 1000)] {
		let bin_map = compute_bin_map(features.view(), &binning_options(*min_bins, *max_bins));
		for feature_bins in bin_map.features.iter() {
			let n = feature_bins.thresholds.len();
			assert!(n >= *min_bins && n <= *max_bins);
			assert!(feature_bins.thresholds.windows(2).all(|w| w[0] < w[1]));
		}
	}
	let bin_map = compute_bin_map(features.view(), &binning_options(300, 1000));
	let binned_features = compute_binned_features(features.view(), &bin_map);
	assert!(matches!(binned_features.columns[0], BinnedFeaturesColumn::U16(_)));
}

#[test]
fn test_skewed_column_keeps_min_bins() {
	// 900 zeros take up most of the quantiles, but 100 other distinct values remain to split.
	let features = Array2::from_shape_fn((1000, 1), |(i, _)| {
		if i < 900 {
			0.0
		} else {
			(i - 899).to_f64().unwrap()
		}
	});
	let bin_map = compute_bin_map(features.view(), &binning_options(50, 60));
	let thresholds = &bin_map.features[0].thresholds;
	assert_eq!(thresholds.len(), 50);
	assert_eq!(thresholds[0], 0.5);
	assert!(thresholds.windows(2).all(|w| w[0] < w[1]));
	let binned_features = compute_binned_features(features.view(), &bin_map);
	assert!((0..900).all(|i| binned_features.columns[0].get(i) == 0));
	assert_eq!(binned_features.columns[0].get(999), 50);
}

#[test]
fn test_random_thresholds() {
	let features = Array2::from_shape_fn((1000, 1), |(i, _)| i.to_f64().unwrap());
	let options = BinningOptions {
		min_bins: 10,
		max_bins: 10,
		random_hist_thresholds: true,
		random_state: 42,
	};
	let a = compute_bin_map(features.view(), &options);
	let b = compute_bin_map(features.view(), &options);
	assert_eq!(a, b);
	let thresholds = &a.features[0].thresholds;
	assert_eq!(thresholds.len(), 10);
	assert!(thresholds.windows(2).all(|w| w[0] < w[1]));
	assert!(thresholds.iter().all(|t| t.fract() == 0.5));
}
