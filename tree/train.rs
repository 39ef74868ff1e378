use self::{
	bin::{compute_bin_map, compute_binned_features, BinningOptions},
	bin_stats::CHUNK_SIZE,
	early_stopping::EarlyStoppingMonitor,
	sample::{sample_feature_fold, BatchSampler},
	train_tree::{train_tree, TrainTreeOptions},
};
use crate::{Ensemble, FitOptions, RegressorOptions};
use itertools::izip;
use jittrees_metrics::{HalfMeanSquaredError, Mean, StreamingMetric};
use ndarray::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
use tracing::{debug, info};

pub mod bin;
mod bin_stats;
mod early_stopping;
mod examples_index;
mod sample;
mod split;
mod train_tree;

/// The `History` of a call to `fit`. Losses are half the mean squared error, recorded for every round that was trained, including rounds dropped from the ensemble by early stopping.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct History {
	/// The training loss of the bias alone, before any trees are added.
	pub initial_train_loss: f64,
	/// The validation loss of the bias alone, before any trees are added.
	pub initial_valid_loss: f64,
	pub train_losses: Vec<f64>,
	pub valid_losses: Vec<f64>,
	/// The round with the lowest finite validation loss. The earliest such round wins ties. This is `None` if no round had a finite validation loss.
	pub best_round: Option<usize>,
	/// The number of trees in the ensemble after early stopping truncated it.
	pub trees_learnt: usize,
}

/// Fit an ensemble to the training data. This is called from inside a thread pool with `thread_cnt` threads, and the result is the same for every number of threads.
pub fn train(
	features_train: ArrayView2<f64>,
	labels_train: ArrayView1<f64>,
	features_valid: ArrayView2<f64>,
	labels_valid: ArrayView1<f64>,
	options: &RegressorOptions,
	fit_options: &FitOptions,
) -> (Ensemble, History) {
	let RegressorOptions {
		min_bins,
		max_bins,
		patience,
		no_early_stopping,
		..
	} = *options;
	let FitOptions {
		tree_count,
		tree_depth,
		feature_fold_size,
		learning_rate,
		early_stopping_delta,
		batch_part,
		batch_strategy,
		regularization_param,
		random_hist_thresholds,
		remove_regularization_later,
		spoil_split_scores,
		random_state,
		resample_features_per_node,
	} = *fit_options;
	let n_examples_train = features_train.nrows();
	let n_features = features_train.ncols();
	info!(
		n_examples_train,
		n_examples_valid = features_valid.nrows(),
		n_features,
		tree_count,
		tree_depth,
		"fit started"
	);

	// Determine the bin thresholds from the training data and bin both datasets with them.
	let bin_map = compute_bin_map(
		features_train,
		&BinningOptions {
			min_bins,
			max_bins,
			random_hist_thresholds,
			random_state,
		},
	);
	let binned_features_train = compute_binned_features(features_train, &bin_map);
	let binned_features_valid = compute_binned_features(features_valid, &bin_map);

	// A tree model's prediction is a bias plus the sum of the outputs of each tree. The bias is the mean of the training labels.
	let labels_train: Vec<f64> = labels_train.to_vec();
	let labels_valid: Vec<f64> = labels_valid.to_vec();
	let bias = compute_mean(&labels_train);
	let mut predictions_train = vec![bias; labels_train.len()];
	let mut predictions_valid = vec![bias; labels_valid.len()];
	let initial_train_loss = compute_loss(&predictions_train, &labels_train);
	let initial_valid_loss = compute_loss(&predictions_valid, &labels_valid);
	debug!(bias, initial_train_loss, initial_valid_loss, "computed bias");

	let mut rng = Xoshiro256Plus::seed_from_u64(random_state);
	let mut batch_sampler = BatchSampler::new(n_examples_train, batch_part, batch_strategy, &mut rng);
	let train_tree_options = TrainTreeOptions {
		max_depth: tree_depth,
		learning_rate,
		regularization: regularization_param,
		remove_regularization_later,
		spoil_split_scores,
		resample_features_per_node,
		feature_fold_size,
	};
	let mut early_stopping_monitor = EarlyStoppingMonitor::new(early_stopping_delta, patience);
	let mut gradients = vec![0.0; n_examples_train];
	let mut trees = Vec::new();
	let mut train_losses = Vec::new();
	let mut valid_losses = Vec::new();

	for round_index in 0..tree_count {
		// The squared error loss has gradient `prediction - label` and a hessian of one.
		pzip!(&mut gradients, &predictions_train, &labels_train).for_each(
			|(gradient, prediction, label)| {
				*gradient = prediction - label;
			},
		);
		let feature_indexes = sample_feature_fold(n_features, feature_fold_size, &mut rng);
		let mut examples_index = batch_sampler.next_batch(&mut rng);
		let tree = train_tree(
			&binned_features_train,
			&bin_map,
			&gradients,
			&mut examples_index,
			&feature_indexes,
			&mut rng,
			&train_tree_options,
		);

		// Update the predictions for every example, including those outside this round's batch.
		predictions_train
			.par_iter_mut()
			.enumerate()
			.for_each(|(example_index, prediction)| {
				*prediction += tree.predict_binned(&binned_features_train, example_index);
			});
		predictions_valid
			.par_iter_mut()
			.enumerate()
			.for_each(|(example_index, prediction)| {
				*prediction += tree.predict_binned(&binned_features_valid, example_index);
			});
		trees.push(tree);

		let train_loss = compute_loss(&predictions_train, &labels_train);
		let valid_loss = compute_loss(&predictions_valid, &labels_valid);
		train_losses.push(train_loss);
		valid_losses.push(valid_loss);
		debug!(round_index, train_loss, valid_loss, "trained round");

		if !no_early_stopping && early_stopping_monitor.update(valid_loss) {
			info!(round_index, "stopping early");
			break;
		}
	}

	let best_round = compute_best_round(&valid_losses);
	if !no_early_stopping {
		trees.truncate(best_round.map(|best_round| best_round + 1).unwrap_or(0));
	}
	let trees_learnt = trees.len();
	info!(
		rounds = valid_losses.len(),
		trees_learnt,
		best_round = ?best_round,
		"fit finished"
	);
	let ensemble = Ensemble {
		bias,
		trees,
		bin_map,
		n_features,
	};
	let history = History {
		initial_train_loss,
		initial_valid_loss,
		train_losses,
		valid_losses,
		best_round,
		trees_learnt,
	};
	(ensemble, history)
}

/// Find the round with the lowest finite loss. Non-finite rounds are never the best.
fn compute_best_round(losses: &[f64]) -> Option<usize> {
	let mut best: Option<(usize, f64)> = None;
	for (round_index, loss) in losses.iter().enumerate() {
		if !loss.is_finite() {
			continue;
		}
		let is_better = match best {
			Some((_, best_loss)) => *loss < best_loss,
			None => true,
		};
		if is_better {
			best = Some((round_index, *loss));
		}
	}
	best.map(|(round_index, _)| round_index)
}

fn compute_mean(values: &[f64]) -> f64 {
	let partial_means: Vec<Mean> = values
		.par_chunks(CHUNK_SIZE)
		.map(|values| {
			let mut mean = Mean::default();
			for value in values {
				mean.update(*value);
			}
			mean
		})
		.collect();
	let mut mean = Mean::default();
	for partial_mean in partial_means {
		mean.merge(partial_mean);
	}
	mean.finalize().unwrap_or(0.0)
}

/// Compute half the mean squared error over fixed chunks, merged in order.
fn compute_loss(predictions: &[f64], labels: &[f64]) -> f64 {
	let partial_losses: Vec<HalfMeanSquaredError> =
		pzip!(predictions.par_chunks(CHUNK_SIZE), labels.par_chunks(CHUNK_SIZE))
			.map(|(predictions, labels)| {
				let mut loss = HalfMeanSquaredError::default();
				for (prediction, label) in izip!(predictions, labels) {
					loss.update((*prediction, *label));
				}
				loss
			})
			.collect();
	let mut loss = HalfMeanSquaredError::default();
	for partial_loss in partial_losses {
		loss.merge(partial_loss);
	}
	loss.finalize().unwrap_or(f64::NAN)
}

#[test]
fn test_compute_best_round() {
	assert_eq!(compute_best_round(&[]), None);
	assert_eq!(compute_best_round(&[f64::NAN, f64::INFINITY]), None);
	assert_eq!(compute_best_round(&[3.0, 1.0, 2.0, 1.0]), Some(1));
	assert_eq!(compute_best_round(&[f64::NAN, 2.0, f64::NEG_INFINITY]), Some(1));
}

#[test]
fn test_compute_loss() {
	assert_eq!(compute_loss(&[1.0, 2.0], &[1.0, 4.0]), 1.0);
	assert!(compute_loss(&[f64::NAN], &[1.0]).is_nan());
}

#[cfg(test)]
use num_traits::ToPrimitive;

/// Features with NaN, infinities and repeated values, and a label that depends on all of them.
#[cfg(test)]
fn non_finite_dataset(n_examples: usize) -> (Array2<f64>, Array1<f64>) {
	let features = Array2::from_shape_fn((n_examples, 3), |(i, j)| {
		let x = i.to_f64().unwrap();
		match (j, i % 23, i % 29) {
			(0, 0, _) => f64::NAN,
			(0, 1, _) => f64::INFINITY,
			(0, 2, _) => f64::NEG_INFINITY,
			(0, _, _) => (i % 17).to_f64().unwrap(),
			(1, _, 0) => f64::NAN,
			(1, _, _) => ((i * 7) % 50).to_f64().unwrap() / 4.0,
			(_, _, 1) => f64::INFINITY,
			(_, _, 2) => f64::NEG_INFINITY,
			_ => (x * 0.37).sin(),
		}
	});
	let labels = (0..n_examples)
		.map(|i| {
			let x = i.to_f64().unwrap();
			(i % 17).to_f64().unwrap() + ((i * 7) % 50).to_f64().unwrap() * 0.1 + (x * 0.37).sin()
		})
		.collect::<Array1<f64>>();
	(features, labels)
}

#[test]
fn test_binned_walk_matches_raw_walk() {
	let (features, labels) = non_finite_dataset(600);
	let options = RegressorOptions {
		min_bins: 4,
		max_bins: 16,
		no_early_stopping: true,
		..Default::default()
	};
	for random_hist_thresholds in &[false, true] {
		let fit_options = FitOptions {
			tree_count: 10,
			tree_depth: 4,
			random_hist_thresholds: *random_hist_thresholds,
			..Default::default()
		};
		let (ensemble, _) = train(
			features.view(),
			labels.view(),
			features.view(),
			labels.view(),
			&options,
			&fit_options,
		);
		assert_eq!(ensemble.trees.len(), 10);
		assert!(ensemble.trees.iter().any(|tree| tree.nodes.len() > 1));
		let binned_features = compute_binned_features(features.view(), &ensemble.bin_map);
		for tree in ensemble.trees.iter() {
			for (example_index, row) in features.outer_iter().enumerate() {
				assert_eq!(
					tree.predict(&row.to_vec()).to_bits(),
					tree.predict_binned(&binned_features, example_index).to_bits()
				);
			}
		}
	}
}
