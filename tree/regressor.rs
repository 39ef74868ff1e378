use crate::{
	compile::{compile, Evaluator},
	store::{self, SavedModel},
	train::{train, History},
	Ensemble, Error, FitOptions, RegressorOptions, Result,
};
use itertools::izip;
use ndarray::prelude::*;
use std::{io::Write, path::Path};

/// `Regressor` fits an ensemble of regression trees to minimize squared error and predicts with a compiled evaluator.
pub struct Regressor {
	options: RegressorOptions,
	fitted: Option<Fitted>,
}

struct Fitted {
	fit_options: FitOptions,
	ensemble: Ensemble,
	history: History,
	evaluator: Box<dyn Evaluator>,
}

impl std::fmt::Debug for Regressor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Regressor")
			.field("options", &self.options)
			.field("n_trees", &self.n_trees())
			.finish()
	}
}

impl Regressor {
	/// Create an unfitted regressor. This fails if the options are invalid.
	pub fn new(options: RegressorOptions) -> Result<Regressor> {
		options.validate()?;
		Ok(Regressor {
			options,
			fitted: None,
		})
	}

	/// Fit the regressor to the training data, using the validation data for early stopping. Any previous fit is discarded. The data is checked before any work begins.
	pub fn fit(
		&mut self,
		features_train: ArrayView2<f64>,
		labels_train: ArrayView1<f64>,
		features_valid: ArrayView2<f64>,
		labels_valid: ArrayView1<f64>,
		fit_options: &FitOptions,
	) -> Result<History> {
		fit_options.validate()?;
		validate_data(features_train, labels_train, features_valid, labels_valid)?;
		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(self.options.thread_cnt)
			.build()?;
		let options = &self.options;
		let (ensemble, history) = pool.install(|| {
			train(
				features_train,
				labels_train,
				features_valid,
				labels_valid,
				options,
				fit_options,
			)
		});
		let evaluator = compile(&ensemble, self.options.evaluator_type);
		self.fitted = Some(Fitted {
			fit_options: fit_options.clone(),
			ensemble,
			history: history.clone(),
			evaluator,
		});
		Ok(history)
	}

	/// Make a prediction for a single example.
	pub fn predict_one(&self, features: &[f64]) -> Result<f64> {
		let fitted = self.fitted()?;
		check_n_features(fitted.ensemble.n_features, features.len())?;
		Ok(fitted.evaluator.evaluate(features))
	}

	/// Make a prediction for each row of `features`.
	pub fn predict(&self, features: ArrayView2<f64>) -> Result<Array1<f64>> {
		let fitted = self.fitted()?;
		check_n_features(fitted.ensemble.n_features, features.ncols())?;
		let mut row_buffer = vec![0.0; features.ncols()];
		let predictions = features
			.outer_iter()
			.map(|row| match row.as_slice() {
				Some(row) => fitted.evaluator.evaluate(row),
				None => {
					for (value, feature) in izip!(row_buffer.iter_mut(), row.iter()) {
						*value = *feature;
					}
					fitted.evaluator.evaluate(&row_buffer)
				}
			})
			.collect::<Vec<f64>>();
		Ok(Array1::from(predictions))
	}

	/// Make a prediction using only the estimators `first..=last`. Estimator 0 is the bias and estimator `i` for `i >= 1` is the `i`th tree, so `predict_from_to(features, 0, n_trees)` equals `predict_one(features)`.
	pub fn predict_from_to(&self, features: &[f64], first: usize, last: usize) -> Result<f64> {
		let fitted = self.fitted()?;
		check_n_features(fitted.ensemble.n_features, features.len())?;
		let n_trees = fitted.ensemble.trees.len();
		if first > last || last > n_trees {
			return Err(Error::TreeRange {
				first,
				last,
				n_trees,
			});
		}
		let mut output = if first == 0 { fitted.ensemble.bias } else { 0.0 };
		for tree in fitted.ensemble.trees[first.max(1) - 1..last].iter() {
			output += tree.predict(features);
		}
		Ok(output)
	}

	/// Write the model to the file at `path`.
	pub fn save_model(&self, path: &Path) -> Result<()> {
		self.fitted()?;
		let file = std::fs::File::create(path)?;
		self.write_model(std::io::BufWriter::new(file))
	}

	fn write_model<W: Write>(&self, mut writer: W) -> Result<()> {
		let fitted = self.fitted()?;
		store::write(&mut writer, &self.saved_model(fitted))?;
		writer.flush()?;
		Ok(())
	}

	/// Serialize the model to bytes in the same format as `save_model`.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let fitted = self.fitted()?;
		let mut bytes = Vec::new();
		store::write(&mut bytes, &self.saved_model(fitted))?;
		Ok(bytes)
	}

	/// Deserialize a `Regressor` from a slice.
	pub fn from_slice(bytes: &[u8]) -> Result<Regressor> {
		let SavedModel {
			options,
			fit_options,
			ensemble,
			history,
		} = store::read(bytes)?;
		let evaluator = compile(&ensemble, options.evaluator_type);
		Ok(Regressor {
			options,
			fitted: Some(Fitted {
				fit_options,
				ensemble,
				history,
				evaluator,
			}),
		})
	}

	/// Deserialize a `Regressor` by reading the file at `path`.
	pub fn from_path(path: &Path) -> Result<Regressor> {
		let bytes = std::fs::read(path)?;
		Regressor::from_slice(&bytes)
	}

	pub fn options(&self) -> &RegressorOptions {
		&self.options
	}

	pub fn fit_options(&self) -> Option<&FitOptions> {
		self.fitted.as_ref().map(|fitted| &fitted.fit_options)
	}

	pub fn ensemble(&self) -> Option<&Ensemble> {
		self.fitted.as_ref().map(|fitted| &fitted.ensemble)
	}

	pub fn history(&self) -> Option<&History> {
		self.fitted.as_ref().map(|fitted| &fitted.history)
	}

	/// The number of trees in the fitted ensemble, or 0 before `fit`.
	pub fn n_trees(&self) -> usize {
		self.fitted
			.as_ref()
			.map(|fitted| fitted.ensemble.trees.len())
			.unwrap_or(0)
	}

	fn fitted(&self) -> Result<&Fitted> {
		self.fitted.as_ref().ok_or(Error::NotFitted)
	}

	fn saved_model(&self, fitted: &Fitted) -> SavedModel {
		SavedModel {
			options: self.options.clone(),
			fit_options: fitted.fit_options.clone(),
			ensemble: fitted.ensemble.clone(),
			history: fitted.history.clone(),
		}
	}
}

fn check_n_features(expected: usize, actual: usize) -> Result<()> {
	if expected != actual {
		return Err(Error::FeatureCount { expected, actual });
	}
	Ok(())
}

fn validate_data(
	features_train: ArrayView2<f64>,
	labels_train: ArrayView1<f64>,
	features_valid: ArrayView2<f64>,
	labels_valid: ArrayView1<f64>,
) -> Result<()> {
	if features_train.nrows() == 0 {
		return Err(Error::InvalidData("the training set is empty".to_owned()));
	}
	if features_valid.nrows() == 0 {
		return Err(Error::InvalidData("the validation set is empty".to_owned()));
	}
	if features_train.ncols() == 0 {
		return Err(Error::InvalidData("there are no features".to_owned()));
	}
	for (name, features, labels) in &[
		("training", features_train.view(), labels_train.view()),
		("validation", features_valid.view(), labels_valid.view()),
	] {
		if features.nrows() != labels.len() {
			return Err(Error::InvalidData(format!(
				"the {} set has {} rows of features but {} labels",
				name,
				features.nrows(),
				labels.len()
			)));
		}
		if let Some(row_index) = labels.iter().position(|label| !label.is_finite()) {
			return Err(Error::InvalidData(format!(
				"the {} label at row {} is not finite",
				name, row_index
			)));
		}
	}
	check_n_features(features_train.ncols(), features_valid.ncols())
}

#[cfg(test)]
use crate::{BatchStrategy, EvaluatorType, Node};
#[cfg(test)]
use rand::{Rng, SeedableRng};
#[cfg(test)]
use rand_xoshiro::Xoshiro256Plus;

/// Make a dataset with three features uniform in `[0, 10)` where the label is `2 * x0 + 3`, plus uniform noise in `[-noise, noise)`.
#[cfg(test)]
fn linear_dataset(n_examples: usize, noise: f64, seed: u64) -> (Array2<f64>, Array1<f64>) {
	let mut rng = Xoshiro256Plus::seed_from_u64(seed);
	let features = Array2::from_shape_fn((n_examples, 3), |_| rng.gen_range(0.0, 10.0));
	let labels = features
		.outer_iter()
		.map(|row| {
			let noise = if noise > 0.0 {
				rng.gen_range(-noise, noise)
			} else {
				0.0
			};
			2.0 * row[0] + 3.0 + noise
		})
		.collect::<Array1<f64>>();
	(features, labels)
}

/// Ten examples with values `0..10`. The label is 0 below 5 and 10 otherwise.
#[cfg(test)]
fn two_clusters_dataset() -> (Array2<f64>, Array1<f64>) {
	let features = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
	let labels = features.column(0).mapv(|x| if x < 5.0 { 0.0 } else { 10.0 });
	(features, labels)
}

#[cfg(test)]
fn fit_linear(options: RegressorOptions, fit_options: &FitOptions) -> Regressor {
	let (features_train, labels_train) = linear_dataset(2000, 0.0, 0);
	let (features_valid, labels_valid) = linear_dataset(500, 0.0, 1);
	let mut regressor = Regressor::new(options).unwrap();
	regressor
		.fit(
			features_train.view(),
			labels_train.view(),
			features_valid.view(),
			labels_valid.view(),
			fit_options,
		)
		.unwrap();
	regressor
}

#[cfg(test)]
fn fit_two_clusters(fit_options: &FitOptions) -> Regressor {
	let (features, labels) = two_clusters_dataset();
	let mut regressor = Regressor::new(RegressorOptions {
		no_early_stopping: true,
		..Default::default()
	})
	.unwrap();
	regressor
		.fit(
			features.view(),
			labels.view(),
			features.view(),
			labels.view(),
			fit_options,
		)
		.unwrap();
	regressor
}

#[cfg(test)]
fn assert_close(actual: f64, expected: f64) {
	assert!(
		(actual - expected).abs() < 1e-9,
		"{} is not close to {}",
		actual,
		expected
	);
}

#[test]
fn test_two_clusters() {
	let regressor = fit_two_clusters(&FitOptions {
		tree_count: 1,
		tree_depth: 1,
		learning_rate: 1.0,
		..Default::default()
	});
	assert_eq!(regressor.n_trees(), 1);
	let ensemble = regressor.ensemble().unwrap();
	assert_close(ensemble.bias, 5.0);
	let root = ensemble.trees[0].nodes[0].as_branch().unwrap();
	assert_eq!(root.feature_index, 0);
	assert_eq!(root.split_value, 4.5);
	assert_close(regressor.predict_one(&[2.0]).unwrap(), 0.0);
	assert_close(regressor.predict_one(&[4.5]).unwrap(), 10.0);
	assert_close(regressor.predict_one(&[7.0]).unwrap(), 10.0);
	// NaN and negative infinity are sent left, positive infinity is sent right.
	assert_close(regressor.predict_one(&[f64::NAN]).unwrap(), 0.0);
	assert_close(regressor.predict_one(&[f64::NEG_INFINITY]).unwrap(), 0.0);
	assert_close(regressor.predict_one(&[f64::INFINITY]).unwrap(), 10.0);
}

#[test]
fn test_regularization_shrinks_leaves() {
	let fit_options = FitOptions {
		tree_count: 1,
		tree_depth: 1,
		learning_rate: 1.0,
		regularization_param: 10.0,
		..Default::default()
	};
	let regressor = fit_two_clusters(&fit_options);
	let bias = regressor.ensemble().unwrap().bias;
	// Each leaf has five examples with gradient sum 25 and hessian sum 5.
	assert_close(regressor.predict_one(&[0.0]).unwrap() - bias, -25.0 / 15.0);
	assert_close(regressor.predict_one(&[9.0]).unwrap() - bias, 25.0 / 15.0);
	let regressor = fit_two_clusters(&FitOptions {
		remove_regularization_later: true,
		..fit_options
	});
	assert_close(regressor.predict_one(&[0.0]).unwrap(), 0.0);
	assert_close(regressor.predict_one(&[9.0]).unwrap(), 10.0);
}

#[test]
fn test_linear() {
	let regressor = fit_linear(
		RegressorOptions::default(),
		&FitOptions {
			tree_count: 200,
			..Default::default()
		},
	);
	let (features_test, labels_test) = linear_dataset(500, 0.0, 2);
	let predictions = regressor.predict(features_test.view()).unwrap();
	let mae = izip!(predictions.iter(), labels_test.iter())
		.map(|(prediction, label)| (prediction - label).abs())
		.sum::<f64>()
		/ labels_test.len() as f64;
	assert!(mae < 0.5, "mae is {}", mae);
}

#[test]
fn test_linear_stumps() {
	let dataset = |n_examples: usize, seed: u64| {
		let mut rng = Xoshiro256Plus::seed_from_u64(seed);
		let features = Array2::from_shape_fn((n_examples, 1), |_| rng.gen_range(-5.0, 5.0));
		let labels = features.column(0).mapv(|x| 2.0 * x + 3.0);
		(features, labels)
	};
	let (features_train, labels_train) = dataset(5000, 0);
	let (features_valid, labels_valid) = dataset(500, 1);
	let (features_test, labels_test) = dataset(500, 2);
	let mut regressor = Regressor::new(RegressorOptions {
		patience: 10,
		..Default::default()
	})
	.unwrap();
	regressor
		.fit(
			features_train.view(),
			labels_train.view(),
			features_valid.view(),
			labels_valid.view(),
			&FitOptions {
				tree_count: 1000,
				tree_depth: 1,
				learning_rate: 0.3,
				..Default::default()
			},
		)
		.unwrap();
	let ensemble = regressor.ensemble().unwrap();
	assert!(ensemble.trees.iter().all(|tree| tree.nodes.len() <= 3));
	let predictions = regressor.predict(features_test.view()).unwrap();
	let mae = izip!(predictions.iter(), labels_test.iter())
		.map(|(prediction, label)| (prediction - label).abs())
		.sum::<f64>()
		/ labels_test.len() as f64;
	assert!(mae < 0.5, "mae is {}", mae);
}

#[test]
fn test_no_early_stopping_trains_every_round() {
	let regressor = fit_linear(
		RegressorOptions {
			no_early_stopping: true,
			..Default::default()
		},
		&FitOptions {
			tree_count: 25,
			..Default::default()
		},
	);
	let history = regressor.history().unwrap();
	assert_eq!(history.train_losses.len(), 25);
	assert_eq!(history.valid_losses.len(), 25);
	assert_eq!(history.trees_learnt, 25);
	assert_eq!(regressor.n_trees(), 25);
}

#[test]
fn test_early_stopping_truncates_at_best_round() {
	let (features_train, labels_train) = linear_dataset(500, 5.0, 3);
	let (features_valid, labels_valid) = linear_dataset(500, 5.0, 4);
	let patience = 3;
	let tree_count = 200;
	let mut regressor = Regressor::new(RegressorOptions {
		patience,
		..Default::default()
	})
	.unwrap();
	let history = regressor
		.fit(
			features_train.view(),
			labels_train.view(),
			features_valid.view(),
			labels_valid.view(),
			&FitOptions {
				tree_count,
				..Default::default()
			},
		)
		.unwrap();
	let best_round = history.best_round.unwrap();
	let best_loss = history.valid_losses[best_round];
	assert!(history.valid_losses.iter().all(|loss| *loss >= best_loss));
	assert_eq!(regressor.n_trees(), best_round + 1);
	assert_eq!(history.trees_learnt, best_round + 1);
	let n_rounds = history.valid_losses.len();
	if n_rounds < tree_count {
		assert_eq!(n_rounds, best_round + 1 + patience);
	} else {
		assert!(n_rounds - 1 - best_round < patience);
	}
}

#[test]
fn test_diverging_learning_rate() {
	let (features, labels) = linear_dataset(200, 0.0, 5);
	let mut regressor = Regressor::new(RegressorOptions::default()).unwrap();
	let history = regressor
		.fit(
			features.view(),
			labels.view(),
			features.view(),
			labels.view(),
			&FitOptions {
				tree_count: 50,
				learning_rate: 1e300,
				..Default::default()
			},
		)
		.unwrap();
	// Every round overflows, so none of them improves and no tree is kept.
	assert!(history.valid_losses.iter().all(|loss| !loss.is_finite()));
	assert_eq!(history.valid_losses.len(), 3);
	assert_eq!(history.best_round, None);
	assert_eq!(regressor.n_trees(), 0);
	assert_close(
		regressor.predict_one(&[1.0, 2.0, 3.0]).unwrap(),
		bias_of(&regressor),
	);
}

#[cfg(test)]
fn bias_of(regressor: &Regressor) -> f64 {
	regressor.ensemble().unwrap().bias
}

#[test]
fn test_thread_count_does_not_change_the_model() {
	let fit_options = FitOptions {
		tree_count: 20,
		feature_fold_size: 0.67,
		batch_part: 0.8,
		spoil_split_scores: true,
		random_hist_thresholds: true,
		resample_features_per_node: true,
		..Default::default()
	};
	let (features_train, labels_train) = linear_dataset(10_000, 1.0, 6);
	let (features_valid, labels_valid) = linear_dataset(1000, 1.0, 7);
	let fit = |batch_strategy: BatchStrategy, thread_cnt: usize| {
		let mut regressor = Regressor::new(RegressorOptions {
			thread_cnt,
			..Default::default()
		})
		.unwrap();
		regressor
			.fit(
				features_train.view(),
				labels_train.view(),
				features_valid.view(),
				labels_valid.view(),
				&FitOptions {
					batch_strategy,
					..fit_options.clone()
				},
			)
			.unwrap();
		regressor
	};
	for batch_strategy in &[BatchStrategy::Random, BatchStrategy::Sequential] {
		let expected = fit(*batch_strategy, 1);
		for thread_cnt in &[2, 8] {
			let regressor = fit(*batch_strategy, *thread_cnt);
			assert_eq!(regressor.ensemble(), expected.ensemble());
			assert_eq!(regressor.history(), expected.history());
		}
	}
}

#[test]
fn test_evaluator_types_agree() {
	let (features, _) = linear_dataset(200, 0.0, 8);
	let regressors: Vec<Regressor> = [
		EvaluatorType::Interpreted,
		EvaluatorType::Table,
		EvaluatorType::Closures,
	]
	.iter()
	.map(|evaluator_type| {
		fit_linear(
			RegressorOptions {
				evaluator_type: *evaluator_type,
				..Default::default()
			},
			&FitOptions {
				tree_count: 30,
				..Default::default()
			},
		)
	})
	.collect();
	for row in features.outer_iter() {
		let row = row.to_vec();
		let expected = regressors[0].predict_one(&row).unwrap();
		for regressor in regressors.iter() {
			assert_eq!(regressor.predict_one(&row).unwrap().to_bits(), expected.to_bits());
		}
	}
}

#[test]
fn test_predict_matches_predict_one() {
	let regressor = fit_linear(
		RegressorOptions::default(),
		&FitOptions {
			tree_count: 30,
			..Default::default()
		},
	);
	let (features, _) = linear_dataset(100, 0.0, 9);
	let predictions = regressor.predict(features.view()).unwrap();
	// The rows of a transposed copy are not contiguous.
	let transposed = features.t().to_owned();
	let strided_predictions = regressor.predict(transposed.t()).unwrap();
	for (row, prediction, strided_prediction) in
		izip!(features.outer_iter(), predictions.iter(), strided_predictions.iter())
	{
		let expected = regressor.predict_one(&row.to_vec()).unwrap();
		assert_eq!(prediction.to_bits(), expected.to_bits());
		assert_eq!(strided_prediction.to_bits(), expected.to_bits());
	}
}

#[test]
fn test_predict_from_to() {
	let regressor = fit_linear(
		RegressorOptions {
			no_early_stopping: true,
			..Default::default()
		},
		&FitOptions {
			tree_count: 30,
			..Default::default()
		},
	);
	let n_trees = regressor.n_trees();
	assert!(n_trees > 2);
	let features = [4.0, 1.0, 7.0];
	let expected = regressor.predict_one(&features).unwrap();
	assert_eq!(
		regressor
			.predict_from_to(&features, 0, n_trees)
			.unwrap()
			.to_bits(),
		expected.to_bits()
	);
	assert_eq!(
		regressor.predict_from_to(&features, 0, 0).unwrap(),
		bias_of(&regressor)
	);
	let head = regressor.predict_from_to(&features, 0, 2).unwrap();
	let tail = regressor.predict_from_to(&features, 3, n_trees).unwrap();
	assert!((head + tail - expected).abs() < 1e-9);
	assert!(matches!(
		regressor.predict_from_to(&features, 2, 1),
		Err(Error::TreeRange { .. })
	));
	assert!(matches!(
		regressor.predict_from_to(&features, 0, n_trees + 1),
		Err(Error::TreeRange { .. })
	));
}

#[test]
fn test_save_and_load() {
	let regressor = fit_linear(
		RegressorOptions {
			evaluator_type: EvaluatorType::Closures,
			..Default::default()
		},
		&FitOptions {
			tree_count: 30,
			..Default::default()
		},
	);
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("model.jittrees");
	regressor.save_model(&path).unwrap();
	let loaded = Regressor::from_path(&path).unwrap();
	assert_eq!(loaded.options(), regressor.options());
	assert_eq!(loaded.fit_options(), regressor.fit_options());
	assert_eq!(loaded.ensemble(), regressor.ensemble());
	assert_eq!(loaded.history(), regressor.history());
	assert_eq!(std::fs::read(&path).unwrap(), regressor.to_bytes().unwrap());
	let (features, _) = linear_dataset(100, 0.0, 10);
	for row in features.outer_iter() {
		let row = row.to_vec();
		assert_eq!(
			loaded.predict_one(&row).unwrap().to_bits(),
			regressor.predict_one(&row).unwrap().to_bits()
		);
	}
}

/// A writer with no space left, like a full disk.
#[cfg(test)]
struct FullWriter;

#[cfg(test)]
impl Write for FullWriter {
	fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
		Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

#[test]
fn test_save_reports_write_errors() {
	let regressor = fit_two_clusters(&FitOptions {
		tree_count: 1,
		..Default::default()
	});
	// The model fits in the buffer, so the error only surfaces when the buffer is flushed.
	let writer = std::io::BufWriter::with_capacity(1 << 20, FullWriter);
	assert!(matches!(regressor.write_model(writer), Err(Error::Io(_))));
	assert!(regressor.write_model(FullWriter).is_err());
}

#[cfg(test)]
fn is_decode_error(bytes: &[u8]) -> bool {
	matches!(Regressor::from_slice(bytes), Err(Error::Decode(_)))
}

/// Decode a model, change it with `corrupt`, and encode it again without validating it.
#[cfg(test)]
fn rewrite(bytes: &[u8], corrupt: impl FnOnce(&mut SavedModel)) -> Vec<u8> {
	let mut model = store::read(bytes).unwrap();
	corrupt(&mut model);
	let mut corrupted = Vec::new();
	store::write(&mut corrupted, &model).unwrap();
	corrupted
}

#[test]
fn test_load_rejects_corrupt_models() {
	let regressor = fit_linear(
		RegressorOptions::default(),
		&FitOptions {
			tree_count: 5,
			..Default::default()
		},
	);
	let bytes = regressor.to_bytes().unwrap();
	assert!(Regressor::from_slice(&bytes).is_ok());
	assert!(is_decode_error(&[]));
	assert!(is_decode_error(&bytes[..3]));
	assert!(is_decode_error(&bytes[..bytes.len() - 1]));
	let mut wrong_magic = bytes.clone();
	wrong_magic[0] = b'X';
	assert!(is_decode_error(&wrong_magic));
	let mut wrong_version = bytes.clone();
	wrong_version[4] = 1;
	assert!(is_decode_error(&wrong_version));
	let mut trailing = bytes.clone();
	trailing.push(0);
	assert!(is_decode_error(&trailing));

	let cycle = rewrite(&bytes, |model| {
		if let Node::Branch(branch) = &mut model.ensemble.trees[0].nodes[0] {
			branch.left_child_index = 0;
		}
	});
	assert!(is_decode_error(&cycle));
	let wrong_split_value = rewrite(&bytes, |model| {
		if let Node::Branch(branch) = &mut model.ensemble.trees[0].nodes[0] {
			branch.split_value += 1.0;
		}
	});
	assert!(is_decode_error(&wrong_split_value));
	let missing_feature = rewrite(&bytes, |model| model.ensemble.n_features = 4);
	assert!(is_decode_error(&missing_feature));
	let invalid_options = rewrite(&bytes, |model| model.options.thread_cnt = 0);
	assert!(is_decode_error(&invalid_options));
}

#[test]
fn test_invalid_options() {
	let result = Regressor::new(RegressorOptions {
		min_bins: 10,
		max_bins: 5,
		..Default::default()
	});
	assert!(matches!(
		result,
		Err(Error::InvalidOption {
			name: "min_bins",
			..
		})
	));
	let result = Regressor::new(RegressorOptions {
		thread_cnt: 0,
		..Default::default()
	});
	assert!(matches!(
		result,
		Err(Error::InvalidOption {
			name: "thread_cnt",
			..
		})
	));
	let (features, labels) = two_clusters_dataset();
	let mut regressor = Regressor::new(RegressorOptions::default()).unwrap();
	for (name, fit_options) in vec![
		(
			"tree_depth",
			FitOptions {
				tree_depth: 0,
				..Default::default()
			},
		),
		(
			"learning_rate",
			FitOptions {
				learning_rate: 0.0,
				..Default::default()
			},
		),
		(
			"batch_part",
			FitOptions {
				batch_part: 1.5,
				..Default::default()
			},
		),
		(
			"feature_fold_size",
			FitOptions {
				feature_fold_size: f64::NAN,
				..Default::default()
			},
		),
	] {
		let result = regressor.fit(
			features.view(),
			labels.view(),
			features.view(),
			labels.view(),
			&fit_options,
		);
		match result {
			Err(Error::InvalidOption { name: actual, .. }) => assert_eq!(actual, name),
			other => panic!("expected an invalid option error, got {:?}", other),
		}
	}
	assert!(regressor.ensemble().is_none());
}

#[test]
fn test_invalid_data() {
	let (features, labels) = linear_dataset(20, 0.0, 11);
	let mut regressor = Regressor::new(RegressorOptions::default()).unwrap();
	let fit_options = FitOptions::default();
	let empty_features = Array2::<f64>::zeros((0, 3));
	let empty_labels = Array1::<f64>::zeros(0);
	let result = regressor.fit(
		empty_features.view(),
		empty_labels.view(),
		features.view(),
		labels.view(),
		&fit_options,
	);
	assert!(matches!(result, Err(Error::InvalidData(_))));
	let result = regressor.fit(
		features.view(),
		labels.slice(s![..10]),
		features.view(),
		labels.view(),
		&fit_options,
	);
	assert!(matches!(result, Err(Error::InvalidData(_))));
	let mut nan_labels = labels.clone();
	nan_labels[3] = f64::NAN;
	let result = regressor.fit(
		features.view(),
		nan_labels.view(),
		features.view(),
		labels.view(),
		&fit_options,
	);
	assert!(matches!(result, Err(Error::InvalidData(_))));
	let result = regressor.fit(
		features.view(),
		labels.view(),
		features.slice(s![.., ..2]),
		labels.view(),
		&fit_options,
	);
	assert!(matches!(
		result,
		Err(Error::FeatureCount {
			expected: 3,
			actual: 2
		})
	));
}

#[test]
fn test_not_fitted() {
	let regressor = Regressor::new(RegressorOptions::default()).unwrap();
	assert_eq!(regressor.n_trees(), 0);
	assert!(matches!(regressor.predict_one(&[1.0]), Err(Error::NotFitted)));
	assert!(matches!(regressor.to_bytes(), Err(Error::NotFitted)));
	let fitted = fit_two_clusters(&FitOptions {
		tree_count: 1,
		..Default::default()
	});
	assert!(matches!(
		fitted.predict_one(&[1.0, 2.0]),
		Err(Error::FeatureCount {
			expected: 1,
			actual: 2
		})
	));
}
