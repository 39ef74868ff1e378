//! This module contains the main entrypoint to the jittrees cli.

use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use jittrees_metrics::{
	RegressionMetrics, RegressionMetricsInput, RegressionMetricsOutput, StreamingMetric,
};
use jittrees_tree::{BatchStrategy, EvaluatorType, FitOptions, Regressor, RegressorOptions};
use ndarray::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
	name = "jittrees",
	version,
	about = "Train and evaluate gradient boosted regression trees on synthetic data.",
	disable_help_subcommand = true
)]
struct Options {
	/// Log every boosting round. This overrides RUST_LOG.
	#[arg(short, long, global = true)]
	verbose: bool,
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Train a model on a synthetic target and print its metrics on fresh test data.
	Train(TrainOptions),
	/// Load a model and print its metrics on fresh data from a synthetic target.
	Predict(PredictOptions),
}

#[derive(Args)]
struct DataOptions {
	/// The function the labels are computed from.
	#[arg(long, value_enum, default_value = "linear")]
	target: Target,
	/// Feature values are drawn uniformly from [-border, border).
	#[arg(long, default_value_t = 5.0)]
	border: f64,
	/// The seed for drawing feature values.
	#[arg(long, default_value_t = 0)]
	data_seed: u64,
}

#[derive(Args)]
struct TrainOptions {
	#[command(flatten)]
	data: DataOptions,
	#[arg(long, default_value_t = 10_000)]
	train_count: usize,
	#[arg(long, default_value_t = 1000)]
	valid_count: usize,
	#[arg(long, default_value_t = 3000)]
	test_count: usize,
	/// The path to write the model to.
	#[arg(short, long)]
	output: Option<PathBuf>,
	#[arg(long, default_value_t = RegressorOptions::default().min_bins)]
	min_bins: usize,
	#[arg(long, default_value_t = RegressorOptions::default().max_bins)]
	max_bins: usize,
	#[arg(long, default_value_t = RegressorOptions::default().patience)]
	patience: usize,
	#[arg(long)]
	no_early_stopping: bool,
	#[arg(long, default_value_t = RegressorOptions::default().thread_cnt)]
	thread_cnt: usize,
	#[arg(long, value_enum, default_value = "table")]
	evaluator: Evaluator,
	#[arg(long, default_value_t = FitOptions::default().tree_count)]
	tree_count: usize,
	#[arg(long, default_value_t = FitOptions::default().tree_depth)]
	tree_depth: usize,
	#[arg(long, default_value_t = FitOptions::default().feature_fold_size)]
	feature_fold_size: f64,
	#[arg(long, default_value_t = FitOptions::default().learning_rate)]
	learning_rate: f64,
	#[arg(long, default_value_t = FitOptions::default().early_stopping_delta)]
	early_stopping_delta: f64,
	#[arg(long, default_value_t = FitOptions::default().batch_part)]
	batch_part: f64,
	#[arg(long, value_enum, default_value = "full")]
	batch_strategy: Batch,
	#[arg(long, default_value_t = FitOptions::default().regularization_param)]
	regularization_param: f64,
	#[arg(long)]
	random_hist_thresholds: bool,
	#[arg(long)]
	remove_regularization_later: bool,
	#[arg(long)]
	spoil_split_scores: bool,
	#[arg(long, default_value_t = FitOptions::default().random_state)]
	random_state: u64,
	#[arg(long)]
	resample_features_per_node: bool,
}

#[derive(Args)]
struct PredictOptions {
	#[command(flatten)]
	data: DataOptions,
	/// The path to a model written by `jittrees train`.
	#[arg(short, long)]
	model: PathBuf,
	#[arg(long, default_value_t = 3000)]
	count: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
	/// y = 2x + 3
	Linear,
	/// y = -2x + 3
	LinearNeg,
	/// y = sin(x)
	Sin,
	/// y = cos(x)
	Cos,
	/// y = x^3 - 2x^2 + 3
	Poly,
}

impl Target {
	fn compute(self, x: f64) -> f64 {
		match self {
			Target::Linear => 2.0 * x + 3.0,
			Target::LinearNeg => -2.0 * x + 3.0,
			Target::Sin => x.sin(),
			Target::Cos => x.cos(),
			Target::Poly => x.powi(3) - 2.0 * x.powi(2) + 3.0,
		}
	}
}

#[derive(Clone, Copy, ValueEnum)]
enum Evaluator {
	Interpreted,
	Table,
	Closures,
}

impl From<Evaluator> for EvaluatorType {
	fn from(value: Evaluator) -> EvaluatorType {
		match value {
			Evaluator::Interpreted => EvaluatorType::Interpreted,
			Evaluator::Table => EvaluatorType::Table,
			Evaluator::Closures => EvaluatorType::Closures,
		}
	}
}

#[derive(Clone, Copy, ValueEnum)]
enum Batch {
	Full,
	Sequential,
	Random,
}

impl From<Batch> for BatchStrategy {
	fn from(value: Batch) -> BatchStrategy {
		match value {
			Batch::Full => BatchStrategy::Full,
			Batch::Sequential => BatchStrategy::Sequential,
			Batch::Random => BatchStrategy::Random,
		}
	}
}

fn main() -> Result<()> {
	let options = Options::parse();
	let filter = if options.verbose {
		EnvFilter::new("debug")
	} else {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
	};
	let subscriber = FmtSubscriber::builder()
		.with_env_filter(filter)
		.with_target(false)
		.with_writer(std::io::stderr)
		.finish();
	tracing::subscriber::set_global_default(subscriber)
		.context("failed to set the tracing subscriber")?;
	match options.command {
		Command::Train(options) => cli_train(options),
		Command::Predict(options) => cli_predict(options),
	}
}

fn cli_train(options: TrainOptions) -> Result<()> {
	let TrainOptions {
		data,
		train_count,
		valid_count,
		test_count,
		output,
		..
	} = &options;
	let regressor_options = RegressorOptions {
		min_bins: options.min_bins,
		max_bins: options.max_bins,
		patience: options.patience,
		no_early_stopping: options.no_early_stopping,
		thread_cnt: options.thread_cnt,
		evaluator_type: options.evaluator.into(),
	};
	let fit_options = FitOptions {
		tree_count: options.tree_count,
		tree_depth: options.tree_depth,
		feature_fold_size: options.feature_fold_size,
		learning_rate: options.learning_rate,
		early_stopping_delta: options.early_stopping_delta,
		batch_part: options.batch_part,
		batch_strategy: options.batch_strategy.into(),
		regularization_param: options.regularization_param,
		random_hist_thresholds: options.random_hist_thresholds,
		remove_regularization_later: options.remove_regularization_later,
		spoil_split_scores: options.spoil_split_scores,
		random_state: options.random_state,
		resample_features_per_node: options.resample_features_per_node,
	};

	// The train, validation and test sets are drawn with consecutive seeds.
	let (features_train, labels_train) = synthetic_dataset(data, *train_count, data.data_seed)?;
	let (features_valid, labels_valid) =
		synthetic_dataset(data, *valid_count, data.data_seed.wrapping_add(1))?;
	let mut regressor = Regressor::new(regressor_options)?;
	let history = regressor.fit(
		features_train.view(),
		labels_train.view(),
		features_valid.view(),
		labels_valid.view(),
		&fit_options,
	)?;
	info!(n_trees = regressor.n_trees(), "trained model");

	let metrics = evaluate(
		&regressor,
		data,
		*test_count,
		data.data_seed.wrapping_add(2),
	)?;
	if let Some(output) = output {
		regressor
			.save_model(output)
			.with_context(|| format!("failed to write the model to {}", output.display()))?;
		info!(path = %output.display(), "wrote model");
	}
	let output = json!({
		"target": format!("{:?}", data.target),
		"n_trees": regressor.n_trees(),
		"best_round": history.best_round,
		"rounds": history.valid_losses.len(),
		"initial_valid_loss": history.initial_valid_loss,
		"best_valid_loss": history.best_round.map(|best_round| history.valid_losses[best_round]),
		"test": metrics,
	});
	println!("{}", serde_json::to_string_pretty(&output)?);
	Ok(())
}

fn cli_predict(options: PredictOptions) -> Result<()> {
	let PredictOptions { data, model, count } = &options;
	let regressor = Regressor::from_path(model)
		.with_context(|| format!("failed to load the model from {}", model.display()))?;
	info!(n_trees = regressor.n_trees(), "loaded model");
	let metrics = evaluate(&regressor, data, *count, data.data_seed)?;
	let output = json!({
		"target": format!("{:?}", data.target),
		"n_trees": regressor.n_trees(),
		"test": metrics,
	});
	println!("{}", serde_json::to_string_pretty(&output)?);
	Ok(())
}

/// Draw `n_examples` values of a single feature uniformly from `[-border, border)` and compute their labels.
fn synthetic_dataset(
	options: &DataOptions,
	n_examples: usize,
	seed: u64,
) -> Result<(Array2<f64>, Array1<f64>)> {
	let DataOptions { target, border, .. } = *options;
	ensure!(
		border.is_finite() && border > 0.0,
		"border must be finite and positive"
	);
	let mut rng = Xoshiro256Plus::seed_from_u64(seed);
	let features = Array2::from_shape_fn((n_examples, 1), |_| rng.gen_range(-border, border));
	let labels = features.column(0).mapv(|x| target.compute(x));
	Ok((features, labels))
}

fn evaluate(
	regressor: &Regressor,
	data: &DataOptions,
	n_examples: usize,
	seed: u64,
) -> Result<RegressionMetricsOutput> {
	let (features, labels) = synthetic_dataset(data, n_examples, seed)?;
	let predictions = regressor.predict(features.view())?;
	let mut metrics = RegressionMetrics::default();
	metrics.update(RegressionMetricsInput {
		predictions: predictions.view(),
		labels: labels.view(),
	});
	Ok(metrics.finalize())
}

#[cfg(test)]
fn data_options(target: Target) -> DataOptions {
	DataOptions {
		target,
		border: 2.0,
		data_seed: 0,
	}
}

#[test]
fn test_options() {
	use clap::CommandFactory;
	Options::command().debug_assert();
	let options = Options::try_parse_from(&[
		"jittrees",
		"train",
		"--target",
		"linear-neg",
		"--batch-strategy",
		"random",
		"--tree-depth",
		"1",
	])
	.unwrap();
	match options.command {
		Command::Train(options) => {
			assert!(matches!(options.data.target, Target::LinearNeg));
			assert_eq!(options.tree_depth, 1);
			assert_eq!(options.learning_rate, FitOptions::default().learning_rate);
			assert_eq!(
				BatchStrategy::from(options.batch_strategy),
				BatchStrategy::Random
			);
		}
		Command::Predict(_) => panic!("expected the train command"),
	}
}

#[test]
fn test_synthetic_dataset() {
	let (features, labels) = synthetic_dataset(&data_options(Target::Poly), 100, 3).unwrap();
	assert_eq!(features.dim(), (100, 1));
	for (x, y) in features.column(0).iter().zip(labels.iter()) {
		assert!(*x >= -2.0 && *x < 2.0);
		assert_eq!(*y, x * x * x - 2.0 * x * x + 3.0);
	}
	let (same_features, _) = synthetic_dataset(&data_options(Target::Poly), 100, 3).unwrap();
	assert_eq!(features, same_features);
	let mut options = data_options(Target::Sin);
	options.border = 0.0;
	assert!(synthetic_dataset(&options, 10, 0).is_err());
}

#[test]
fn test_train_and_evaluate() {
	let data = data_options(Target::Cos);
	let (features_train, labels_train) = synthetic_dataset(&data, 2000, 0).unwrap();
	let (features_valid, labels_valid) = synthetic_dataset(&data, 500, 1).unwrap();
	let mut regressor = Regressor::new(RegressorOptions::default()).unwrap();
	regressor
		.fit(
			features_train.view(),
			labels_train.view(),
			features_valid.view(),
			labels_valid.view(),
			&FitOptions {
				tree_count: 100,
				..Default::default()
			},
		)
		.unwrap();
	let metrics = evaluate(&regressor, &data, 500, 2).unwrap();
	assert_eq!(metrics.n_examples, 500);
	assert!(metrics.rmse < 0.1, "rmse is {}", metrics.rmse);
}
