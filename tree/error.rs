use thiserror::Error;

/// Errors returned by constructing, fitting, evaluating, saving, and loading a `Regressor`.
#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid option `{name}`: {reason}")]
	InvalidOption { name: &'static str, reason: String },

	#[error("invalid data: {0}")]
	InvalidData(String),

	#[error("expected {expected} features but got {actual}")]
	FeatureCount { expected: usize, actual: usize },

	#[error("the model has not been fit")]
	NotFitted,

	#[error("invalid estimator range {first}..={last} for a model with {n_trees} trees")]
	TreeRange {
		first: usize,
		last: usize,
		n_trees: usize,
	},

	#[error("failed to build the thread pool: {0}")]
	ThreadPool(#[from] rayon::ThreadPoolBuildError),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("failed to encode the model: {0}")]
	Encode(#[from] rmp_serde::encode::Error),

	#[error("failed to decode the model: {0}")]
	Decode(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
