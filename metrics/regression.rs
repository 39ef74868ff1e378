use super::{
	mean_variance::{m2_to_variance, merge_mean_m2},
	StreamingMetric,
};
use ndarray::prelude::*;
use num_traits::ToPrimitive;

/// `RegressionMetrics` computes common metrics used to evaluate regressors.
#[derive(Clone, Debug)]
pub struct RegressionMetrics {
	mean_variance: Option<MeanVariance>,
	absolute_error: f64,
	squared_error: f64,
}

#[derive(Clone, Debug)]
struct MeanVariance {
	pub n: u64,
	pub m2: f64,
	pub mean: f64,
}

/// The input to [`RegressionMetrics`](struct.RegressionMetrics.html).
pub struct RegressionMetricsInput<'a> {
	pub predictions: ArrayView1<'a, f64>,
	pub labels: ArrayView1<'a, f64>,
}

/// The output from [`RegressionMetrics`](struct.RegressionMetrics.html).
#[derive(Debug, serde::Serialize)]
pub struct RegressionMetricsOutput {
	/// The number of examples the metrics were computed over.
	pub n_examples: u64,
	/// The mean squared error is equal to the mean of the squared errors. For a given example, the error is the difference between the true value and the model's predicted value.
	pub mse: f64,
	/// The root mean squared error is equal to the square root of the mean squared error.
	pub rmse: f64,
	/// The mean of the absolute value of the errors.
	pub mae: f64,
	/// The r-squared value. https://en.wikipedia.org/wiki/Coefficient_of_determination.
	pub r2: f64,
	/// The baseline mean squared error is the mean squared error if the predicted value was always the mean of the labels.
	pub baseline_mse: f64,
	/// The baseline root mean squared error is the square root of the baseline mean squared error.
	pub baseline_rmse: f64,
}

impl Default for RegressionMetrics {
	fn default() -> Self {
		Self {
			mean_variance: None,
			absolute_error: 0.0,
			squared_error: 0.0,
		}
	}
}

impl<'a> StreamingMetric<'a> for RegressionMetrics {
	type Input = RegressionMetricsInput<'a>;
	type Output = RegressionMetricsOutput;

	fn update(&mut self, input: Self::Input) {
		let RegressionMetricsInput {
			predictions,
			labels,
		} = input;
		for (prediction, label) in predictions.iter().zip(labels.iter()) {
			match &mut self.mean_variance {
				Some(mean_variance) => {
					let (mean, m2) = merge_mean_m2(
						mean_variance.n,
						mean_variance.mean,
						mean_variance.m2,
						1,
						*label,
						0.0,
					);
					mean_variance.n += 1;
					mean_variance.mean = mean;
					mean_variance.m2 = m2;
				}
				None => {
					self.mean_variance = Some(MeanVariance {
						n: 1,
						mean: *label,
						m2: 0.0,
					})
				}
			}
			let error = prediction - label;
			self.absolute_error += error.abs();
			self.squared_error += error * error;
		}
	}

	fn merge(&mut self, other: Self) {
		match &mut self.mean_variance {
			Some(mean_variance) => {
				if let Some(other) = other.mean_variance {
					let (mean, m2) = merge_mean_m2(
						mean_variance.n,
						mean_variance.mean,
						mean_variance.m2,
						other.n,
						other.mean,
						other.m2,
					);
					mean_variance.mean = mean;
					mean_variance.m2 = m2;
					mean_variance.n += other.n;
				}
			}
			None => {
				self.mean_variance = other.mean_variance;
			}
		}
		self.absolute_error += other.absolute_error;
		self.squared_error += other.squared_error;
	}

	fn finalize(self) -> Self::Output {
		let (n_examples, variance) = match self.mean_variance {
			Some(m) => (m.n, m2_to_variance(m.m2, m.n)),
			None => (0, f64::NAN),
		};
		let n = n_examples.to_f64().unwrap();
		let mae = self.absolute_error / n;
		let mse = self.squared_error / n;
		let rmse = mse.sqrt();
		let r2 = 1.0 - self.squared_error / (variance * n);
		let baseline_mse = variance;
		let baseline_rmse = baseline_mse.sqrt();
		RegressionMetricsOutput {
			n_examples,
			mse,
			rmse,
			mae,
			r2,
			baseline_mse,
			baseline_rmse,
		}
	}
}

#[test]
fn test_regression_metrics() {
	let mut metrics = RegressionMetrics::default();
	let labels = arr1(&[1.0, 2.0, 3.0, 4.0]);
	let predictions = arr1(&[1.0, 2.0, 3.0, 6.0]);
	metrics.update(RegressionMetricsInput {
		predictions: predictions.view(),
		labels: labels.view(),
	});
	let metrics = metrics.finalize();
	insta::assert_debug_snapshot!(metrics, @r###"
 RegressionMetricsOutput {
     n_examples: 4,
     mse: 1.0,
     rmse: 1.0,
     mae: 0.5,
     r2: 0.19999999999999996,
     baseline_mse: 1.25,
     baseline_rmse: 1.118033988749895,
 }
 "###);
}

#[test]
fn test_regression_metrics_merge() {
	let labels = arr1(&[1.0, 2.0, 3.0, 4.0]);
	let predictions = arr1(&[1.5, 2.0, 2.0, 4.0]);
	let mut a = RegressionMetrics::default();
	a.update(RegressionMetricsInput {
		predictions: predictions.slice(s![..2]),
		labels: labels.slice(s![..2]),
	});
	let mut b = RegressionMetrics::default();
	b.update(RegressionMetricsInput {
		predictions: predictions.slice(s![2..]),
		labels: labels.slice(s![2..]),
	});
	a.merge(b);
	let merged = a.finalize();
	let mut whole = RegressionMetrics::default();
	whole.update(RegressionMetricsInput {
		predictions: predictions.view(),
		labels: labels.view(),
	});
	let whole = whole.finalize();
	assert_eq!(merged.n_examples, 4);
	assert!((merged.mae - whole.mae).abs() < 1e-12);
	assert!((merged.mse - whole.mse).abs() < 1e-12);
	assert!((merged.baseline_mse - whole.baseline_mse).abs() < 1e-12);
}
