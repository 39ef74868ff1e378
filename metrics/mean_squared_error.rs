use super::{mean::Mean, StreamingMetric};

/// The mean squared error is the mean of the squared differences between the predicted value and the label. The input is a `(prediction, label)` pair.
#[derive(Clone, Debug, Default)]
pub struct MeanSquaredError(Mean);

impl StreamingMetric<'_> for MeanSquaredError {
	type Input = (f64, f64);
	type Output = Option<f64>;

	fn update(&mut self, value: Self::Input) {
		self.0.update((value.1 - value.0).powi(2))
	}

	fn merge(&mut self, other: Self) {
		self.0.merge(other.0)
	}

	fn finalize(self) -> Self::Output {
		self.0.finalize()
	}
}

/// Half of the mean squared error. This is the loss minimized by boosting with squared error, whose gradient with respect to the prediction is `prediction - label`.
#[derive(Clone, Debug, Default)]
pub struct HalfMeanSquaredError(MeanSquaredError);

impl StreamingMetric<'_> for HalfMeanSquaredError {
	type Input = (f64, f64);
	type Output = Option<f64>;

	fn update(&mut self, value: Self::Input) {
		self.0.update(value)
	}

	fn merge(&mut self, other: Self) {
		self.0.merge(other.0)
	}

	fn finalize(self) -> Self::Output {
		self.0.finalize().map(|mse| 0.5 * mse)
	}
}

#[test]
fn test_mean_squared_error() {
	let mut mse = MeanSquaredError::default();
	mse.update((1.0, 1.0));
	mse.update((2.0, 4.0));
	let mut half_mse = HalfMeanSquaredError::default();
	half_mse.update((1.0, 1.0));
	half_mse.update((2.0, 4.0));
	assert_eq!(mse.finalize(), Some(2.0));
	assert_eq!(half_mse.finalize(), Some(1.0));
}

#[test]
fn test_mean_squared_error_not_finite() {
	let mut mse = MeanSquaredError::default();
	mse.update((f64::NAN, 1.0));
	mse.update((2.0, 2.0));
	assert!(mse.finalize().unwrap().is_nan());
}
