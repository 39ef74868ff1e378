use super::StreamingMetric;
use num_traits::ToPrimitive;

/// The arithmetic mean, updated one value at a time.
#[derive(Clone, Debug, Default)]
pub struct Mean {
	n: u64,
	mean: f64,
}

impl Mean {
	pub fn n(&self) -> u64 {
		self.n
	}
}

impl StreamingMetric<'_> for Mean {
	type Input = f64;
	type Output = Option<f64>;

	fn update(&mut self, value: f64) {
		self.n += 1;
		self.mean += (value - self.mean) / self.n.to_f64().unwrap();
	}

	fn merge(&mut self, other: Self) {
		if other.n == 0 {
			return;
		}
		if self.n == 0 {
			*self = other;
			return;
		}
		let n_a = self.n.to_f64().unwrap();
		let n_b = other.n.to_f64().unwrap();
		self.mean = ((n_a * self.mean) + (n_b * other.mean)) / (n_a + n_b);
		self.n += other.n;
	}

	fn finalize(self) -> Self::Output {
		if self.n == 0 {
			None
		} else {
			Some(self.mean)
		}
	}
}

#[test]
fn test_mean() {
	let mut mean = Mean::default();
	for value in &[1.0, 2.0, 3.0, 6.0] {
		mean.update(*value);
	}
	assert_eq!(mean.finalize(), Some(3.0));
}

#[test]
fn test_mean_merge() {
	let mut a = Mean::default();
	a.update(1.0);
	a.update(3.0);
	let mut b = Mean::default();
	b.update(8.0);
	a.merge(b);
	a.merge(Mean::default());
	assert_eq!(a.n(), 3);
	assert_eq!(a.finalize(), Some(4.0));
}

#[test]
fn test_mean_empty() {
	assert_eq!(Mean::default().finalize(), None);
}
