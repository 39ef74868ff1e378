/// The `EarlyStoppingMonitor` decides after each round whether training should stop. A round improves on the best loss so far only if its loss is finite and lower than the best by more than `tolerance`. The first round with a finite loss always improves.
#[derive(Clone, Debug)]
pub struct EarlyStoppingMonitor {
	tolerance: f64,
	max_rounds_no_improve: usize,
	best_loss: Option<f64>,
	num_rounds_no_improve: usize,
}

impl EarlyStoppingMonitor {
	/// Create a train stop monitor,
	pub fn new(tolerance: f64, max_rounds_no_improve: usize) -> Self {
		EarlyStoppingMonitor {
			tolerance,
			max_rounds_no_improve,
			best_loss: None,
			num_rounds_no_improve: 0,
		}
	}

	/// Update with the next round's validation loss. Returns true if training should stop.
	pub fn update(&mut self, loss: f64) -> bool {
		let improved = loss.is_finite()
			&& match self.best_loss {
				Some(best_loss) => best_loss - loss > self.tolerance,
				None => true,
			};
		if improved {
			self.best_loss = Some(loss);
			self.num_rounds_no_improve = 0;
			false
		} else {
			self.num_rounds_no_improve += 1;
			self.num_rounds_no_improve >= self.max_rounds_no_improve
		}
	}
}

#[test]
fn test_early_stopping_monitor() {
	let mut monitor = EarlyStoppingMonitor::new(0.0, 2);
	assert!(!monitor.update(3.0));
	assert!(!monitor.update(2.0));
	assert!(!monitor.update(2.0));
	assert!(!monitor.update(1.0));
	assert!(!monitor.update(1.5));
	assert!(monitor.update(1.0));
}

#[test]
fn test_early_stopping_tolerance() {
	let mut monitor = EarlyStoppingMonitor::new(0.5, 2);
	assert!(!monitor.update(3.0));
	assert!(!monitor.update(2.75));
	// 2.0 improves on the best loss of 3.0 by more than 0.5.
	assert!(!monitor.update(2.0));
	assert!(!monitor.update(1.75));
	assert!(monitor.update(1.6));
}

#[test]
fn test_early_stopping_not_finite() {
	let mut monitor = EarlyStoppingMonitor::new(0.0, 3);
	assert!(!monitor.update(f64::NAN));
	assert!(!monitor.update(f64::INFINITY));
	assert!(!monitor.update(1.0));
	assert!(!monitor.update(f64::NAN));
	assert!(!monitor.update(f64::NEG_INFINITY));
	assert!(monitor.update(2.0));
}
