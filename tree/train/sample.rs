use crate::BatchStrategy;
use num_traits::ToPrimitive;
use rand::seq::{index, SliceRandom};
use rand_xoshiro::Xoshiro256Plus;

/// A `BatchSampler` chooses the training rows for each round.
pub struct BatchSampler {
	strategy: BatchStrategy,
	n_examples: usize,
	batch_size: usize,
	position: usize,
	permutation: Vec<usize>,
}

impl BatchSampler {
	pub fn new(
		n_examples: usize,
		batch_part: f64,
		strategy: BatchStrategy,
		rng: &mut Xoshiro256Plus,
	) -> BatchSampler {
		let batch_size = fraction_to_count(n_examples, batch_part);
		let permutation = match strategy {
			BatchStrategy::Random => {
				let mut permutation: Vec<usize> = (0..n_examples).collect();
				permutation.shuffle(rng);
				permutation
			}
			BatchStrategy::Full | BatchStrategy::Sequential => Vec::new(),
		};
		BatchSampler {
			strategy,
			n_examples,
			batch_size,
			position: 0,
			permutation,
		}
	}

	/// Return the sorted row indexes for the next round.
	pub fn next_batch(&mut self, rng: &mut Xoshiro256Plus) -> Vec<usize> {
		let mut batch: Vec<usize> = match self.strategy {
			BatchStrategy::Full => return (0..self.n_examples).collect(),
			BatchStrategy::Sequential => {
				let batch = (0..self.batch_size)
					.map(|offset| (self.position + offset) % self.n_examples)
					.collect();
				self.position = (self.position + self.batch_size) % self.n_examples;
				batch
			}
			BatchStrategy::Random => {
				if self.position + self.batch_size > self.n_examples {
					self.permutation.shuffle(rng);
					self.position = 0;
				}
				let batch = self.permutation[self.position..self.position + self.batch_size].to_vec();
				self.position += self.batch_size;
				batch
			}
		};
		batch.sort_unstable();
		batch
	}
}

/// Choose the features that may be split on. The fold has `max(1, round(n_features * feature_fold_size))` features, listed in increasing order.
pub fn sample_feature_fold(
	n_features: usize,
	feature_fold_size: f64,
	rng: &mut Xoshiro256Plus,
) -> Vec<usize> {
	let fold_size = fraction_to_count(n_features, feature_fold_size);
	if fold_size == n_features {
		return (0..n_features).collect();
	}
	let mut feature_indexes = index::sample(rng, n_features, fold_size).into_vec();
	feature_indexes.sort_unstable();
	feature_indexes
}

fn fraction_to_count(n: usize, fraction: f64) -> usize {
	let count = (n.to_f64().unwrap() * fraction).round().to_usize().unwrap_or(n);
	count.max(1).min(n)
}

#[cfg(test)]
use rand::SeedableRng;

#[test]
fn test_full_batches() {
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let mut sampler = BatchSampler::new(5, 0.4, BatchStrategy::Full, &mut rng);
	assert_eq!(sampler.next_batch(&mut rng), vec![0, 1, 2, 3, 4]);
	assert_eq!(sampler.next_batch(&mut rng), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_sequential_batches() {
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let mut sampler = BatchSampler::new(5, 0.4, BatchStrategy::Sequential, &mut rng);
	assert_eq!(sampler.next_batch(&mut rng), vec![0, 1]);
	assert_eq!(sampler.next_batch(&mut rng), vec![2, 3]);
	assert_eq!(sampler.next_batch(&mut rng), vec![0, 4]);
	assert_eq!(sampler.next_batch(&mut rng), vec![1, 2]);
}

#[test]
fn test_random_batches() {
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let mut sampler = BatchSampler::new(10, 0.3, BatchStrategy::Random, &mut rng);
	// The first three batches come from one permutation, so they are disjoint.
	let mut seen: Vec<usize> = (0..3).flat_map(|_| sampler.next_batch(&mut rng)).collect();
	seen.sort_unstable();
	seen.dedup();
	assert_eq!(seen.len(), 9);
	let batch = sampler.next_batch(&mut rng);
	assert_eq!(batch.len(), 3);
	assert!(batch.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_feature_fold() {
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	assert_eq!(sample_feature_fold(4, 1.0, &mut rng), vec![0, 1, 2, 3]);
	assert_eq!(sample_feature_fold(4, 0.01, &mut rng).len(), 1);
	let fold = sample_feature_fold(10, 0.5, &mut rng);
	assert_eq!(fold.len(), 5);
	assert!(fold.windows(2).all(|w| w[0] < w[1]));
	assert!(fold.iter().all(|feature_index| *feature_index < 10));
}
