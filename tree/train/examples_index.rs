use super::bin::BinnedFeaturesColumn;
use std::ops::Range;

/// This function returns the `examples_index_range`s for the left and right nodes and rearranges the `examples_index` so that the example indexes in the first returned range are the examples sent left by the split, that is, examples whose bin is `<= bin_index`, and the example indexes in the second returned range are the examples sent right. The returned ranges are relative to the start of `examples_index`.
pub fn rearrange_examples_index(
	binned_feature: &BinnedFeaturesColumn,
	bin_index: usize,
	examples_index: &mut [usize],
) -> (Range<usize>, Range<usize>) {
	let start = 0;
	let end = examples_index.len();
	let mut left = start;
	let mut right = end;
	let mut n_left = 0;
	while left < right {
		if binned_feature.get(examples_index[left]) <= bin_index {
			left += 1;
			n_left += 1;
		} else {
			right -= 1;
			examples_index.swap(left, right);
		}
	}
	(start..n_left, n_left..end)
}

#[test]
fn test_rearrange_examples_index() {
	let binned_feature = BinnedFeaturesColumn::U8(vec![0, 3, 1, 2, 3, 0, 1]);
	let mut examples_index: Vec<usize> = (0..7).collect();
	let (left, right) = rearrange_examples_index(&binned_feature, 1, &mut examples_index);
	assert_eq!(left, 0..4);
	assert_eq!(right, 4..7);
	let mut left_examples = examples_index[left].to_vec();
	left_examples.sort_unstable();
	assert_eq!(left_examples, vec![0, 2, 5, 6]);
	let mut right_examples = examples_index[right].to_vec();
	right_examples.sort_unstable();
	assert_eq!(right_examples, vec![1, 3, 4]);
}
