use crate::{BranchNode, Ensemble, LeafNode, Node, Tree};
use num_traits::ToPrimitive;

/// An `Evaluator` is an ensemble compiled for fast repeated inference. Every implementation computes the bias plus the output of each tree, added in tree order, and sends an example right at a branch exactly when its value is `>= split_value`. The results are therefore bit-identical to `Ensemble::predict`.
pub trait Evaluator: Send + Sync {
	/// Make a prediction for a single example. `features` must have one value per feature.
	fn evaluate(&self, features: &[f64]) -> f64;
}

/// This selects how an ensemble is compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EvaluatorType {
	/// Walk the trees as they are stored.
	Interpreted,
	/// Flatten every tree into one array-based decision table.
	Table,
	/// Compile every node into a closure specialized for its shape.
	Closures,
}

/// Compile `ensemble` into an evaluator of the given type. This does not modify the ensemble.
pub fn compile(ensemble: &Ensemble, evaluator_type: EvaluatorType) -> Box<dyn Evaluator> {
	match evaluator_type {
		EvaluatorType::Interpreted => Box::new(InterpretedEvaluator {
			ensemble: ensemble.clone(),
		}),
		EvaluatorType::Table => Box::new(TableEvaluator::new(ensemble)),
		EvaluatorType::Closures => Box::new(ClosuresEvaluator::new(ensemble)),
	}
}

struct InterpretedEvaluator {
	ensemble: Ensemble,
}

impl Evaluator for InterpretedEvaluator {
	fn evaluate(&self, features: &[f64]) -> f64 {
		self.ensemble.predict(features)
	}
}

/// The `TableEvaluator` stores the nodes of every tree in parallel arrays. A leaf is marked by `LEAF` in `feature_indexes`. At a branch, the comparison result indexes directly into the pair of children, so choosing a child needs no jump.
struct TableEvaluator {
	bias: f64,
	roots: Vec<u32>,
	feature_indexes: Vec<u32>,
	/// The split value for branches and the output for leaves.
	values: Vec<f64>,
	children: Vec<[u32; 2]>,
}

const LEAF: u32 = u32::MAX;

impl TableEvaluator {
	fn new(ensemble: &Ensemble) -> TableEvaluator {
		let n_nodes = ensemble.trees.iter().map(|tree| tree.nodes.len()).sum();
		let mut table = TableEvaluator {
			bias: ensemble.bias,
			roots: Vec::with_capacity(ensemble.trees.len()),
			feature_indexes: Vec::with_capacity(n_nodes),
			values: Vec::with_capacity(n_nodes),
			children: Vec::with_capacity(n_nodes),
		};
		for tree in ensemble.trees.iter() {
			let offset = table.values.len();
			table.roots.push(offset.to_u32().unwrap());
			for node in tree.nodes.iter() {
				match node {
					Node::Branch(BranchNode {
						feature_index,
						split_value,
						left_child_index,
						right_child_index,
						..
					}) => {
						table.feature_indexes.push(feature_index.to_u32().unwrap());
						table.values.push(*split_value);
						table.children.push([
							(offset + left_child_index).to_u32().unwrap(),
							(offset + right_child_index).to_u32().unwrap(),
						]);
					}
					Node::Leaf(LeafNode { value }) => {
						table.feature_indexes.push(LEAF);
						table.values.push(*value);
						table.children.push([0, 0]);
					}
				}
			}
		}
		table
	}
}

impl Evaluator for TableEvaluator {
	fn evaluate(&self, features: &[f64]) -> f64 {
		let mut output = self.bias;
		for root in self.roots.iter() {
			let mut node_index = *root as usize;
			loop {
				let feature_index = self.feature_indexes[node_index];
				let value = self.values[node_index];
				if feature_index == LEAF {
					output += value;
					break;
				}
				let go_right = (features[feature_index as usize] >= value) as usize;
				node_index = self.children[node_index][go_right] as usize;
			}
		}
		output
	}
}

type CompiledNode = Box<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// The `ClosuresEvaluator` turns every tree into nested closures. A branch whose children are both leaves compiles to a single comparison that selects between two constants.
struct ClosuresEvaluator {
	bias: f64,
	trees: Vec<CompiledNode>,
}

impl ClosuresEvaluator {
	fn new(ensemble: &Ensemble) -> ClosuresEvaluator {
		ClosuresEvaluator {
			bias: ensemble.bias,
			trees: ensemble
				.trees
				.iter()
				.map(|tree| compile_node(tree, 0))
				.collect(),
		}
	}
}

fn compile_node(tree: &Tree, node_index: usize) -> CompiledNode {
	match &tree.nodes[node_index] {
		Node::Leaf(LeafNode { value }) => {
			let value = *value;
			Box::new(move |_| value)
		}
		Node::Branch(BranchNode {
			feature_index,
			split_value,
			left_child_index,
			right_child_index,
			..
		}) => {
			let feature_index = *feature_index;
			let split_value = *split_value;
			match (
				&tree.nodes[*left_child_index],
				&tree.nodes[*right_child_index],
			) {
				(Node::Leaf(LeafNode { value: left }), Node::Leaf(LeafNode { value: right })) => {
					let left = *left;
					let right = *right;
					Box::new(move |features| {
						if features[feature_index] >= split_value {
							right
						} else {
							left
						}
					})
				}
				_ => {
					let left = compile_node(tree, *left_child_index);
					let right = compile_node(tree, *right_child_index);
					Box::new(move |features| {
						if features[feature_index] >= split_value {
							right(features)
						} else {
							left(features)
						}
					})
				}
			}
		}
	}
}

impl Evaluator for ClosuresEvaluator {
	fn evaluate(&self, features: &[f64]) -> f64 {
		let mut output = self.bias;
		for tree in self.trees.iter() {
			output += tree(features);
		}
		output
	}
}

#[cfg(test)]
use crate::{BinMap, FeatureBins};

#[cfg(test)]
fn ensemble_fixture() -> Ensemble {
	let branch = |feature_index, bin_index, split_value, left_child_index, right_child_index| {
		Node::Branch(BranchNode {
			feature_index,
			bin_index,
			split_value,
			left_child_index,
			right_child_index,
		})
	};
	let leaf = |value| Node::Leaf(LeafNode { value });
	Ensemble {
		bias: 0.1,
		trees: vec![
			Tree {
				nodes: vec![
					branch(0, 1, 2.0, 1, 2),
					branch(1, 0, -1.0, 3, 4),
					leaf(0.3),
					leaf(-0.7),
					branch(0, 0, 1.0, 5, 6),
					leaf(1e-3),
					leaf(0.25),
				],
			},
			Tree {
				nodes: vec![leaf(-0.05)],
			},
			Tree {
				nodes: vec![branch(1, 0, -1.0, 1, 2), leaf(0.125), leaf(-0.375)],
			},
		],
		bin_map: BinMap {
			features: vec![
				FeatureBins {
					thresholds: vec![1.0, 2.0],
				},
				FeatureBins {
					thresholds: vec![-1.0],
				},
			],
		},
		n_features: 2,
	}
}

#[test]
fn test_evaluators_match_interpreted() {
	let ensemble = ensemble_fixture();
	let evaluators: Vec<Box<dyn Evaluator>> = vec![
		compile(&ensemble, EvaluatorType::Interpreted),
		compile(&ensemble, EvaluatorType::Table),
		compile(&ensemble, EvaluatorType::Closures),
	];
	let values = [
		f64::NAN,
		f64::NEG_INFINITY,
		-1.0,
		-0.5,
		1.0,
		1.5,
		2.0,
		3.0,
		f64::INFINITY,
	];
	for a in values.iter() {
		for b in values.iter() {
			let features = [*a, *b];
			let expected = ensemble.predict(&features);
			for evaluator in evaluators.iter() {
				assert_eq!(evaluator.evaluate(&features).to_bits(), expected.to_bits());
			}
		}
	}
}

#[test]
fn test_evaluator_paths() {
	let ensemble = ensemble_fixture();
	let evaluator = compile(&ensemble, EvaluatorType::Table);
	// Tree 0 goes left then right then right to 0.25. Tree 2 goes right to -0.375.
	assert_eq!(evaluator.evaluate(&[1.5, 0.0]), 0.1 + 0.25 + -0.05 + -0.375);
	// NaN is sent left at every branch.
	assert_eq!(
		evaluator.evaluate(&[f64::NAN, f64::NAN]),
		0.1 + -0.7 + -0.05 + 0.125
	);
}

#[test]
fn test_empty_ensemble() {
	let mut ensemble = ensemble_fixture();
	ensemble.trees.clear();
	for evaluator_type in &[
		EvaluatorType::Interpreted,
		EvaluatorType::Table,
		EvaluatorType::Closures,
	] {
		assert_eq!(compile(&ensemble, *evaluator_type).evaluate(&[0.0, 0.0]), 0.1);
	}
}
