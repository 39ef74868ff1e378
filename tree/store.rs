use crate::{Ensemble, Error, FitOptions, History, Node, RegressorOptions, Result};
use std::io::{Cursor, Write};

/// Every model file starts with these bytes.
const MAGIC: &[u8; 4] = b"JITT";

/// The major version follows the magic bytes. Files with any other major version are rejected.
const MAJOR_VERSION: u8 = 0;

/// This is everything written to a model file. The evaluator is not stored, it is compiled again after loading.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SavedModel {
	pub options: RegressorOptions,
	pub fit_options: FitOptions,
	pub ensemble: Ensemble,
	pub history: History,
}

/// Write the magic bytes, the major version, and the MessagePack encoding of `model` to `writer`.
pub fn write<W>(writer: &mut W, model: &SavedModel) -> Result<()>
where
	W: Write,
{
	writer.write_all(MAGIC)?;
	writer.write_all(&[MAJOR_VERSION])?;
	rmp_serde::encode::write_named(writer, model)?;
	Ok(())
}

/// Decode a model written by `write`. This fails if the header is wrong, if the MessagePack is truncated or corrupt, if bytes remain after it, or if the decoded model is inconsistent.
pub fn read(bytes: &[u8]) -> Result<SavedModel> {
	let header_len = MAGIC.len() + 1;
	if bytes.len() < header_len || &bytes[..MAGIC.len()] != MAGIC {
		return Err(Error::Decode("missing magic bytes".to_owned()));
	}
	let major_version = bytes[MAGIC.len()];
	if major_version != MAJOR_VERSION {
		return Err(Error::Decode(format!(
			"unknown major version {}",
			major_version
		)));
	}
	let body = &bytes[header_len..];
	let mut cursor = Cursor::new(body);
	let model: SavedModel =
		rmp_serde::from_read(&mut cursor).map_err(|error| Error::Decode(error.to_string()))?;
	let n_trailing_bytes = body.len() - cursor.position() as usize;
	if n_trailing_bytes != 0 {
		return Err(Error::Decode(format!(
			"{} unexpected bytes after the model",
			n_trailing_bytes
		)));
	}
	model
		.options
		.validate()
		.and_then(|_| model.fit_options.validate())
		.map_err(|error| Error::Decode(error.to_string()))?;
	validate_ensemble(&model.ensemble).map_err(Error::Decode)?;
	Ok(model)
}

/// Check that the ensemble describes valid trees over its bin map, so predicting with it can neither index out of bounds nor loop forever.
fn validate_ensemble(ensemble: &Ensemble) -> Result<(), String> {
	if !ensemble.bias.is_finite() {
		return Err("the bias is not finite".to_owned());
	}
	if ensemble.bin_map.features.len() != ensemble.n_features {
		return Err(format!(
			"the bin map has {} features but the model has {}",
			ensemble.bin_map.features.len(),
			ensemble.n_features
		));
	}
	for (feature_index, feature_bins) in ensemble.bin_map.features.iter().enumerate() {
		let thresholds = &feature_bins.thresholds;
		if !thresholds.iter().all(|threshold| threshold.is_finite())
			|| !thresholds.windows(2).all(|pair| pair[0] < pair[1])
		{
			return Err(format!(
				"the thresholds for feature {} are not finite and increasing",
				feature_index
			));
		}
	}
	for (tree_index, tree) in ensemble.trees.iter().enumerate() {
		if tree.nodes.is_empty() {
			return Err(format!("tree {} has no nodes", tree_index));
		}
		let mut n_parents = vec![0usize; tree.nodes.len()];
		for (node_index, node) in tree.nodes.iter().enumerate() {
			let branch = match node {
				Node::Branch(branch) => branch,
				Node::Leaf(_) => continue,
			};
			let invalid_node = |reason: &str| {
				format!("node {} of tree {} {}", node_index, tree_index, reason)
			};
			for child_index in &[branch.left_child_index, branch.right_child_index] {
				if *child_index <= node_index || *child_index >= tree.nodes.len() {
					return Err(invalid_node("has a child index out of range"));
				}
				n_parents[*child_index] += 1;
			}
			let feature_bins = ensemble
				.bin_map
				.features
				.get(branch.feature_index)
				.ok_or_else(|| invalid_node("splits on a feature out of range"))?;
			let threshold = feature_bins
				.thresholds
				.get(branch.bin_index)
				.ok_or_else(|| invalid_node("splits on a bin out of range"))?;
			if threshold.to_bits() != branch.split_value.to_bits() {
				return Err(invalid_node("has a split value that does not match its bin"));
			}
		}
		if n_parents.iter().skip(1).any(|n_parents| *n_parents != 1) {
			return Err(format!(
				"tree {} has a node that is not reachable from the root exactly once",
				tree_index
			));
		}
	}
	Ok(())
}
