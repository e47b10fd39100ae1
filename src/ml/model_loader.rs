//! ONNX model loading and inference.
//!
//! This module provides a wrapper around tract-onnx for loading an exported
//! embedding network and running it on CPU, truncated at a named layer.

use crate::error::{Error, Result};
use std::path::Path;
use tract_onnx::prelude::*;

/// Type alias for the tract model plan to reduce complexity.
type TractPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Wrapper for ONNX models using tract inference engine.
///
/// # Example
///
/// ```ignore
/// use mediwaste::ml::OnnxModel;
/// use std::path::Path;
///
/// let model = OnnxModel::load_truncated(Path::new("models/network.onnx"), &[1, 224, 224, 3], "avg_pool")?;
/// let output = model.run_f32(&[1, 224, 224, 3], &pixels)?;
/// ```
#[derive(Debug)]
pub struct OnnxModel {
    model: TractPlan,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxModel {
    /// Load an ONNX graph, fix its input shape and cut it at `output_layer`.
    ///
    /// The layer is looked up by exact node name first. Exporters often
    /// prefix names with the enclosing scope, so otherwise the nodes whose
    /// path has `output_layer` as one segment are grouped by that scope; a
    /// single scope is required and its last node is the layer output.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist or can't be read
    /// - No node matches `output_layer`, or several scopes do
    /// - Optimization fails
    pub fn load_truncated(path: &Path, input_shape: &[usize], output_layer: &str) -> Result<Self> {
        if !path.exists() {
            return Err(Error::artifact(path, "model file not found"));
        }

        let mut model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| Error::artifact(path, format!("failed to parse ONNX graph: {}", e)))?
            .with_input_fact(0, f32::fact(input_shape.to_vec()).into())
            .map_err(|e| Error::artifact(path, format!("failed to set input shape: {}", e)))?;

        let node_id = resolve_layer(model.nodes().iter().map(|n| (n.id, n.name.as_str())), output_layer)
            .map_err(|reason| Error::artifact(path, reason))?;
        model
            .set_output_outlets(&[OutletId::new(node_id, 0)])
            .map_err(|e| Error::artifact(path, format!("failed to truncate graph: {}", e)))?;

        // Optimize for CPU inference
        let model = model
            .into_optimized()
            .map_err(|e| Error::artifact(path, format!("failed to optimize model: {}", e)))?;

        // Build runnable plan
        let model = model
            .into_runnable()
            .map_err(|e| Error::artifact(path, format!("failed to build runnable model: {}", e)))?;

        let input_names = model
            .model()
            .inputs
            .iter()
            .map(|outlet| model.model().node(outlet.node).name.clone())
            .collect();

        let output_names = model
            .model()
            .outputs
            .iter()
            .map(|outlet| model.model().node(outlet.node).name.clone())
            .collect();

        Ok(Self {
            model,
            input_names,
            output_names,
        })
    }

    /// Run the plan on one dense f32 input and return the first output, flattened.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails (e.g., wrong input shapes, types).
    pub fn run_f32(&self, shape: &[usize], data: &[f32]) -> Result<Vec<f32>> {
        let input = Tensor::from_shape(shape, data).map_err(|e| Error::Ml(format!("bad input tensor: {}", e)))?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| Error::Ml(format!("Inference failed: {}", e)))?;
        let first = outputs
            .first()
            .ok_or_else(|| Error::Ml("model produced no outputs".to_string()))?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| Error::Ml(format!("unexpected output type: {}", e)))?;
        Ok(view.iter().copied().collect())
    }

    /// Get the names of input nodes (for debugging).
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Get the names of output nodes (for debugging).
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

/// Pick the truncation node among `(id, name)` pairs in graph order.
fn resolve_layer<'a>(nodes: impl IntoIterator<Item = (usize, &'a str)>, layer: &str) -> std::result::Result<usize, String> {
    // scope -> last node id seen in it, in order of first appearance
    let mut scopes: Vec<(String, usize)> = Vec::new();
    for (id, name) in nodes {
        if name == layer {
            return Ok(id);
        }
        let segments: Vec<&str> = name.split('/').collect();
        let Some(pos) = segments.iter().position(|s| *s == layer) else {
            continue;
        };
        let scope = segments[..=pos].join("/");
        match scopes.iter_mut().find(|(s, _)| *s == scope) {
            Some(entry) => entry.1 = id,
            None => scopes.push((scope, id)),
        }
    }

    match scopes.as_slice() {
        [] => Err(format!("no layer named '{}' in graph", layer)),
        [(_, id)] => Ok(*id),
        many => Err(format!(
            "layer '{}' is ambiguous; it appears under {} scopes: {}",
            layer,
            many.len(),
            many.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>().join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_model() {
        let result = OnnxModel::load_truncated(Path::new("nonexistent.onnx"), &[1, 224, 224, 3], "avg_pool");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_corrupt_model_is_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();
        match OnnxModel::load_truncated(&path, &[1, 224, 224, 3], "avg_pool") {
            Err(Error::ArtifactLoad { path: p, .. }) => assert!(p.contains("broken.onnx")),
            other => panic!("Expected ArtifactLoad error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_exact_name_wins() {
        let nodes = [(0, "input"), (1, "block/avg_pool/Mean"), (2, "avg_pool")];
        assert_eq!(resolve_layer(nodes, "avg_pool"), Ok(2));
    }

    #[test]
    fn test_single_scope_resolves_to_its_last_node() {
        let nodes = [
            (0, "input"),
            (1, "model/avg_pool/ReduceMean"),
            (2, "model/avg_pool/Reshape"),
            (3, "model/head/MatMul"),
        ];
        assert_eq!(resolve_layer(nodes, "avg_pool"), Ok(2));
        assert_eq!(resolve_layer([(4, "avg_pool/Mean"), (5, "dense")], "avg_pool"), Ok(4));
    }

    #[test]
    fn test_two_scopes_are_ambiguous() {
        let nodes = [(0, "input"), (1, "block/avg_pool/Mean"), (2, "top/avg_pool/Mean")];
        let err = resolve_layer(nodes, "avg_pool").unwrap_err();
        assert!(err.contains("ambiguous"), "{}", err);
        assert!(err.contains("block/avg_pool") && err.contains("top/avg_pool"), "{}", err);
    }

    #[test]
    fn test_partial_segment_does_not_match() {
        let nodes = [(0, "model/avg_pooling/Mean"), (1, "model/global_avg_pool_2/Mean")];
        assert!(resolve_layer(nodes, "avg_pool").unwrap_err().contains("no layer named"));
    }
}
