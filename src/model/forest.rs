use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::model::Predict;

/// A pre-trained regression forest, deserialized from a JSON artifact. The
/// artifact is produced by the training side and only consumed here.
#[derive(Deserialize, Debug)]
pub struct ForestRegressor {
    name: String,
    n_features: usize,
    trees: Vec<Tree>,
}

#[derive(Deserialize, Debug)]
struct Tree {
    nodes: Vec<Node>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Node {
    Branch {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

impl ForestRegressor {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model artifact {path}"))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let forest: ForestRegressor =
            serde_json::from_str(raw).context("failed to parse model artifact")?;
        forest.validate()?;
        Ok(forest)
    }

    /// Walking a tree only indexes into its own node list, so all reachable
    /// indices are checked once here instead of on every prediction. Children
    /// must point forward, which rules out cycles.
    fn validate(&self) -> Result<()> {
        if self.n_features == 0 {
            bail!("model {} declares no input features", self.name);
        }
        if self.trees.is_empty() {
            bail!("model {} contains no trees", self.name);
        }
        for (tree_id, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                bail!("tree {tree_id} is empty");
            }
            for (node_id, node) in tree.nodes.iter().enumerate() {
                if let Node::Branch {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= self.n_features {
                        bail!("tree {tree_id} node {node_id} splits on unknown feature {feature}");
                    }
                    for child in [left, right] {
                        if *child <= node_id || *child >= tree.nodes.len() {
                            bail!("tree {tree_id} node {node_id} has an invalid child {child}");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature_count(&self) -> usize {
        self.n_features
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Predict for ForestRegressor {
    fn predict(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.n_features {
            bail!(
                "model {} expects {} features, got {}",
                self.name,
                self.n_features,
                features.len()
            );
        }
        let sum: f64 = self.trees.iter().map(|tree| tree.decide(features)).sum();
        Ok(sum / self.trees.len() as f64)
    }
}

impl Tree {
    fn decide(&self, features: &[f64]) -> f64 {
        let mut cursor = 0;
        loop {
            match &self.nodes[cursor] {
                Node::Leaf { value } => return *value,
                Node::Branch {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    cursor = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}
