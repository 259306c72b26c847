use crate::error::Result;
use crate::propagate::TotalMethod;
use crate::prune::{PruneOptions, Selector};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Options recognised by the analysis pipeline.
///
/// Every field is optional when deserialized:
///
/// ```
/// use profdot_graph::{GraphConfig, TotalMethod};
///
/// let config = GraphConfig::from_reader(r#"{"total_method":"call-stack"}"#.as_bytes()).unwrap();
/// assert_eq!(config.total_method, TotalMethod::CallStack);
/// assert_eq!(config.node_threshold_pct, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub node_threshold_pct: f64,
    pub edge_threshold_pct: f64,
    pub total_method: TotalMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaf_selector: Option<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            node_threshold_pct: 0.5,
            edge_threshold_pct: 0.1,
            total_method: TotalMethod::CallRatio,
            root_selector: None,
            leaf_selector: None,
        }
    }
}

impl GraphConfig {
    /// Read a JSON configuration.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Compile selectors and check thresholds.
    pub fn prune_options(&self) -> Result<PruneOptions> {
        let options = PruneOptions {
            node_threshold_pct: self.node_threshold_pct,
            edge_threshold_pct: self.edge_threshold_pct,
            root: self.root_selector.as_deref().map(Selector::new).transpose()?,
            leaf: self.leaf_selector.as_deref().map(Selector::new).transpose()?,
        };
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;

    #[test]
    fn defaults() {
        let config = GraphConfig::default();
        assert_eq!(config.node_threshold_pct, 0.5);
        assert_eq!(config.edge_threshold_pct, 0.1);
        assert_eq!(config.total_method, TotalMethod::CallRatio);
        assert!(config.root_selector.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{"edge_threshold_pct": 2.5, "root_selector": "^main$"}"#;
        let config = GraphConfig::from_reader(json.as_bytes()).unwrap();
        assert_eq!(config.node_threshold_pct, 0.5);
        assert_eq!(config.edge_threshold_pct, 2.5);

        let options = config.prune_options().unwrap();
        assert_eq!(options.root.unwrap().as_str(), "^main$");
        assert!(options.leaf.is_none());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let json = r#"{"total_method": "guess"}"#;
        assert!(matches!(
            GraphConfig::from_reader(json.as_bytes()),
            Err(GraphError::Config(_))
        ));
    }

    #[test]
    fn bad_selector_surfaces_in_options() {
        let config = GraphConfig {
            leaf_selector: Some("[".to_string()),
            ..GraphConfig::default()
        };
        assert!(matches!(
            config.prune_options(),
            Err(GraphError::InvalidSelector { .. })
        ));
    }
}
