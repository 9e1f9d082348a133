//! Template emission.
//!
//! Turns a resolved graph into the CloudFormation document. Resource and
//! output names, and the property names inside each resource body, are
//! emitted in sorted order; sequences keep their order.

use crate::resolver::ResolvedGraph;
use halloumi_core::{CompileResult, TemplateDigest, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Fixed template format version marker
pub const FORMAT_VERSION: &str = "2010-09-09";

/// A complete template document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Template {
    /// Format version marker
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    /// Document description
    #[serde(rename = "Description")]
    pub description: String,
    /// Resource bodies by logical id
    #[serde(rename = "Resources", skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceBody>,
    /// Output bodies by name
    #[serde(rename = "Outputs", skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputBody>,
}

/// Serialized resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceBody {
    /// Provider type tag
    #[serde(rename = "Type")]
    pub type_name: String,
    /// Resolved properties
    #[serde(rename = "Properties", skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    /// Explicit creation-order hints
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Serialized output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputBody {
    /// Value expression
    #[serde(rename = "Value")]
    pub value: Value,
    /// Export block
    #[serde(rename = "Export", skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportBody>,
}

/// `{"Name": <expr>}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportBody {
    /// Export name expression
    #[serde(rename = "Name")]
    pub name: Value,
}

impl Template {
    /// Compact JSON text
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if a value cannot be represented in JSON
    pub fn to_json(&self) -> CompileResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON text
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if a value cannot be represented in JSON
    pub fn to_json_pretty(&self) -> CompileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Content digest of the compact JSON text
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the template cannot be serialized
    pub fn digest(&self) -> CompileResult<TemplateDigest> {
        Ok(TemplateDigest::compute(self.to_json()?.as_bytes()))
    }
}

/// Serializes a resolved graph into a [`Template`]
#[derive(Debug, Clone, Default)]
pub struct TemplateEmitter {
    description: String,
}

impl TemplateEmitter {
    /// Create an emitter with an empty description
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the document description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build the document
    #[must_use]
    pub fn emit(&self, resolved: &ResolvedGraph) -> Template {
        let resources: BTreeMap<String, ResourceBody> = resolved
            .resources
            .iter()
            .map(|resource| {
                let body = ResourceBody {
                    type_name: resource.type_name.clone(),
                    properties: resource
                        .properties
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    depends_on: resource.depends_on.iter().map(ToString::to_string).collect(),
                };
                (resource.logical_id.to_string(), body)
            })
            .collect();

        let outputs: BTreeMap<String, OutputBody> = resolved
            .outputs
            .iter()
            .map(|output| {
                let body = OutputBody {
                    value: output.value.clone(),
                    export: output.export.clone().map(|name| ExportBody { name }),
                };
                (output.name.clone(), body)
            })
            .collect();

        debug!(resources = resources.len(), outputs = outputs.len(), "template emitted");
        Template {
            format_version: FORMAT_VERSION.to_string(),
            description: self.description.clone(),
            resources,
            outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolvedOutput, ResolvedResource};
    use halloumi_core::LogicalId;
    use indexmap::IndexMap;
    use serde_json::json;

    fn resolved() -> ResolvedGraph {
        let mut properties = IndexMap::new();
        properties.insert("CidrBlock".to_string(), Value::from("10.0.0.0/16"));
        properties.insert("EnableDnsSupport".to_string(), Value::from(true));
        ResolvedGraph {
            resources: vec![ResolvedResource {
                logical_id: LogicalId::new("Vpc"),
                type_name: "AWS::EC2::VPC".to_string(),
                properties,
                depends_on: Vec::new(),
                dependencies: Default::default(),
            }],
            outputs: vec![ResolvedOutput {
                name: "VpcCidr".to_string(),
                value: Value::from("10.0.0.0/16"),
                export: None,
            }],
            creation_order: vec![LogicalId::new("Vpc")],
        }
    }

    #[test]
    fn test_empty_template_omits_sections() {
        let empty = ResolvedGraph {
            resources: Vec::new(),
            outputs: Vec::new(),
            creation_order: Vec::new(),
        };
        let template = TemplateEmitter::new().emit(&empty);
        assert_eq!(
            template.to_json().unwrap(),
            r#"{"AWSTemplateFormatVersion":"2010-09-09","Description":""}"#
        );
    }

    #[test]
    fn test_document_shape() {
        let template = TemplateEmitter::new()
            .with_description("Resource anatomy")
            .emit(&resolved());
        let json: serde_json::Value = serde_json::from_str(&template.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "AWSTemplateFormatVersion": "2010-09-09",
                "Description": "Resource anatomy",
                "Resources": {
                    "Vpc": {
                        "Type": "AWS::EC2::VPC",
                        "Properties": {"CidrBlock": "10.0.0.0/16", "EnableDnsSupport": true}
                    }
                },
                "Outputs": {"VpcCidr": {"Value": "10.0.0.0/16"}}
            })
        );
    }

    #[test]
    fn test_depends_on_and_export() {
        let mut graph = resolved();
        graph.resources[0].depends_on = vec![LogicalId::new("Role")];
        graph.outputs[0].export = Some(Value::from("shared-vpc-cidr"));
        let template = TemplateEmitter::new().emit(&graph);
        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json["Resources"]["Vpc"]["DependsOn"], json!(["Role"]));
        assert_eq!(json["Outputs"]["VpcCidr"]["Export"], json!({"Name": "shared-vpc-cidr"}));
    }

    #[test]
    fn test_digest_is_stable() {
        let template = TemplateEmitter::new().emit(&resolved());
        let first = template.digest().unwrap();
        let second = template.clone().digest().unwrap();
        assert_eq!(first, second);
        assert!(first.verify(template.to_json().unwrap().as_bytes()));
    }
}
