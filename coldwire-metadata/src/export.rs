//! Cross-module bean export artifact.
//!
//! Each compiled module publishes a schema-versioned JSON document listing the
//! components it exports, so downstream modules can resolve dependencies which
//! are declared in one compilation unit and satisfied in another. One file per
//! module, named `<module>-beans.json`, under the reserved metadata directory.

use crate::component_meta::{ComponentMeta, METADATA_DIR};
use crate::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Current schema version of the export document.
pub const EXPORT_SCHEMA_VERSION: &str = "1.0";

const EXPORT_FILE_SUFFIX: &str = "-beans.json";

/// Export document for one module.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BeanExport {
    pub schema_version: String,
    pub module: String,
    /// Milliseconds since the Unix epoch at export time.
    pub timestamp: u64,
    pub beans: Vec<ExportedBean>,
}

/// One exported component.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExportedBean {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<String>,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl BeanExport {
    pub fn new(module: impl Into<String>, beans: Vec<ExportedBean>) -> Self {
        Self {
            schema_version: EXPORT_SCHEMA_VERSION.to_string(),
            module: module.into(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as u64)
                .unwrap_or(0),
            beans,
        }
    }

    /// Builds an export document from discovered component metadata.
    pub fn from_components(module: impl Into<String>, components: &[ComponentMeta]) -> Self {
        let beans = components
            .iter()
            .map(|component| ExportedBean {
                name: component
                    .component_name
                    .clone()
                    .unwrap_or_else(|| component.default_bean_name()),
                type_name: component.class_name.clone(),
                factory: None,
                scope: component.scope.as_str().to_string(),
                qualifier: component.component_name.clone(),
                primary: false,
                dependencies: component.constructor_deps.clone(),
            })
            .collect();

        Self::new(module, beans)
    }

    /// File name convention for a module's export document.
    pub fn file_name(module: &str) -> String {
        format!("{module}{EXPORT_FILE_SUFFIX}")
    }

    /// Writes the document under the reserved metadata directory of
    /// `output_dir`, returning the number of exported beans.
    pub fn write(&self, output_dir: impl AsRef<Path>) -> Result<usize, MetadataError> {
        let dir = output_dir.as_ref().join(METADATA_DIR);
        fs::create_dir_all(&dir)?;

        let path = dir.join(Self::file_name(&self.module));
        fs::write(&path, serde_json::to_string_pretty(self)?)?;

        info!(
            module = %self.module,
            beans = self.beans.len(),
            "Exported bean metadata"
        );
        Ok(self.beans.len())
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, MetadataError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component_meta::Scope;

    #[test]
    fn should_round_trip_through_json() {
        let export = BeanExport::new(
            "orders",
            vec![ExportedBean {
                name: "orderService".to_string(),
                type_name: "com.example.OrderService".to_string(),
                factory: Some("com.example.Factories#orders".to_string()),
                scope: "SINGLETON".to_string(),
                qualifier: Some("orders".to_string()),
                primary: true,
                dependencies: vec!["com.example.OrderRepo".to_string()],
            }],
        );

        let json = serde_json::to_string(&export).unwrap();
        assert!(json.contains("\"schemaVersion\":\"1.0\""));
        assert_eq!(serde_json::from_str::<BeanExport>(&json).unwrap(), export);
    }

    #[test]
    fn should_build_export_from_components() {
        let mut named = ComponentMeta::new("com.example.OrderService", Scope::Singleton);
        named.component_name = Some("orders".to_string());
        named.constructor_deps = vec!["com.example.OrderRepo".to_string()];
        let unnamed = ComponentMeta::new("com.example.OrderRepo", Scope::Singleton);

        let export = BeanExport::from_components("orders", &[named, unnamed]);

        assert_eq!(export.schema_version, EXPORT_SCHEMA_VERSION);
        assert_eq!(export.beans[0].name, "orders");
        assert_eq!(export.beans[0].qualifier.as_deref(), Some("orders"));
        assert_eq!(export.beans[1].name, "orderRepo");
        assert_eq!(export.beans[1].qualifier, None);
    }

    #[test]
    fn should_write_and_read_export_file() {
        let dir = tempfile::tempdir().unwrap();
        let export = BeanExport::from_components(
            "billing",
            &[ComponentMeta::new("com.example.Invoicer", Scope::Singleton)],
        );

        assert_eq!(export.write(dir.path()).unwrap(), 1);

        let path = dir
            .path()
            .join(METADATA_DIR)
            .join(BeanExport::file_name("billing"));
        assert_eq!(BeanExport::read(path).unwrap(), export);
    }
}
