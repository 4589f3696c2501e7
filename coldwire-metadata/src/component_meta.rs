//! The intermediate representation of a discovered component and its stable
//! textual serialization.
//!
//! One [ComponentMeta] is produced per annotated class by the discovery front
//! end and persisted as a single line in a per-module metadata file. The line
//! format uses layered delimiters so variable-arity nested lists fit on one
//! stream- and diff-friendly line: `||` separates top-level fields, `@`
//! separates repeated records within a field and `~` separates sub-fields
//! within a record. Plain type lists use `,`.
//!
//! The format provides no escaping - producers must guarantee the delimiter
//! characters never occur inside type names, field names or descriptors.

use crate::error::MetadataError;
use itertools::Itertools;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Top-level field delimiter of the metadata line format.
pub const FIELD_DELIMITER: &str = "||";

/// Delimiter between repeated records within one field.
pub const RECORD_DELIMITER: char = '@';

/// Delimiter between sub-fields of one record.
pub const SUBFIELD_DELIMITER: char = '~';

/// Delimiter for plain type name lists.
pub const LIST_DELIMITER: char = ',';

/// Reserved directory for per-module metadata artifacts.
pub const METADATA_DIR: &str = "META-INF/coldwire";

/// Name of the component metadata file within [METADATA_DIR].
pub const COMPONENT_METADATA_FILE: &str = "components.meta";

/// Instance-sharing policy for a component.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Scope {
    /// One shared instance, constructed during container initialization.
    Singleton,
    /// A fresh instance on every request.
    Prototype,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Singleton => "SINGLETON",
            Scope::Prototype => "PROTOTYPE",
        }
    }

    pub fn parse(name: &str) -> Result<Self, MetadataError> {
        match name {
            "SINGLETON" => Ok(Scope::Singleton),
            "PROTOTYPE" => Ok(Scope::Prototype),
            _ => Err(MetadataError::UnknownScope(name.to_string())),
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared visibility of an injectable field.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Visibility {
    Public,
    Protected,
    PackagePrivate,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Protected => "PROTECTED",
            Visibility::PackagePrivate => "PACKAGE_PRIVATE",
            Visibility::Private => "PRIVATE",
        }
    }

    pub fn parse(name: &str) -> Result<Self, MetadataError> {
        match name {
            "PUBLIC" => Ok(Visibility::Public),
            "PROTECTED" => Ok(Visibility::Protected),
            "PACKAGE_PRIVATE" => Ok(Visibility::PackagePrivate),
            "PRIVATE" => Ok(Visibility::Private),
            _ => Err(MetadataError::UnknownVisibility(name.to_string())),
        }
    }
}

/// A single field injection point.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FieldInjection {
    pub name: String,
    /// The dependency type, unwrapped from optional/provider wrappers.
    pub dep_type: String,
    /// Binary descriptor of the declared field type.
    pub descriptor: String,
    pub visibility: Visibility,
    pub optional: bool,
    pub provider: bool,
}

/// A single method injection point with positional dependencies.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct MethodInjection {
    pub name: String,
    pub descriptor: String,
    pub dep_types: Vec<String>,
}

/// A lifecycle callback method reference.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct LifecycleMethod {
    pub name: String,
    pub descriptor: String,
}

/// All facts recorded for one discovered component class.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ComponentMeta {
    /// Fully-qualified, dot-separated class name.
    pub class_name: String,
    pub scope: Scope,
    /// Deferred-construction hint for singletons.
    pub lazy: bool,
    /// Positional constructor dependency type names.
    pub constructor_deps: Vec<String>,
    pub field_injections: Vec<FieldInjection>,
    pub method_injections: Vec<MethodInjection>,
    /// Implemented interface type names; the component is reachable by each.
    pub interfaces: Vec<String>,
    pub post_construct: Option<LifecycleMethod>,
    pub pre_destroy: Option<LifecycleMethod>,
    /// Whether the instance must be registered with the event bus.
    pub has_subscribe_methods: bool,
    /// Component names that must initialize before this one, regardless of
    /// data dependencies.
    pub explicit_dependencies: Vec<String>,
    /// Optional qualifier for named lookup.
    pub component_name: Option<String>,
}

impl ComponentMeta {
    pub fn new(class_name: impl Into<String>, scope: Scope) -> Self {
        Self {
            class_name: class_name.into(),
            scope,
            lazy: false,
            constructor_deps: vec![],
            field_injections: vec![],
            method_injections: vec![],
            interfaces: vec![],
            post_construct: None,
            pre_destroy: None,
            has_subscribe_methods: false,
            explicit_dependencies: vec![],
            component_name: None,
        }
    }

    /// Slash-separated binary name, always re-derived from [Self::class_name].
    pub fn internal_name(&self) -> String {
        self.class_name.replace('.', "/")
    }

    /// Simple class name without the package prefix.
    pub fn simple_name(&self) -> &str {
        simple_name(&self.class_name)
    }

    /// Default bean name: decapitalized simple class name, unless the first
    /// two characters are both upper case.
    pub fn default_bean_name(&self) -> String {
        decapitalize(self.simple_name())
    }

    /// Serializes this component as one metadata line.
    ///
    /// Field order: className, scope, lazy, constructorDeps, fieldInjections,
    /// methodInjections, interfaces, postConstruct, preDestroy,
    /// hasSubscribeMethods, explicitDependencies, componentName.
    pub fn serialize_line(&self) -> String {
        let mut segments = Vec::with_capacity(12);
        segments.push(self.class_name.clone());
        segments.push(self.scope.as_str().to_string());
        segments.push(self.lazy.to_string());
        segments.push(self.constructor_deps.join(","));
        segments.push(
            self.field_injections
                .iter()
                .map(|field| {
                    format!(
                        "{}~{}~{}~{}~{}~{}",
                        field.name,
                        field.dep_type,
                        field.descriptor,
                        field.visibility.as_str(),
                        field.optional,
                        field.provider
                    )
                })
                .join("@"),
        );
        segments.push(
            self.method_injections
                .iter()
                .map(|method| {
                    format!(
                        "{}~{}~{}",
                        method.name,
                        method.descriptor,
                        method.dep_types.join(",")
                    )
                })
                .join("@"),
        );
        segments.push(self.interfaces.join(","));
        segments.push(
            self.post_construct
                .as_ref()
                .map(|method| format!("{}~{}", method.name, method.descriptor))
                .unwrap_or_default(),
        );
        segments.push(
            self.pre_destroy
                .as_ref()
                .map(|method| format!("{}~{}", method.name, method.descriptor))
                .unwrap_or_default(),
        );
        segments.push(self.has_subscribe_methods.to_string());
        segments.push(self.explicit_dependencies.join(","));
        segments.push(self.component_name.clone().unwrap_or_default());

        segments.join(FIELD_DELIMITER)
    }

    /// Parses one metadata line. Missing optional segments parse to empty
    /// collections or `None`; structurally broken lines are fatal.
    pub fn parse_line(line: &str) -> Result<Self, MetadataError> {
        Self::parse_line_at(line, 0)
    }

    pub(crate) fn parse_line_at(line: &str, line_number: usize) -> Result<Self, MetadataError> {
        let malformed = |reason: &str| MetadataError::MalformedLine {
            line: line_number,
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if parts.len() < 3 {
            return Err(malformed("expected at least className, scope and lazy"));
        }
        if parts[0].is_empty() {
            return Err(malformed("empty class name"));
        }

        let mut meta = ComponentMeta::new(parts[0], Scope::parse(parts[1])?);
        meta.lazy = parts[2] == "true";
        meta.constructor_deps = split_list(parts.get(3));
        meta.field_injections = parse_field_injections(parts.get(4), line_number)?;
        meta.method_injections = parse_method_injections(parts.get(5));
        meta.interfaces = split_list(parts.get(6));
        meta.post_construct = parse_lifecycle(parts.get(7));
        meta.pre_destroy = parse_lifecycle(parts.get(8));
        meta.has_subscribe_methods = parts.get(9).map(|part| *part == "true").unwrap_or(false);
        meta.explicit_dependencies = split_list(parts.get(10));
        meta.component_name = parts
            .get(11)
            .filter(|part| !part.is_empty())
            .map(|part| part.to_string());

        Ok(meta)
    }
}

fn simple_name(class_name: &str) -> &str {
    class_name
        .rsplit_once('.')
        .map(|(_, simple)| simple)
        .unwrap_or(class_name)
}

fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if !name.chars().nth(1).map(char::is_uppercase).unwrap_or(false) => {
            first.to_lowercase().chain(chars).collect()
        }
        _ => name.to_string(),
    }
}

fn split_list(segment: Option<&&str>) -> Vec<String> {
    segment
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.split(LIST_DELIMITER).map(str::to_string).collect())
        .unwrap_or_default()
}

fn parse_field_injections(
    segment: Option<&&str>,
    line_number: usize,
) -> Result<Vec<FieldInjection>, MetadataError> {
    let Some(segment) = segment.filter(|segment| !segment.is_empty()) else {
        return Ok(vec![]);
    };

    let mut fields = vec![];
    for record in segment.split(RECORD_DELIMITER).filter(|r| !r.is_empty()) {
        let parts: Vec<&str> = record.splitn(6, SUBFIELD_DELIMITER).collect();
        if parts.len() < 4 {
            // tolerate short records from partially-processed modules
            debug!(
                line = line_number,
                record, "Skipping incomplete field injection record"
            );
            continue;
        }

        fields.push(FieldInjection {
            name: parts[0].to_string(),
            dep_type: parts[1].to_string(),
            descriptor: parts[2].to_string(),
            visibility: Visibility::parse(parts[3])?,
            optional: parts.get(4).map(|part| *part == "true").unwrap_or(false),
            provider: parts.get(5).map(|part| *part == "true").unwrap_or(false),
        });
    }

    Ok(fields)
}

fn parse_method_injections(segment: Option<&&str>) -> Vec<MethodInjection> {
    let Some(segment) = segment.filter(|segment| !segment.is_empty()) else {
        return vec![];
    };

    segment
        .split(RECORD_DELIMITER)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let parts: Vec<&str> = record.splitn(3, SUBFIELD_DELIMITER).collect();
            if parts.len() < 2 {
                debug!(record, "Skipping incomplete method injection record");
                return None;
            }

            Some(MethodInjection {
                name: parts[0].to_string(),
                descriptor: parts[1].to_string(),
                dep_types: parts
                    .get(2)
                    .filter(|deps| !deps.is_empty())
                    .map(|deps| deps.split(LIST_DELIMITER).map(str::to_string).collect())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

fn parse_lifecycle(segment: Option<&&str>) -> Option<LifecycleMethod> {
    segment
        .filter(|segment| !segment.is_empty())
        .and_then(|segment| segment.split_once(SUBFIELD_DELIMITER))
        .map(|(name, descriptor)| LifecycleMethod {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
}

/// Reads a metadata file, skipping `#`-prefixed comment lines and blank lines.
pub fn read_metadata(path: impl AsRef<Path>) -> Result<Vec<ComponentMeta>, MetadataError> {
    let contents = fs::read_to_string(path)?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(index, line)| ComponentMeta::parse_line_at(line, index + 1))
        .collect()
}

/// Writes a metadata file with the standard do-not-edit header, one component
/// per line.
pub fn write_metadata(
    path: impl AsRef<Path>,
    components: &[ComponentMeta],
) -> Result<(), MetadataError> {
    let mut contents = String::new();
    contents.push_str("# Coldwire Component Metadata - DO NOT EDIT\n");
    contents.push_str(
        "# Format: className||scope||lazy||constructorDeps||fieldInjections||methodInjections\
         ||interfaces||postConstruct||preDestroy||hasSubscribeMethods||explicitDependencies\
         ||componentName\n",
    );

    for component in components {
        contents.push_str(&component.serialize_line());
        contents.push('\n');
    }

    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_meta() -> ComponentMeta {
        let mut meta = ComponentMeta::new("com.example.OrderService", Scope::Singleton);
        meta.lazy = true;
        meta.constructor_deps = vec![
            "com.example.OrderRepo".to_string(),
            "com.example.Clock".to_string(),
        ];
        meta.field_injections = vec![
            FieldInjection {
                name: "mailer".to_string(),
                dep_type: "com.example.Mailer".to_string(),
                descriptor: "Lcom/example/Mailer;".to_string(),
                visibility: Visibility::Private,
                optional: false,
                provider: false,
            },
            FieldInjection {
                name: "audit".to_string(),
                dep_type: "com.example.Audit".to_string(),
                descriptor: "Ljava/util/Optional;".to_string(),
                visibility: Visibility::PackagePrivate,
                optional: true,
                provider: false,
            },
        ];
        meta.method_injections = vec![MethodInjection {
            name: "setup".to_string(),
            descriptor: "(Lcom/example/Metrics;)V".to_string(),
            dep_types: vec!["com.example.Metrics".to_string()],
        }];
        meta.interfaces = vec!["com.example.OrderApi".to_string()];
        meta.post_construct = Some(LifecycleMethod {
            name: "init".to_string(),
            descriptor: "()V".to_string(),
        });
        meta.pre_destroy = Some(LifecycleMethod {
            name: "close".to_string(),
            descriptor: "()V".to_string(),
        });
        meta.has_subscribe_methods = true;
        meta.explicit_dependencies = vec!["configBean".to_string()];
        meta.component_name = Some("orders".to_string());
        meta
    }

    #[test]
    fn should_round_trip_fully_populated_component() {
        let meta = full_meta();
        let parsed = ComponentMeta::parse_line(&meta.serialize_line()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn should_round_trip_empty_optional_sections() {
        let meta = ComponentMeta::new("com.example.Repo", Scope::Prototype);
        let line = meta.serialize_line();
        let parsed = ComponentMeta::parse_line(&line).unwrap();

        assert_eq!(parsed, meta);
        assert!(parsed.field_injections.is_empty());
        assert!(parsed.post_construct.is_none());
        assert!(parsed.component_name.is_none());
    }

    #[test]
    fn should_parse_minimal_line() {
        let meta = ComponentMeta::parse_line("com.example.A||SINGLETON||false").unwrap();
        assert_eq!(meta.class_name, "com.example.A");
        assert_eq!(meta.scope, Scope::Singleton);
        assert!(!meta.lazy);
        assert!(meta.constructor_deps.is_empty());
    }

    #[test]
    fn should_reject_truncated_line() {
        assert!(matches!(
            ComponentMeta::parse_line("com.example.A||SINGLETON").unwrap_err(),
            MetadataError::MalformedLine { .. }
        ));
    }

    #[test]
    fn should_reject_unknown_scope() {
        assert!(matches!(
            ComponentMeta::parse_line("com.example.A||REQUEST||false").unwrap_err(),
            MetadataError::UnknownScope(..)
        ));
    }

    #[test]
    fn should_skip_incomplete_field_records() {
        let meta =
            ComponentMeta::parse_line("com.example.A||SINGLETON||false||||broken~record").unwrap();
        assert!(meta.field_injections.is_empty());
    }

    #[test]
    fn should_derive_internal_name() {
        let meta = ComponentMeta::new("com.example.OrderService", Scope::Singleton);
        assert_eq!(meta.internal_name(), "com/example/OrderService");
    }

    #[test]
    fn should_derive_default_bean_name() {
        assert_eq!(
            ComponentMeta::new("com.example.OrderService", Scope::Singleton).default_bean_name(),
            "orderService"
        );
        // two leading capitals are preserved
        assert_eq!(
            ComponentMeta::new("com.example.DBPool", Scope::Singleton).default_bean_name(),
            "DBPool"
        );
    }

    #[test]
    fn should_read_and_write_metadata_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(COMPONENT_METADATA_FILE);

        let components = vec![full_meta(), ComponentMeta::new("com.example.B", Scope::Prototype)];
        write_metadata(&path, &components).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# Coldwire Component Metadata"));

        assert_eq!(read_metadata(&path).unwrap(), components);
    }

    #[test]
    fn should_skip_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.meta");
        std::fs::write(
            &path,
            "# header\n\ncom.example.A||SINGLETON||false\n   \n# tail\n",
        )
        .unwrap();

        let components = read_metadata(&path).unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].class_name, "com.example.A");
    }

    #[test]
    fn should_report_line_numbers_for_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.meta");
        std::fs::write(&path, "# header\ncom.example.A||SINGLETON||false\nbroken\n").unwrap();

        match read_metadata(&path).unwrap_err() {
            MetadataError::MalformedLine { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }
}
