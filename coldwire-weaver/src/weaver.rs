//! Synthetic setter weaving for non-public injectable fields.
//!
//! The generated container cannot assign private or package-private fields
//! directly, so after compilation this pass scans class artifacts for fields
//! carrying an injection annotation and adds a public synthetic setter per
//! field, named by prefixing the field name with [SETTER_PREFIX]. The
//! container generator then routes injection for such fields through the
//! setter instead of a direct field write.

use crate::classfile::flags::{ACC_FINAL, ACC_PUBLIC, ACC_STATIC, ACC_SYNTHETIC};
use crate::classfile::{ClassFile, FieldInfo, CLASS_FILE_EXTENSION};
use crate::error::ClassFileError;
use crate::ir::MethodBuilder;
use itertools::Itertools;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name prefix of synthesized injection setters.
pub const SETTER_PREFIX: &str = "__di_set_";

/// Annotation descriptors marking a field as an injection target.
pub const INJECT_ANNOTATIONS: [&str; 2] =
    ["Lcoldwire/annotation/Inject;", "Lcoldwire/annotation/Value;"];

/// Synthetic setter name for a field.
pub fn setter_name(field_name: &str) -> String {
    format!("{SETTER_PREFIX}{field_name}")
}

/// Outcome of weaving a single class artifact. Per-class failures are
/// reported here instead of aborting the whole pass.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct WeavingResult {
    pub class_name: String,
    pub path: Option<PathBuf>,
    pub modified: bool,
    /// Names of setters added by this pass, in field order.
    pub added_setters: Vec<String>,
    pub error: Option<String>,
}

impl WeavingResult {
    fn failed(path: &Path, error: impl ToString) -> Self {
        Self {
            class_name: path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: Some(path.to_path_buf()),
            modified: false,
            added_setters: vec![],
            error: Some(error.to_string()),
        }
    }
}

/// Weaves synthetic setters into class artifacts.
#[derive(Clone, Copy, Default, Debug)]
pub struct FieldAccessWeaver;

impl FieldAccessWeaver {
    pub fn new() -> Self {
        Self
    }

    /// Recursively weaves every class artifact under `dir`, in path order.
    /// I/O and format errors are reported per artifact.
    pub fn weave_directory(&self, dir: impl AsRef<Path>) -> Result<Vec<WeavingResult>, ClassFileError> {
        let mut results = vec![];
        for path in collect_artifacts(dir.as_ref())? {
            results.push(self.weave_file(&path));
        }

        let woven = results.iter().filter(|result| result.modified).count();
        let failed = results.iter().filter(|result| result.error.is_some()).count();
        info!(scanned = results.len(), woven, failed, "Weaving pass finished");
        Ok(results)
    }

    /// Weaves one artifact in place, rewriting the file only when modified.
    pub fn weave_file(&self, path: &Path) -> WeavingResult {
        let mut class = match ClassFile::read_file(path) {
            Ok(class) => class,
            Err(error) => {
                warn!(path = %path.display(), %error, "Cannot read class artifact");
                return WeavingResult::failed(path, error);
            }
        };

        let mut result = self.weave_class(&mut class);
        result.path = Some(path.to_path_buf());

        if result.modified {
            if let Err(error) = class.write_file(path) {
                warn!(path = %path.display(), %error, "Cannot write woven artifact");
                result.error = Some(error.to_string());
            }
        }

        result
    }

    /// Weaves an in-memory class, returning the setters added. Running the
    /// pass twice is a no-op: existing setters are never regenerated.
    pub fn weave_class(&self, class: &mut ClassFile) -> WeavingResult {
        let targets = class
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| {
                needs_setter(field) && class.method(&setter_name(&field.name)).is_none()
            })
            .map(|(index, _)| index)
            .collect_vec();

        let mut added_setters = vec![];
        for index in targets {
            let field_name = class.fields[index].name.clone();
            match self.synthesize_setter(class, index) {
                Ok(setter) => {
                    debug!(class = %class.name, field = %field_name, setter = %setter, "Added synthetic setter");
                    added_setters.push(setter);
                }
                Err(error) => {
                    warn!(class = %class.name, field = %field_name, %error, "Cannot synthesize setter");
                    return WeavingResult {
                        class_name: class.name.clone(),
                        path: None,
                        modified: !added_setters.is_empty(),
                        added_setters,
                        error: Some(error.to_string()),
                    };
                }
            }
        }

        let modified = !added_setters.is_empty();
        if modified {
            info!(class = %class.name, setters = added_setters.len(), "Woven class");
        }

        WeavingResult {
            class_name: class.name.clone(),
            path: None,
            modified,
            added_setters,
            error: None,
        }
    }

    fn synthesize_setter(
        &self,
        class: &mut ClassFile,
        index: usize,
    ) -> Result<String, crate::error::VerifyError> {
        let owner = class.name.clone();
        let field = &mut class.fields[index];

        // a final injectable field would make the setter unverifiable later
        field.access &= !ACC_FINAL;

        let is_static = field.access & ACC_STATIC != 0;
        let field_name = field.name.clone();
        let descriptor = field.descriptor.clone();
        let setter = setter_name(&field_name);
        let setter_descriptor = format!("({descriptor})V");

        let method = if is_static {
            MethodBuilder::new(&setter, &setter_descriptor, ACC_PUBLIC | ACC_STATIC | ACC_SYNTHETIC)
                .load_arg(0)
                .put_static(&owner, &field_name, &descriptor)
                .ret()
                .build(&owner)?
        } else {
            MethodBuilder::new(&setter, &setter_descriptor, ACC_PUBLIC | ACC_SYNTHETIC)
                .load_this()
                .load_arg(0)
                .put_field(&owner, &field_name, &descriptor)
                .ret()
                .build(&owner)?
        };

        class.methods.push(method);
        Ok(setter)
    }
}

fn needs_setter(field: &FieldInfo) -> bool {
    field.access & ACC_PUBLIC == 0
        && INJECT_ANNOTATIONS
            .iter()
            .any(|annotation| field.has_annotation(annotation))
}

fn collect_artifacts(dir: &Path) -> Result<Vec<PathBuf>, ClassFileError> {
    let mut artifacts = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            artifacts.extend(collect_artifacts(&path)?);
        } else if path
            .extension()
            .map(|ext| ext == CLASS_FILE_EXTENSION)
            .unwrap_or(false)
        {
            artifacts.push(path);
        }
    }
    artifacts.sort();
    Ok(artifacts)
}
