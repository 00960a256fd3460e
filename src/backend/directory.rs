//! Directory-backed generator
//!
//! Treats `<root>/<template_id>/` as a template. An optional `template.toml` manifest
//! declares required variables and metadata; every other file is copied into the output
//! location with `{{name}}` placeholders replaced by variable values.

use crate::backend::{CompiledTemplate, GeneratorBackend};
use crate::error::BackendError;
use crate::types::Variables;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const MANIFEST_FILE: &str = "template.toml";

#[derive(Debug, Default, Deserialize)]
struct TemplateManifest {
    description: Option<String>,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default)]
    metadata: toml::Table,
}

#[derive(Debug, Clone)]
pub struct TemplateFile {
    pub relative: PathBuf,
    pub contents: Vec<u8>,
}

/// Compiled directory template: every file loaded in memory, sorted by path
#[derive(Debug, Clone)]
pub struct TemplateSource {
    pub id: String,
    pub root: PathBuf,
    pub files: Vec<TemplateFile>,
}

pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_template(root: &Path, template_id: &str) -> Result<CompiledTemplate<TemplateSource>, BackendError> {
        let template_dir = contained_join(root, Path::new(template_id))
            .ok_or_else(|| BackendError::NotFound(template_id.to_string()))?;
        if !template_dir.is_dir() {
            return Err(BackendError::NotFound(template_id.to_string()));
        }

        let manifest_path = template_dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.is_file() {
            let text = std::fs::read_to_string(&manifest_path)
                .map_err(|e| BackendError::Fault(format!("Failed to read {}: {}", manifest_path.display(), e)))?;
            toml::from_str::<TemplateManifest>(&text).map_err(|e| BackendError::InvalidFormat {
                template_id: template_id.to_string(),
                reason: e.to_string(),
            })?
        } else {
            TemplateManifest::default()
        };

        let mut files = Vec::new();
        for entry in WalkDir::new(&template_dir).follow_links(false) {
            let entry = entry.map_err(|e| BackendError::Fault(format!("Failed to walk template: {}", e)))?;
            if !entry.file_type().is_file() || entry.path() == manifest_path {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&template_dir)
                .map_err(|e| BackendError::Fault(e.to_string()))?
                .to_path_buf();
            let contents = std::fs::read(entry.path()).map_err(|e| {
                BackendError::Fault(format!("Failed to read {}: {}", entry.path().display(), e))
            })?;
            files.push(TemplateFile { relative, contents });
        }
        files.sort_by(|a, b| a.relative.cmp(&b.relative));

        if files.is_empty() {
            return Err(BackendError::InvalidFormat {
                template_id: template_id.to_string(),
                reason: "template contains no files".to_string(),
            });
        }

        let mut metadata = Variables::new();
        if let Some(description) = manifest.description {
            metadata.insert("description".into(), Value::String(description));
        }
        for (key, value) in manifest.metadata {
            let value = serde_json::to_value(value).map_err(|e| BackendError::InvalidFormat {
                template_id: template_id.to_string(),
                reason: e.to_string(),
            })?;
            metadata.insert(key, value);
        }
        metadata.insert("file_count".into(), Value::from(files.len()));

        Ok(CompiledTemplate {
            handle: TemplateSource {
                id: template_id.to_string(),
                root: template_dir,
                files,
            },
            variable_names: manifest.variables,
            metadata,
        })
    }
}

/// Join `relative` under `base`, refusing absolute paths, prefixes and `..`
pub fn contained_join(base: &Path, relative: &Path) -> Option<PathBuf> {
    let mut joined = base.to_path_buf();
    let mut pushed = false;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    pushed.then_some(joined)
}

/// Replace `{{name}}` placeholders with the variable's textual value
pub fn substitute(text: &str, variables: &Variables) -> String {
    let mut rendered = text.to_string();
    for (name, value) in variables {
        let placeholder = format!("{{{{{}}}}}", name);
        if !rendered.contains(&placeholder) {
            continue;
        }
        let replacement = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}

fn write_error(err: std::io::Error, target: &Path, written: Vec<PathBuf>) -> BackendError {
    let message = format!("Failed to write {}: {}", target.display(), err);
    if written.is_empty() && err.kind() == IoErrorKind::PermissionDenied {
        BackendError::PermissionDenied(message)
    } else {
        BackendError::PartialWrite { message, written }
    }
}

#[async_trait]
impl GeneratorBackend for DirectoryBackend {
    type Handle = TemplateSource;

    async fn compile(&self, template_id: &str) -> Result<CompiledTemplate<TemplateSource>, BackendError> {
        let root = self.root.clone();
        let id = template_id.to_string();
        let compiled = tokio::task::spawn_blocking(move || Self::load_template(&root, &id))
            .await
            .map_err(|e| BackendError::Fault(format!("Template load task failed: {}", e)))??;
        debug!(
            template_id,
            files = compiled.handle.files.len(),
            variables = compiled.variable_names.len(),
            "Compiled directory template"
        );
        Ok(compiled)
    }

    async fn materialize(
        &self,
        handle: &TemplateSource,
        output_path: &Path,
        variables: &Variables,
    ) -> Result<Vec<PathBuf>, BackendError> {
        // every target is checked before anything touches the disk
        let mut targets = Vec::with_capacity(handle.files.len());
        for file in &handle.files {
            let relative = substitute(&file.relative.to_string_lossy(), variables);
            let target = contained_join(output_path, Path::new(&relative)).ok_or_else(|| {
                BackendError::InvalidFormat {
                    template_id: handle.id.clone(),
                    reason: format!("rendered path '{}' leaves the output directory", relative),
                }
            })?;
            targets.push((file, target));
        }

        let mut written = Vec::with_capacity(targets.len());
        for (file, target) in targets {
            if let Some(parent) = target.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Err(write_error(e, parent, written));
                }
            }
            let contents = match std::str::from_utf8(&file.contents) {
                Ok(text) => substitute(text, variables).into_bytes(),
                Err(_) => file.contents.clone(),
            };
            if let Err(e) = tokio::fs::write(&target, contents).await {
                return Err(write_error(e, &target, written));
            }
            written.push(target);
        }
        Ok(written)
    }
}
