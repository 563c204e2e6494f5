//! Image and template catalogs
//!
//! Both catalogs are JSON files read once at driver start:
//!
//! ```json
//! { "images": [ { "imageID": "...", "imageName": "...", "imagePath": "..." } ] }
//! { "templates": [ { "templateID": "...", "templateName": "...",
//!     "templateSpecs": { "coresNumber": 2, "ramSize": 4, "diskSize": 20,
//!                        "gpuNumber": 0, "gpuType": "" } } ] }
//! ```
//!
//! Every entry is decoded and validated on its own so a bad entry is reported
//! with its position instead of failing somewhere later.

use localdriver_core::props::HostSize;
use localdriver_core::{Error, HostTemplate, Image, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageEntry {
    #[serde(rename = "imageID")]
    image_id: String,
    image_name: String,
    image_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateSpecs {
    cores_number: u32,
    ram_size: f32,
    disk_size: u32,
    #[serde(default)]
    gpu_number: u32,
    #[serde(default)]
    gpu_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateEntry {
    #[serde(rename = "templateID")]
    template_id: String,
    template_name: String,
    template_specs: TemplateSpecs,
}

/// Images and templates offered by the driver
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub images: Vec<Image>,
    pub templates: Vec<HostTemplate>,
}

impl Catalog {
    /// Load both catalog files
    pub fn load(images_path: &Path, templates_path: &Path) -> Result<Self> {
        let images = parse_images(
            &images_path.display().to_string(),
            &std::fs::read_to_string(images_path)?,
        )?;
        let templates = parse_templates(
            &templates_path.display().to_string(),
            &std::fs::read_to_string(templates_path)?,
        )?;
        debug!(
            images = images.len(),
            templates = templates.len(),
            "Loaded catalog"
        );
        Ok(Self { images, templates })
    }

    /// Find an image by id or name
    pub fn image(&self, reference: &str) -> Result<Image> {
        self.images
            .iter()
            .find(|i| i.id == reference || i.name == reference)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "image",
                key: reference.to_string(),
            })
    }

    /// Find a template by id or name
    pub fn template(&self, reference: &str) -> Result<HostTemplate> {
        self.templates
            .iter()
            .find(|t| t.id == reference || t.name == reference)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "template",
                key: reference.to_string(),
            })
    }
}

/// Split a catalog document into its raw entries
fn entries(file: &str, content: &str, section: &str) -> Result<Vec<serde_json::Value>> {
    let mut document: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| Error::Configuration(format!("catalog '{}' is not valid JSON: {}", file, e)))?;
    match document.get_mut(section).map(serde_json::Value::take) {
        Some(serde_json::Value::Array(entries)) => Ok(entries),
        _ => Err(Error::Configuration(format!(
            "catalog '{}' has no '{}' array",
            file, section
        ))),
    }
}

fn malformed(file: &str, index: usize, reason: impl Into<String>) -> Error {
    Error::MalformedCatalogEntry {
        file: file.to_string(),
        index,
        reason: reason.into(),
    }
}

/// Parse an images catalog
pub fn parse_images(file: &str, content: &str) -> Result<Vec<Image>> {
    entries(file, content, "images")?
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let entry: ImageEntry =
                serde_json::from_value(value).map_err(|e| malformed(file, index, e.to_string()))?;
            if entry.image_id.is_empty() {
                return Err(malformed(file, index, "empty imageID"));
            }
            if entry.image_path.is_empty() {
                return Err(malformed(file, index, "empty imagePath"));
            }
            Ok(Image {
                id: entry.image_id,
                name: entry.image_name,
                path: entry.image_path,
            })
        })
        .collect()
}

/// Parse a templates catalog
pub fn parse_templates(file: &str, content: &str) -> Result<Vec<HostTemplate>> {
    entries(file, content, "templates")?
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let entry: TemplateEntry =
                serde_json::from_value(value).map_err(|e| malformed(file, index, e.to_string()))?;
            if entry.template_id.is_empty() {
                return Err(malformed(file, index, "empty templateID"));
            }
            let specs = entry.template_specs;
            if specs.cores_number == 0 {
                return Err(malformed(file, index, "coresNumber must be positive"));
            }
            if !(specs.ram_size > 0.0) {
                return Err(malformed(file, index, "ramSize must be positive"));
            }
            Ok(HostTemplate {
                id: entry.template_id,
                name: entry.template_name,
                size: HostSize {
                    cores: specs.cores_number,
                    ram_size: specs.ram_size,
                    disk_size: specs.disk_size,
                    gpu_number: specs.gpu_number,
                    gpu_type: specs.gpu_type,
                },
            })
        })
        .collect()
}
