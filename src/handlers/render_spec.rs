use std::collections::BTreeMap;

use serde_json::Value;

use super::error::ExportError;
use super::types::ExportOptions;
use crate::projects::Project;
use crate::provider::RenderSpec;

/// Build the provider request for one project, rejecting anything the
/// provider would only fail on after we had paid for a submission.
pub fn build_render_spec(
    spec_id: &str,
    project: &Project,
    tenant_id: &str,
    options: &ExportOptions,
) -> Result<RenderSpec, ExportError> {
    let format = options.format.trim();
    if format.is_empty() {
        return Err(ExportError::InvalidSpec("export format is required".into()));
    }
    if !project.kind.accepts_format(format) {
        return Err(ExportError::InvalidSpec(format!(
            "format {} is not supported for {} projects",
            format,
            project.kind.as_domain()
        )));
    }
    if let Some(dimensions) = options.dimensions {
        if dimensions.width == 0 || dimensions.height == 0 {
            return Err(ExportError::InvalidSpec(format!(
                "dimensions must be positive, got {}x{}",
                dimensions.width, dimensions.height
            )));
        }
    }
    if project.content.is_null() {
        return Err(ExportError::InvalidSpec(format!(
            "project {} has no content",
            project.id
        )));
    }

    let missing: Vec<&str> = project
        .assets
        .iter()
        .filter(|asset| asset.url.as_deref().is_none_or(|url| url.trim().is_empty()))
        .map(|asset| asset.id.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(ExportError::InvalidSpec(format!(
            "assets missing a source url: {}",
            missing.join(", ")
        )));
    }

    let mut metadata: BTreeMap<String, Value> = options.extra.clone();
    metadata.insert("format".into(), Value::from(format.to_ascii_uppercase()));
    metadata.insert("tenantId".into(), Value::from(tenant_id));
    metadata.insert("projectId".into(), Value::from(project.id.as_str()));
    if let Some(quality) = &options.quality {
        metadata.insert("quality".into(), Value::from(quality.as_str()));
    }

    Ok(RenderSpec::builder()
        .id(spec_id)
        .project_id(project.id.as_str())
        .format(format.to_ascii_uppercase())
        .maybe_quality(options.quality.clone())
        .maybe_dimensions(options.dimensions)
        .content(project.content.clone())
        .assets(project.assets.clone())
        .maybe_brand(project.brand.clone())
        .metadata(metadata)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::{AssetRef, ProjectKind};
    use crate::provider::Dimensions;
    use serde_json::json;

    fn print_project() -> Project {
        Project::new("P1", "t1", ProjectKind::Print, json!({"pages": [{"text": "hi"}]}))
            .with_assets(vec![AssetRef {
                id: "logo".into(),
                url: Some("https://assets.example.com/logo.png".into()),
                mime_type: Some("image/png".into()),
            }])
            .with_brand(json!({"primary": "#ff0000"}))
    }

    #[test]
    fn test_builds_spec_with_metadata() {
        let mut options = ExportOptions::new("pdf").with_quality("HIGH");
        options.extra.insert("bleed".into(), json!(true));

        let spec = build_render_spec("msg-1", &print_project(), "t1", &options).unwrap();

        assert_eq!(spec.id, "msg-1");
        assert_eq!(spec.format, "PDF");
        assert_eq!(spec.quality.as_deref(), Some("HIGH"));
        assert_eq!(spec.assets.len(), 1);
        assert_eq!(spec.brand, Some(json!({"primary": "#ff0000"})));
        assert_eq!(spec.metadata["tenantId"], json!("t1"));
        assert_eq!(spec.metadata["projectId"], json!("P1"));
        assert_eq!(spec.metadata["format"], json!("PDF"));
        assert_eq!(spec.metadata["bleed"], json!(true));
    }

    #[test]
    fn test_rejects_format_for_kind() {
        let err = build_render_spec("m", &print_project(), "t1", &ExportOptions::new("MP4"))
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidSpec(ref msg) if msg.contains("MP4")));
    }

    #[test]
    fn test_rejects_asset_without_url() {
        let project = print_project().with_assets(vec![AssetRef {
            id: "hero".into(),
            url: None,
            mime_type: None,
        }]);

        let err = build_render_spec("m", &project, "t1", &ExportOptions::new("PDF")).unwrap_err();
        assert!(matches!(err, ExportError::InvalidSpec(ref msg) if msg.contains("hero")));
    }

    #[test]
    fn test_rejects_zero_dimensions_and_empty_content() {
        let mut options = ExportOptions::new("PNG");
        options.dimensions = Some(Dimensions { width: 0, height: 100 });
        assert!(build_render_spec("m", &print_project(), "t1", &options).is_err());

        let empty = Project::new("P2", "t1", ProjectKind::Print, Value::Null);
        assert!(build_render_spec("m", &empty, "t1", &ExportOptions::new("PDF")).is_err());
    }
}
