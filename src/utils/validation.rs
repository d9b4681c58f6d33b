use crate::utils::error::{EtlError, Result};
use std::collections::HashSet;
use std::path::Path;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: &str, reason: impl Into<String>) -> EtlError {
    EtlError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(invalid(field_name, url_str, "URL cannot be empty"));
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(invalid(
                field_name,
                url_str,
                format!("Unsupported URL scheme: {}", scheme),
            )),
        },
        Err(e) => Err(invalid(
            field_name,
            url_str,
            format!("Invalid URL format: {}", e),
        )),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }

    Ok(())
}

/// 路徑必須存在於磁碟上
pub fn validate_existing_path(field_name: &str, path: &str) -> Result<()> {
    validate_path(field_name, path)?;
    if !Path::new(path).exists() {
        return Err(invalid(field_name, path, "File not found"));
    }
    Ok(())
}

pub fn validate_file_extension(field_name: &str, file: &str, allowed_extensions: &[&str]) -> Result<()> {
    let allowed_set: HashSet<String> = allowed_extensions
        .iter()
        .map(|ext| ext.to_ascii_lowercase())
        .collect();

    match Path::new(file).extension().and_then(|ext| ext.to_str()) {
        Some(extension) if allowed_set.contains(&extension.to_ascii_lowercase()) => Ok(()),
        Some(extension) => Err(invalid(
            field_name,
            file,
            format!(
                "Unsupported file extension: {}. Allowed extensions: {}",
                extension,
                allowed_extensions.join(", ")
            ),
        )),
        None => Err(invalid(
            field_name,
            file,
            "File has no extension or invalid filename",
        )),
    }
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| EtlError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(
            field_name,
            value,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("wfs.url", "https://example.com/wfs").is_ok());
        assert!(validate_url("wfs.url", "http://example.com").is_ok());
        assert!(validate_url("wfs.url", "").is_err());
        assert!(validate_url("wfs.url", "invalid-url").is_err());
        assert!(validate_url("wfs.url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_existing_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert!(validate_existing_path("path", path).is_ok());
        assert!(validate_existing_path("path", "/definitely/not/here.gpkg").is_err());
        assert!(validate_existing_path("path", "").is_err());
    }

    #[test]
    fn test_validate_file_extension() {
        let allowed = ["geojson", "json", "gpkg"];
        assert!(validate_file_extension("aoi.definition", "zone.GeoJSON", &allowed).is_ok());
        assert!(validate_file_extension("aoi.definition", "zone.gpkg", &allowed).is_ok());
        assert!(validate_file_extension("aoi.definition", "zone.shp", &allowed).is_err());
        assert!(validate_file_extension("aoi.definition", "zone", &allowed).is_err());
    }

    #[test]
    fn test_validate_required_and_non_empty() {
        let missing: Option<String> = None;
        assert!(matches!(
            validate_required_field("project.id", &missing),
            Err(EtlError::MissingConfigError { .. })
        ));
        assert!(validate_non_empty_string("name", "  ").is_err());
    }
}
