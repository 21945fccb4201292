//! OpenAPI generation for email-confirm endpoints.

use std::path::{Path, PathBuf};

use crate::{config::ConfirmConfig, handlers};
use thiserror::Error;
use utoipa::OpenApi;

/// OpenAPI document for all public email-confirm HTTP endpoints.
///
/// Paths are relative to the configured path prefix; use
/// [`openapi_build_for`] to document a mounted router.
#[derive(OpenApi)]
#[openapi(
    paths(handlers::confirm::confirm_get),
    components(schemas(
        handlers::confirm::EmailConfirmResponse,
        crate::error::ConfirmErrorResponse
    )),
    tags((name = "email-confirm", description = "Email address confirmation"))
)]
pub struct ConfirmApiDoc;

/// OpenAPI generation and file-write errors.
#[derive(Debug, Error)]
pub enum OpenApiError {
    /// OpenAPI serialization failed.
    #[error("failed to serialize openapi spec: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// Creating the docs directory failed.
    #[error("failed to create docs directory at {path}: {source}")]
    CreateDir {
        /// Target directory path.
        path: PathBuf,
        /// I/O source error.
        #[source]
        source: std::io::Error,
    },

    /// Writing the OpenAPI file failed.
    #[error("failed to write openapi spec at {path}: {source}")]
    WriteFile {
        /// Target file path.
        path: PathBuf,
        /// I/O source error.
        #[source]
        source: std::io::Error,
    },
}

/// Build the OpenAPI document for email-confirm.
pub fn openapi_build() -> utoipa::openapi::OpenApi {
    ConfirmApiDoc::openapi()
}

/// Build the OpenAPI document with paths under `config.path_prefix`.
pub fn openapi_build_for(config: &ConfirmConfig) -> utoipa::openapi::OpenApi {
    let mut doc = openapi_build();
    if !config.path_prefix.is_empty() {
        doc.paths.paths = std::mem::take(&mut doc.paths.paths)
            .into_iter()
            .map(|(path, item)| (format!("{}{path}", config.path_prefix), item))
            .collect();
    }
    doc
}

/// Generate the OpenAPI document as YAML.
pub fn openapi_yaml_generate() -> Result<String, OpenApiError> {
    Ok(serde_yaml::to_string(&openapi_build())?)
}

/// Write the OpenAPI YAML document to an arbitrary path.
pub fn openapi_yaml_write(path: impl AsRef<Path>) -> Result<(), OpenApiError> {
    let path = path.as_ref();
    let docs_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    std::fs::create_dir_all(&docs_dir).map_err(|source| OpenApiError::CreateDir {
        path: docs_dir.clone(),
        source,
    })?;

    let spec = openapi_yaml_generate()?;
    std::fs::write(path, spec).map_err(|source| OpenApiError::WriteFile {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

/// Write `docs/openapi.yml` next to the manifest and return the written path.
pub fn openapi_yaml_write_default() -> Result<PathBuf, OpenApiError> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("docs")
        .join("openapi.yml");
    openapi_yaml_write(&path)?;
    Ok(path)
}
