//! # fk-viz-render
//!
//! Renders `fk-viz` JSON artifacts to standalone SVG documents.

pub mod canvas;
pub mod color;
pub mod config;
pub mod layout;
pub mod plots;
pub mod primitives;

use config::VizConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown artifact kind: {0}")]
    UnknownKind(String),
    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("layout error: {0}")]
    Layout(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Artifact kinds understood by [`render_svg`].
pub const KINDS: &[&str] = &["overlay", "profile"];

/// Render an artifact JSON to SVG string.
pub fn render_svg(artifact_json: &str, kind: &str, config: &VizConfig) -> Result<String> {
    let svg = match kind {
        "overlay" => {
            let art: fk_viz::overlay::OverlayArtifact = serde_json::from_str(artifact_json)?;
            plots::overlay::render(&art, config)?
        }
        "profile" => {
            let art: fk_viz::profile::ProfileCurveArtifact = serde_json::from_str(artifact_json)?;
            plots::profile::render(&art, config)?
        }
        other => return Err(RenderError::UnknownKind(other.to_string())),
    };
    Ok(svg)
}

/// Render an artifact JSON to a file. Only `.svg` output is supported.
pub fn render_to_file(
    artifact_json: &str,
    kind: &str,
    path: &std::path::Path,
    config: &VizConfig,
) -> Result<()> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("svg");
    if ext != "svg" {
        return Err(RenderError::UnknownKind(format!("format: {ext}")));
    }
    let svg = render_svg(artifact_json, kind, config)?;
    std::fs::write(path, svg)?;
    Ok(())
}
