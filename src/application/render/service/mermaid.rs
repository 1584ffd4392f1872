use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::render::types::{DiagramRenderer, RenderError};

#[derive(Debug, Error)]
pub enum MermaidRenderError {
    #[error("failed to prepare cache directory: {0}")]
    CacheInit(io::Error),
    #[error("failed to stage diagram source: {0}")]
    Io(io::Error),
    #[error("mermaid CLI exited with {exit_code:?}: {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("mermaid CLI not found: {0}")]
    NotFound(io::Error),
    #[error("failed to read rendered SVG: {0}")]
    Read(io::Error),
}

impl From<MermaidRenderError> for RenderError {
    fn from(err: MermaidRenderError) -> Self {
        RenderError::Diagram {
            message: err.to_string(),
        }
    }
}

/// Renders diagrams through the `mmdc` command line tool.
///
/// Output is cached on disk keyed by a hash of theme and source, so an
/// unchanged diagram is only rendered once per cache directory.
#[derive(Debug, Clone)]
pub struct MermaidCliRenderer {
    cli_path: PathBuf,
    cache_dir: PathBuf,
    theme: String,
}

impl MermaidCliRenderer {
    pub fn new(
        cli_path: PathBuf,
        cache_dir: PathBuf,
        theme: impl Into<String>,
    ) -> Result<Self, MermaidRenderError> {
        fs::create_dir_all(&cache_dir).map_err(MermaidRenderError::CacheInit)?;
        Ok(Self {
            cli_path,
            cache_dir,
            theme: theme.into(),
        })
    }

    fn render_with_cache(&self, source: &str) -> Result<String, MermaidRenderError> {
        let started_at = Instant::now();
        let cache_path = self
            .cache_dir
            .join(format!("{}.svg", cache_key(&self.theme, source)));

        match fs::read_to_string(&cache_path) {
            Ok(svg) => {
                debug!(
                    target = "application::render::mermaid",
                    result = "cache_hit",
                    cache_path = %cache_path.display(),
                    svg_bytes = svg.len(),
                    "Diagram served from cache"
                );
                return Ok(svg);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target = "application::render::mermaid",
                    cache_path = %cache_path.display(),
                    error = %err,
                    "Unreadable cached diagram; rendering again"
                );
            }
        }

        let mut input_file = NamedTempFile::new().map_err(MermaidRenderError::Io)?;
        input_file
            .write_all(source.as_bytes())
            .map_err(MermaidRenderError::Io)?;
        input_file.flush().map_err(MermaidRenderError::Io)?;

        let output_file = tempfile::Builder::new()
            .suffix(".svg")
            .tempfile_in(&self.cache_dir)
            .map_err(MermaidRenderError::Io)?;

        let output = Command::new(&self.cli_path)
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(output_file.path())
            .arg("--outputFormat")
            .arg("svg")
            .arg("--theme")
            .arg(&self.theme)
            .arg("--backgroundColor")
            .arg("transparent")
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    MermaidRenderError::NotFound(err)
                } else {
                    MermaidRenderError::Io(err)
                }
            })?;

        if !output.status.success() {
            return Err(MermaidRenderError::Cli {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Rename within the cache directory; concurrent renders of one diagram
        // write identical bytes, so the last rename wins harmlessly.
        output_file
            .persist(&cache_path)
            .map_err(|err| MermaidRenderError::Io(err.error))?;

        let svg = fs::read_to_string(&cache_path).map_err(MermaidRenderError::Read)?;
        debug!(
            target = "application::render::mermaid",
            result = "cache_miss",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            svg_bytes = svg.len(),
            "Diagram rendered via CLI"
        );
        Ok(svg)
    }
}

impl DiagramRenderer for MermaidCliRenderer {
    fn render_svg(&self, source: &str) -> Result<String, RenderError> {
        self.render_with_cache(source).map_err(|err| {
            warn!(
                target = "application::render::mermaid",
                cli_path = %self.cli_path.display(),
                error = %err,
                "Mermaid CLI render failed"
            );
            RenderError::from(err)
        })
    }
}

fn cache_key(theme: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(theme.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-mmdc");
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn recording_script(dir: &TempDir) -> (PathBuf, PathBuf) {
        let args_path = dir.path().join("args.log");
        let script = format!(
            r#"#!/bin/sh
set -eu
echo "$@" >> "{args_file}"
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output) shift; out="$1" ;;
  esac
  shift
done
echo '<svg data-fake="1"></svg>' > "$out"
"#,
            args_file = args_path.display()
        );
        (write_script(dir, &script), args_path)
    }

    #[test]
    fn renders_with_theme_and_transparent_background() {
        let dir = TempDir::new().expect("temp dir");
        let (script, args_path) = recording_script(&dir);
        let renderer = MermaidCliRenderer::new(script, dir.path().join("cache"), "dark")
            .expect("renderer");

        let svg = renderer
            .render_svg("graph TD; A-->B")
            .expect("svg rendered");
        assert!(svg.contains("data-fake"), "unexpected svg: {svg}");

        let args = fs::read_to_string(&args_path).expect("args");
        assert!(args.contains("--theme dark"), "missing theme: {args}");
        assert!(args.contains("--backgroundColor transparent"), "args: {args}");
        assert!(args.contains("--outputFormat svg"), "args: {args}");
    }

    #[test]
    fn second_render_is_served_from_cache() {
        let dir = TempDir::new().expect("temp dir");
        let (script, args_path) = recording_script(&dir);
        let renderer = MermaidCliRenderer::new(script, dir.path().join("cache"), "dark")
            .expect("renderer");

        renderer.render_svg("graph LR; X-->Y").expect("first");
        renderer.render_svg("graph LR; X-->Y").expect("second");

        let invocations = fs::read_to_string(&args_path).expect("args").lines().count();
        assert_eq!(invocations, 1);
    }

    #[test]
    fn cli_failure_becomes_render_error() {
        let dir = TempDir::new().expect("temp dir");
        let script = write_script(&dir, "#!/bin/sh\necho 'Parse error on line 1' >&2\nexit 1\n");
        let renderer = MermaidCliRenderer::new(script, dir.path().join("cache"), "dark")
            .expect("renderer");

        let err = renderer
            .render_with_cache("graph ???")
            .expect_err("cli failure");
        match err {
            MermaidRenderError::Cli { exit_code, stderr } => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("Parse error"), "stderr: {stderr}");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = renderer.render_svg("graph ???").expect_err("cli failure");
        assert!(matches!(err, RenderError::Diagram { .. }));
    }

    #[test]
    fn missing_cli_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let renderer = MermaidCliRenderer::new(
            dir.path().join("does-not-exist"),
            dir.path().join("cache"),
            "dark",
        )
        .expect("renderer");

        let err = renderer
            .render_with_cache("graph TD; A-->B")
            .expect_err("missing cli");
        assert!(matches!(err, MermaidRenderError::NotFound(_)));
    }
}
