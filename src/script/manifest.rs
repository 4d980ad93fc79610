/// Build manifest parser
///
/// Parses the `scriptbin-begin` ... `scriptbin-end` block embedded in a
/// script's comments. Parsing happens in two independent stages:
/// [`extract_block`] slices the commented block out of the file, then
/// [`decode_manifest`] reads the uncommented body as YAML.
use serde::Deserialize;
use std::ops::Range;
use std::path::{Component, Path};

use super::error::{ScriptError, ScriptResult};

pub const BEGIN_MARKER: &str = "scriptbin-begin";
pub const END_MARKER: &str = "scriptbin-end";

/// Used when the manifest does not set `target_bin`
pub const DEFAULT_TARGET_BIN: &str = "./script";

/// Extra file materialised next to `script_src`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtraFile {
    pub path: String,
    pub content: String,
}

/// Container build settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerBuild {
    pub dockerfile: String,
    pub src_mount_dir: String,
    pub extra_args: Vec<String>,
}

/// Build configuration declared by a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub script_src: String,
    pub build_cmd: String,
    /// Setup step run before `build_cmd` in every fresh build directory
    pub build_once_cmd: Option<String>,
    pub target_bin: Option<String>,
    pub target_interpreter: Option<String>,
    pub replace_shebang_with: String,
    pub files: Vec<ExtraFile>,
    pub docker_build: Option<DockerBuild>,
}

impl Manifest {
    pub fn target_bin(&self) -> &str {
        self.target_bin.as_deref().unwrap_or(DEFAULT_TARGET_BIN)
    }

    pub fn is_containerized(&self) -> bool {
        self.docker_build.is_some()
    }

    /// Shell commands of one build, in order
    pub fn build_steps(&self) -> impl Iterator<Item = &str> {
        self.build_once_cmd
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.build_cmd.as_str()))
    }
}

/// The commented block as found in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestBlock {
    /// Uncommented body, one line per block line
    pub body: String,
    /// Byte range of the block, markers included
    pub range: Range<usize>,
    /// Comment prefix that precedes the begin marker
    pub prefix: String,
}

/// A script split into its manifest and its build source
#[derive(Debug, Clone)]
pub struct ParsedScript {
    pub manifest: Manifest,
    /// Byte range of the manifest block
    pub block: Range<usize>,
    /// Byte range of the source that becomes `script_src` (everything after
    /// the shebang line)
    pub source: Range<usize>,
}

impl ParsedScript {
    /// Contents of `script_src` as written into the build directory
    ///
    /// The shebang line is replaced with `replace_shebang_with` so line
    /// numbers in compiler diagnostics still match the original file.
    pub fn script_source(&self, text: &[u8]) -> Vec<u8> {
        let body = &text[self.source.clone()];
        if self.source.start == 0 {
            return body.to_vec();
        }
        let mut out = Vec::with_capacity(body.len() + self.manifest.replace_shebang_with.len() + 1);
        out.extend_from_slice(self.manifest.replace_shebang_with.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(body);
        out
    }
}

/// Parse a full script file into manifest and source ranges
pub fn parse_script(text: &[u8]) -> ScriptResult<ParsedScript> {
    let block = extract_block(text)?;
    let manifest = decode_manifest(&block.body)?;

    let source_start = if text.starts_with(b"#!") {
        text.iter()
            .position(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(text.len())
    } else {
        0
    };

    Ok(ParsedScript {
        manifest,
        block: block.range,
        source: source_start..text.len(),
    })
}

/// Locate the first delimited block and strip its comment prefix
pub fn extract_block(text: &[u8]) -> ScriptResult<ManifestBlock> {
    let mut offset = 0;
    let mut open: Option<(usize, String, usize)> = None;
    let mut body_lines: Vec<&str> = Vec::new();

    for (line_no, raw) in text.split_inclusive(|b| *b == b'\n').enumerate() {
        let start = offset;
        offset += raw.len();
        let line = std::str::from_utf8(raw).ok().map(trim_newline);

        match &open {
            None => {
                let Some(line) = line else { continue };
                if let Some(pos) = line.find(BEGIN_MARKER) {
                    if line[pos + BEGIN_MARKER.len()..].trim().is_empty() {
                        open = Some((start, line[..pos].to_string(), line_no + 1));
                    }
                }
            }
            Some((block_start, prefix, begin_line)) => {
                let Some(line) = line else {
                    return Err(ScriptError::ManifestMalformed(format!(
                        "line {} of the manifest block is not valid UTF-8",
                        line_no + 1
                    )));
                };
                let stripped = strip_prefix_bytes(line, prefix.len()).ok_or_else(|| {
                    ScriptError::ManifestMalformed(format!(
                        "line {} does not line up with the comment prefix on line {}",
                        line_no + 1,
                        begin_line
                    ))
                })?;
                if stripped.trim() == END_MARKER {
                    return Ok(ManifestBlock {
                        body: body_lines.join("\n"),
                        range: *block_start..offset,
                        prefix: prefix.clone(),
                    });
                }
                body_lines.push(stripped);
            }
        }
    }

    Err(ScriptError::ManifestMissing {
        begin: BEGIN_MARKER,
        end: END_MARKER,
    })
}

fn trim_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Drop `len` leading bytes the way the begin line's prefix was dropped.
/// Short lines (e.g. a bare `//`) collapse to an empty line.
fn strip_prefix_bytes(line: &str, len: usize) -> Option<&str> {
    if line.len() <= len {
        return Some("");
    }
    if line.is_char_boundary(len) {
        Some(&line[len..])
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    script_src: Option<String>,
    build_cmd: Option<String>,
    build_once_cmd: Option<String>,
    target_bin: Option<String>,
    target_interpreter: Option<String>,
    #[serde(default)]
    replace_shebang_with: String,
    #[serde(default)]
    files: Vec<ExtraFile>,
    docker_build: Option<RawDockerBuild>,
}

#[derive(Debug, Deserialize)]
struct RawDockerBuild {
    dockerfile: Option<String>,
    src_mount_dir: Option<String>,
    #[serde(default)]
    extra_args: Vec<String>,
}

/// Decode the uncommented block body. Unknown keys are ignored.
pub fn decode_manifest(body: &str) -> ScriptResult<Manifest> {
    if body.trim().is_empty() {
        return Err(ScriptError::ManifestMalformed(
            "manifest block is empty".to_string(),
        ));
    }

    let raw: RawManifest =
        serde_yaml::from_str(body).map_err(|e| ScriptError::ManifestMalformed(e.to_string()))?;

    let script_src = required(raw.script_src, "script_src")?;
    let build_cmd = required(raw.build_cmd, "build_cmd")?;

    check_relative(&script_src, "script_src")?;
    for file in &raw.files {
        check_relative(&file.path, "files[].path")?;
    }

    let docker_build = raw.docker_build.map(validate_docker).transpose()?;

    Ok(Manifest {
        script_src,
        build_cmd,
        build_once_cmd: raw.build_once_cmd.filter(|c| !c.trim().is_empty()),
        target_bin: raw.target_bin.filter(|t| !t.trim().is_empty()),
        target_interpreter: raw.target_interpreter.filter(|t| !t.trim().is_empty()),
        replace_shebang_with: raw.replace_shebang_with,
        files: raw.files,
        docker_build,
    })
}

fn required(value: Option<String>, field: &str) -> ScriptResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ScriptError::ManifestMalformed(format!(
            "required field `{}` is missing",
            field
        ))),
    }
}

fn check_relative(path: &str, field: &str) -> ScriptResult<()> {
    let p = Path::new(path);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    let names_file = p.components().any(|c| matches!(c, Component::Normal(_)));
    if p.is_absolute() || escapes || !names_file {
        return Err(ScriptError::ManifestInvalid(format!(
            "`{}` must be a relative path inside the build directory: {}",
            field, path
        )));
    }
    Ok(())
}

fn validate_docker(raw: RawDockerBuild) -> ScriptResult<DockerBuild> {
    let dockerfile = raw
        .dockerfile
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| {
            ScriptError::ManifestInvalid("docker_build requires `dockerfile`".to_string())
        })?;
    let src_mount_dir = raw
        .src_mount_dir
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| {
            ScriptError::ManifestInvalid("docker_build requires `src_mount_dir`".to_string())
        })?;

    Ok(DockerBuild {
        dockerfile,
        src_mount_dir,
        extra_args: raw.extra_args,
    })
}
