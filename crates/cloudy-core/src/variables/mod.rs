//! Hierarchical deployment variables.
//!
//! Variables live in `cloudy-vars.*` files placed anywhere above a
//! deployment. Resolution walks upward from a start directory:
//!
//! - structured files (YAML, JSON, script literal): the nearest one wins and
//!   is returned as a mapping. No merging across levels.
//! - shell files: every `cloudy-vars.sh` up to the root is collected and the
//!   raw texts are concatenated outermost first, so sourcing the result gives
//!   last-assignment-wins semantics. No keys are extracted.
//!
//! Shell assignments are cumulative and order dependent, so they are never
//! parsed into a map.
//!
//! Each marker may carry a trailing version suffix (`cloudy-vars.yml.2`).
//! Within one family at one level the highest version wins; a bare file is
//! version 0, and `.yml` beats `.yaml` at the same version. When several families sit in the same directory, the
//! priority is YAML, JSON, literal, shell.

pub mod literal;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::domain::{CloudyError, Result};
use crate::paths::normalize_start;

/// File stem shared by every variables marker.
pub const VARIABLES_STEM: &str = "cloudy-vars";

/// Parsed variables of a structured file.
pub type VariableMap = BTreeMap<String, Value>;

/// Marker families, in same-level priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariablesFormat {
    Yaml,
    Json,
    Literal,
    Shell,
}

impl VariablesFormat {
    pub const PRIORITY: [VariablesFormat; 4] = [
        VariablesFormat::Yaml,
        VariablesFormat::Json,
        VariablesFormat::Literal,
        VariablesFormat::Shell,
    ];

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "yml" | "yaml" => Some(VariablesFormat::Yaml),
            "json" => Some(VariablesFormat::Json),
            "py" => Some(VariablesFormat::Literal),
            "sh" => Some(VariablesFormat::Shell),
            _ => None,
        }
    }

    /// Whether files of this family are parsed into a mapping.
    pub fn is_structured(self) -> bool {
        !matches!(self, VariablesFormat::Shell)
    }
}

/// One shell variables file found during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellFragment {
    pub path: PathBuf,
    pub content: String,
}

/// Concatenated shell variables, outermost file first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellVariables {
    fragments: Vec<ShellFragment>,
}

impl ShellVariables {
    /// Build from fragments ordered outermost first. Returns `None` if empty.
    pub fn from_fragments(fragments: Vec<ShellFragment>) -> Option<Self> {
        if fragments.is_empty() {
            None
        } else {
            Some(ShellVariables { fragments })
        }
    }

    pub fn fragments(&self) -> &[ShellFragment] {
        &self.fragments
    }

    /// Text to source.
    ///
    /// Ancestor fragments (one trailing newline dropped each) joined by `\n`
    /// form a prefix, then `\n`, then the nearest file verbatim. With no
    /// ancestors the prefix is empty, so the text starts with `\n`.
    pub fn render(&self) -> String {
        let Some((nearest, ancestors)) = self.fragments.split_last() else {
            return String::new();
        };
        let prefix = ancestors
            .iter()
            .map(|f| f.content.strip_suffix('\n').unwrap_or(&f.content))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{prefix}\n{}", nearest.content)
    }
}

impl fmt::Display for ShellVariables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Resolved deployment variables.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentVariables {
    /// The nearest structured file, parsed.
    Structured {
        format: VariablesFormat,
        source: PathBuf,
        values: VariableMap,
    },
    /// Every shell file up to the root, unparsed.
    Shell(ShellVariables),
}

impl DeploymentVariables {
    pub fn format(&self) -> VariablesFormat {
        match self {
            DeploymentVariables::Structured { format, .. } => *format,
            DeploymentVariables::Shell(_) => VariablesFormat::Shell,
        }
    }

    /// The mapping, for structured variables.
    pub fn values(&self) -> Option<&VariableMap> {
        match self {
            DeploymentVariables::Structured { values, .. } => Some(values),
            DeploymentVariables::Shell(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values()?.get(key)
    }

    /// A string-valued (or integer-valued, stringified) variable.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn as_shell(&self) -> Option<&ShellVariables> {
        match self {
            DeploymentVariables::Shell(shell) => Some(shell),
            DeploymentVariables::Structured { .. } => None,
        }
    }
}

/// Resolve the variables visible from `start`. `Ok(None)` when no marker
/// exists between `start` and the filesystem root.
pub fn find_deployment_variables(start: &Path) -> Result<Option<DeploymentVariables>> {
    let start = normalize_start(start)?;
    // nearest first while walking; reversed at the end
    let mut shell: Vec<ShellFragment> = Vec::new();

    for dir in start.ancestors() {
        let markers = scan_level(dir);

        if shell.is_empty() {
            let nearest = VariablesFormat::PRIORITY
                .iter()
                .find_map(|format| markers.get(format).map(|path| (*format, path)));
            match nearest {
                Some((format, path)) if format.is_structured() => {
                    debug!(source = ?path, ?format, "resolved structured deployment variables");
                    let values = parse_structured(format, path)?;
                    return Ok(Some(DeploymentVariables::Structured {
                        format,
                        source: path.clone(),
                        values,
                    }));
                }
                Some((_, path)) => shell.push(read_fragment(path)?),
                None => {}
            }
        } else if let Some(path) = markers.get(&VariablesFormat::Shell) {
            shell.push(read_fragment(path)?);
        }
    }

    shell.reverse();
    if !shell.is_empty() {
        debug!(files = shell.len(), "resolved shell deployment variables");
    }
    Ok(ShellVariables::from_fragments(shell).map(DeploymentVariables::Shell))
}

/// Best marker per family in `dir`. Unreadable directories have no markers.
///
/// Higher versions win; at equal versions `.yml` beats `.yaml`.
fn scan_level(dir: &Path) -> BTreeMap<VariablesFormat, PathBuf> {
    let mut best: BTreeMap<VariablesFormat, ((u64, u8), PathBuf)> = BTreeMap::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return BTreeMap::new();
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some((format, version)) = parse_marker(&name) else {
            continue;
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let rank = (version, alias_rank(&name));
        let replace = best
            .get(&format)
            .map_or(true, |(current, _)| rank > *current);
        if replace {
            best.insert(format, (rank, path));
        }
    }
    best.into_iter().map(|(f, (_, p))| (f, p)).collect()
}

fn alias_rank(name: &str) -> u8 {
    let yaml_alias = format!("{VARIABLES_STEM}.yaml");
    if name == yaml_alias || name.starts_with(&format!("{yaml_alias}.")) {
        0
    } else {
        1
    }
}

/// `cloudy-vars.<ext>[.<N>]` -> (family, version)
fn parse_marker(name: &str) -> Option<(VariablesFormat, u64)> {
    let rest = name.strip_prefix(VARIABLES_STEM)?.strip_prefix('.')?;
    let (ext, version) = match rest.split_once('.') {
        Some((ext, suffix)) => {
            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (ext, suffix.parse().ok()?)
        }
        None => (rest, 0),
    };
    VariablesFormat::from_extension(ext).map(|format| (format, version))
}

fn read_fragment(path: &Path) -> Result<ShellFragment> {
    Ok(ShellFragment {
        path: path.to_path_buf(),
        content: fs::read_to_string(path)?,
    })
}

fn parse_structured(format: VariablesFormat, path: &Path) -> Result<VariableMap> {
    let content = fs::read_to_string(path)?;
    let invalid = |message: String| CloudyError::InvalidVariables {
        path: path.to_path_buf(),
        message,
    };
    match format {
        VariablesFormat::Yaml => serde_yaml_ng::from_str::<Option<VariableMap>>(&content)
            .map(Option::unwrap_or_default)
            .map_err(|e| invalid(e.to_string())),
        VariablesFormat::Json => {
            serde_json::from_str::<VariableMap>(&content).map_err(|e| invalid(e.to_string()))
        }
        VariablesFormat::Literal => {
            literal::parse_mapping(&content).map_err(|e| invalid(e.to_string()))
        }
        VariablesFormat::Shell => Err(invalid("shell variables are not parsed".to_string())),
    }
}
