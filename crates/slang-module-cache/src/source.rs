//! Loading of shader source files and their `#include`s.
//!
//! A shader is resolved in two passes:
//! * an explicit include graph is built (one node per file, one edge per directive)
//!   and walked depth-first with an on-stack set to reject cycles,
//! * the acyclic graph is flattened into a single text, depth-first, where the first
//!   inclusion of a file wins and later duplicates are dropped.
//!
//! The flattened text carries `#line` markers so the compiler reports original
//! file locations, and a [`LineMap`] keeps the same information for consumers
//! which don't understand markers.

#![expect(clippy::module_name_repetitions, reason = "this is intended")]

use core::fmt::{self, Display};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

/// A loaded shader with all of its includes substituted.
///
/// Never mutated: when a file changes, resolving it again produces a new value
/// which supersedes this one.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ShaderSource {
    /// Canonical path of the root file.
    pub path: PathBuf,
    /// Raw text of the root file.
    pub text: Arc<str>,
    /// Last modification time of the root file.
    pub modified: SystemTime,
    /// Canonical paths of all transitively included files,
    /// in the order they were first included.
    pub includes: Vec<PathBuf>,
    /// The include-substituted text which is handed to the compiler.
    pub flattened: String,
    /// Origins of the lines of [`flattened`](Self::flattened).
    pub line_map: LineMap,
}

impl ShaderSource {
    /// Iterates over the root file followed by every included file.
    #[inline]
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        core::iter::once(self.path.as_path()).chain(self.includes.iter().map(PathBuf::as_path))
    }

    /// Whether the shader reads the given (canonical) file, directly or through an include.
    #[inline]
    #[must_use]
    pub fn depends_on(&self, path: &Path) -> bool {
        self.files().any(|file| file == path)
    }
}

/// Maps lines of flattened text back to the file and line they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    /// Files referenced by [`lines`](Self::lines).
    files: Vec<PathBuf>,
    /// For every flattened line, the index into `files` and the 1-based original line.
    lines: Vec<(usize, u32)>,
}

impl LineMap {
    /// Returns the file and 1-based line of the given 1-based flattened line.
    #[inline]
    #[must_use]
    pub fn origin(&self, flattened_line: u32) -> Option<(&Path, u32)> {
        let index = usize::try_from(flattened_line.checked_sub(1)?).ok()?;
        let &(file, line) = self.lines.get(index)?;
        Some((self.files.get(file)?.as_path(), line))
    }

    /// Number of flattened lines.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the flattened text is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Result of [`SourceStore::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[expect(clippy::exhaustive_enums, reason = "It is expected to be exhaustive")]
pub enum FileChange {
    /// The content digest is the same as before.
    Unchanged,
    /// The content differs from what was loaded before (or was never loaded).
    Changed,
    /// The file no longer exists.
    Removed,
}

/// A file as it was last read from disk.
#[derive(Debug, Clone)]
struct CachedFile {
    /// Modification time at the moment of reading.
    modified: SystemTime,
    /// Length at the moment of reading.
    len: u64,
    /// Contents.
    text: Arc<str>,
    /// xxh3 digest of the contents.
    digest: u128,
}

/// Locates and loads shader sources, caching file contents by path and mtime.
#[derive(Debug, Default)]
pub struct SourceStore {
    /// Directories searched for `#include`s after the including file's directory.
    include_dirs: Vec<PathBuf>,
    /// File contents keyed by canonical path.
    files: RwLock<FxHashMap<PathBuf, CachedFile>>,
}

impl SourceStore {
    /// Creates a store searching the given include directories.
    #[inline]
    #[must_use]
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            include_dirs,
            files: RwLock::default(),
        }
    }

    /// Loads the shader at `path` and flattens all of its includes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or one of its transitive includes is missing,
    /// can not be read, is not UTF-8, or if the includes form a cycle.
    #[inline]
    pub fn resolve(&self, path: &Path) -> Result<ShaderSource, SourceError> {
        self.resolve_recording(path, &mut Vec::new())
    }

    /// Like [`resolve`](Self::resolve), but also pushes to `files` every path whose
    /// appearance, removal or change can alter the outcome: the files read and each place
    /// an include was searched for, whether or not it was found there.
    ///
    /// The paths are recorded even when resolving fails, so that a caller can tell when
    /// retrying is worthwhile.
    ///
    /// # Errors
    ///
    /// See [`resolve`](Self::resolve).
    #[inline]
    pub fn resolve_recording(
        &self,
        path: &Path,
        files: &mut Vec<PathBuf>,
    ) -> Result<ShaderSource, SourceError> {
        let root = canonicalize(path, None).inspect_err(|_| files.push(path.to_path_buf()))?;
        let mut graph = IncludeGraph::default();
        let root_index = self.load_node(&mut graph, &root, files)?;
        let mut stack = Vec::new();
        self.walk(&mut graph, root_index, &mut stack, files)?;

        let flattened = graph.flatten(root_index);
        let node = graph.node(root_index);
        log::trace!(
            "resolved `{}` with {} include(s)",
            root.display(),
            flattened.order.len().saturating_sub(1)
        );
        Ok(ShaderSource {
            path: root,
            text: Arc::clone(&node.file.text),
            modified: node.file.modified,
            includes: flattened
                .order
                .iter()
                .skip(1)
                .map(|&index| graph.node(index).path.clone())
                .collect(),
            flattened: flattened.text,
            line_map: flattened.line_map,
        })
    }

    /// Re-reads the file regardless of its mtime and reports whether the content changed
    /// since it was last loaded by this store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but can not be read.
    #[inline]
    pub fn refresh(&self, path: &Path) -> Result<FileChange, SourceError> {
        let previous = self.files.read().get(path).map(|file| file.digest);
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.files.write().remove(path);
                return Ok(if previous.is_some() {
                    FileChange::Removed
                } else {
                    FileChange::Unchanged
                });
            }
            Err(source) => {
                return Err(SourceError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let file = read_file(path, &metadata)?;
        let digest = file.digest;
        self.files.write().insert(path.to_path_buf(), file);
        Ok(if previous == Some(digest) {
            FileChange::Unchanged
        } else {
            FileChange::Changed
        })
    }

    /// Content digest of the file as last loaded, if it was loaded at all.
    #[inline]
    #[must_use]
    pub fn digest(&self, path: &Path) -> Option<u128> {
        self.files.read().get(path).map(|file| file.digest)
    }

    /// Canonical paths of every file this store has loaded.
    #[inline]
    #[must_use]
    pub fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = self.files.read().keys().cloned().collect();
        files.sort();
        files
    }

    /// Returns the cached contents of the file, reading it again when its mtime or size moved.
    fn load_file(&self, path: &Path) -> Result<CachedFile, SourceError> {
        let metadata = fs::metadata(path).map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        if let Some(cached) = self.files.read().get(path) {
            if cached.modified == modified && cached.len == metadata.len() {
                return Ok(cached.clone());
            }
        }
        let file = read_file(path, &metadata)?;
        self.files.write().insert(path.to_path_buf(), file.clone());
        Ok(file)
    }

    /// Adds the file to the graph, if it is not part of it already.
    fn load_node(
        &self,
        graph: &mut IncludeGraph,
        path: &Path,
        files: &mut Vec<PathBuf>,
    ) -> Result<usize, SourceError> {
        if let Some(&index) = graph.indices.get(path) {
            return Ok(index);
        }
        files.push(path.to_path_buf());
        let file = self.load_file(path)?;
        let directives = file
            .text
            .lines()
            .zip(1_u32..)
            .filter_map(|(line, number)| parse_include(line).map(|spec| (number, spec)))
            .collect();
        let index = graph.nodes.len();
        graph.nodes.push(Node {
            path: path.to_path_buf(),
            file,
            directives,
            edges: FxHashMap::default(),
            mark: Mark::Unvisited,
        });
        graph.indices.insert(path.to_path_buf(), index);
        Ok(index)
    }

    /// Depth-first walk resolving the directives of `index`, failing on back edges.
    fn walk(
        &self,
        graph: &mut IncludeGraph,
        index: usize,
        stack: &mut Vec<usize>,
        files: &mut Vec<PathBuf>,
    ) -> Result<(), SourceError> {
        graph.node_mut(index).mark = Mark::OnStack;
        stack.push(index);

        let directives = graph.node(index).directives.clone();
        for (line, spec) in directives {
            let including = graph.node(index).path.clone();
            let target_path = self.locate(&spec, &including, files).ok_or_else(|| {
                SourceError::NotFound {
                    path: PathBuf::from(spec.path()),
                    included_from: Some(IncludeSite {
                        file: including.clone(),
                        line,
                    }),
                }
            })?;
            let target = self.load_node(graph, &target_path, files)?;
            graph.node_mut(index).edges.insert(line, target);

            match graph.node(target).mark {
                Mark::OnStack => {
                    let start = stack
                        .iter()
                        .position(|&on_stack| on_stack == target)
                        .unwrap_or(0);
                    let mut cycle: Vec<PathBuf> = stack
                        .get(start..)
                        .unwrap_or_default()
                        .iter()
                        .map(|&node| graph.node(node).path.clone())
                        .collect();
                    cycle.push(target_path);
                    return Err(SourceError::IncludeCycle { cycle });
                }
                Mark::Unvisited => self.walk(graph, target, stack, files)?,
                Mark::Done => {}
            }
        }

        stack.pop();
        graph.node_mut(index).mark = Mark::Done;
        Ok(())
    }

    /// Finds the file an include directive refers to, recording the candidates tried.
    fn locate(
        &self,
        spec: &IncludeSpec,
        including: &Path,
        files: &mut Vec<PathBuf>,
    ) -> Option<PathBuf> {
        let relative = match spec {
            IncludeSpec::Quoted(path) => including.parent().map(|dir| dir.join(path)),
            IncludeSpec::Angled(_) => None,
        };
        relative
            .into_iter()
            .chain(self.include_dirs.iter().map(|dir| dir.join(spec.path())))
            .inspect(|candidate| files.push(candidate.clone()))
            .find(|candidate| candidate.is_file())
            .and_then(|candidate| dunce::canonicalize(candidate).ok())
    }
}

/// Reads a whole file and digests it.
fn read_file(path: &Path, metadata: &fs::Metadata) -> Result<CachedFile, SourceError> {
    let bytes = fs::read(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = xxh3_128(&bytes);
    let text = String::from_utf8(bytes).map_err(|_err| SourceError::NotUtf8 {
        path: path.to_path_buf(),
    })?;
    Ok(CachedFile {
        modified: metadata.modified().unwrap_or(UNIX_EPOCH),
        len: metadata.len(),
        text: text.into(),
        digest,
    })
}

/// Canonicalizes the root shader path.
fn canonicalize(path: &Path, included_from: Option<IncludeSite>) -> Result<PathBuf, SourceError> {
    dunce::canonicalize(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            SourceError::NotFound {
                path: path.to_path_buf(),
                included_from,
            }
        } else {
            SourceError::Read {
                path: path.to_path_buf(),
                source: err,
            }
        }
    })
}

/// Target of an include directive.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IncludeSpec {
    /// `#include "path"`, searched next to the including file first.
    Quoted(String),
    /// `#include <path>`, searched in include directories only.
    Angled(String),
}

impl IncludeSpec {
    /// The path as written in the directive.
    fn path(&self) -> &str {
        match self {
            Self::Quoted(path) | Self::Angled(path) => path,
        }
    }
}

/// Parses `#include "path"` or `#include <path>`, allowing whitespace around `#`.
fn parse_include(line: &str) -> Option<IncludeSpec> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?.trim();
    if let Some(quoted) = rest.strip_prefix('"') {
        let (path, _) = quoted.split_once('"')?;
        return Some(IncludeSpec::Quoted(path.to_owned()));
    }
    let angled = rest.strip_prefix('<')?;
    let (path, _) = angled.split_once('>')?;
    Some(IncludeSpec::Angled(path.to_owned()))
}

/// DFS state of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// Not visited yet.
    Unvisited,
    /// On the current DFS path.
    OnStack,
    /// Fully explored.
    Done,
}

/// A file in the include graph.
#[derive(Debug)]
struct Node {
    /// Canonical path.
    path: PathBuf,
    /// Contents.
    file: CachedFile,
    /// Unresolved directives with their 1-based line numbers.
    directives: Vec<(u32, IncludeSpec)>,
    /// Resolved directives: line number to included node.
    edges: FxHashMap<u32, usize>,
    /// DFS state.
    mark: Mark,
}

/// The include graph of one resolution.
#[derive(Debug, Default)]
struct IncludeGraph {
    /// Nodes in discovery order.
    nodes: Vec<Node>,
    /// Node index by canonical path.
    indices: FxHashMap<PathBuf, usize>,
}

/// Output of [`IncludeGraph::flatten`].
struct Flattened {
    /// Flattened text.
    text: String,
    /// Line origins.
    line_map: LineMap,
    /// Emitted nodes, in order of first inclusion.
    order: Vec<usize>,
}

impl IncludeGraph {
    /// Returns the node at `index`.
    #[expect(clippy::indexing_slicing, reason = "indices are handed out by the graph itself")]
    fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Returns the node at `index`.
    #[expect(clippy::indexing_slicing, reason = "indices are handed out by the graph itself")]
    fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.nodes[index]
    }

    /// Flattens the (acyclic) graph below `root`.
    fn flatten(&self, root: usize) -> Flattened {
        let mut out = Flattened {
            text: String::new(),
            line_map: LineMap {
                files: self.nodes.iter().map(|node| node.path.clone()).collect(),
                lines: Vec::new(),
            },
            order: Vec::new(),
        };
        let mut emitted = vec![false; self.nodes.len()];
        self.emit(root, &mut emitted, &mut out);
        out
    }

    /// Appends the node's text to `out`, substituting includes seen for the first time.
    fn emit(&self, index: usize, emitted: &mut [bool], out: &mut Flattened) {
        if let Some(flag) = emitted.get_mut(index) {
            *flag = true;
        }
        out.order.push(index);
        let node = self.node(index);
        push_marker(out, index, &node.path, 1);

        for (line, number) in node.file.text.lines().zip(1_u32..) {
            match node.edges.get(&number) {
                Some(&target) if !emitted.get(target).copied().unwrap_or(true) => {
                    self.emit(target, emitted, out);
                    push_marker(out, index, &node.path, number + 1);
                }
                // already included earlier: keep the line count, drop the text
                Some(_) => push_line(out, "", index, number),
                None => push_line(out, line, index, number),
            }
        }
    }
}

/// Appends a `#line` marker announcing that `line` of `path` follows.
fn push_marker(out: &mut Flattened, file: usize, path: &Path, line: u32) {
    let display = path.display().to_string().replace('\\', "/");
    let marker = format!("#line {line} \"{display}\"");
    push_line(out, &marker, file, line);
}

/// Appends one line of text with its origin.
fn push_line(out: &mut Flattened, text: &str, file: usize, line: u32) {
    out.text.push_str(text);
    out.text.push('\n');
    out.line_map.lines.push((file, line));
}

/// A place where a file is included.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct IncludeSite {
    /// The including file.
    pub file: PathBuf,
    /// 1-based line of the directive.
    pub line: u32,
}

impl Display for IncludeSite {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// An error indicating that a shader source could not be resolved.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The shader or one of its includes does not exist.
    #[error("shader source `{}` not found{}", path.display(), included_from.as_ref().map(|site| format!(" (included from {site})")).unwrap_or_default())]
    NotFound {
        /// The path that was looked for.
        path: PathBuf,
        /// Where it was included from, `None` for the root file.
        included_from: Option<IncludeSite>,
    },
    /// The include graph contains a cycle.
    #[error("include cycle: {}", cycle.iter().map(|path| path.display().to_string()).collect::<Vec<_>>().join(" -> "))]
    IncludeCycle {
        /// The files forming the cycle, the first file is repeated at the end.
        cycle: Vec<PathBuf>,
    },
    /// Failed to read a file.
    #[error("failed to read shader source `{}`: {source}", path.display())]
    Read {
        /// The file which could not be read.
        path: PathBuf,
        /// Source of the error.
        source: io::Error,
    },
    /// A file is not valid UTF-8.
    #[error("shader source `{}` is not valid UTF-8", path.display())]
    NotUtf8 {
        /// The offending file.
        path: PathBuf,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        dunce::canonicalize(path).unwrap()
    }

    #[test_log::test]
    fn parses_include_directives() {
        assert_eq!(
            parse_include("  #  include \"common/math.slang\" // trailing"),
            Some(IncludeSpec::Quoted("common/math.slang".to_owned()))
        );
        assert_eq!(
            parse_include("#include <lighting.slang>"),
            Some(IncludeSpec::Angled("lighting.slang".to_owned()))
        );
        assert_eq!(parse_include("// #include \"nope.slang\""), None);
        assert_eq!(parse_include("#define INCLUDE 1"), None);
    }

    #[test_log::test]
    fn duplicate_include_is_emitted_once_at_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let common = write(dir.path(), "common.slang", "float common();\n");
        let light = write(
            dir.path(),
            "light.slang",
            "#include \"common.slang\"\nfloat light();\n",
        );
        let root = write(
            dir.path(),
            "shader.slang",
            "#include \"light.slang\"\n#include \"common.slang\"\nvoid main() {}\n",
        );

        let store = SourceStore::default();
        let source = store.resolve(&root).unwrap();
        assert_eq!(source.includes, vec![light, common.clone()]);
        assert_eq!(source.flattened.matches("float common();").count(), 1);
        let common_at = source.flattened.find("float common();").unwrap();
        let light_at = source.flattened.find("float light();").unwrap();
        assert!(common_at < light_at);
        assert!(source.depends_on(&common));
    }

    #[test_log::test]
    fn line_map_points_back_to_original_files() {
        let dir = tempfile::tempdir().unwrap();
        let inc = write(dir.path(), "inc/defs.slang", "// defs\nstruct Defs {};\n");
        let root = write(
            dir.path(),
            "shader.slang",
            "// line 1\n#include \"inc/defs.slang\"\nvoid main() {}\n",
        );

        let source = SourceStore::default().resolve(&root).unwrap();
        let lines: Vec<&str> = source.flattened.lines().collect();
        let defs_line = lines.iter().position(|line| *line == "struct Defs {};").unwrap();
        let main_line = lines.iter().position(|line| *line == "void main() {}").unwrap();

        let to_line = |index: usize| u32::try_from(index + 1).unwrap();
        assert_eq!(
            source.line_map.origin(to_line(defs_line)),
            Some((inc.as_path(), 2))
        );
        assert_eq!(
            source.line_map.origin(to_line(main_line)),
            Some((root.as_path(), 3))
        );
        assert_eq!(source.line_map.len(), lines.len());
    }

    #[test_log::test]
    fn include_cycle_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.slang", "#include \"b.slang\"\n");
        write(dir.path(), "b.slang", "#include \"a.slang\"\n");
        let root = write(dir.path(), "shader.slang", "#include \"a.slang\"\n");

        let err = SourceStore::default().resolve(&root).unwrap_err();
        let SourceError::IncludeCycle { cycle } = err else {
            panic!("expected an include cycle, got {err}");
        };
        let names: Vec<_> = cycle
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["a.slang", "b.slang", "a.slang"]);
    }

    #[test_log::test]
    fn missing_include_reports_including_site() {
        let dir = tempfile::tempdir().unwrap();
        let root = write(dir.path(), "shader.slang", "\n\n#include \"missing.slang\"\n");

        let err = SourceStore::default().resolve(&root).unwrap_err();
        let SourceError::NotFound {
            path,
            included_from: Some(site),
        } = err
        else {
            panic!("expected a missing include, got {err}");
        };
        assert_eq!(path, PathBuf::from("missing.slang"));
        assert_eq!(site.file, root);
        assert_eq!(site.line, 3);
    }

    #[test_log::test]
    fn failed_resolution_records_where_includes_were_searched() {
        let dir = tempfile::tempdir().unwrap();
        let root = write(dir.path(), "src/shader.slang", "#include \"common/missing.slang\"\n");
        let store = SourceStore::new(vec![dir.path().join("lib")]);

        let mut files = Vec::new();
        let err = store.resolve_recording(&root, &mut files).unwrap_err();
        assert!(matches!(err, SourceError::NotFound { included_from: Some(_), .. }));

        let next_to_root = root.parent().unwrap().join("common/missing.slang");
        assert_eq!(
            files,
            [
                root.clone(),
                next_to_root.clone(),
                dir.path().join("lib/common/missing.slang"),
            ]
        );

        let include = write(dir.path(), "src/common/missing.slang", "float f();\n");
        assert_eq!(include, next_to_root);
        let mut files = Vec::new();
        let source = store.resolve_recording(&root, &mut files).unwrap();
        assert_eq!(source.includes, vec![include.clone()]);
        assert_eq!(files, [root, include.clone(), include]);
    }

    #[test_log::test]
    fn missing_root_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceStore::default()
            .resolve(&dir.path().join("nope.slang"))
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound { included_from: None, .. }));
    }

    #[test_log::test]
    fn angled_includes_use_include_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let lib = write(dir.path(), "lib/brdf.slang", "float brdf();\n");
        let root = write(dir.path(), "src/shader.slang", "#include <brdf.slang>\n");

        let store = SourceStore::new(vec![dir.path().join("lib")]);
        let source = store.resolve(&root).unwrap();
        assert_eq!(source.includes, vec![lib]);
    }

    #[test_log::test]
    fn refresh_reports_only_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = write(dir.path(), "shader.slang", "void main() {}\n");
        let store = SourceStore::default();
        store.resolve(&root).unwrap();

        assert_eq!(store.refresh(&root).unwrap(), FileChange::Unchanged);
        fs::write(&root, "void main() { discard; }\n").unwrap();
        assert_eq!(store.refresh(&root).unwrap(), FileChange::Changed);
        assert_eq!(store.refresh(&root).unwrap(), FileChange::Unchanged);
        fs::remove_file(&root).unwrap();
        assert_eq!(store.refresh(&root).unwrap(), FileChange::Removed);
    }
}
