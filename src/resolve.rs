//! Mapping of profile file identifiers to source files on disk.
//!
//! Identifiers are usually import-path qualified (`example.com/mod/pkg/f.go`).
//! Resolution tries, in order:
//!   1. absolute identifiers as-is
//!   2. `./` or `../` identifiers joined to the root
//!   3. the package directory reported by `go list` (one batched call)
//!   4. stripping the module path or its last segment, then progressively
//!      shorter suffixes of the identifier joined to the root
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{CoverageError, Result};
use crate::model::Profile;

/// Default time allowed for the package lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Module descriptor
// ---------------------------------------------------------------------------

/// The `module` directive of the root's `go.mod`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Full module path, e.g. `github.com/user/project`.
    pub path: String,
    /// Last segment of the module path, e.g. `project`.
    pub base: String,
}

impl ModuleInfo {
    /// Read `go.mod` under `root`. A missing or unreadable file gives an
    /// empty descriptor.
    pub fn load(root: &Path) -> Self {
        std::fs::read_to_string(root.join("go.mod"))
            .map(|content| Self::parse(&content))
            .unwrap_or_default()
    }

    pub fn parse(content: &str) -> Self {
        for line in content.lines() {
            let line = line.split("//").next().unwrap_or("").trim();
            let Some(rest) = line.strip_prefix("module") else {
                continue;
            };
            if !rest.starts_with(char::is_whitespace) {
                continue;
            }
            let path = rest.trim().trim_matches(|c: char| c == '"' || c == '`');
            if path.is_empty() {
                continue;
            }
            let base = path.rsplit('/').next().unwrap_or(path);
            return Self {
                path: path.to_string(),
                base: base.to_string(),
            };
        }
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Package lookup
// ---------------------------------------------------------------------------

/// One package as reported by `go list -json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Package {
    pub import_path: String,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub error: Option<PackageError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PackageError {
    pub err: String,
}

/// A source of package metadata. Called at most once per report with every
/// distinct package directory that needs resolving.
pub trait PackageLookup {
    /// Resolve import-path directories to packages, keyed by import path.
    fn lookup(&self, root: &Path, dirs: &[String]) -> Result<HashMap<String, Package>>;
}

/// Package lookup through `go list -e -json`.
pub struct GoList {
    /// The `go` binary to run.
    pub program: PathBuf,
    /// How long to wait before giving up on the command.
    pub timeout: Duration,
}

impl Default for GoList {
    fn default() -> Self {
        Self {
            program: PathBuf::from("go"),
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl PackageLookup for GoList {
    fn lookup(&self, root: &Path, dirs: &[String]) -> Result<HashMap<String, Package>> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("list").arg("-e").arg("-json").args(dirs).current_dir(root);

        let (status, stdout, stderr) = run_with_timeout(cmd, self.timeout)
            .map_err(|e| CoverageError::ResolverUnavailable(format!("cannot run go list: {e}")))?;

        if !status.success() {
            let message = String::from_utf8_lossy(&stderr);
            let message = message.trim();
            return Err(CoverageError::ResolverUnavailable(if message.is_empty() {
                format!("go list failed: {status}")
            } else {
                format!("go list failed: {status}: {message}")
            }));
        }

        decode_packages(&stdout)
    }
}

/// Lookup that knows no packages. Used when package resolution is disabled.
pub struct NoLookup;

impl PackageLookup for NoLookup {
    fn lookup(&self, _root: &Path, _dirs: &[String]) -> Result<HashMap<String, Package>> {
        Ok(HashMap::new())
    }
}

/// Decode the stream of concatenated JSON objects `go list -json` prints.
fn decode_packages(stdout: &[u8]) -> Result<HashMap<String, Package>> {
    let mut packages = HashMap::new();
    for package in serde_json::Deserializer::from_slice(stdout).into_iter::<Package>() {
        let package = package.map_err(|e| {
            CoverageError::ResolverUnavailable(format!("decoding go list json: {e}"))
        })?;
        packages.insert(package.import_path.clone(), package);
    }
    Ok(packages)
}

/// Run a command to completion, killing it once `timeout` elapses.
fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
) -> std::io::Result<(std::process::ExitStatus, Vec<u8>, Vec<u8>)> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes on their own threads so a chatty child never blocks.
    let stdout_reader = spawn_drain(child.stdout.take());
    let stderr_reader = spawn_drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let timed_out = || {
        std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("timed out after {:.1}s", timeout.as_secs_f64()),
        )
    };
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(timed_out());
        }
        thread::sleep(Duration::from_millis(20));
    };

    // A grandchild can inherit the pipes and keep them open after the child
    // exits, so the readers get only what is left of the deadline.
    let collect = |reader: mpsc::Receiver<Vec<u8>>| {
        reader
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|_| timed_out())
    };
    let stdout = collect(stdout_reader)?;
    let stderr = collect(stderr_reader)?;
    Ok((status, stdout, stderr))
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(drain(pipe));
    });
    rx
}

fn drain(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Directory part of a slash-separated identifier (`.` when there is none).
fn dir_of(name: &str) -> &str {
    match name.rsplit_once('/') {
        Some((dir, _)) if !dir.is_empty() => dir,
        Some(_) => "/",
        None => ".",
    }
}

fn base_of(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Convert a slash-separated relative path to a native path.
fn from_slash(path: &str) -> PathBuf {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn needs_package_lookup(name: &str) -> bool {
    !name.starts_with('.') && !Path::new(name).is_absolute()
}

/// Distinct package directories of every identifier that needs a lookup,
/// in first-seen order.
#[must_use]
pub fn package_dirs(profiles: &[Profile]) -> Vec<String> {
    let mut dirs: Vec<String> = Vec::new();
    for profile in profiles {
        let name = profile.file_name.as_str();
        if !needs_package_lookup(name) {
            continue;
        }
        let dir = dir_of(name);
        if !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_string());
        }
    }
    dirs
}

/// Resolves profile identifiers against a root directory.
#[derive(Debug)]
pub struct FileResolver {
    root: PathBuf,
    module: ModuleInfo,
    packages: HashMap<String, Package>,
}

impl FileResolver {
    /// Build a resolver for `profiles`, performing the single package lookup
    /// up front. No lookup happens when no identifier needs one.
    pub fn new(root: &Path, profiles: &[Profile], lookup: &dyn PackageLookup) -> Result<Self> {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let dirs = package_dirs(profiles);
        let packages = if dirs.is_empty() {
            HashMap::new()
        } else {
            lookup.lookup(&root, &dirs)?
        };

        Ok(Self {
            module: ModuleInfo::load(&root),
            root,
            packages,
        })
    }

    /// Build a resolver from already known parts.
    pub fn with_packages(
        root: impl Into<PathBuf>,
        module: ModuleInfo,
        packages: HashMap<String, Package>,
    ) -> Self {
        Self {
            root: root.into(),
            module,
            packages,
        }
    }

    /// Returns `(source_path, relative_path)`. When nothing matches, the
    /// result is a best guess under the root that will fail to read.
    pub fn resolve(&self, file_name: &str) -> (PathBuf, PathBuf) {
        let path = Path::new(file_name);
        if path.is_absolute() {
            return (path.to_path_buf(), path.to_path_buf());
        }

        if file_name.starts_with('.') {
            let relative = from_slash(file_name);
            let candidate = self.root.join(&relative);
            if candidate.is_file() {
                return (candidate, relative);
            }
        }

        if let Some(found) = self.resolve_from_packages(file_name) {
            return found;
        }

        self.resolve_by_module_fallback(file_name)
    }

    fn resolve_from_packages(&self, file_name: &str) -> Option<(PathBuf, PathBuf)> {
        let package = self.packages.get(dir_of(file_name))?;
        if package.dir.is_empty() || package.error.is_some() {
            return None;
        }

        let candidate = Path::new(&package.dir).join(base_of(file_name));
        if !candidate.is_file() {
            return None;
        }

        let relative = candidate
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| candidate.clone());
        Some((candidate, relative))
    }

    fn resolve_by_module_fallback(&self, file_name: &str) -> (PathBuf, PathBuf) {
        let relative = from_slash(file_name);
        let guess = self.root.join(&relative);
        if guess.is_file() {
            return (guess, relative);
        }

        for prefix in [&self.module.path, &self.module.base] {
            if prefix.is_empty() {
                continue;
            }
            if let Some(trimmed) = file_name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                let trimmed = from_slash(trimmed);
                let candidate = self.root.join(&trimmed);
                if candidate.is_file() {
                    return (candidate, trimmed);
                }
            }
        }

        if let Some(found) = self.resolve_by_suffix(file_name) {
            return found;
        }

        (guess, relative)
    }

    /// Drop one leading segment at a time until a file under the root matches.
    fn resolve_by_suffix(&self, file_name: &str) -> Option<(PathBuf, PathBuf)> {
        let parts: Vec<&str> = file_name.split('/').collect();
        (1..parts.len()).find_map(|index| {
            let relative = from_slash(&parts[index..].join("/"));
            if relative.as_os_str().is_empty() {
                return None;
            }
            let candidate = self.root.join(&relative);
            candidate.is_file().then_some((candidate, relative))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mode;
    use std::cell::RefCell;

    fn profiles(names: &[&str]) -> Vec<Profile> {
        names
            .iter()
            .map(|n| Profile::new(n.to_string(), Mode::Set))
            .collect()
    }

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "package x\n").unwrap();
        path
    }

    /// Records every call and answers from a fixed table.
    struct FakeLookup {
        calls: RefCell<Vec<Vec<String>>>,
        packages: HashMap<String, Package>,
    }

    impl FakeLookup {
        fn new(packages: &[(&str, PathBuf)]) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                packages: packages
                    .iter()
                    .map(|(import, dir)| {
                        (
                            import.to_string(),
                            Package {
                                import_path: import.to_string(),
                                dir: dir.to_string_lossy().into_owned(),
                                error: None,
                            },
                        )
                    })
                    .collect(),
            }
        }
    }

    impl PackageLookup for FakeLookup {
        fn lookup(&self, _root: &Path, dirs: &[String]) -> Result<HashMap<String, Package>> {
            self.calls.borrow_mut().push(dirs.to_vec());
            Ok(self.packages.clone())
        }
    }

    struct FailingLookup;

    impl PackageLookup for FailingLookup {
        fn lookup(&self, _root: &Path, _dirs: &[String]) -> Result<HashMap<String, Package>> {
            Err(CoverageError::ResolverUnavailable("boom".to_string()))
        }
    }

    #[test]
    fn test_module_info_parse() {
        let info = ModuleInfo::parse("// comment\nmodule github.com/user/project // trailing\n\ngo 1.22\n");
        assert_eq!(info.path, "github.com/user/project");
        assert_eq!(info.base, "project");

        let quoted = ModuleInfo::parse("module \"example.com/m\"\n");
        assert_eq!(quoted.path, "example.com/m");
        assert_eq!(quoted.base, "m");

        assert_eq!(ModuleInfo::parse("go 1.22\n"), ModuleInfo::default());
        assert_eq!(ModuleInfo::parse("modules x\n"), ModuleInfo::default());
    }

    #[test]
    fn test_module_info_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ModuleInfo::load(dir.path()), ModuleInfo::default());
    }

    #[test]
    fn test_package_dirs_are_distinct_and_skip_local_names() {
        let dirs = package_dirs(&profiles(&[
            "example.com/m/a/x.go",
            "example.com/m/a/y.go",
            "./local/z.go",
            "/abs/w.go",
            "example.com/m/b/x.go",
            "top.go",
        ]));
        assert_eq!(dirs, vec!["example.com/m/a", "example.com/m/b", "."]);
    }

    #[test]
    fn test_absolute_identifier_returned_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FileResolver::new(dir.path(), &[], &NoLookup).unwrap();
        let (source, relative) = resolver.resolve("/nowhere/x.go");
        assert_eq!(source, PathBuf::from("/nowhere/x.go"));
        assert_eq!(relative, PathBuf::from("/nowhere/x.go"));
    }

    #[test]
    fn test_dot_relative_identifier() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "pkg/a.go");
        let resolver = FileResolver::new(dir.path(), &[], &NoLookup).unwrap();
        let (source, relative) = resolver.resolve("./pkg/a.go");
        assert!(source.is_file());
        assert_eq!(relative, PathBuf::from(".").join("pkg").join("a.go"));
    }

    #[test]
    fn test_package_lookup_is_batched_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        touch(&root, "internal/a/x.go");
        touch(&root, "internal/a/y.go");
        touch(&root, "b/z.go");

        let lookup = FakeLookup::new(&[
            ("example.com/m/internal/a", root.join("internal/a")),
            ("example.com/m/b", root.join("b")),
        ]);
        let names = [
            "example.com/m/internal/a/x.go",
            "example.com/m/internal/a/y.go",
            "example.com/m/b/z.go",
        ];
        let resolver = FileResolver::new(&root, &profiles(&names), &lookup).unwrap();

        let calls = lookup.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["example.com/m/internal/a", "example.com/m/b"]);

        let (source, relative) = resolver.resolve(names[0]);
        assert_eq!(source, root.join("internal/a/x.go"));
        assert_eq!(relative, PathBuf::from("internal/a/x.go"));
        let (_, relative) = resolver.resolve(names[2]);
        assert_eq!(relative, PathBuf::from("b/z.go"));
    }

    #[test]
    fn test_no_lookup_when_nothing_needs_it() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = FakeLookup::new(&[]);
        FileResolver::new(dir.path(), &profiles(&["./a.go", "/b/c.go"]), &lookup).unwrap();
        assert!(lookup.calls.borrow().is_empty());
    }

    #[test]
    fn test_lookup_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileResolver::new(dir.path(), &profiles(&["example.com/m/a.go"]), &FailingLookup)
            .unwrap_err();
        assert!(matches!(err, CoverageError::ResolverUnavailable(_)));
    }

    #[test]
    fn test_package_with_error_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        touch(&root, "a/x.go");

        let mut packages = HashMap::new();
        packages.insert(
            "example.com/m/a".to_string(),
            Package {
                import_path: "example.com/m/a".to_string(),
                dir: "/somewhere/else".to_string(),
                error: Some(PackageError {
                    err: "cannot find package".to_string(),
                }),
            },
        );
        let module = ModuleInfo::parse("module example.com/m\n");
        let resolver = FileResolver::with_packages(&root, module, packages);
        let (source, relative) = resolver.resolve("example.com/m/a/x.go");
        assert_eq!(source, root.join("a/x.go"));
        assert_eq!(relative, PathBuf::from("a/x.go"));
    }

    #[test]
    fn test_module_path_and_base_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "pkg/x.go");
        let module = ModuleInfo::parse("module github.com/user/project\n");
        let resolver = FileResolver::with_packages(root, module, HashMap::new());

        let (_, relative) = resolver.resolve("github.com/user/project/pkg/x.go");
        assert_eq!(relative, PathBuf::from("pkg/x.go"));
        let (_, relative) = resolver.resolve("project/pkg/x.go");
        assert_eq!(relative, PathBuf::from("pkg/x.go"));
    }

    #[test]
    fn test_root_relative_identifier() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "cmd/tool/main.go");
        let resolver = FileResolver::with_packages(dir.path(), ModuleInfo::default(), HashMap::new());
        let (source, relative) = resolver.resolve("cmd/tool/main.go");
        assert!(source.is_file());
        assert_eq!(relative, PathBuf::from("cmd/tool/main.go"));
    }

    #[test]
    fn test_suffix_fallback() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "service/handler.go");
        let resolver = FileResolver::with_packages(dir.path(), ModuleInfo::default(), HashMap::new());
        let (source, relative) = resolver.resolve("gitlab.com/org/monorepo/service/handler.go");
        assert_eq!(source, dir.path().join("service/handler.go"));
        assert_eq!(relative, PathBuf::from("service/handler.go"));
    }

    #[test]
    fn test_unresolvable_returns_best_guess() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FileResolver::with_packages(dir.path(), ModuleInfo::default(), HashMap::new());
        let (source, relative) = resolver.resolve("example.com/m/gone.go");
        assert_eq!(source, dir.path().join("example.com/m/gone.go"));
        assert_eq!(relative, PathBuf::from("example.com/m/gone.go"));
        assert!(!source.exists());
    }

    #[test]
    fn test_decode_packages_stream() {
        let stdout = br#"{
            "Dir": "/src/m/a",
            "ImportPath": "example.com/m/a",
            "Name": "a"
        }
        {
            "ImportPath": "example.com/m/missing",
            "Error": { "Err": "no such package" }
        }"#;
        let packages = decode_packages(stdout).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages["example.com/m/a"].dir, "/src/m/a");
        assert!(packages["example.com/m/missing"].error.is_some());
        assert!(packages["example.com/m/missing"].dir.is_empty());
    }

    #[test]
    fn test_decode_packages_invalid_json() {
        let err = decode_packages(b"{ not json").unwrap_err();
        assert!(matches!(err, CoverageError::ResolverUnavailable(_)));
    }

    #[test]
    fn test_go_list_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = GoList {
            program: PathBuf::from("definitely-not-a-go-binary"),
            timeout: Duration::from_secs(5),
        };
        let err = lookup
            .lookup(dir.path(), &["example.com/m".to_string()])
            .unwrap_err();
        assert!(matches!(err, CoverageError::ResolverUnavailable(_)));
    }

    // `sh list -e -json ...` runs the script named `list` in the root, which
    // lets a shell script stand in for the go toolchain.
    #[cfg(unix)]
    fn fake_go(root: &Path, script: &str) -> GoList {
        std::fs::write(root.join("list"), script).unwrap();
        GoList {
            program: PathBuf::from("sh"),
            timeout: Duration::from_secs(10),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_go_list_decodes_output() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = fake_go(
            dir.path(),
            "echo '{\"ImportPath\": \"example.com/m/a\", \"Dir\": \"/src/a\"}'\n\
             echo '{\"ImportPath\": \"example.com/m/b\", \"Dir\": \"/src/b\"}'\n",
        );
        let packages = lookup
            .lookup(dir.path(), &["example.com/m/a".to_string(), "example.com/m/b".to_string()])
            .unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages["example.com/m/b"].dir, "/src/b");
    }

    #[cfg(unix)]
    #[test]
    fn test_go_list_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = fake_go(dir.path(), "echo 'go: not in a module' >&2\nexit 1\n");
        let err = lookup.lookup(dir.path(), &["x".to_string()]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("not in a module"), "message: {}", message);
    }

    #[cfg(unix)]
    #[test]
    fn test_go_list_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut lookup = fake_go(dir.path(), "exec sleep 5\n");
        lookup.timeout = Duration::from_millis(200);
        let started = Instant::now();
        let err = lookup.lookup(dir.path(), &["x".to_string()]).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(err.to_string().contains("timed out"), "error: {}", err);
    }

    #[cfg(unix)]
    #[test]
    fn test_go_list_output_held_open_by_background_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut lookup = fake_go(dir.path(), "sleep 5 &
exit 0
");
        lookup.timeout = Duration::from_millis(500);
        let started = Instant::now();
        let err = lookup.lookup(dir.path(), &["x".to_string()]).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(err.to_string().contains("timed out"), "error: {}", err);
    }
}
