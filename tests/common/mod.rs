use std::path::Path;
use tempfile::TempDir;

/// Create a temporary Go module rooted at the returned directory, with a
/// `go.mod` declaring `module_path` and one file per `(relative path, contents)`.
/// The caller must hold onto `TempDir` to keep the directory alive.
pub fn setup_module(module_path: &str, files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("go.mod"),
        format!("module {module_path}\n\ngo 1.22\n"),
    )
    .unwrap();
    for (relative, contents) in files {
        write_file(dir.path(), relative, contents);
    }
    dir
}

pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}
