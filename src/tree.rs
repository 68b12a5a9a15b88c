//! Directory/file tree with coverage rolled up from files to directories.
//!
//! The tree is assembled in an arena of entries addressed by index, summed
//! bottom-up once, and then frozen into owned `TreeNode`s.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use crate::model::{Coverage, NodeKind, ResolvedFile, TreeNode};

const ROOT: usize = 0;

#[derive(Default)]
struct Entry {
    name: String,
    path: String,
    dirs: BTreeMap<String, usize>,
    /// `(name, index into the file list)` in insertion order.
    files: Vec<(String, usize)>,
    coverage: Coverage,
}

/// Path segments of a relative path. `..` is kept as its own segment.
fn segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => None,
        })
        .collect()
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Build the tree for `files`, returning the children of the report root.
#[must_use]
pub fn build_tree(files: &[ResolvedFile]) -> Vec<TreeNode> {
    let mut arena = vec![Entry::default()];

    for (file_index, file) in files.iter().enumerate() {
        let mut parts = segments(&file.relative_path);
        if parts.is_empty() {
            parts = file
                .name
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        let file_name = parts.pop().unwrap_or_else(|| file.name.clone());

        let mut current = ROOT;
        for part in parts {
            current = match arena[current].dirs.get(&part) {
                Some(&child) => child,
                None => {
                    let child = arena.len();
                    let path = join(&arena[current].path, &part);
                    arena.push(Entry {
                        name: part.clone(),
                        path,
                        ..Entry::default()
                    });
                    arena[current].dirs.insert(part, child);
                    child
                }
            };
        }
        arena[current].files.push((file_name, file_index));
    }

    aggregate(&mut arena, ROOT, files);
    freeze(&arena, ROOT, files)
}

/// Sum file coverage into every directory, children before parents.
fn aggregate(arena: &mut [Entry], index: usize, files: &[ResolvedFile]) -> Coverage {
    let children: Vec<usize> = arena[index].dirs.values().copied().collect();
    let mut coverage: Coverage = children
        .into_iter()
        .map(|child| aggregate(arena, child, files))
        .sum();
    coverage += arena[index]
        .files
        .iter()
        .map(|&(_, file)| files[file].coverage)
        .sum::<Coverage>();
    arena[index].coverage = coverage;
    coverage
}

/// Convert an entry's children to nodes: directories first, then files,
/// each sorted by name.
fn freeze(arena: &[Entry], index: usize, files: &[ResolvedFile]) -> Vec<TreeNode> {
    let entry = &arena[index];
    let mut nodes: Vec<TreeNode> = entry
        .dirs
        .values()
        .map(|&child| {
            let dir = &arena[child];
            TreeNode {
                name: dir.name.clone(),
                path: dir.path.clone(),
                coverage: dir.coverage,
                kind: NodeKind::Directory {
                    children: freeze(arena, child, files),
                },
            }
        })
        .collect();

    let mut file_entries: Vec<&(String, usize)> = entry.files.iter().collect();
    file_entries.sort_by(|a, b| a.0.cmp(&b.0));
    nodes.extend(file_entries.into_iter().map(|(name, file_index)| {
        let file = &files[*file_index];
        let relative_path = file.relative_path.to_string_lossy().replace('\\', "/");
        TreeNode {
            name: name.clone(),
            path: join(&entry.path, name),
            coverage: file.coverage,
            kind: NodeKind::File {
                relative_path: if relative_path.is_empty() {
                    join(&entry.path, name)
                } else {
                    relative_path
                },
                anchor: file.anchor.clone(),
                file_index: *file_index,
            },
        }
    }));

    nodes
}
