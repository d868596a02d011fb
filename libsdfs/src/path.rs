// Remote path helpers shared by the backends.

use nix::errno::Errno;

/// Collapses duplicate separators and forces a leading `/`.
///
/// `.` segments are dropped; `..` is rejected so no backend can be walked out
/// of its namespace.
pub(crate) fn normalize(path: &str) -> Result<String, Errno> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(Errno::EINVAL),
            p => parts.push(p),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Splits a normalized path into its parent directory and leaf name.
pub(crate) fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(n) => (&path[..n], &path[n + 1..]),
        None => ("/", path),
    }
}

/// Joins a normalized directory with a child name.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Whether `path` lies strictly below `dir`.
pub(crate) fn is_descendant(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path != "/";
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}
