//! Lexical path resolution shared by the kernels.

/// Resolve `path` against the working directory `cwd`.
///
/// The result is absolute and normalized: `.` components vanish and `..` drops the
/// previous component without ever climbing above `/`. Nothing is looked up.
pub fn absolute(cwd: &str, path: &str) -> String {
    let base = if path.starts_with('/') { "" } else { cwd };
    let mut components: Vec<&str> = Vec::new();
    for component in base.split('/').chain(path.split('/')) {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            name => components.push(name),
        }
    }
    if components.is_empty() {
        return "/".to_string();
    }
    components.iter().fold(String::new(), |mut out, name| {
        out.push('/');
        out.push_str(name);
        out
    })
}

/// Split an absolute normalized path into its parent and final component.
/// `None` for the root.
pub fn split_last(path: &str) -> Option<(&str, &str)> {
    let (parent, name) = path.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

/// Iterate the components of an absolute normalized path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}
