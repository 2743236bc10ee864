use std::path::PathBuf;

use kos_core::Kind;

/// `<root>/<kind>s/<namespace>/<name>.json`; cluster-scoped kinds drop the
/// namespace segment, per the on-disk layout in the external interfaces
/// section.
pub fn object_path(root: &std::path::Path, kind: Kind, namespace: Option<&str>, name: &str) -> PathBuf {
    let mut path = root.join(kind.dir_name());
    if !kind.cluster_scoped() {
        if let Some(ns) = namespace {
            path = path.join(ns);
        }
    }
    path.join(format!("{name}.json"))
}

pub fn namespace_dir(root: &std::path::Path, kind: Kind, namespace: Option<&str>) -> PathBuf {
    let mut path = root.join(kind.dir_name());
    if !kind.cluster_scoped() {
        if let Some(ns) = namespace {
            path = path.join(ns);
        }
    }
    path
}

pub fn kind_dir(root: &std::path::Path, kind: Kind) -> PathBuf {
    root.join(kind.dir_name())
}

/// Sibling directory for a Secret's binary values: `<name>_data/<key>`.
pub fn secret_data_dir(root: &std::path::Path, namespace: Option<&str>, name: &str) -> PathBuf {
    let mut path = root.join(Kind::Secret.dir_name());
    if let Some(ns) = namespace {
        path = path.join(ns);
    }
    path.join(format!("{name}_data"))
}
