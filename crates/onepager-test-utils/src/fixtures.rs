use tempfile::TempDir;

/// A temporary data directory holding one small file per name.
pub fn data_dir(names: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {}", e));
    for name in names {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("fixture content for {}\n", name))
            .unwrap_or_else(|e| panic!("write {}: {}", path.display(), e));
    }
    dir
}
