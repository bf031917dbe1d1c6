//! Atomic replacement of runtime files.

use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

/// Replaces `path` with `contents` so readers never see a partial write.
///
/// The payload is written to a sibling temporary file, synced, and renamed
/// over the target. On Unix the file is readable by the owner only.
pub(super) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("'{}' has no parent directory", path.display()),
        )
    })?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("ddbusd"),
    );
    builder.suffix(".tmp");
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn replaces_existing_contents_without_leftovers() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("ddbusd.health");
        fs::write(&path, b"old").expect("seed file");

        atomic_write(&path, b"{\"status\":\"ready\"}\n").expect("atomic write");

        assert_eq!(
            fs::read_to_string(&path).expect("read back"),
            "{\"status\":\"ready\"}\n"
        );
        let entries = fs::read_dir(dir.path()).expect("list dir").count();
        assert_eq!(entries, 1);
    }

    #[cfg(unix)]
    #[test]
    fn written_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("ddbusd.pid");
        atomic_write(&path, b"42\n").expect("atomic write");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn rejects_paths_without_a_parent() {
        let error = atomic_write(Path::new(""), b"x").expect_err("no parent");
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
