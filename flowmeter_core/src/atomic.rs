//! Crash-safe file replacement: write a sibling temp file, fsync, rename.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use eyre::WrapErr;

use crate::error::Result;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Stream into `path` through `write`. The target is either the previous file
/// or the complete new one; the temp file is removed on failure.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp = tmp_path(path);
    let res = (|| {
        let file =
            File::create(&tmp).wrap_err_with(|| format!("create {}", tmp.display()))?;
        let mut w = BufWriter::new(file);
        write(&mut w)?;
        let file = w
            .into_inner()
            .map_err(std::io::IntoInnerError::into_error)
            .wrap_err("flush temp file")?;
        file.sync_all().wrap_err("sync temp file")?;
        fs::rename(&tmp, path).wrap_err_with(|| format!("rename onto {}", path.display()))
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}
