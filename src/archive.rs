//! Tar plumbing for the judge wire format: `.tgz` part archives and the
//! plain `task.tar` that bundles them.

use std::{
    fs::{self, File},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};

/// Compress the contents of `dir` into a gzipped tar at `dest`.
///
/// Entries are stored relative to `dir`, so unpacking recreates the
/// directory contents, not the directory itself.
pub fn create_tar_gz_from_dir(dir: &Path, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("failed to create archive {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(".", dir)
        .with_context(|| format!("failed to archive directory {}", dir.display()))?;
    let encoder = builder
        .into_inner()
        .with_context(|| format!("failed to finish archive {}", dest.display()))?;
    encoder
        .finish()
        .with_context(|| format!("failed to finish compression of {}", dest.display()))?;
    Ok(())
}

/// Build a gzipped tar at `dest` from in-memory files.
pub fn create_tar_gz(dest: &Path, files: &[(String, Vec<u8>)]) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("failed to create archive {}", dest.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, contents.as_slice())
            .with_context(|| format!("failed to add {name} to {}", dest.display()))?;
    }
    let encoder = builder
        .into_inner()
        .with_context(|| format!("failed to finish archive {}", dest.display()))?;
    encoder
        .finish()
        .with_context(|| format!("failed to finish compression of {}", dest.display()))?;
    Ok(())
}

/// Create a plain (uncompressed) tar at `dest` from files that live
/// directly under `dir`, stored under their bare names.
pub fn create_tar(dest: &Path, dir: &Path, members: &[&str]) -> Result<()> {
    let file = File::create(dest)
        .with_context(|| format!("failed to create archive {}", dest.display()))?;
    let mut builder = tar::Builder::new(file);
    for member in members {
        builder
            .append_path_with_name(dir.join(member), member)
            .with_context(|| format!("failed to add {member} to {}", dest.display()))?;
    }
    builder
        .finish()
        .with_context(|| format!("failed to finish archive {}", dest.display()))?;
    Ok(())
}

/// Unpack a gzipped tar into `dest`, creating the directory first.
pub fn extract_tar_gz(path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create directory {}", dest.display()))?;
    let file =
        File::open(path).with_context(|| format!("failed to open archive {}", path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .unpack(dest)
        .with_context(|| format!("failed to unpack {} into {}", path.display(), dest.display()))?;
    Ok(())
}

/// List the entry names of a plain tar file.
pub fn tar_entry_names(path: &Path) -> Result<Vec<String>> {
    let file =
        File::open(path).with_context(|| format!("failed to open archive {}", path.display()))?;
    let mut archive = tar::Archive::new(file);
    let mut names = Vec::new();
    for entry in archive
        .entries()
        .with_context(|| format!("failed to read entries of {}", path.display()))?
    {
        let entry = entry
            .with_context(|| format!("failed to read an entry of {}", path.display()))?;
        names.push(entry.path()?.to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tar_gz_from_memory_round_trips() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("submission.tgz");
        let files = vec![
            ("program.cc".to_string(), b"int main() {}\n".to_vec()),
            ("submission.yml".to_string(), b"compiler_id: G++\n".to_vec()),
        ];
        create_tar_gz(&archive, &files).unwrap();

        let out = dir.path().join("out");
        extract_tar_gz(&archive, &out).unwrap();
        assert_eq!(
            fs::read(out.join("program.cc")).unwrap(),
            b"int main() {}\n"
        );
        assert_eq!(
            fs::read_to_string(out.join("submission.yml")).unwrap(),
            "compiler_id: G++\n"
        );
    }

    #[test]
    fn tar_gz_from_dir_stores_relative_entries() {
        let dir = TempDir::new().unwrap();
        let payload = dir.path().join("problem");
        fs::create_dir_all(payload.join("data")).unwrap();
        fs::write(payload.join("solution.cc"), "// solution").unwrap();
        fs::write(payload.join("data").join("input.txt"), "1 2").unwrap();

        let archive = dir.path().join("problem.tgz");
        create_tar_gz_from_dir(&payload, &archive).unwrap();

        let out = dir.path().join("out");
        extract_tar_gz(&archive, &out).unwrap();
        assert!(out.join("solution.cc").exists());
        assert!(out.join("data").join("input.txt").exists());
    }

    #[test]
    fn plain_tar_keeps_bare_member_names() {
        let dir = TempDir::new().unwrap();
        for part in ["driver.tgz", "problem.tgz", "submission.tgz"] {
            fs::write(dir.path().join(part), part).unwrap();
        }
        let task = dir.path().join("task.tar");
        create_tar(&task, dir.path(), &["driver.tgz", "problem.tgz", "submission.tgz"]).unwrap();

        let names = tar_entry_names(&task).unwrap();
        assert_eq!(names, vec!["driver.tgz", "problem.tgz", "submission.tgz"]);
    }

    #[test]
    fn extracting_garbage_fails() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("correction.tgz");
        fs::write(&bogus, b"this is not a tarball").unwrap();
        assert!(extract_tar_gz(&bogus, &dir.path().join("out")).is_err());
    }
}
