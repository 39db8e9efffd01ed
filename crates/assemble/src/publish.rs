use crate::Assembly;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::instrument;

/// A deliverable in its final location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Hex-encoded BLAKE3 digest of the file's contents.
    pub blake3: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub pdf: PublishedFile,
    pub epub: PublishedFile,
}

/// A deliverable copied next to its destination, not yet renamed into place.
struct Staged {
    temp: NamedTempFile,
    target: PathBuf,
    size: u64,
    blake3: String,
}
impl Staged {
    fn new(source: &Path, target: PathBuf) -> Result<Self> {
        let directory = target.parent().map(Path::to_path_buf).unwrap_or_default();
        std::fs::create_dir_all(&directory).or_raise(|| ErrorKind::Io(directory.clone()))?;
        let mut temp = NamedTempFile::new_in(&directory).or_raise(|| ErrorKind::Io(directory.clone()))?;
        let mut reader = BufReader::new(File::open(source).or_raise(|| ErrorKind::Io(source.to_path_buf()))?);
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0; 64 * 1024];
        let mut size = 0;
        loop {
            let read = reader.read(&mut buffer).or_raise(|| ErrorKind::Io(source.to_path_buf()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            temp.write_all(&buffer[..read]).or_raise(|| ErrorKind::Io(temp.path().to_path_buf()))?;
            size += read as u64;
        }
        temp.as_file().sync_all().or_raise(|| ErrorKind::Io(temp.path().to_path_buf()))?;
        Ok(Self { temp, target, size, blake3: hasher.finalize().to_hex().to_string() })
    }

    fn persist(self) -> Result<PublishedFile> {
        let Self { temp, target, size, blake3 } = self;
        temp.persist(&target).or_raise(|| ErrorKind::Publish(target.clone()))?;
        Ok(PublishedFile { path: target, size, blake3 })
    }
}

/// Moves a verified pair into `destination` as `<stem>.pdf` and `<stem>.epub`.
///
/// Both files are first copied to temporary files in their final directory,
/// then renamed into place. If the second rename fails the first file is
/// removed again, so a subject ends up with both deliverables or neither.
#[instrument(skip_all, fields(destination = %destination.display(), stem = stem))]
pub fn publish(assembly: &Assembly, destination: &Path, stem: &str) -> Result<Published> {
    let pdf = Staged::new(&assembly.pdf, destination.join(format!("{stem}.pdf")))?;
    let epub = Staged::new(&assembly.epub, destination.join(format!("{stem}.epub")))?;
    let pdf = pdf.persist()?;
    let epub = match epub.persist() {
        Ok(epub) => epub,
        Err(err) => {
            if let Err(cleanup) = std::fs::remove_file(&pdf.path) {
                tracing::warn!(path = %pdf.path.display(), error = %cleanup, "Could not withdraw published PDF");
            }
            return Err(err);
        },
    };
    tracing::info!(pdf = %pdf.path.display(), epub = %epub.path.display(), "Deliverables published");
    Ok(Published { pdf, epub })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembly(dir: &Path) -> Assembly {
        let (pdf, epub) = (dir.join("deliverable.pdf"), dir.join("deliverable.epub"));
        std::fs::write(&pdf, b"%PDF-1.7 fake").unwrap();
        std::fs::write(&epub, b"PK fake").unwrap();
        Assembly { pdf, epub, pages: 1, sections: 1 }
    }

    #[test]
    fn publishes_both_with_checksums() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let published = publish(&assembly(scratch.path()), &out.path().join("nested"), "biologia").unwrap();

        assert_eq!(published.pdf.path, out.path().join("nested/biologia.pdf"));
        assert_eq!(std::fs::read(&published.pdf.path).unwrap(), b"%PDF-1.7 fake");
        assert_eq!(published.pdf.size, 13);
        assert_eq!(published.pdf.blake3, blake3::hash(b"%PDF-1.7 fake").to_hex().to_string());
        assert_eq!(published.epub.path, out.path().join("nested/biologia.epub"));
        assert_eq!(published.epub.blake3, blake3::hash(b"PK fake").to_hex().to_string());

        let names: Vec<_> = std::fs::read_dir(out.path().join("nested")).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names.len(), 2, "no temporary files are left behind");
    }

    #[test]
    fn replaces_previous_deliverables() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(out.path().join("s.pdf"), b"old").unwrap();
        publish(&assembly(scratch.path()), out.path(), "s").unwrap();
        assert_eq!(std::fs::read(out.path().join("s.pdf")).unwrap(), b"%PDF-1.7 fake");
    }

    #[test]
    fn failed_second_rename_withdraws_the_first() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        // A non-empty directory where the EPUB should go cannot be replaced.
        std::fs::create_dir_all(out.path().join("s.epub/occupied")).unwrap();
        let err = publish(&assembly(scratch.path()), out.path(), "s").unwrap_err();
        assert_eq!(*err, ErrorKind::Publish(out.path().join("s.epub")));
        assert!(!out.path().join("s.pdf").exists());
    }

    #[test]
    fn missing_source_publishes_nothing() {
        let scratch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut assembly = assembly(scratch.path());
        assembly.epub = scratch.path().join("gone.epub");
        let err = publish(&assembly, out.path(), "s").unwrap_err();
        assert!(matches!(*err, ErrorKind::Io(_)));
        assert!(!out.path().join("s.pdf").exists());
    }
}
