//! Random access to the members of a zip package held in memory.
//!
//! Nothing in this module touches the filesystem: members are decompressed on
//! demand into owned buffers, one at a time, and dropped by the caller once
//! they have been rendered.

pub mod error;

use crate::archive::error::{ErrorKind, Result};
use crate::fetch::PackageBuffer;
use crate::path;
use exn::{OptionExt, ResultExt};
use lectern_manifest::Resource;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::slice::Iter;
use tracing::instrument;
use zip::ZipArchive;

/// Name and uncompressed size of one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub size: u64,
}

/// One decompressed archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Normalized member name.
    pub name: String,
    pub size: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct Member {
    index: usize,
    size: u64,
}

pub struct Package {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    members: BTreeMap<String, Member>,
    limit: u64,
}

impl Package {
    /// Opens a package buffer as a zip archive and indexes its members.
    ///
    /// `limit` is the per-entry memory ceiling: members whose uncompressed
    /// size is larger are refused when read.
    #[instrument(skip_all, fields(bytes = buffer.len()))]
    pub fn open(buffer: PackageBuffer, limit: u64) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(buffer.into_inner())).or_raise(|| ErrorKind::Malformed)?;
        let mut members = BTreeMap::new();
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).or_raise(|| ErrorKind::Malformed)?;
            if file.is_dir() {
                continue;
            }
            let name = match path::normalize(file.name()) {
                Ok(name) => name,
                Err(err) => {
                    tracing::warn!(name = file.name(), error = %*err, "Skipping archive member with unusable name");
                    continue;
                },
            };
            if members.contains_key(&name) {
                tracing::warn!(name = %name, "Duplicate archive member after normalization; keeping the first");
                continue;
            }
            members.insert(name, Member { index, size: file.size() });
        }
        tracing::debug!(members = members.len(), "Package opened");
        Ok(Self { archive, members, limit })
    }

    /// Every file member (directories omitted), sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = EntryInfo> + '_ {
        self.members.iter().map(|(name, member)| EntryInfo { name: name.clone(), size: member.size })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        path::normalize(path).is_ok_and(|name| self.members.contains_key(&name))
    }

    /// Uncompressed size of a member, without decompressing it.
    pub fn size_of(&self, path: &str) -> Option<u64> {
        let name = path::normalize(path).ok()?;
        self.members.get(&name).map(|member| member.size)
    }

    /// Decompresses one member into memory.
    pub fn read(&mut self, path: &str) -> Result<ArchiveEntry> {
        let name = path::normalize(path)?;
        let member = *self.members.get(&name).ok_or_raise(|| ErrorKind::NotFound(name.clone()))?;
        let too_large = || ErrorKind::EntryTooLarge { name: name.clone(), limit: self.limit };
        if member.size > self.limit {
            exn::bail!(too_large());
        }
        let mut file = self.archive.by_index(member.index).or_raise(|| ErrorKind::Malformed)?;
        let mut bytes = Vec::with_capacity(usize::try_from(member.size).unwrap_or_default());
        // The declared size comes from the archive itself and may lie.
        (&mut file).take(self.limit.saturating_add(1)).read_to_end(&mut bytes).or_raise(|| ErrorKind::Malformed)?;
        if bytes.len() as u64 > self.limit {
            exn::bail!(too_large());
        }
        tracing::trace!(name = %name, bytes = bytes.len(), "Archive entry read");
        Ok(ArchiveEntry { size: bytes.len() as u64, name, bytes })
    }

    /// Checks that every resource the manifest declares is present.
    ///
    /// Fails on the first missing resource, in manifest order.
    pub fn verify(&self, resources: &[Resource]) -> Result<()> {
        for resource in resources {
            if !self.contains(&resource.path) {
                exn::bail!(ErrorKind::MissingResource { id: resource.id.clone(), path: resource.path.clone() });
            }
        }
        Ok(())
    }

    /// Reads the given resources one at a time, in the order given.
    pub fn read_in_order<'p, 'r>(&'p mut self, resources: &'r [Resource]) -> InOrder<'p, 'r> {
        InOrder { package: self, resources: resources.iter() }
    }
}

/// Iterator returned by [`Package::read_in_order`].
pub struct InOrder<'p, 'r> {
    package: &'p mut Package,
    resources: Iter<'r, Resource>,
}
impl<'r> Iterator for InOrder<'_, 'r> {
    type Item = Result<(&'r Resource, ArchiveEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        let resource = self.resources.next()?;
        let entry = match self.package.read(&resource.path) {
            Ok(entry) => entry,
            Err(err) if matches!(*err, ErrorKind::NotFound(_)) => {
                let kind = ErrorKind::MissingResource { id: resource.id.clone(), path: resource.path.clone() };
                return Some(Err(err.raise(kind)));
            },
            Err(err) => return Some(Err(err)),
        };
        Some(Ok((resource, entry)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lectern_manifest::Role;
    use rstest::rstest;
    use std::io::Write;
    use zip::write::{SimpleFileOptions, ZipWriter};

    pub(crate) fn zip_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.add_directory("res/", SimpleFileOptions::default()).unwrap();
        for (name, bytes) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn package(files: &[(&str, &[u8])]) -> Package {
        Package::open(PackageBuffer::new(zip_of(files)), 1024).unwrap()
    }

    fn resource(id: &str, path: &str) -> Resource {
        Resource { id: id.into(), title: String::new(), path: path.into(), role: Role::Content }
    }

    #[test]
    fn lists_files_without_directories() {
        let package = package(&[("index.html", b"<html>"), ("res/img/a.png", b"png")]);
        let names: Vec<_> = package.entries().map(|e| e.name).collect();
        assert_eq!(names, ["index.html", "res/img/a.png"]);
        assert_eq!(package.size_of("res/img/a.png"), Some(3));
    }

    #[rstest]
    #[case("res/img/a.png")]
    #[case("./res/img/a.png")]
    #[case("/res/img/a.png")]
    #[case("res\\img\\a.png")]
    #[case("res/css/../img/a.png")]
    fn lookup_normalizes_names(#[case] name: &str) {
        let mut package = package(&[("res/img/a.png", b"png")]);
        assert!(package.contains(name));
        let entry = package.read(name).unwrap();
        assert_eq!(entry.name, "res/img/a.png");
        assert_eq!(entry.bytes, b"png");
        assert_eq!(entry.size, 3);
    }

    #[test]
    fn backslash_member_names_are_normalized() {
        let package = package(&[("res\\page.html", b"x")]);
        assert!(package.contains("res/page.html"));
    }

    #[test]
    fn traversal_members_are_skipped() {
        let package = package(&[("../evil.html", b"x"), ("ok.html", b"y")]);
        assert_eq!(package.len(), 1);
        assert!(!package.contains("evil.html"));
    }

    #[test]
    fn missing_entry() {
        let mut package = package(&[("index.html", b"x")]);
        assert_eq!(*package.read("other.html").unwrap_err(), ErrorKind::NotFound("other.html".into()));
        assert!(matches!(*package.read("../index.html").unwrap_err(), ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn oversized_entry_is_refused() {
        let big = vec![b'a'; 2048];
        let mut package = package(&[("big.txt", &big)]);
        let err = package.read("big.txt").unwrap_err();
        assert_eq!(*err, ErrorKind::EntryTooLarge { name: "big.txt".into(), limit: 1024 });
    }

    #[test]
    fn unbounded_ceiling_reads_whole_entries() {
        let mut package = Package::open(PackageBuffer::new(zip_of(&[("a.html", b"hello")])), u64::MAX).unwrap();
        let entry = package.read("a.html").unwrap();
        assert_eq!(entry.bytes, b"hello");
        assert_eq!(entry.size, 5);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = Package::open(PackageBuffer::new(b"definitely not a zip".to_vec()), 1024).err().unwrap();
        assert_eq!(*err, ErrorKind::Malformed);
    }

    #[test]
    fn verify_reports_first_missing_resource() {
        let package = package(&[("a.html", b"a"), ("c.html", b"c")]);
        let resources = [resource("r1", "a.html"), resource("r2", "b.html"), resource("r3", "d.html")];
        let err = package.verify(&resources).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingResource { id: "r2".into(), path: "b.html".into() });
        assert!(package.verify(&resources[..1]).is_ok());
    }

    #[test]
    fn reads_in_manifest_order() {
        let mut package = package(&[("a.html", b"a"), ("b.html", b"b"), ("c.html", b"c")]);
        let resources = [resource("r3", "c.html"), resource("r1", "a.html"), resource("r2", "b.html")];
        let read: Vec<_> = package
            .read_in_order(&resources)
            .map(|item| item.map(|(resource, entry)| (resource.id.clone(), entry.bytes)))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(read, [("r3".into(), b"c".to_vec()), ("r1".into(), b"a".to_vec()), ("r2".into(), b"b".to_vec())]);
    }

    #[test]
    fn read_in_order_names_the_missing_resource() {
        let mut package = package(&[("a.html", b"a")]);
        let resources = [resource("r1", "a.html"), resource("r2", "gone.html")];
        let mut iter = package.read_in_order(&resources);
        assert!(iter.next().unwrap().is_ok());
        let err = iter.next().unwrap().unwrap_err();
        assert_eq!(*err, ErrorKind::MissingResource { id: "r2".into(), path: "gone.html".into() });
        assert!(iter.next().is_none());
    }
}
