//! The Manifest Store: which package belongs to which subject, and in which
//! order its pages appear in the final documents.
//!
//! The manifest is produced once by the discovery crawl and is read-only from
//! here on. It is a JSON object keyed by canonical subject name:
//!
//! ```json
//! {
//!   "Biologia": {
//!     "package": "https://example.org/biologia.zip",
//!     "resources": [
//!       { "id": "r1", "title": "Intro", "path": "intro.html", "role": "content" },
//!       { "id": "a1", "title": "", "path": "img/cell.png", "role": "asset" }
//!     ]
//!   }
//! }
//! ```

pub mod error;
mod models;

pub use crate::models::{Manifest, Resource, Role, Subject, SubjectRef};

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

impl Manifest {
    /// Reads and validates a manifest file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())),
            _ => exn::Exn::from(e).raise(ErrorKind::Io(path.to_path_buf())),
        })?;
        let manifest: Self = json.parse()?;
        tracing::debug!(subjects = manifest.len(), "Manifest loaded");
        Ok(manifest)
    }

    /// Looks up a subject by its canonical name.
    ///
    /// Fails with [`ErrorKind::UnknownSubject`] if the name is not a key of the
    /// manifest, and with [`ErrorKind::EmptySubject`] if the subject declares
    /// no content pages (there would be nothing to bookmark).
    pub fn subject(&self, name: &str) -> Result<SubjectRef<'_>> {
        let (name, subject) =
            self.subjects.get_key_value(name).ok_or_raise(|| ErrorKind::UnknownSubject(name.to_string()))?;
        let subject = SubjectRef::new(name, subject);
        if subject.contents().next().is_none() {
            exn::bail!(ErrorKind::EmptySubject(name.clone()));
        }
        Ok(subject)
    }

    /// Subject names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = SubjectRef<'_>> {
        self.subjects.iter().map(|(name, subject)| SubjectRef::new(name, subject))
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    fn validate(&self) -> Result<()> {
        for (name, subject) in &self.subjects {
            if !is_canonical(name) {
                exn::bail!(ErrorKind::InvalidSubjectName(name.clone()));
            }
            let invalid = |reason: String| ErrorKind::InvalidSubject { subject: name.clone(), reason };
            if subject.package.trim().is_empty() {
                exn::bail!(invalid("package locator is empty".into()));
            }
            for (position, resource) in subject.resources.iter().enumerate() {
                if resource.id.trim().is_empty() {
                    exn::bail!(invalid(format!("resource #{} has an empty id", position + 1)));
                }
                if resource.path.trim().is_empty() {
                    exn::bail!(invalid(format!("resource '{}' has an empty path", resource.id)));
                }
            }
        }
        Ok(())
    }
}
impl FromStr for Manifest {
    type Err = exn::Exn<ErrorKind>;
    fn from_str(json: &str) -> std::result::Result<Self, Self::Err> {
        let manifest: Self = serde_json::from_str(json).or_raise(|| ErrorKind::Malformed)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Subject names end up in file names and log lines, so they must already be
/// in their final form.
fn is_canonical(name: &str) -> bool {
    !name.is_empty()
        && name.trim() == name
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    const BIOLOGIA: &str = r#"{
        "Biologia": {
            "package": "https://example.org/biologia.zip",
            "resources": [
                { "id": "r1", "title": "Intro", "path": "intro.html", "role": "content" },
                { "id": "a1", "title": "", "path": "img/cell.png", "role": "asset" },
                { "id": "r2", "title": "Celulas", "path": "celulas.html" },
                { "id": "r3", "title": "Genetica", "path": "genetica.html", "role": "page" }
            ]
        },
        "Fisica": { "url": "https://example.org/fisica.zip", "resources": [
            { "id": "a1", "path": "logo.png", "role": "asset" }
        ] }
    }"#;

    #[test]
    fn contents_keep_manifest_order() {
        let manifest: Manifest = BIOLOGIA.parse().unwrap();
        let subject = manifest.subject("Biologia").unwrap();
        let titles: Vec<_> = subject.contents().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["Intro", "Celulas", "Genetica"]);
        assert_eq!(subject.resources().len(), 4);
        assert_eq!(subject.package(), "https://example.org/biologia.zip");
    }

    #[test]
    fn unknown_subject_is_a_usage_error() {
        let manifest: Manifest = BIOLOGIA.parse().unwrap();
        let err = manifest.subject("Quimica").unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownSubject("Quimica".into()));
        assert!(err.is_usage());
    }

    #[test]
    fn subject_without_content_is_a_usage_error() {
        let manifest: Manifest = BIOLOGIA.parse().unwrap();
        let err = manifest.subject("Fisica").unwrap_err();
        assert_eq!(*err, ErrorKind::EmptySubject("Fisica".into()));
        assert!(err.is_usage());
    }

    #[test]
    fn subject_lookup_is_exact() {
        let manifest: Manifest = BIOLOGIA.parse().unwrap();
        assert!(manifest.subject("biologia").is_err());
    }

    #[test]
    fn duplicate_subjects_are_rejected() {
        let json = r#"{
            "Biologia": { "package": "a.zip", "resources": [] },
            "Biologia": { "package": "b.zip", "resources": [] }
        }"#;
        let err = json.parse::<Manifest>().unwrap_err();
        assert_eq!(*err, ErrorKind::Malformed);
    }

    #[test]
    fn duplicate_titles_are_kept() {
        let json = r#"{ "Historia": { "package": "h.zip", "resources": [
            { "id": "a", "title": "Repaso", "path": "a.html" },
            { "id": "b", "title": "Repaso", "path": "b.html" }
        ] } }"#;
        let manifest: Manifest = json.parse().unwrap();
        assert_eq!(manifest.subject("Historia").unwrap().contents().count(), 2);
    }

    #[rstest]
    #[case("")]
    #[case(" Biologia")]
    #[case("Biologia ")]
    #[case("Bio/logia")]
    #[case("Bio\\logia")]
    #[case("..")]
    #[case("Bio\nlogia")]
    fn non_canonical_names_are_rejected(#[case] name: &str) {
        let mut map = serde_json::Map::new();
        map.insert(name.to_string(), serde_json::json!({ "package": "x.zip", "resources": [] }));
        let json = serde_json::Value::Object(map).to_string();
        let err = json.parse::<Manifest>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidSubjectName(n) if n == name));
    }

    #[rstest]
    #[case(r#"{ "S": { "package": " ", "resources": [] } }"#)]
    #[case(r#"{ "S": { "package": "s.zip", "resources": [{ "id": "", "path": "a.html" }] } }"#)]
    #[case(r#"{ "S": { "package": "s.zip", "resources": [{ "id": "a", "path": "" }] } }"#)]
    fn unusable_entries_are_rejected(#[case] json: &str) {
        let err = json.parse::<Manifest>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidSubject { subject, .. } if subject == "S"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_eq!(*"[1, 2, 3]".parse::<Manifest>().unwrap_err(), ErrorKind::Malformed);
        assert_eq!(*"{".parse::<Manifest>().unwrap_err(), ErrorKind::Malformed);
    }

    #[test]
    fn load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BIOLOGIA.as_bytes()).unwrap();
        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.names().collect::<Vec<_>>(), ["Biologia", "Fisica"]);
    }

    #[test]
    fn load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let err = Manifest::load(&path).unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound(path));
    }
}
