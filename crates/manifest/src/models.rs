use serde::de::{Error as DeError, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Formatter, Result as FmtResult};

/// Whether a resource is a page of the subject or something pages embed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A content page; becomes one PDF outline entry and one EPUB chapter.
    #[default]
    #[serde(alias = "page")]
    Content,
    /// Images, stylesheets, fonts and other files referenced by pages.
    Asset,
}

/// One file inside a subject's package, as declared by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Resource {
    pub id: String,
    /// Display title used for bookmarks and the table of contents. May be
    /// blank, in which case the page's own `<title>` is used.
    #[serde(default)]
    pub title: String,
    /// Path of the file relative to the root of the package archive.
    pub path: String,
    #[serde(default)]
    pub role: Role,
}
impl Resource {
    pub fn is_content(&self) -> bool {
        self.role == Role::Content
    }
}

/// A subject's package locator and its ordered resources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Subject {
    /// Where to fetch the package from (`http(s)://` or `file://`).
    #[serde(alias = "url", alias = "locator")]
    pub package: String,
    /// Resources in document order.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A borrowed view of one subject, paired with its canonical name.
#[derive(Debug, Clone, Copy)]
pub struct SubjectRef<'a> {
    name: &'a str,
    subject: &'a Subject,
}
impl<'a> SubjectRef<'a> {
    pub(crate) fn new(name: &'a str, subject: &'a Subject) -> Self {
        Self { name, subject }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn package(&self) -> &'a str {
        &self.subject.package
    }

    /// Every declared resource (content and assets), in manifest order.
    pub fn resources(&self) -> &'a [Resource] {
        &self.subject.resources
    }

    /// Content pages only, in manifest order.
    pub fn contents(&self) -> impl Iterator<Item = &'a Resource> + 'a {
        self.subject.resources.iter().filter(|r| r.is_content())
    }
}

/// Subject name → [`Subject`], sorted by name.
///
/// Deserialization rejects duplicate subject names instead of silently keeping
/// the last one, since the names double as output file names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    pub(crate) subjects: BTreeMap<String, Subject>,
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SubjectsVisitor;
        impl<'de> Visitor<'de> for SubjectsVisitor {
            type Value = BTreeMap<String, Subject>;

            fn expecting(&self, f: &mut Formatter<'_>) -> FmtResult {
                f.write_str("a map of subject names to subject entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut subjects = BTreeMap::new();
                while let Some((name, subject)) = map.next_entry::<String, Subject>()? {
                    if subjects.contains_key(&name) {
                        return Err(A::Error::custom(format!("duplicate subject `{name}`")));
                    }
                    subjects.insert(name, subject);
                }
                Ok(subjects)
            }
        }
        deserializer.deserialize_map(SubjectsVisitor).map(|subjects| Manifest { subjects })
    }
}
