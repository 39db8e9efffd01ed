use crate::error::{ErrorKind, Result};
use crate::{RenderedUnit, Section};
use exn::{OptionExt, ResultExt};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::instrument;

const PRODUCER: &[u8] = b"lectern";

/// Page attributes a page may inherit from its ancestors in the page tree.
/// The original tree is discarded on merge, so each page gets its own copy.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guards against page trees with cycles.
const MAX_TREE_DEPTH: usize = 64;

/// Structural objects that are rebuilt rather than copied.
const REBUILT_TYPES: [&[u8]; 3] = [b"Catalog", b"Pages", b"Outlines"];

/// Merges the unit PDFs into one document at `save_to`, with one top-level
/// bookmark per unit. Returns the number of pages each unit contributed.
#[instrument(skip_all, fields(units = units.len(), path = %save_to.display()))]
pub(crate) fn merge(
    subject: &str,
    units: &[RenderedUnit],
    sections: &[Section<'_>],
    save_to: &Path,
) -> Result<Vec<usize>> {
    let mut merged = Document::with_version("1.7");
    let mut next_id = 1;
    let mut kids = Vec::new();
    let mut first_pages = Vec::with_capacity(units.len());
    let mut page_counts = Vec::with_capacity(units.len());

    for unit in units {
        let mut doc = Document::load(&unit.pdf).or_raise(|| ErrorKind::Pdf(unit.pdf.clone()))?;
        doc.renumber_objects_with(next_id);
        next_id = doc.objects.keys().map(|(number, _)| *number).max().unwrap_or(next_id) + 1;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let first = *pages.first().ok_or_raise(|| ErrorKind::EmptyUnit { index: unit.index, id: unit.id.clone() })?;
        for page in &pages {
            flatten(&mut doc, *page).or_raise(|| ErrorKind::Pdf(unit.pdf.clone()))?;
        }
        let (relinked, dropped) = resolve_named_links(&mut doc, &pages);
        tracing::trace!(unit = %unit.id, pages = pages.len(), relinked, dropped, "Unit loaded");
        first_pages.push(first);
        page_counts.push(pages.len());
        kids.extend(pages);

        for (id, object) in doc.objects {
            if !is_rebuilt(&object) {
                merged.objects.insert(id, object);
            }
        }
    }
    merged.max_id = next_id - 1;

    let pages_id = merged.new_object_id();
    for kid in &kids {
        let page = merged
            .get_object_mut(*kid)
            .and_then(Object::as_dict_mut)
            .or_raise(|| ErrorKind::Pdf(save_to.to_path_buf()))?;
        page.set("Parent", Object::Reference(pages_id));
    }
    let mut tree = Dictionary::new();
    tree.set("Type", Object::Name(b"Pages".to_vec()));
    tree.set("Count", Object::Integer(kids.len() as i64));
    tree.set("Kids", Object::Array(kids.into_iter().map(Object::Reference).collect()));
    merged.objects.insert(pages_id, Object::Dictionary(tree));

    let outlines_id = outline(&mut merged, sections, &first_pages);

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    catalog.set("Outlines", Object::Reference(outlines_id));
    catalog.set("PageMode", Object::Name(b"UseOutlines".to_vec()));
    let catalog_id = merged.add_object(catalog);

    let mut info = Dictionary::new();
    info.set("Title", text_string(subject));
    info.set("Producer", Object::String(PRODUCER.to_vec(), StringFormat::Literal));
    let info_id = merged.add_object(info);

    merged.trailer.set("Root", Object::Reference(catalog_id));
    merged.trailer.set("Info", Object::Reference(info_id));
    merged.prune_objects();
    merged.renumber_objects();
    merged.compress();
    merged.save(save_to).or_raise(|| ErrorKind::Pdf(save_to.to_path_buf()))?;
    Ok(page_counts)
}

/// Adds the outline root and one item per section; returns the root's id.
fn outline(doc: &mut Document, sections: &[Section<'_>], first_pages: &[ObjectId]) -> ObjectId {
    let root_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = sections.iter().map(|_| doc.new_object_id()).collect();
    for (position, (section, first_page)) in sections.iter().zip(first_pages).enumerate() {
        let mut item = Dictionary::new();
        item.set("Title", text_string(&section.title));
        item.set("Parent", Object::Reference(root_id));
        item.set("Dest", Object::Array(vec![Object::Reference(*first_page), Object::Name(b"Fit".to_vec())]));
        if let Some(previous) = position.checked_sub(1).and_then(|p| item_ids.get(p)) {
            item.set("Prev", Object::Reference(*previous));
        }
        if let Some(next) = item_ids.get(position + 1) {
            item.set("Next", Object::Reference(*next));
        }
        doc.objects.insert(item_ids[position], Object::Dictionary(item));
    }
    let mut root = Dictionary::new();
    root.set("Type", Object::Name(b"Outlines".to_vec()));
    if let (Some(first), Some(last)) = (item_ids.first(), item_ids.last()) {
        root.set("First", Object::Reference(*first));
        root.set("Last", Object::Reference(*last));
    }
    root.set("Count", Object::Integer(item_ids.len() as i64));
    doc.objects.insert(root_id, Object::Dictionary(root));
    root_id
}

/// Copies inherited attributes onto the page itself.
fn flatten(doc: &mut Document, page_id: ObjectId) -> lopdf::Result<()> {
    let inherited: Vec<(&[u8], Object)> =
        INHERITABLE.iter().filter_map(|key| inherited_attribute(doc, page_id, key).map(|value| (*key, value))).collect();
    let page = doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
    for (key, value) in inherited {
        page.set(key, value);
    }
    Ok(())
}

fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Named destinations, by name. Values are explicit destination arrays.
type Destinations = BTreeMap<Vec<u8>, Object>;

enum Relink {
    Unchanged,
    Rewritten(Dictionary),
    Broken,
}

/// Points links at explicit destinations instead of named ones.
///
/// Names live in the unit's catalog, which is not carried into the merged
/// document. Links to names the unit does not define are removed. Returns how
/// many links were rewritten and how many were removed.
fn resolve_named_links(doc: &mut Document, pages: &[ObjectId]) -> (usize, usize) {
    let names = named_destinations(doc);
    let mut rewritten = Vec::new();
    let mut broken = Vec::new();
    for page in pages {
        for id in annotation_ids(doc, *page) {
            let Ok(annotation) = doc.get_dictionary(id) else { continue };
            match relink(doc, &names, annotation) {
                Relink::Unchanged => {},
                Relink::Rewritten(annotation) => rewritten.push((id, annotation)),
                Relink::Broken => broken.push(id),
            }
        }
    }
    let counts = (rewritten.len(), broken.len());
    for (id, annotation) in rewritten {
        doc.objects.insert(id, Object::Dictionary(annotation));
    }
    if !broken.is_empty() {
        for page in pages {
            drop_annotations(doc, *page, &broken);
        }
    }
    counts
}

fn relink(doc: &Document, names: &Destinations, annotation: &Dictionary) -> Relink {
    if let Ok(dest) = annotation.get(b"Dest") {
        let Some(name) = destination_name(doc, dest) else { return Relink::Unchanged };
        let Some(explicit) = names.get(name) else { return Relink::Broken };
        let mut annotation = annotation.clone();
        annotation.set("Dest", explicit.clone());
        return Relink::Rewritten(annotation);
    }
    let Some(action) = annotation.get(b"A").ok().and_then(|a| resolve(doc, a)).and_then(|a| a.as_dict().ok()) else {
        return Relink::Unchanged;
    };
    if !action.get(b"S").and_then(Object::as_name).is_ok_and(|s| s == b"GoTo") {
        return Relink::Unchanged;
    }
    let Some(name) = action.get(b"D").ok().and_then(|d| destination_name(doc, d)) else { return Relink::Unchanged };
    let Some(explicit) = names.get(name) else { return Relink::Broken };
    let mut action = action.clone();
    action.set("D", explicit.clone());
    let mut annotation = annotation.clone();
    annotation.set("A", Object::Dictionary(action));
    Relink::Rewritten(annotation)
}

/// Collects both the `/Names /Dests` tree and the older catalog `/Dests`
/// dictionary.
fn named_destinations(doc: &Document) -> Destinations {
    let mut found = Destinations::new();
    let Ok(catalog) = doc.catalog() else { return found };
    if let Some(dests) = catalog.get(b"Dests").ok().and_then(|d| resolve(doc, d)).and_then(|d| d.as_dict().ok()) {
        for (name, value) in dests.iter() {
            if let Some(explicit) = explicit_destination(doc, value) {
                found.insert(name.clone(), explicit);
            }
        }
    }
    let tree = catalog
        .get(b"Names")
        .ok()
        .and_then(|n| resolve(doc, n))
        .and_then(|n| n.as_dict().ok())
        .and_then(|n| n.get(b"Dests").ok())
        .and_then(|d| resolve(doc, d))
        .and_then(|d| d.as_dict().ok());
    if let Some(tree) = tree {
        collect_name_tree(doc, tree, &mut found, 0);
    }
    found
}

fn collect_name_tree(doc: &Document, node: &Dictionary, found: &mut Destinations, depth: usize) {
    if depth > MAX_TREE_DEPTH {
        return;
    }
    if let Some(names) = node.get(b"Names").ok().and_then(|n| resolve(doc, n)).and_then(|n| n.as_array().ok()) {
        for pair in names.chunks_exact(2) {
            let name = resolve(doc, &pair[0]).and_then(|n| n.as_str().ok());
            if let (Some(name), Some(explicit)) = (name, explicit_destination(doc, &pair[1])) {
                found.insert(name.to_vec(), explicit);
            }
        }
    }
    if let Some(kids) = node.get(b"Kids").ok().and_then(|k| resolve(doc, k)).and_then(|k| k.as_array().ok()) {
        for kid in kids {
            if let Some(kid) = resolve(doc, kid).and_then(|k| k.as_dict().ok()) {
                collect_name_tree(doc, kid, found, depth + 1);
            }
        }
    }
}

/// A destination value is either the array itself or a dictionary whose `/D`
/// is the array.
fn explicit_destination(doc: &Document, value: &Object) -> Option<Object> {
    let value = match resolve(doc, value)? {
        Object::Dictionary(dict) => resolve(doc, dict.get(b"D").ok()?)?,
        value => value,
    };
    value.as_array().ok().map(|array| Object::Array(array.clone()))
}

fn destination_name<'a>(doc: &'a Document, dest: &'a Object) -> Option<&'a [u8]> {
    match resolve(doc, dest)? {
        Object::Name(name) | Object::String(name, _) => Some(name),
        _ => None,
    }
}

fn annotation_ids(doc: &Document, page: ObjectId) -> Vec<ObjectId> {
    doc.get_dictionary(page)
        .ok()
        .and_then(|p| p.get(b"Annots").ok())
        .and_then(|a| resolve(doc, a))
        .and_then(|a| a.as_array().ok())
        .map(|annots| annots.iter().filter_map(|a| a.as_reference().ok()).collect())
        .unwrap_or_default()
}

fn drop_annotations(doc: &mut Document, page: ObjectId, dropped: &[ObjectId]) {
    let holder = match doc.get_dictionary(page).and_then(|p| p.get(b"Annots")) {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(_) => None,
        Err(_) => return,
    };
    let annots = match holder {
        Some(id) => doc.get_object_mut(id).and_then(Object::as_array_mut),
        None => doc
            .get_object_mut(page)
            .and_then(Object::as_dict_mut)
            .and_then(|p| p.get_mut(b"Annots"))
            .and_then(Object::as_array_mut),
    };
    if let Ok(annots) = annots {
        annots.retain(|a| !a.as_reference().is_ok_and(|id| dropped.contains(&id)));
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    doc.dereference(object).ok().map(|(_, object)| object)
}

fn is_rebuilt(object: &Object) -> bool {
    object
        .as_dict()
        .and_then(|dict| dict.get(b"Type"))
        .and_then(Object::as_name)
        .is_ok_and(|name| REBUILT_TYPES.contains(&name))
}

/// A PDF text string: UTF-16BE with a byte order mark.
pub(crate) fn text_string(text: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Decodes a PDF text string, either UTF-16BE with a BOM or single-byte.
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xFE, 0xFF]) {
        Some(rest) => {
            let units = rest.chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect()
        },
        None => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}
