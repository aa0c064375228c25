//! Resource records and the provenance annotations that travel with them.
//!
//! A [`Resource`] keeps its document body and its bookkeeping apart. On the
//! wire the bookkeeping lives under `metadata.annotations` so that functions
//! can see (and preserve) it; in memory it sits in a [`Provenance`] side
//! channel and never leaks into the body.

use serde_yaml::{Mapping, Value};

/// Position of a resource within its origin file.
pub const INDEX_ANNOTATION: &str = "internal.config.kubernetes.io/index";
/// Relative path of the file a resource was read from.
pub const PATH_ANNOTATION: &str = "internal.config.kubernetes.io/path";
/// Older spelling of [`INDEX_ANNOTATION`], still read by many functions.
pub const LEGACY_INDEX_ANNOTATION: &str = "config.kubernetes.io/index";
/// Older spelling of [`PATH_ANNOTATION`].
pub const LEGACY_PATH_ANNOTATION: &str = "config.kubernetes.io/path";
/// Sequence indentation style of the source document.
pub const SEQ_INDENT_ANNOTATION: &str = "internal.config.kubernetes.io/seqindent";

/// Key under which a top-level bare sequence is wrapped into a mapping.
pub const BARE_SEQ_KEY: &str = "BareSeqNodeWrappingKey";

const PROVENANCE_KEYS: [&str; 5] = [
    INDEX_ANNOTATION,
    PATH_ANNOTATION,
    LEGACY_INDEX_ANNOTATION,
    LEGACY_PATH_ANNOTATION,
    SEQ_INDENT_ANNOTATION,
];

/// How sequences nested under a mapping key are indented.
///
/// `Compact` puts the dash at the key's column, `Wide` indents it by two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeqIndent {
    #[default]
    Compact,
    Wide,
}

impl SeqIndent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeqIndent::Compact => "compact",
            SeqIndent::Wide => "wide",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compact" => Some(SeqIndent::Compact),
            "wide" => Some(SeqIndent::Wide),
            _ => None,
        }
    }
}

impl std::fmt::Display for SeqIndent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping attached to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Provenance {
    pub index: Option<usize>,
    pub path: Option<String>,
    pub seq_indent: Option<SeqIndent>,
}

impl Provenance {
    pub fn is_empty(&self) -> bool {
        self.index.is_none() && self.path.is_none() && self.seq_indent.is_none()
    }
}

/// One structured configuration document plus its provenance.
///
/// Equality covers both the body and the provenance: identical bodies read
/// from different places are different records.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    body: Mapping,
    provenance: Provenance,
}

impl Resource {
    /// Create a resource with no provenance.
    pub fn new(body: Mapping) -> Self {
        Self {
            body,
            provenance: Provenance::default(),
        }
    }

    /// Wrap a top-level sequence so it can travel as a mapping.
    pub fn from_bare_sequence(items: Vec<Value>) -> Self {
        let mut body = Mapping::new();
        body.insert(Value::from(BARE_SEQ_KEY), Value::Sequence(items));
        Self::new(body)
    }

    /// Build a resource from a wire document, lifting any provenance
    /// annotations out of `metadata.annotations`.
    pub fn from_document(mut body: Mapping) -> Self {
        let provenance = take_provenance(&mut body);
        Self { body, provenance }
    }

    pub fn body(&self) -> &Mapping {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Mapping {
        &mut self.body
    }

    pub fn into_body(self) -> Mapping {
        self.body
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn provenance_mut(&mut self) -> &mut Provenance {
        &mut self.provenance
    }

    /// Drop all provenance, keeping the body untouched.
    pub fn clear_provenance(&mut self) {
        self.provenance = Provenance::default();
    }

    pub fn is_bare_sequence(&self) -> bool {
        self.body.len() == 1 && self.body.contains_key(BARE_SEQ_KEY)
    }

    pub fn kind(&self) -> Option<&str> {
        self.body.get("kind").and_then(Value::as_str)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.body.get("apiVersion").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata_field("name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_field("namespace")
    }

    fn metadata_field(&self, field: &str) -> Option<&str> {
        self.body
            .get("metadata")
            .and_then(Value::as_mapping)
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
    }

    /// File name used when the resource has no path annotation.
    ///
    /// `<namespace>/<kind>_<name>.yaml` lowercased when kind and name are
    /// known, `resource_<index>.yaml` otherwise.
    pub fn default_path(&self, index: usize) -> String {
        match (self.kind(), self.name()) {
            (Some(kind), Some(name)) => {
                let file = format!("{}_{}.yaml", kind, name).to_lowercase();
                match self.namespace() {
                    Some(ns) if !ns.is_empty() => format!("{}/{}", ns.to_lowercase(), file),
                    _ => file,
                }
            }
            _ => format!("resource_{index}.yaml"),
        }
    }

    /// Render the wire form of this resource.
    ///
    /// With `annotate` the provenance is written into
    /// `metadata.annotations`; otherwise the body is returned as is.
    pub fn to_document(&self, annotate: bool) -> Mapping {
        let mut doc = self.body.clone();
        if !annotate || self.provenance.is_empty() {
            return doc;
        }

        let metadata = doc
            .entry(Value::from("metadata"))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        let Some(metadata) = metadata.as_mapping_mut() else {
            return doc;
        };
        let annotations = metadata
            .entry(Value::from("annotations"))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        let Some(annotations) = annotations.as_mapping_mut() else {
            return doc;
        };

        if let Some(index) = self.provenance.index {
            let index = Value::from(index.to_string());
            annotations.insert(Value::from(LEGACY_INDEX_ANNOTATION), index.clone());
            annotations.insert(Value::from(INDEX_ANNOTATION), index);
        }
        if let Some(path) = &self.provenance.path {
            let path = Value::from(path.clone());
            annotations.insert(Value::from(LEGACY_PATH_ANNOTATION), path.clone());
            annotations.insert(Value::from(PATH_ANNOTATION), path);
        }
        if let Some(style) = self.provenance.seq_indent {
            annotations.insert(
                Value::from(SEQ_INDENT_ANNOTATION),
                Value::from(style.as_str()),
            );
        }
        doc
    }
}

/// Remove provenance annotations from `body`, returning what was found.
///
/// The internal keys win over the legacy ones. Annotation and metadata maps
/// emptied by the removal are dropped so the body reads as if they were
/// never injected.
fn take_provenance(body: &mut Mapping) -> Provenance {
    let mut provenance = Provenance::default();

    let Some(metadata) = body.get_mut("metadata").and_then(Value::as_mapping_mut) else {
        return provenance;
    };
    let Some(annotations) = metadata
        .get_mut("annotations")
        .and_then(Value::as_mapping_mut)
    else {
        return provenance;
    };

    let mut found = Vec::new();
    for key in PROVENANCE_KEYS {
        if let Some(value) = annotations.remove(key) {
            found.push((key, value));
        }
    }
    if found.is_empty() {
        return provenance;
    }

    for key in [LEGACY_INDEX_ANNOTATION, INDEX_ANNOTATION] {
        if let Some(index) = lookup(&found, key).and_then(annotation_index) {
            provenance.index = Some(index);
        }
    }
    for key in [LEGACY_PATH_ANNOTATION, PATH_ANNOTATION] {
        if let Some(path) = lookup(&found, key).and_then(Value::as_str) {
            provenance.path = Some(path.to_string());
        }
    }
    provenance.seq_indent = lookup(&found, SEQ_INDENT_ANNOTATION)
        .and_then(Value::as_str)
        .and_then(SeqIndent::parse);

    if annotations.is_empty() {
        metadata.remove("annotations");
    }
    if metadata.is_empty() {
        body.remove("metadata");
    }
    provenance
}

fn lookup<'a>(found: &'a [(&str, Value)], key: &str) -> Option<&'a Value> {
    found.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
}

fn annotation_index(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        _ => None,
    }
}
