//! Resource stream codec: multi-document YAML in, annotated resources out,
//! and back again.

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::emit::write_document;
use crate::error::{KioError, KioResult};
use crate::resource::{Resource, SeqIndent, BARE_SEQ_KEY};

/// `apiVersion` of the envelope exchanged with functions.
pub const RESOURCE_LIST_API_VERSION: &str = "config.kubernetes.io/v1";
/// `kind` of the envelope exchanged with functions.
pub const RESOURCE_LIST_KIND: &str = "ResourceList";

const DOCUMENT_SEPARATOR: &str = "---";

/// Ordered resources plus any structured results a function attached to its
/// output `ResourceList`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceStream {
    pub items: Vec<Resource>,
    pub results: Vec<Value>,
}

impl ResourceStream {
    pub fn new(items: Vec<Resource>) -> Self {
        Self {
            items,
            results: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.items.iter()
    }

    /// Drop the provenance of every resource.
    pub fn strip_annotations(&mut self) {
        for resource in &mut self.items {
            resource.clear_provenance();
        }
    }
}

/// Decode a byte stream holding zero or more YAML documents.
///
/// A document holding a single `ResourceList` is unwrapped into its items.
/// Every resource leaves with an index (its position in the stream when the
/// input did not carry one), a path (see [`Resource::default_path`]) and the
/// sequence indentation style of the document it came from.
pub fn decode(input: &[u8]) -> KioResult<ResourceStream> {
    let text = std::str::from_utf8(input).map_err(|e| KioError::MalformedInput {
        document: None,
        reason: format!("input is not valid UTF-8: {e}"),
    })?;

    let mut parsed: Vec<(Resource, SeqIndent)> = Vec::new();
    for (position, document) in split_documents(text).into_iter().enumerate() {
        if is_blank(&document) {
            continue;
        }
        let value: Value =
            serde_yaml::from_str(&document).map_err(|e| KioError::MalformedInput {
                document: Some(position),
                reason: e.to_string(),
            })?;

        let resource = match value {
            Value::Null => continue,
            Value::Mapping(body) => Resource::from_document(body),
            Value::Sequence(items) => Resource::from_bare_sequence(items),
            other => {
                return Err(KioError::MalformedInput {
                    document: Some(position),
                    reason: format!("expected a mapping or a sequence, found {}", kind_of(&other)),
                })
            }
        };
        parsed.push((resource, detect_seq_indent(&document)));
    }

    let mut stream = if parsed.len() == 1 && is_resource_list(&parsed[0].0) {
        let (list, style) = parsed.remove(0);
        unwrap_resource_list(list, style)?
    } else {
        let items = parsed
            .into_iter()
            .map(|(mut resource, style)| {
                resource.provenance_mut().seq_indent.get_or_insert(style);
                resource
            })
            .collect();
        ResourceStream::new(items)
    };

    for (position, resource) in stream.items.iter_mut().enumerate() {
        let default_path = resource.default_path(position);
        let provenance = resource.provenance_mut();
        provenance.index.get_or_insert(position);
        provenance.path.get_or_insert(default_path);
    }

    debug!(
        resources = stream.items.len(),
        results = stream.results.len(),
        "decoded resource stream"
    );
    Ok(stream)
}

/// Encode resources as a `---` separated multi-document stream.
///
/// With `strip_annotations` none of the provenance bookkeeping is written.
pub fn encode(resources: &[Resource], strip_annotations: bool) -> KioResult<String> {
    let mut out = String::new();
    for (i, resource) in resources.iter().enumerate() {
        if i > 0 {
            out.push_str(DOCUMENT_SEPARATOR);
            out.push('\n');
        }
        let style = resource.provenance().seq_indent.unwrap_or_default();
        let document = unwrap_bare_sequence(resource.to_document(!strip_annotations));
        write_document(&mut out, &document, style)?;
    }
    Ok(out)
}

/// Encode a stream as the `ResourceList` envelope fed to a function's stdin.
///
/// Provenance is always kept so the function can hand it back.
pub fn encode_resource_list(stream: &ResourceStream) -> KioResult<String> {
    let items = stream
        .items
        .iter()
        .map(|resource| Value::Mapping(resource.to_document(true)))
        .collect();

    let mut list = Mapping::new();
    list.insert(
        Value::from("apiVersion"),
        Value::from(RESOURCE_LIST_API_VERSION),
    );
    list.insert(Value::from("kind"), Value::from(RESOURCE_LIST_KIND));
    list.insert(Value::from("items"), Value::Sequence(items));
    if !stream.results.is_empty() {
        list.insert(
            Value::from("results"),
            Value::Sequence(stream.results.clone()),
        );
    }

    let mut out = String::new();
    write_document(&mut out, &Value::Mapping(list), SeqIndent::Compact)?;
    Ok(out)
}

fn is_resource_list(resource: &Resource) -> bool {
    resource.kind() == Some(RESOURCE_LIST_KIND)
        && resource
            .api_version()
            .map_or(true, |v| v.starts_with("config.kubernetes.io/"))
}

fn unwrap_resource_list(list: Resource, style: SeqIndent) -> KioResult<ResourceStream> {
    let mut body = list.into_body();

    let items = match body.remove("items") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items,
        Some(other) => {
            return Err(KioError::MalformedInput {
                document: Some(0),
                reason: format!("ResourceList items must be a sequence, found {}", kind_of(&other)),
            })
        }
    };

    let mut resources = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        let Value::Mapping(item) = item else {
            return Err(KioError::MalformedInput {
                document: Some(0),
                reason: format!("ResourceList item {position} is not a mapping"),
            });
        };
        let mut resource = Resource::from_document(item);
        resource.provenance_mut().seq_indent.get_or_insert(style);
        resources.push(resource);
    }

    let results = match body.remove("results") {
        Some(Value::Sequence(results)) => results,
        _ => Vec::new(),
    };

    Ok(ResourceStream {
        items: resources,
        results,
    })
}

fn unwrap_bare_sequence(document: Mapping) -> Value {
    if document.len() == 1 {
        if let Some(Value::Sequence(items)) = document.get(BARE_SEQ_KEY) {
            return Value::Sequence(items.clone());
        }
    }
    Value::Mapping(document)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Split text on `---` separator lines. Content following the marker on the
/// same line starts the next document.
fn split_documents(text: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();
    let mut after_separator = false;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(DOCUMENT_SEPARATOR) {
            if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
                if after_separator || !is_blank(&current) {
                    documents.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
                after_separator = true;
                let rest = rest.trim();
                if !rest.is_empty() {
                    current.push_str(rest);
                    current.push('\n');
                }
                continue;
            }
        }
        if line.trim_end() == "..." {
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        documents.push(current);
    }
    documents
}

fn is_blank(document: &str) -> bool {
    document.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    })
}

/// Work out whether sequences under mapping keys are indented past the key.
///
/// The first sequence entry that directly follows a bare `key:` line decides;
/// documents without such an entry are treated as compact.
pub fn detect_seq_indent(document: &str) -> SeqIndent {
    let mut previous: Option<(usize, &str)> = None;

    for line in document.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();

        if trimmed == "-" || trimmed.starts_with("- ") {
            if let Some((key_column, key_line)) = previous {
                if key_line.trim_end().ends_with(':') {
                    return if indent > key_column {
                        SeqIndent::Wide
                    } else {
                        SeqIndent::Compact
                    };
                }
            }
        }

        // A key written after one or more dashes sits past them.
        let mut key_column = indent;
        let mut key_line = trimmed;
        while let Some(rest) = key_line.strip_prefix("- ") {
            let rest_trimmed = rest.trim_start();
            key_column += 2 + (rest.len() - rest_trimmed.len());
            key_line = rest_trimmed;
        }
        previous = Some((key_column, key_line));
    }
    SeqIndent::Compact
}
