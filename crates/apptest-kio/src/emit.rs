//! Block-style YAML writer.
//!
//! `serde_yaml` always writes nested sequences flush with their parent key.
//! This writer walks the value tree itself so a document can be re-emitted in
//! the sequence indentation style it was read with. Scalars are still
//! rendered by `serde_yaml`, which takes care of quoting and block literals.

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};

use crate::error::{KioError, KioResult};
use crate::resource::SeqIndent;

/// Append `value` as one YAML document (without separator) to `out`.
pub(crate) fn write_document(out: &mut String, value: &Value, style: SeqIndent) -> KioResult<()> {
    let mut emitter = Emitter { out, style };
    match block_body(value) {
        Some((tag, body)) => {
            if let Some(tag) = tag {
                emitter.out.push_str(&tag.tag.to_string());
                emitter.out.push('\n');
            }
            emitter.block(body, 0)
        }
        None => {
            let scalar = emitter.inline(value, 0)?;
            emitter.out.push_str(&scalar);
            emitter.out.push('\n');
            Ok(())
        }
    }
}

struct Emitter<'a> {
    out: &'a mut String,
    style: SeqIndent,
}

impl Emitter<'_> {
    fn block(&mut self, value: &Value, indent: usize) -> KioResult<()> {
        match value {
            Value::Mapping(map) => self.mapping(map, indent),
            Value::Sequence(items) => self.sequence(items, indent),
            other => {
                let scalar = self.inline(other, indent)?;
                pad(self.out, indent);
                self.out.push_str(&scalar);
                self.out.push('\n');
                Ok(())
            }
        }
    }

    fn mapping(&mut self, map: &Mapping, indent: usize) -> KioResult<()> {
        for (key, value) in map {
            pad(self.out, indent);
            self.out.push_str(&scalar_key(key)?);
            self.out.push(':');

            match block_body(value) {
                Some((tag, body)) => {
                    if let Some(tag) = tag {
                        self.out.push(' ');
                        self.out.push_str(&tag.tag.to_string());
                    }
                    self.out.push('\n');
                    let child_indent = match (body, self.style) {
                        (Value::Sequence(_), SeqIndent::Compact) => indent,
                        _ => indent + 2,
                    };
                    self.block(body, child_indent)?;
                }
                None => {
                    let scalar = self.inline(value, indent)?;
                    self.out.push(' ');
                    self.out.push_str(&scalar);
                    self.out.push('\n');
                }
            }
        }
        Ok(())
    }

    fn sequence(&mut self, items: &[Value], indent: usize) -> KioResult<()> {
        for item in items {
            match block_body(item) {
                Some((None, body)) => {
                    // Render the nested block one level deeper, then fold the
                    // dash into the first line's indentation.
                    let mut nested = String::new();
                    Emitter {
                        out: &mut nested,
                        style: self.style,
                    }
                    .block(body, indent + 2)?;
                    pad(self.out, indent);
                    self.out.push_str("- ");
                    self.out.push_str(&nested[indent + 2..]);
                }
                Some((Some(tag), body)) => {
                    pad(self.out, indent);
                    self.out.push_str("- ");
                    self.out.push_str(&tag.tag.to_string());
                    self.out.push('\n');
                    self.block(body, indent + 2)?;
                }
                None => {
                    let scalar = self.inline(item, indent + 2)?;
                    pad(self.out, indent);
                    self.out.push_str("- ");
                    self.out.push_str(&scalar);
                    self.out.push('\n');
                }
            }
        }
        Ok(())
    }

    /// Render a scalar (or empty collection) for use after `key: ` or `- `.
    fn inline(&self, value: &Value, indent: usize) -> KioResult<String> {
        match value {
            Value::Mapping(map) if map.is_empty() => return Ok("{}".to_string()),
            Value::Sequence(items) if items.is_empty() => return Ok("[]".to_string()),
            _ => {}
        }

        let rendered = serde_yaml::to_string(value)?;
        let rendered = rendered.strip_suffix('\n').unwrap_or(&rendered);

        // Block literal bodies come back indented relative to column zero.
        let mut lines = rendered.split('\n');
        let mut text = lines.next().unwrap_or_default().to_string();
        for line in lines {
            text.push('\n');
            if !line.is_empty() {
                pad(&mut text, indent);
                text.push_str(line);
            }
        }
        Ok(text)
    }
}

/// Split a value that must be written as an indented block into its optional
/// tag and body. Scalars and empty collections return `None`.
fn block_body(value: &Value) -> Option<(Option<&TaggedValue>, &Value)> {
    match value {
        Value::Mapping(map) if !map.is_empty() => Some((None, value)),
        Value::Sequence(items) if !items.is_empty() => Some((None, value)),
        Value::Tagged(tagged) => match block_body(&tagged.value) {
            Some((None, body)) => Some((Some(&**tagged), body)),
            _ => None,
        },
        _ => None,
    }
}

fn scalar_key(key: &Value) -> KioResult<String> {
    match key {
        Value::Mapping(_) | Value::Sequence(_) | Value::Tagged(_) => {
            Err(KioError::UnsupportedKey(format!("{key:?}")))
        }
        _ => {
            let rendered = serde_yaml::to_string(key)?;
            let rendered = rendered.trim_end_matches('\n');
            if rendered.contains('\n') {
                return Err(KioError::UnsupportedKey(rendered.to_string()));
            }
            Ok(rendered.to_string())
        }
    }
}

fn pad(out: &mut String, indent: usize) {
    out.extend(std::iter::repeat(' ').take(indent));
}
