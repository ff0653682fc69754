//! Compact binary encoding for mutations and write batches.
//!
//! Integers are LEB128 varints (zig-zag for signed values), strings are
//! length-prefixed UTF-8. Decoding is exact: `decode(encode(m)) == m`.

use super::{DeleteMode, Mutation, MutationOp};
use crate::model::{MetadataEntry, PropertyKey, PropertyValue};
use crate::security::Visibility;
use crate::types::{Direction, ElementId, ElementType, PenumbraError, Result, Timestamp};

const TYPE_NULL: u8 = 0;
const TYPE_BOOL: u8 = 1;
const TYPE_INT: u8 = 2;
const TYPE_FLOAT: u8 = 3;
const TYPE_STR: u8 = 4;
const TYPE_BYTES: u8 = 5;
const TYPE_DATETIME: u8 = 6;
const TYPE_DATE: u8 = 7;

const OP_UPDATE_VERTEX: u8 = 1;
const OP_UPDATE_EDGE: u8 = 2;
const OP_SET_PROPERTY: u8 = 3;
const OP_SET_PROPERTY_METADATA: u8 = 4;
const OP_PROPERTY_DELETE: u8 = 5;
const OP_PROPERTY_SOFT_DELETE: u8 = 6;
const OP_MARK_HIDDEN: u8 = 7;
const OP_MARK_VISIBLE: u8 = 8;
const OP_MARK_PROPERTY_HIDDEN: u8 = 9;
const OP_MARK_PROPERTY_VISIBLE: u8 = 10;
const OP_ALTER_ELEMENT_VISIBILITY: u8 = 11;
const OP_ALTER_PROPERTY_VISIBILITY: u8 = 12;
const OP_ALTER_EDGE_LABEL: u8 = 13;
const OP_ADD_EDGE_TO_VERTEX: u8 = 14;
const OP_DELETE_EDGE_TO_VERTEX: u8 = 15;
const OP_SET_EXTENDED_DATA: u8 = 16;
const OP_DELETE_EXTENDED_DATA: u8 = 17;
const OP_DELETE: u8 = 18;

/// One element's write batch, as persisted by a journal.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedBatch {
    /// Element kind.
    pub element_type: ElementType,
    /// Element id.
    pub id: ElementId,
    /// Shared timestamp of every op in the batch.
    pub timestamp: Timestamp,
    /// Operations in append order.
    pub ops: Vec<MutationOp>,
}

/// Appends the encoding of one mutation to `out`.
pub fn encode_mutation(mutation: &Mutation, out: &mut Vec<u8>) {
    write_var_u64(mutation.timestamp, out);
    encode_op(&mutation.op, out);
}

/// Decodes one mutation starting at `*cursor`, advancing it.
pub fn decode_mutation(buf: &[u8], cursor: &mut usize) -> Result<Mutation> {
    let timestamp = read_var_u64(buf, cursor)?;
    let op = decode_op(buf, cursor)?;
    Ok(Mutation { timestamp, op })
}

/// Encodes a write batch for one element.
pub fn encode_batch(
    element_type: ElementType,
    id: &ElementId,
    timestamp: Timestamp,
    ops: &[MutationOp],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + ops.len() * 24);
    out.push(element_type.as_char() as u8);
    write_str(id.as_str(), &mut out);
    write_var_u64(timestamp, &mut out);
    write_var_u64(ops.len() as u64, &mut out);
    for op in ops {
        encode_op(op, &mut out);
    }
    out
}

/// Decodes a batch produced by [`encode_batch`]. Trailing bytes are corruption.
pub fn decode_batch(buf: &[u8]) -> Result<EncodedBatch> {
    let mut cursor = 0usize;
    let tag = read_u8(buf, &mut cursor)?;
    let element_type = ElementType::from_char(tag as char)
        .ok_or(PenumbraError::Corruption("unknown element type tag"))?;
    let id = ElementId::new(read_string(buf, &mut cursor)?);
    let timestamp = read_var_u64(buf, &mut cursor)?;
    let count = read_var_u64(buf, &mut cursor)? as usize;
    let mut ops = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        ops.push(decode_op(buf, &mut cursor)?);
    }
    if cursor != buf.len() {
        return Err(PenumbraError::Corruption("trailing bytes after batch"));
    }
    Ok(EncodedBatch {
        element_type,
        id,
        timestamp,
        ops,
    })
}

/// Encodes the per-element batches of one write sharing `timestamp`; a
/// journal frame holds exactly one write.
pub fn encode_write(
    timestamp: Timestamp,
    batches: &[(ElementType, &ElementId, &[MutationOp])],
) -> Vec<u8> {
    let mut out = Vec::new();
    write_var_u64(batches.len() as u64, &mut out);
    for (element_type, id, ops) in batches {
        write_bytes(&encode_batch(*element_type, id, timestamp, ops), &mut out);
    }
    out
}

/// Decodes a write produced by [`encode_write`].
pub fn decode_write(buf: &[u8]) -> Result<Vec<EncodedBatch>> {
    let mut cursor = 0usize;
    let count = read_var_u64(buf, &mut cursor)? as usize;
    let mut batches = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let len = read_var_u64(buf, &mut cursor)? as usize;
        batches.push(decode_batch(take(buf, &mut cursor, len)?)?);
    }
    if cursor != buf.len() {
        return Err(PenumbraError::Corruption("trailing bytes after write"));
    }
    Ok(batches)
}

fn encode_op(op: &MutationOp, out: &mut Vec<u8>) {
    match op {
        MutationOp::UpdateVertex { visibility } => {
            out.push(OP_UPDATE_VERTEX);
            write_str(visibility.as_str(), out);
        }
        MutationOp::UpdateEdge {
            label,
            out_vertex_id,
            in_vertex_id,
            visibility,
        } => {
            out.push(OP_UPDATE_EDGE);
            write_str(label, out);
            write_str(out_vertex_id.as_str(), out);
            write_str(in_vertex_id.as_str(), out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::SetProperty {
            property,
            value,
            metadata,
        } => {
            out.push(OP_SET_PROPERTY);
            write_property_key(property, out);
            write_value(value, out);
            write_var_u64(metadata.len() as u64, out);
            for entry in metadata {
                write_metadata(entry, out);
            }
        }
        MutationOp::SetPropertyMetadata { property, entry } => {
            out.push(OP_SET_PROPERTY_METADATA);
            write_property_key(property, out);
            write_metadata(entry, out);
        }
        MutationOp::PropertyDelete { property } => {
            out.push(OP_PROPERTY_DELETE);
            write_property_key(property, out);
        }
        MutationOp::PropertySoftDelete { property } => {
            out.push(OP_PROPERTY_SOFT_DELETE);
            write_property_key(property, out);
        }
        MutationOp::MarkHidden { visibility } => {
            out.push(OP_MARK_HIDDEN);
            write_str(visibility.as_str(), out);
        }
        MutationOp::MarkVisible { visibility } => {
            out.push(OP_MARK_VISIBLE);
            write_str(visibility.as_str(), out);
        }
        MutationOp::MarkPropertyHidden {
            property,
            visibility,
        } => {
            out.push(OP_MARK_PROPERTY_HIDDEN);
            write_property_key(property, out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::MarkPropertyVisible {
            property,
            visibility,
        } => {
            out.push(OP_MARK_PROPERTY_VISIBLE);
            write_property_key(property, out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::AlterElementVisibility {
            previous,
            visibility,
        } => {
            out.push(OP_ALTER_ELEMENT_VISIBILITY);
            write_str(previous.as_str(), out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::AlterPropertyVisibility {
            property,
            visibility,
        } => {
            out.push(OP_ALTER_PROPERTY_VISIBILITY);
            write_property_key(property, out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::AlterEdgeLabel { label, visibility } => {
            out.push(OP_ALTER_EDGE_LABEL);
            write_str(label, out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::AddEdgeToVertex {
            edge_id,
            label,
            other_vertex_id,
            direction,
            visibility,
        } => {
            out.push(OP_ADD_EDGE_TO_VERTEX);
            write_edge_projection(edge_id, label, other_vertex_id, *direction, visibility, out);
        }
        MutationOp::DeleteEdgeToVertex {
            edge_id,
            label,
            other_vertex_id,
            direction,
            visibility,
        } => {
            out.push(OP_DELETE_EDGE_TO_VERTEX);
            write_edge_projection(edge_id, label, other_vertex_id, *direction, visibility, out);
        }
        MutationOp::SetExtendedData {
            table,
            row,
            column,
            value,
            visibility,
        } => {
            out.push(OP_SET_EXTENDED_DATA);
            write_str(table, out);
            write_str(row, out);
            write_str(column, out);
            write_value(value, out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::DeleteExtendedData {
            table,
            row,
            column,
            visibility,
        } => {
            out.push(OP_DELETE_EXTENDED_DATA);
            write_str(table, out);
            write_str(row, out);
            write_str(column, out);
            write_str(visibility.as_str(), out);
        }
        MutationOp::Delete { mode, visibility } => {
            out.push(OP_DELETE);
            out.push(match mode {
                DeleteMode::Hard => 0,
                DeleteMode::Soft => 1,
            });
            write_str(visibility.as_str(), out);
        }
    }
}

fn decode_op(buf: &[u8], cursor: &mut usize) -> Result<MutationOp> {
    let tag = read_u8(buf, cursor)?;
    let op = match tag {
        OP_UPDATE_VERTEX => MutationOp::UpdateVertex {
            visibility: read_visibility(buf, cursor)?,
        },
        OP_UPDATE_EDGE => MutationOp::UpdateEdge {
            label: read_string(buf, cursor)?,
            out_vertex_id: ElementId::new(read_string(buf, cursor)?),
            in_vertex_id: ElementId::new(read_string(buf, cursor)?),
            visibility: read_visibility(buf, cursor)?,
        },
        OP_SET_PROPERTY => {
            let property = read_property_key(buf, cursor)?;
            let value = read_value(buf, cursor)?;
            let count = read_var_u64(buf, cursor)? as usize;
            let mut metadata = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                metadata.push(read_metadata(buf, cursor)?);
            }
            MutationOp::SetProperty {
                property,
                value,
                metadata,
            }
        }
        OP_SET_PROPERTY_METADATA => MutationOp::SetPropertyMetadata {
            property: read_property_key(buf, cursor)?,
            entry: read_metadata(buf, cursor)?,
        },
        OP_PROPERTY_DELETE => MutationOp::PropertyDelete {
            property: read_property_key(buf, cursor)?,
        },
        OP_PROPERTY_SOFT_DELETE => MutationOp::PropertySoftDelete {
            property: read_property_key(buf, cursor)?,
        },
        OP_MARK_HIDDEN => MutationOp::MarkHidden {
            visibility: read_visibility(buf, cursor)?,
        },
        OP_MARK_VISIBLE => MutationOp::MarkVisible {
            visibility: read_visibility(buf, cursor)?,
        },
        OP_MARK_PROPERTY_HIDDEN => MutationOp::MarkPropertyHidden {
            property: read_property_key(buf, cursor)?,
            visibility: read_visibility(buf, cursor)?,
        },
        OP_MARK_PROPERTY_VISIBLE => MutationOp::MarkPropertyVisible {
            property: read_property_key(buf, cursor)?,
            visibility: read_visibility(buf, cursor)?,
        },
        OP_ALTER_ELEMENT_VISIBILITY => MutationOp::AlterElementVisibility {
            previous: read_visibility(buf, cursor)?,
            visibility: read_visibility(buf, cursor)?,
        },
        OP_ALTER_PROPERTY_VISIBILITY => MutationOp::AlterPropertyVisibility {
            property: read_property_key(buf, cursor)?,
            visibility: read_visibility(buf, cursor)?,
        },
        OP_ALTER_EDGE_LABEL => MutationOp::AlterEdgeLabel {
            label: read_string(buf, cursor)?,
            visibility: read_visibility(buf, cursor)?,
        },
        OP_ADD_EDGE_TO_VERTEX | OP_DELETE_EDGE_TO_VERTEX => {
            let edge_id = ElementId::new(read_string(buf, cursor)?);
            let label = read_string(buf, cursor)?;
            let other_vertex_id = ElementId::new(read_string(buf, cursor)?);
            let direction = match read_u8(buf, cursor)? {
                0 => Direction::Out,
                1 => Direction::In,
                2 => Direction::Both,
                _ => return Err(PenumbraError::Corruption("invalid edge direction")),
            };
            let visibility = read_visibility(buf, cursor)?;
            if tag == OP_ADD_EDGE_TO_VERTEX {
                MutationOp::AddEdgeToVertex {
                    edge_id,
                    label,
                    other_vertex_id,
                    direction,
                    visibility,
                }
            } else {
                MutationOp::DeleteEdgeToVertex {
                    edge_id,
                    label,
                    other_vertex_id,
                    direction,
                    visibility,
                }
            }
        }
        OP_SET_EXTENDED_DATA => MutationOp::SetExtendedData {
            table: read_string(buf, cursor)?,
            row: read_string(buf, cursor)?,
            column: read_string(buf, cursor)?,
            value: read_value(buf, cursor)?,
            visibility: read_visibility(buf, cursor)?,
        },
        OP_DELETE_EXTENDED_DATA => MutationOp::DeleteExtendedData {
            table: read_string(buf, cursor)?,
            row: read_string(buf, cursor)?,
            column: read_string(buf, cursor)?,
            visibility: read_visibility(buf, cursor)?,
        },
        OP_DELETE => {
            let mode = match read_u8(buf, cursor)? {
                0 => DeleteMode::Hard,
                1 => DeleteMode::Soft,
                _ => return Err(PenumbraError::Corruption("invalid delete mode")),
            };
            MutationOp::Delete {
                mode,
                visibility: read_visibility(buf, cursor)?,
            }
        }
        _ => return Err(PenumbraError::Corruption("unknown mutation tag")),
    };
    Ok(op)
}

fn write_edge_projection(
    edge_id: &ElementId,
    label: &str,
    other_vertex_id: &ElementId,
    direction: Direction,
    visibility: &Visibility,
    out: &mut Vec<u8>,
) {
    write_str(edge_id.as_str(), out);
    write_str(label, out);
    write_str(other_vertex_id.as_str(), out);
    out.push(match direction {
        Direction::Out => 0,
        Direction::In => 1,
        Direction::Both => 2,
    });
    write_str(visibility.as_str(), out);
}

fn write_property_key(key: &PropertyKey, out: &mut Vec<u8>) {
    write_str(&key.key, out);
    write_str(&key.name, out);
    write_str(key.visibility.as_str(), out);
}

fn read_property_key(buf: &[u8], cursor: &mut usize) -> Result<PropertyKey> {
    Ok(PropertyKey {
        key: read_string(buf, cursor)?,
        name: read_string(buf, cursor)?,
        visibility: read_visibility(buf, cursor)?,
    })
}

fn write_metadata(entry: &MetadataEntry, out: &mut Vec<u8>) {
    write_str(&entry.key, out);
    write_value(&entry.value, out);
    write_str(entry.visibility.as_str(), out);
}

fn read_metadata(buf: &[u8], cursor: &mut usize) -> Result<MetadataEntry> {
    Ok(MetadataEntry {
        key: read_string(buf, cursor)?,
        value: read_value(buf, cursor)?,
        visibility: read_visibility(buf, cursor)?,
    })
}

fn write_value(value: &PropertyValue, out: &mut Vec<u8>) {
    match value {
        PropertyValue::Null => out.push(TYPE_NULL),
        PropertyValue::Bool(v) => {
            out.push(TYPE_BOOL);
            out.push(u8::from(*v));
        }
        PropertyValue::Int(v) => {
            out.push(TYPE_INT);
            write_var_i64(*v, out);
        }
        PropertyValue::Float(v) => {
            out.push(TYPE_FLOAT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        PropertyValue::Str(s) => {
            out.push(TYPE_STR);
            write_str(s, out);
        }
        PropertyValue::Bytes(b) => {
            out.push(TYPE_BYTES);
            write_bytes(b, out);
        }
        PropertyValue::DateTime(v) => {
            out.push(TYPE_DATETIME);
            write_var_i64(*v, out);
        }
        PropertyValue::Date(v) => {
            out.push(TYPE_DATE);
            write_var_i64(*v, out);
        }
    }
}

fn read_value(buf: &[u8], cursor: &mut usize) -> Result<PropertyValue> {
    let tag = read_u8(buf, cursor)?;
    let value = match tag {
        TYPE_NULL => PropertyValue::Null,
        TYPE_BOOL => match read_u8(buf, cursor)? {
            0 => PropertyValue::Bool(false),
            1 => PropertyValue::Bool(true),
            _ => return Err(PenumbraError::Corruption("invalid bool encoding")),
        },
        TYPE_INT => PropertyValue::Int(read_var_i64(buf, cursor)?),
        TYPE_FLOAT => {
            let bytes = take(buf, cursor, 8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            PropertyValue::Float(f64::from_le_bytes(arr))
        }
        TYPE_STR => PropertyValue::Str(read_string(buf, cursor)?),
        TYPE_BYTES => {
            let len = read_var_u64(buf, cursor)? as usize;
            PropertyValue::Bytes(take(buf, cursor, len)?.to_vec())
        }
        TYPE_DATETIME => PropertyValue::DateTime(read_var_i64(buf, cursor)?),
        TYPE_DATE => PropertyValue::Date(read_var_i64(buf, cursor)?),
        _ => return Err(PenumbraError::Corruption("unknown property value tag")),
    };
    Ok(value)
}

fn write_str(s: &str, out: &mut Vec<u8>) {
    write_bytes(s.as_bytes(), out);
}

fn write_bytes(b: &[u8], out: &mut Vec<u8>) {
    write_var_u64(b.len() as u64, out);
    out.extend_from_slice(b);
}

fn read_string(buf: &[u8], cursor: &mut usize) -> Result<String> {
    let len = read_var_u64(buf, cursor)? as usize;
    let bytes = take(buf, cursor, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| PenumbraError::Corruption("invalid utf-8"))
}

fn read_visibility(buf: &[u8], cursor: &mut usize) -> Result<Visibility> {
    read_string(buf, cursor).map(Visibility::from)
}

fn take<'a>(buf: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or(PenumbraError::Corruption("length exceeds buffer"))?;
    let slice = &buf[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_u8(buf: &[u8], cursor: &mut usize) -> Result<u8> {
    Ok(take(buf, cursor, 1)?[0])
}

fn write_var_u64(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

fn write_var_i64(v: i64, out: &mut Vec<u8>) {
    let zigzag = ((v << 1) ^ (v >> 63)) as u64;
    write_var_u64(zigzag, out);
}

fn read_var_u64(buf: &[u8], cursor: &mut usize) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for _ in 0..10 {
        if *cursor >= buf.len() {
            return Err(PenumbraError::Corruption("varint truncated"));
        }
        let byte = buf[*cursor];
        *cursor += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if (byte & 0x80) == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(PenumbraError::Corruption("varint too long"))
}

fn read_var_i64(buf: &[u8], cursor: &mut usize) -> Result<i64> {
    let raw = read_var_u64(buf, cursor)?;
    Ok(((raw >> 1) as i64) ^ (-((raw & 1) as i64)))
}
