use std::collections::BTreeSet;
use std::mem;

use log::warn;
use serde_json::Value;
use tqdm::tqdm;

use crate::data::partition::{AttributeIndexKind, PartitionRecord};
use crate::errors::{Error, Result};

pub const STREET_SECTION_COLLECTION: &str = "streetSection";
const STREET_SECTION_REF: &str = "streetSectionRef";
const PARTITION_NAME: &str = "partitionName";

/// Merges every anchor-attribute collection of the partition into the
/// anchor property maps and returns the street-section partition names
/// encountered on the way (input for the external street-names
/// downloader).
///
/// The index field is removed from each record; the residual record is
/// attached verbatim under the collection's name to every indexed anchor.
/// An index outside the anchor collection is a fatal
/// `MalformedIndexReference`.
pub fn merge_attribute_collections(partition: &mut PartitionRecord) -> Result<BTreeSet<String>> {
    let partition_name = partition.partition_name.clone();
    let mut street_section_refs = BTreeSet::new();

    let collections = mem::take(&mut partition.collections);
    for (collection_name, collection) in collections {
        let Value::Array(entries) = collection else {
            continue;
        };
        let Some(first) = entries.first() else {
            continue;
        };
        let kind = AttributeIndexKind::detect(first);
        let Some(index_field) = kind.field_name() else {
            continue;
        };

        if collection_name == STREET_SECTION_COLLECTION {
            collect_street_section_refs(&entries, &mut street_section_refs);
        }

        for entry in tqdm(entries.into_iter()) {
            let Value::Object(mut record) = entry else {
                continue;
            };
            let Some(index_value) = record.remove(index_field) else {
                continue;
            };
            if record.is_empty() {
                // Nothing left to attach once the index is gone.
                continue;
            }

            let indices = normalize_indices(&index_value, &partition_name, &collection_name)?;
            let residual = Value::Object(record);
            for index in indices {
                attach_residual(
                    partition,
                    &partition_name,
                    kind,
                    &collection_name,
                    index,
                    residual.clone(),
                )?;
            }
        }
    }

    Ok(street_section_refs)
}

/// Index values come as a bare integer or as a list of integers; scalars
/// are wrapped so fan-out is the only code path.
fn normalize_indices(
    index_value: &Value,
    partition_name: &str,
    collection_name: &str,
) -> Result<Vec<usize>> {
    let values = match index_value {
        Value::Array(values) => values.as_slice(),
        scalar => std::slice::from_ref(scalar),
    };

    values
        .iter()
        .map(|value| {
            value.as_u64().map(|index| index as usize).ok_or_else(|| {
                Error::MalformedIndexReference {
                    partition: partition_name.to_string(),
                    collection: collection_name.to_string(),
                    reference: format!("non-integer index value {value}"),
                }
            })
        })
        .collect()
}

fn attach_residual(
    partition: &mut PartitionRecord,
    partition_name: &str,
    kind: AttributeIndexKind,
    collection_name: &str,
    index: usize,
    residual: Value,
) -> Result<()> {
    let (properties, anchor_count) = if kind.targets_segment_anchors() {
        let count = partition.segment_anchor.len();
        (
            partition.segment_anchor.get_mut(index).map(|anchor| &mut anchor.properties),
            count,
        )
    } else {
        let count = partition.node_anchor.len();
        (
            partition.node_anchor.get_mut(index).map(|anchor| &mut anchor.properties),
            count,
        )
    };

    let Some(properties) = properties else {
        return Err(Error::MalformedIndexReference {
            partition: partition_name.to_string(),
            collection: collection_name.to_string(),
            reference: format!("index {index} out of range for {anchor_count} anchors"),
        });
    };

    if properties.insert(collection_name.to_string(), residual).is_some() {
        // Last write wins; make the data loss visible.
        warn!(
            partition = partition_name,
            collection = collection_name,
            anchor_index = index as u64;
            "Attribute collection overwrote an earlier property with the same name"
        );
    }
    Ok(())
}

fn collect_street_section_refs(entries: &[Value], refs: &mut BTreeSet<String>) {
    for entry in entries {
        let Some(partition_name) = entry
            .get(STREET_SECTION_REF)
            .and_then(|section_ref| section_ref.get(PARTITION_NAME))
            .and_then(Value::as_str)
        else {
            continue;
        };
        refs.insert(partition_name.to_string());
    }
}
