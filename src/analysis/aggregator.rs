//! Merging of per-stage partial results into one combined result.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use super::types::{Entity, ExtractionResult, Relationship};
use crate::error::{AnalysisError, AnalysisResult};

/// Something the aggregator can deduplicate by identity.
trait Keyed: Clone {
    const KIND: &'static str;

    fn key(&self) -> &str;
    fn kind_type(&self) -> &str;
    fn confidence(&self) -> f64;
}

impl Keyed for Entity {
    const KIND: &'static str = "entity";

    fn key(&self) -> &str {
        &self.id
    }

    fn kind_type(&self) -> &str {
        &self.entity_type
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl Keyed for Relationship {
    const KIND: &'static str = "relationship";

    fn key(&self) -> &str {
        &self.id
    }

    fn kind_type(&self) -> &str {
        &self.relationship_type
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Insert `incoming`, or replace the existing record with the same identity
/// when `incoming` is strictly more confident. Ties keep the existing record.
fn upsert<T: Keyed>(merged: &mut BTreeMap<String, T>, incoming: &T) -> AnalysisResult<()> {
    match merged.entry(incoming.key().to_string()) {
        Entry::Vacant(slot) => {
            slot.insert(incoming.clone());
        }
        Entry::Occupied(mut slot) => {
            let existing = slot.get();
            if !existing
                .kind_type()
                .eq_ignore_ascii_case(incoming.kind_type())
            {
                return Err(AnalysisError::IdentityConflict {
                    kind: T::KIND,
                    id: incoming.key().to_string(),
                    existing_type: existing.kind_type().to_string(),
                    incoming_type: incoming.kind_type().to_string(),
                });
            }
            if incoming.confidence() > existing.confidence() {
                slot.insert(incoming.clone());
            }
        }
    }
    Ok(())
}

/// Combine partial results into one deduplicated result.
///
/// Entities and relationships are keyed by id and emitted in id order. The
/// combined confidence is the mean of the partial results' own confidence
/// scores. Returns `Ok(None)` for empty input, and
/// [`AnalysisError::IdentityConflict`] when one id is reported with two
/// different types.
pub fn combine_results(results: &[ExtractionResult]) -> AnalysisResult<Option<ExtractionResult>> {
    if results.is_empty() {
        return Ok(None);
    }

    let mut entities: BTreeMap<String, Entity> = BTreeMap::new();
    let mut relationships: BTreeMap<String, Relationship> = BTreeMap::new();
    let mut total_confidence = 0.0;

    for result in results {
        for entity in &result.entities {
            upsert(&mut entities, entity)?;
        }
        for relationship in &result.relationships {
            upsert(&mut relationships, relationship)?;
        }
        total_confidence += result.confidence;
    }

    Ok(Some(ExtractionResult {
        entities: entities.into_values().collect(),
        relationships: relationships.into_values().collect(),
        confidence: total_confidence / results.len() as f64,
    }))
}
