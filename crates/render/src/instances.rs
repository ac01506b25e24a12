use crate::{RenderError, Result};
use glam::Mat4;
use orrery_common::{EntityType, ViewEntity};

/// Transforms of one entity type. Slots `0..count` are live; the vector may
/// hold stale entries past `count`.
#[derive(Debug, Clone, Default, PartialEq)]
struct Batch {
    transforms: Vec<Mat4>,
    count: usize,
}

/// Proof that an instance was swapped out of its batch. Hand it back to
/// [`InstanceBatches::restore`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "an excluded instance must be restored"]
pub struct Exclusion {
    kind: EntityType,
    slot: usize,
    value: Mat4,
    count_before: usize,
}

impl Exclusion {
    pub fn kind(&self) -> EntityType {
        self.kind
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn transform(&self) -> Mat4 {
        self.value
    }
}

/// Per-type instance arrays rebuilt from the entity snapshot every frame.
///
/// # Invariants
/// - Outside an exclusion, the sum of counts equals the number of entities
///   in the last snapshot.
/// - `exclude` followed by `restore` leaves every batch bit-identical.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceBatches {
    batches: [Batch; EntityType::COUNT],
}

impl InstanceBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: &[ViewEntity]) -> Self {
        let mut batches = Self::new();
        batches.rebuild(entities);
        batches
    }

    /// Regroup the snapshot by type, reusing the arrays.
    pub fn rebuild(&mut self, entities: &[ViewEntity]) {
        for batch in &mut self.batches {
            batch.transforms.clear();
            batch.count = 0;
        }
        for entity in entities {
            let batch = &mut self.batches[entity.kind.index()];
            batch.transforms.push(entity.transform);
            batch.count += 1;
        }
    }

    pub fn count(&self, kind: EntityType) -> usize {
        self.batches[kind.index()].count
    }

    /// Live transforms of one type.
    pub fn transforms(&self, kind: EntityType) -> &[Mat4] {
        let batch = &self.batches[kind.index()];
        &batch.transforms[..batch.count]
    }

    pub fn total(&self) -> usize {
        self.batches.iter().map(|b| b.count).sum()
    }

    /// Largest batch, for sizing instance buffers.
    pub fn max_count(&self) -> usize {
        self.batches.iter().map(|b| b.count).max().unwrap_or(0)
    }

    /// Remove the instance in `slot` by swapping it with the last live one
    /// and shrinking the batch.
    pub fn exclude(&mut self, kind: EntityType, slot: usize) -> Result<Exclusion> {
        let batch = &mut self.batches[kind.index()];
        if slot >= batch.count {
            return Err(RenderError::InstanceBatchInconsistency {
                kind,
                message: format!("slot {slot} outside batch of {}", batch.count),
            });
        }
        let count_before = batch.count;
        let last = batch.count - 1;
        let value = batch.transforms[slot];
        batch.transforms.swap(slot, last);
        batch.count = last;
        Ok(Exclusion {
            kind,
            slot,
            value,
            count_before,
        })
    }

    /// Exclude the instance at `slot`, checking it holds `expected`.
    pub fn exclude_checked(&mut self, kind: EntityType, slot: usize, expected: Mat4) -> Result<Exclusion> {
        match self.transforms(kind).get(slot) {
            Some(found) if *found == expected => self.exclude(kind, slot),
            Some(_) => Err(RenderError::InstanceBatchInconsistency {
                kind,
                message: format!("slot {slot} does not hold the expected transform"),
            }),
            None => Err(RenderError::InstanceBatchInconsistency {
                kind,
                message: format!("slot {slot} outside batch of {}", self.count(kind)),
            }),
        }
    }

    /// Undo an exclusion: grow the batch back and swap the instance into its
    /// original slot.
    pub fn restore(&mut self, exclusion: Exclusion) -> Result<()> {
        let kind = exclusion.kind;
        let batch = &mut self.batches[kind.index()];
        if batch.count + 1 != exclusion.count_before || batch.transforms.len() < exclusion.count_before {
            return Err(RenderError::InstanceBatchInconsistency {
                kind,
                message: format!(
                    "batch holds {} instances, expected {} before restore",
                    batch.count,
                    exclusion.count_before - 1
                ),
            });
        }
        let last = batch.count;
        batch.transforms.swap(exclusion.slot, last);
        batch.transforms[exclusion.slot] = exclusion.value;
        batch.count = exclusion.count_before;
        Ok(())
    }
}

/// Ordinal of `entities[index]` among entities of its own type, which is its
/// slot in the rebuilt batch.
pub fn batch_slot(entities: &[ViewEntity], index: usize) -> Option<usize> {
    let kind = entities.get(index)?.kind;
    Some(entities[..index].iter().filter(|e| e.kind == kind).count())
}
