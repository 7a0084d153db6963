//! graph.rs
//! Persons and the group entities they belong to.
//! Membership is stored CSR-style: one flat person list per group entity plus
//! a `(start, count)` range per group record.

use super::kind::{EntityId, EntityKind};
use crate::compute::ComputationError;

#[derive(Debug, Clone)]
struct GroupEntity {
    kind: EntityKind,
    /// person index -> group record index
    membership: Vec<u32>,
    members_flat: Vec<u32>,
    member_ranges: Vec<(u32, u32)>,
}

impl GroupEntity {
    #[inline(always)]
    fn members(&self, group: usize) -> &[u32] {
        let (start, count) = self.member_ranges[group];
        &self.members_flat[start as usize..(start + count) as usize]
    }

    fn count(&self) -> usize {
        self.member_ranges.len()
    }
}

/// The entity instance sets of one simulation. Immutable once built.
#[derive(Debug, Clone)]
pub struct EntityGraph {
    person: EntityKind,
    person_count: usize,
    groups: Vec<GroupEntity>,
}

pub struct EntityGraphBuilder {
    graph: EntityGraph,
    error: Option<ComputationError>,
}

impl EntityGraphBuilder {
    /// Adds a group entity with `count` records. `membership[p]` is the record
    /// person `p` belongs to.
    pub fn group(mut self, kind: EntityKind, count: usize, membership: Vec<usize>) -> Self {
        if self.error.is_none() {
            match self.graph.build_group(kind, count, membership) {
                Ok(group) => self.graph.groups.push(group),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    pub fn build(self) -> Result<EntityGraph, ComputationError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.graph),
        }
    }
}

impl EntityGraph {
    pub fn builder(person: EntityKind, person_count: usize) -> EntityGraphBuilder {
        EntityGraphBuilder {
            graph: EntityGraph { person, person_count, groups: Vec::new() },
            error: None,
        }
    }

    fn build_group(&self, kind: EntityKind, count: usize, membership: Vec<usize>) -> Result<GroupEntity, ComputationError> {
        if kind.key == self.person.key || self.groups.iter().any(|g| g.kind.key == kind.key) {
            return Err(ComputationError::InvalidMembership {
                entity: kind.key,
                reason: "entity key is already in use".into(),
            });
        }
        if membership.len() != self.person_count {
            return Err(ComputationError::ShapeMismatch {
                context: format!("membership of '{}'", kind.key),
                expected: self.person_count,
                actual: membership.len(),
            });
        }
        if let Some((person, &group)) = membership.iter().enumerate().find(|(_, &g)| g >= count) {
            return Err(ComputationError::InvalidMembership {
                entity: kind.key,
                reason: format!("person {person} points at record {group} but only {count} exist"),
            });
        }

        // Counting sort keeps members in person order within each record.
        let mut sizes = vec![0u32; count];
        for &g in &membership {
            sizes[g] += 1;
        }
        let mut member_ranges = Vec::with_capacity(count);
        let mut start = 0u32;
        for &size in &sizes {
            member_ranges.push((start, size));
            start += size;
        }
        let mut cursor: Vec<u32> = member_ranges.iter().map(|r| r.0).collect();
        let mut members_flat = vec![0u32; membership.len()];
        for (person, &g) in membership.iter().enumerate() {
            members_flat[cursor[g] as usize] = person as u32;
            cursor[g] += 1;
        }

        Ok(GroupEntity {
            kind,
            membership: membership.into_iter().map(|g| g as u32).collect(),
            members_flat,
            member_ranges,
        })
    }

    fn group(&self, id: EntityId) -> Result<&GroupEntity, ComputationError> {
        if id == EntityId::PERSON {
            return Err(ComputationError::EntityMismatch {
                variable: String::new(),
                expected: "group entity".into(),
                actual: self.person.key.clone(),
            });
        }
        self.groups.get(id.index() - 1).ok_or_else(|| ComputationError::UnknownEntity { name: format!("#{}", id.0) })
    }

    pub fn person_count(&self) -> usize {
        self.person_count
    }

    pub fn entity_count(&self) -> usize {
        self.groups.len() + 1
    }

    pub fn id_of(&self, key: &str) -> Result<EntityId, ComputationError> {
        if key == self.person.key {
            return Ok(EntityId::PERSON);
        }
        self.groups
            .iter()
            .position(|g| g.kind.key == key)
            .map(|i| EntityId::new(i + 1))
            .ok_or_else(|| ComputationError::UnknownEntity { name: key.to_string() })
    }

    pub fn kind(&self, id: EntityId) -> &EntityKind {
        match id.index() {
            0 => &self.person,
            i => &self.groups[i - 1].kind,
        }
    }

    pub fn is_person(&self, id: EntityId) -> bool {
        id == EntityId::PERSON
    }

    /// Number of records of the given entity.
    pub fn count(&self, id: EntityId) -> usize {
        match id.index() {
            0 => self.person_count,
            i => self.groups[i - 1].count(),
        }
    }

    /// Persons of group record `record`, in person order.
    pub fn members_of(&self, group: EntityId, record: usize) -> Result<Vec<usize>, ComputationError> {
        let g = self.group(group)?;
        if record >= g.count() {
            return Err(ComputationError::InvalidMembership {
                entity: g.kind.key.clone(),
                reason: format!("record {record} out of range"),
            });
        }
        Ok(g.members(record).iter().map(|&p| p as usize).collect())
    }

    /// The group record each person belongs to.
    pub fn membership(&self, group: EntityId) -> Result<Vec<usize>, ComputationError> {
        Ok(self.group(group)?.membership.iter().map(|&g| g as usize).collect())
    }

    fn check_person_len(&self, g: &GroupEntity, values: &[f64]) -> Result<(), ComputationError> {
        if values.len() != self.person_count {
            return Err(ComputationError::ShapeMismatch {
                context: format!("reduction onto '{}'", g.kind.key),
                expected: self.person_count,
                actual: values.len(),
            });
        }
        Ok(())
    }

    /// Folds person values into one value per group record, in group order.
    pub fn reduce<F>(&self, group: EntityId, values: &[f64], init: f64, fold: F) -> Result<Vec<f64>, ComputationError>
    where
        F: Fn(f64, f64) -> f64,
    {
        let g = self.group(group)?;
        self.check_person_len(g, values)?;
        Ok((0..g.count())
            .map(|r| g.members(r).iter().fold(init, |acc, &p| fold(acc, values[p as usize])))
            .collect())
    }

    pub fn sum(&self, group: EntityId, values: &[f64]) -> Result<Vec<f64>, ComputationError> {
        self.reduce(group, values, 0.0, |acc, v| acc + v)
    }

    /// Sums the values of members whose `mask` entry is non-zero.
    pub fn sum_where(&self, group: EntityId, values: &[f64], mask: &[f64]) -> Result<Vec<f64>, ComputationError> {
        let g = self.group(group)?;
        self.check_person_len(g, values)?;
        self.check_person_len(g, mask)?;
        Ok((0..g.count())
            .map(|r| {
                g.members(r)
                    .iter()
                    .map(|&p| p as usize)
                    .filter(|&p| mask[p] != 0.0)
                    .map(|p| values[p])
                    .sum()
            })
            .collect())
    }

    /// Largest member value per record; empty records yield 0.
    pub fn max(&self, group: EntityId, values: &[f64]) -> Result<Vec<f64>, ComputationError> {
        let g = self.group(group)?;
        self.check_person_len(g, values)?;
        Ok((0..g.count())
            .map(|r| g.members(r).iter().map(|&p| values[p as usize]).reduce(f64::max).unwrap_or(0.0))
            .collect())
    }

    pub fn member_count(&self, group: EntityId) -> Result<Vec<f64>, ComputationError> {
        let g = self.group(group)?;
        Ok(g.member_ranges.iter().map(|&(_, c)| c as f64).collect())
    }

    /// Broadcasts one value per group record onto each of its persons.
    pub fn project(&self, group: EntityId, values: &[f64]) -> Result<Vec<f64>, ComputationError> {
        let g = self.group(group)?;
        if values.len() != g.count() {
            return Err(ComputationError::ShapeMismatch {
                context: format!("projection from '{}'", g.kind.key),
                expected: g.count(),
                actual: values.len(),
            });
        }
        Ok(g.membership.iter().map(|&r| values[r as usize]).collect())
    }
}
