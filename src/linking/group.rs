use crate::particles::Particles;

/// A transient set of linked particles.
///
/// Members are ascending particle indices. `min_id` is the smallest stable
/// particle id in the group and is the ordering key for group output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    members: Vec<usize>,
    min_id: u64,
}

impl Group {
    /// `members` must be non-empty; they are sorted here.
    pub fn new(mut members: Vec<usize>, particles: &Particles) -> Self {
        members.sort_unstable();
        let min_id = members
            .iter()
            .map(|&i| particles.id(i))
            .min()
            .unwrap_or(u64::MAX);
        Self { members, min_id }
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn into_members(self) -> Vec<usize> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn min_id(&self) -> u64 {
        self.min_id
    }
}
