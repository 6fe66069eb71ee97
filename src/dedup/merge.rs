use crate::document::Document;
use tracing::debug;

/// Collapses each duplicate cluster into its canonical record
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeResolver;

impl MergeResolver {
    /// Member with the fewest empty fields; ties go to the earliest member
    #[must_use]
    pub fn choose_canonical(pool: &[Document], members: &[usize]) -> Option<usize> {
        members
            .iter()
            .copied()
            .min_by_key(|&i| (pool[i].empty_fields(), i))
    }

    /// One document per component, in component order.
    ///
    /// Non-canonical members are attached to their canonical record as
    /// versions, in pool order. `components` must partition `pool`'s indices.
    #[must_use]
    pub fn resolve(pool: Vec<Document>, components: &[Vec<usize>]) -> Vec<Document> {
        let canonical: Vec<Option<usize>> = components
            .iter()
            .map(|members| Self::choose_canonical(&pool, members))
            .collect();

        let mut slots: Vec<Option<Document>> = pool.into_iter().map(Some).collect();
        let mut merged = Vec::with_capacity(components.len());

        for (members, canonical) in components.iter().zip(canonical) {
            let Some(canonical) = canonical else {
                continue;
            };
            let Some(mut base) = slots.get_mut(canonical).and_then(Option::take) else {
                continue;
            };

            for &member in members.iter().filter(|&&m| m != canonical) {
                if let Some(other) = slots.get_mut(member).and_then(Option::take) {
                    base.add_version(&other);
                }
            }

            if members.len() > 1 {
                debug!(
                    "Merged {} records into {} ({})",
                    members.len(),
                    base.id(),
                    base.title().unwrap_or("untitled")
                );
            }
            merged.push(base);
        }

        merged
    }
}
