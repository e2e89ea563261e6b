use rand::Rng;
use tracing::{debug, info, instrument};

use crate::{
    scenario::SampleEntry,
    store::{FindOptions, Filter, ID_FIELD, Namespace, Store, StoreError, UPDATE_TIME_FIELD},
};

fn window(limit: u64, skip: u64) -> FindOptions {
    FindOptions {
        limit,
        skip,
        projection: Some(vec![ID_FIELD.to_string(), UPDATE_TIME_FIELD.to_string()]),
    }
}

/// Picks up to `max` records starting at a random offset, in the store's id order.
///
/// A window that runs past the end of the collection continues from its start, so the sample
/// always holds `min(max, n)` distinct records.
#[instrument(skip(store, rng), fields(phase = "setup"))]
pub fn sample<S: Store + ?Sized, R: Rng>(
    store: &S,
    namespace: &Namespace,
    max: u64,
    rng: &mut R,
) -> Result<Vec<SampleEntry>, StoreError> {
    let total = store.count(namespace, &Filter::All)?;
    let offset = if total == 0 {
        0
    } else {
        rng.random_range(0..total)
    };
    let wanted = max.min(total);

    info!(total, offset, wanted, "sampling records");

    if wanted == 0 {
        return Ok(vec![]);
    }

    let mut records = store.find(namespace, &Filter::All, &window(wanted, offset))?;

    let remaining = wanted.saturating_sub(records.len() as u64);
    if remaining > 0 {
        debug!(remaining, "sample window wrapped around");

        let wrapped = store.find(namespace, &Filter::All, &window(remaining, 0))?;
        let first_wrapped = records.first().map(|record| record.id);

        records.extend(
            wrapped
                .into_iter()
                .take_while(|record| Some(record.id) != first_wrapped),
        );
    }

    let sample = records
        .into_iter()
        .map(|record| SampleEntry {
            id: record.id,
            update_time: record.update_time,
        })
        .collect::<Vec<_>>();

    for entry in &sample {
        debug!(id = %entry.id, update_time = %entry.update_time, "sampled");
    }

    Ok(sample)
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::store::{Timestamp, in_memory::InMemoryStore};

    fn namespace() -> Namespace {
        Namespace::new("testdb", "testcollection")
    }

    fn store_with(count: u64) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.seed(&namespace(), count, Timestamp::from_millis(1_700_000_000_000));

        store
    }

    #[quickcheck]
    fn sample_size_is_clamped(n: u8, k: u8, seed: u64) -> bool {
        let store = store_with(u64::from(n));
        let mut rng = StdRng::seed_from_u64(seed);

        let sample = sample(&store, &namespace(), u64::from(k), &mut rng).unwrap();
        let distinct = sample.iter().map(|x| x.id).collect::<HashSet<_>>();

        sample.len() == usize::from(k.min(n)) && distinct.len() == sample.len()
    }

    #[test]
    fn empty_collection() {
        let store = InMemoryStore::new();
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(sample(&store, &namespace(), 5, &mut rng).unwrap(), vec![]);
    }

    #[test]
    fn larger_than_collection() {
        let store = store_with(3);
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(sample(&store, &namespace(), 10, &mut rng).unwrap().len(), 3);
    }

    #[test]
    fn window_is_contiguous_and_wraps() {
        let store = store_with(10);
        let all = store
            .find(&namespace(), &Filter::All, &FindOptions::default())
            .unwrap();

        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let sampled = sample(&store, &namespace(), 5, &mut rng).unwrap();

            let start = all
                .iter()
                .position(|record| record.id == sampled[0].id)
                .unwrap();

            for (i, entry) in sampled.iter().enumerate() {
                assert_eq!(entry.id, all[(start + i) % all.len()].id);
                assert_eq!(entry.update_time, all[(start + i) % all.len()].update_time);
            }
        }
    }
}
