use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::RwLock,
};

use tracing::{debug, trace};

use crate::store::{
    FindOptions, Filter, ID_FIELD, Namespace, Record, RecordId, Store, StoreError, Timestamp,
    UPDATE_TIME_FIELD, Update, UpdateResult, WriteConcern,
};

type Collection = BTreeMap<RecordId, Record>;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    // TODO: per namespace locks
    collections: RwLock<HashMap<Namespace, Collection>>,
    failing_updates: RwLock<HashSet<RecordId>>,
    write_concern: WriteConcern,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_write_concern(write_concern: WriteConcern) -> Self {
        Self {
            write_concern,
            ..Self::default()
        }
    }

    pub fn insert(&self, namespace: &Namespace, record: Record) {
        self.collections
            .write()
            .unwrap()
            .entry(namespace.clone())
            .or_default()
            .insert(record.id, record);
    }

    /// Inserts `count` records with sequential ids, all holding `update_time`.
    ///
    /// Sequences continue after the highest id in the collection and wrap around to zero. Ids
    /// already present are skipped, never overwritten.
    pub fn seed(&self, namespace: &Namespace, count: u64, update_time: Timestamp) -> Vec<RecordId> {
        let mut collections = self.collections.write().unwrap();
        let collection = collections.entry(namespace.clone()).or_default();
        let first = collection
            .keys()
            .next_back()
            .and_then(|last| sequence_of(last).checked_add(1))
            .unwrap_or(0);

        let ids = (first..=u64::MAX)
            .chain(0..first)
            .map(RecordId::from_sequence)
            .filter(|id| !collection.contains_key(id))
            .take(usize::try_from(count).unwrap_or(usize::MAX))
            .collect::<Vec<_>>();

        for id in &ids {
            collection.insert(*id, Record {
                id: *id,
                update_time,
            });
        }

        debug!(%namespace, count = ids.len(), "seeded collection");

        ids
    }

    pub fn remove(&self, namespace: &Namespace, id: &RecordId) -> Option<Record> {
        self.collections
            .write()
            .unwrap()
            .get_mut(namespace)
            .and_then(|collection| collection.remove(id))
    }

    /// Every following update addressed to `id` fails as if the store went away.
    pub fn fail_updates_for(&self, id: RecordId) {
        self.failing_updates.write().unwrap().insert(id);
    }

    fn filtered<'a>(
        collection: &'a Collection,
        filter: &'a Filter,
    ) -> Box<dyn Iterator<Item = &'a Record> + 'a> {
        match filter {
            Filter::All => Box::new(collection.values()),
            Filter::Id(id) => Box::new(collection.get(id).into_iter()),
        }
    }
}

fn sequence_of(id: &RecordId) -> u64 {
    let bytes = id.as_bytes();
    let mut value = [0; size_of::<u64>()];
    value.copy_from_slice(&bytes[bytes.len() - size_of::<u64>()..]);

    u64::from_be_bytes(value)
}

fn validate_projection(options: &FindOptions) -> Result<(), StoreError> {
    for field in options.projection.iter().flatten() {
        if field != ID_FIELD && field != UPDATE_TIME_FIELD {
            return Err(StoreError::UnknownField(field.clone()));
        }
    }

    Ok(())
}

impl Store for InMemoryStore {
    fn count(&self, namespace: &Namespace, filter: &Filter) -> Result<u64, StoreError> {
        let collections = self.collections.read().unwrap();

        Ok(collections.get(namespace).map_or(0, |collection| {
            Self::filtered(collection, filter).count() as u64
        }))
    }

    fn find(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Record>, StoreError> {
        validate_projection(options)?;

        let collections = self.collections.read().unwrap();
        let Some(collection) = collections.get(namespace) else {
            return Ok(vec![]);
        };

        let limit = if options.limit == 0 {
            usize::MAX
        } else {
            usize::try_from(options.limit).unwrap_or(usize::MAX)
        };
        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);

        Ok(Self::filtered(collection, filter)
            .skip(skip)
            .take(limit)
            .copied()
            .collect())
    }

    fn update_one(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, StoreError> {
        if update.field() != UPDATE_TIME_FIELD {
            return Err(StoreError::UnknownField(update.field().to_string()));
        }

        if let Filter::Id(id) = filter
            && self.failing_updates.read().unwrap().contains(id)
        {
            return Err(StoreError::Unavailable(format!("update of {id} refused")));
        }

        let mut collections = self.collections.write().unwrap();
        let record = collections.get_mut(namespace).and_then(|collection| match filter {
            Filter::All => collection.values_mut().next(),
            Filter::Id(id) => collection.get_mut(id),
        });

        let matched = if let Some(record) = record {
            record.update_time = match update {
                Update::Set { value, .. } => *value,
                Update::Increment { delta, .. } => record.update_time.saturating_add(*delta),
            };

            trace!(id = %record.id, update_time = %record.update_time, "record updated");

            1
        } else {
            0
        };

        Ok(match self.write_concern {
            WriteConcern::Acknowledged => UpdateResult::Acknowledged { matched },
            WriteConcern::Unacknowledged => UpdateResult::Unacknowledged,
        })
    }

    fn find_one(
        &self,
        namespace: &Namespace,
        filter: &Filter,
    ) -> Result<Option<Record>, StoreError> {
        let collections = self.collections.read().unwrap();

        Ok(collections
            .get(namespace)
            .and_then(|collection| Self::filtered(collection, filter).next().copied()))
    }
}
