use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use super::{FindOptions, Filter, Namespace, Record, Store, StoreError, Update, UpdateResult};

#[derive(Debug, Default)]
pub struct OperationCounts {
    pub count: AtomicUsize,
    pub find: AtomicUsize,
    pub update_one: AtomicUsize,
    pub find_one: AtomicUsize,
}

impl OperationCounts {
    #[must_use]
    pub fn snapshot(&self) -> [usize; 4] {
        [
            self.count.load(Ordering::Relaxed),
            self.find.load(Ordering::Relaxed),
            self.update_one.load(Ordering::Relaxed),
            self.find_one.load(Ordering::Relaxed),
        ]
    }
}

// TODO record latencies as well, so a run can report more than call counts
pub struct InstrumentedStore<T: Store> {
    counts: Arc<OperationCounts>,
    inner: T,
}

impl<T: Store> InstrumentedStore<T> {
    pub const fn new(inner: T, counts: Arc<OperationCounts>) -> Self {
        Self { counts, inner }
    }

    pub const fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Store> Store for InstrumentedStore<T> {
    fn count(&self, namespace: &Namespace, filter: &Filter) -> Result<u64, StoreError> {
        self.counts.count.fetch_add(1, Ordering::Relaxed);

        self.inner.count(namespace, filter)
    }

    fn find(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Record>, StoreError> {
        self.counts.find.fetch_add(1, Ordering::Relaxed);

        self.inner.find(namespace, filter, options)
    }

    fn update_one(
        &self,
        namespace: &Namespace,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, StoreError> {
        self.counts.update_one.fetch_add(1, Ordering::Relaxed);

        self.inner.update_one(namespace, filter, update)
    }

    fn find_one(
        &self,
        namespace: &Namespace,
        filter: &Filter,
    ) -> Result<Option<Record>, StoreError> {
        self.counts.find_one.fetch_add(1, Ordering::Relaxed);

        self.inner.find_one(namespace, filter)
    }
}
