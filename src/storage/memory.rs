//! In-process object store with full precondition enforcement

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ObjectStat, ObjectStore, Preconditions, StoreError, StoreResult, WriteResult};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    generation: u64,
    metageneration: u64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    last_generation: u64,
}

/// Object store held in memory.
///
/// Every write gets a fresh generation; the metageneration starts at 1 and
/// increments on each overwrite of the same path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check(path: &str, current: Option<&StoredObject>, pre: &Preconditions) -> StoreResult<()> {
    if let Some(expected) = pre.if_generation_match {
        let actual = current.map(|o| o.generation).unwrap_or(0);
        if actual != expected {
            return Err(StoreError::PreconditionFailed(path.to_string()));
        }
    }

    if let Some(expected) = pre.if_metageneration_match {
        match current {
            Some(o) if o.metageneration == expected => {}
            _ => return Err(StoreError::PreconditionFailed(path.to_string())),
        }
    }

    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn write(
        &self,
        path: &str,
        body: Vec<u8>,
        preconditions: Preconditions,
    ) -> StoreResult<WriteResult> {
        let mut inner = self.inner.lock();
        check(path, inner.objects.get(path), &preconditions)?;

        inner.last_generation += 1;
        let generation = inner.last_generation;
        let metageneration = inner
            .objects
            .get(path)
            .map(|o| o.metageneration + 1)
            .unwrap_or(1);

        inner.objects.insert(
            path.to_string(),
            StoredObject {
                body,
                generation,
                metageneration,
                updated_at: Utc::now(),
            },
        );

        Ok(WriteResult {
            generation,
            metageneration,
        })
    }

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.inner
            .lock()
            .objects
            .get(path)
            .map(|o| o.body.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn stat(&self, path: &str) -> StoreResult<ObjectStat> {
        self.inner
            .lock()
            .objects
            .get(path)
            .map(|o| ObjectStat {
                generation: o.generation,
                metageneration: o.metageneration,
                size: o.body.len() as u64,
                updated_at: o.updated_at,
            })
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn delete(&self, path: &str, preconditions: Preconditions) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.objects.contains_key(path) {
            return Ok(());
        }
        check(path, inner.objects.get(path), &preconditions)?;
        inner.objects.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_once_precondition() {
        let store = MemoryStore::new();
        let first = store
            .write("a.json", b"1".to_vec(), Preconditions::does_not_exist())
            .await
            .unwrap();
        assert_eq!(first.metageneration, 1);

        let second = store
            .write("a.json", b"2".to_vec(), Preconditions::does_not_exist())
            .await;
        assert!(matches!(second, Err(StoreError::PreconditionFailed(_))));
        assert_eq!(store.read("a.json").await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_metageneration_compare_and_swap() {
        let store = MemoryStore::new();
        store.write("s.json", b"1".to_vec(), Preconditions::none()).await.unwrap();
        let observed = store.stat("s.json").await.unwrap();

        let swapped = store
            .write("s.json", b"2".to_vec(), Preconditions::matches(&observed))
            .await
            .unwrap();
        assert_eq!(swapped.metageneration, 2);
        assert!(swapped.generation > observed.generation);

        // Stale observation loses
        let lost = store
            .write("s.json", b"3".to_vec(), Preconditions::matches(&observed))
            .await;
        assert!(lost.unwrap_err().is_precondition_failed());
        assert_eq!(store.read("s.json").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_metageneration_match_on_missing_object_fails() {
        let store = MemoryStore::new();
        let pre = Preconditions {
            if_generation_match: None,
            if_metageneration_match: Some(1),
        };
        assert!(store.write("x", vec![], pre).await.is_err());
    }

    #[tokio::test]
    async fn test_list_prefix_sorted() {
        let store = MemoryStore::new();
        for name in ["b/2", "a/1", "b/1", "c"] {
            store.write(name, vec![], Preconditions::none()).await.unwrap();
        }
        assert_eq!(store.list("b/").await.unwrap(), vec!["b/1", "b/2"]);
        assert_eq!(store.list("").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok_and_not_found_on_read() {
        let store = MemoryStore::new();
        store.delete("nope", Preconditions::none()).await.unwrap();
        assert!(store.read("nope").await.unwrap_err().is_not_found());
        assert!(store.stat("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_respects_generation() {
        let store = MemoryStore::new();
        let w = store.write("p", vec![1], Preconditions::none()).await.unwrap();
        let stale = Preconditions::generation(w.generation + 10);
        assert!(store.delete("p", stale).await.is_err());
        store.delete("p", Preconditions::generation(w.generation)).await.unwrap();
        assert!(store.is_empty());
    }
}
