//! 进程内协调存储

use crate::store::{
    CoordinationStore, EventType, GetResponse, KeyValue, LeaseId, WatchEvent, WatchOptions, WatchResponse,
    WatchStream,
};
use async_trait::async_trait;
use futures::StreamExt;
use infrastructure_common::{Context, StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

struct LeaseState {
    ttl: Duration,
    expires_at: Instant,
    keys: HashSet<String>,
}

struct WatcherSlot {
    key: String,
    prefix: bool,
    sender: mpsc::UnboundedSender<StoreResult<WatchResponse>>,
}

impl WatcherSlot {
    fn matches(&self, key: &str) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }
}

#[derive(Default)]
struct State {
    revision: i64,
    compact_revision: i64,
    data: BTreeMap<String, KeyValue>,
    history: Vec<(i64, WatchEvent)>,
    watchers: Vec<WatcherSlot>,
    leases: HashMap<LeaseId, LeaseState>,
    next_lease: LeaseId,
}

impl State {
    fn expire_leases(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            debug!("租约已过期: {}", id);
            self.drop_lease(id);
        }
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        let mut keys: Vec<String> = lease.keys.into_iter().collect();
        keys.sort();
        let deleted: Vec<KeyValue> = keys.iter().filter_map(|k| self.data.remove(k)).collect();
        if !deleted.is_empty() {
            self.revision += 1;
            let events = deleted
                .into_iter()
                .map(|kv| self.delete_event(kv.key))
                .collect();
            self.publish(events);
        }
        true
    }

    fn delete_event(&self, key: String) -> WatchEvent {
        WatchEvent {
            event_type: EventType::Delete,
            kv: KeyValue {
                key,
                mod_revision: self.revision,
                ..KeyValue::default()
            },
        }
    }

    fn publish(&mut self, events: Vec<WatchEvent>) {
        for event in &events {
            self.history.push((self.revision, event.clone()));
        }
        let revision = self.revision;
        self.watchers.retain(|watcher| {
            let matched: Vec<WatchEvent> = events
                .iter()
                .filter(|e| watcher.matches(&e.kv.key))
                .cloned()
                .collect();
            if matched.is_empty() {
                return !watcher.sender.is_closed();
            }
            watcher
                .sender
                .send(Ok(WatchResponse {
                    header_revision: revision,
                    compact_revision: 0,
                    canceled: false,
                    events: matched,
                }))
                .is_ok()
        });
    }
}

/// 进程内协调存储
///
/// 语义与 etcd v3 保持一致：全局单调递增的修订版本、按修订版本回放的监听、压缩、
/// 以及到期后删除绑定键的租约。租约在每次访问时惰性检查过期。
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryStore")
            .field("revision", &state.revision)
            .field("compact_revision", &state.compact_revision)
            .field("keys", &state.data.len())
            .field("watchers", &state.watchers.len())
            .field("leases", &state.leases.len())
            .finish()
    }
}

impl MemoryStore {
    /// 创建空的存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前修订版本
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// 压缩指定修订版本之前的历史
    pub fn compact(&self, revision: i64) {
        let mut state = self.state.lock();
        let revision = revision.min(state.revision);
        state.compact_revision = state.compact_revision.max(revision);
        let compact = state.compact_revision;
        state.history.retain(|(rev, _)| *rev >= compact);
        debug!("压缩修订版本: {}", compact);
    }

    /// 断开所有监听流，模拟连接中断
    pub fn disconnect_watchers(&self) {
        let dropped = std::mem::take(&mut self.state.lock().watchers);
        debug!("断开监听流: {}", dropped.len());
    }

    /// 当前有效的租约数量
    pub fn lease_count(&self) -> usize {
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());
        state.leases.len()
    }

    /// 当前打开的监听流数量
    pub fn watcher_count(&self) -> usize {
        let mut state = self.state.lock();
        state.watchers.retain(|w| !w.sender.is_closed());
        state.watchers.len()
    }

    /// 立即使租约过期
    pub fn expire_lease(&self, lease: LeaseId) -> bool {
        self.state.lock().drop_lease(lease)
    }

    fn put_sync(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> StoreResult<i64> {
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());

        let lease = lease.unwrap_or(0);
        if lease != 0 && !state.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound { lease_id: lease });
        }

        state.revision += 1;
        let revision = state.revision;
        let previous = state.data.get(key).cloned();
        if let Some(prev) = &previous {
            if prev.lease != 0 && prev.lease != lease {
                if let Some(old) = state.leases.get_mut(&prev.lease) {
                    old.keys.remove(key);
                }
            }
        }
        if let Some(bound) = state.leases.get_mut(&lease) {
            bound.keys.insert(key.to_string());
        }

        let kv = KeyValue {
            key: key.to_string(),
            value,
            create_revision: previous.as_ref().map_or(revision, |p| p.create_revision),
            mod_revision: revision,
            version: previous.as_ref().map_or(1, |p| p.version + 1),
            lease,
        };
        state.data.insert(key.to_string(), kv.clone());
        state.publish(vec![WatchEvent {
            event_type: EventType::Put,
            kv,
        }]);
        Ok(revision)
    }

    fn delete_sync(&self, key: &str, prefix: bool) -> i64 {
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());

        let keys: Vec<String> = if prefix {
            state
                .data
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key))
                .map(|(k, _)| k.clone())
                .collect()
        } else {
            state.data.contains_key(key).then(|| vec![key.to_string()]).unwrap_or_default()
        };
        if keys.is_empty() {
            return 0;
        }

        state.revision += 1;
        let mut events = Vec::with_capacity(keys.len());
        for k in &keys {
            if let Some(removed) = state.data.remove(k) {
                if let Some(lease) = state.leases.get_mut(&removed.lease) {
                    lease.keys.remove(k);
                }
            }
            events.push(state.delete_event(k.clone()));
        }
        state.publish(events);
        keys.len() as i64
    }

    fn open_watch(&self, key: &str, options: WatchOptions) -> WatchStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();

        if options.start_revision > 0 && options.start_revision < state.compact_revision {
            let _ = sender.send(Ok(WatchResponse {
                header_revision: state.revision,
                compact_revision: state.compact_revision,
                canceled: true,
                events: Vec::new(),
            }));
            drop(sender);
        } else {
            let slot = WatcherSlot {
                key: key.to_string(),
                prefix: options.prefix,
                sender,
            };
            if options.start_revision > 0 {
                let mut replay: BTreeMap<i64, Vec<WatchEvent>> = BTreeMap::new();
                for (rev, event) in &state.history {
                    if *rev >= options.start_revision && slot.matches(&event.kv.key) {
                        replay.entry(*rev).or_default().push(event.clone());
                    }
                }
                for (_, events) in replay {
                    let _ = slot.sender.send(Ok(WatchResponse {
                        header_revision: state.revision,
                        compact_revision: 0,
                        canceled: false,
                        events,
                    }));
                }
            }
            state.watchers.push(slot);
        }

        futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, ctx: &Context, key: &str, prefix: bool) -> StoreResult<GetResponse> {
        ctx.run(async {
            let mut state = self.state.lock();
            state.expire_leases(Instant::now());
            let kvs = if prefix {
                state
                    .data
                    .range(key.to_string()..)
                    .take_while(|(k, _)| k.starts_with(key))
                    .map(|(_, kv)| kv.clone())
                    .collect()
            } else {
                state.data.get(key).cloned().into_iter().collect()
            };
            Ok(GetResponse {
                kvs,
                revision: state.revision,
            })
        })
        .await
    }

    async fn put(&self, ctx: &Context, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> StoreResult<i64> {
        ctx.run(async { self.put_sync(key, value, lease) }).await
    }

    async fn delete(&self, ctx: &Context, key: &str, prefix: bool) -> StoreResult<i64> {
        ctx.run(async { Ok(self.delete_sync(key, prefix)) }).await
    }

    async fn watch(&self, key: &str, options: WatchOptions) -> StoreResult<WatchStream> {
        Ok(self.open_watch(key, options))
    }

    async fn grant_lease(&self, ctx: &Context, ttl: Duration) -> StoreResult<LeaseId> {
        ctx.run(async {
            let mut state = self.state.lock();
            state.next_lease += 1;
            let id = state.next_lease;
            state.leases.insert(
                id,
                LeaseState {
                    ttl,
                    expires_at: Instant::now() + ttl,
                    keys: HashSet::new(),
                },
            );
            Ok(id)
        })
        .await
    }

    async fn keep_alive_once(&self, ctx: &Context, lease: LeaseId) -> StoreResult<Duration> {
        ctx.run(async {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.expire_leases(now);
            let entry = state
                .leases
                .get_mut(&lease)
                .ok_or(StoreError::LeaseNotFound { lease_id: lease })?;
            entry.expires_at = now + entry.ttl;
            Ok(entry.ttl)
        })
        .await
    }

    async fn revoke_lease(&self, ctx: &Context, lease: LeaseId) -> StoreResult<()> {
        ctx.run(async {
            let mut state = self.state.lock();
            if state.drop_lease(lease) {
                Ok(())
            } else {
                Err(StoreError::LeaseNotFound { lease_id: lease })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_revisions() {
        let store = MemoryStore::new();
        let ctx = Context::background();

        let r1 = store.put(&ctx, "/ox/a", b"1".to_vec(), None).await.unwrap();
        let r2 = store.put(&ctx, "/ox/a", b"2".to_vec(), None).await.unwrap();
        assert!(r2 > r1);

        let got = store.get(&ctx, "/ox/a", false).await.unwrap();
        assert_eq!(got.kvs[0].value, b"2");
        assert_eq!(got.kvs[0].create_revision, r1);
        assert_eq!(got.kvs[0].version, 2);

        assert_eq!(store.delete(&ctx, "/ox/a", false).await.unwrap(), 1);
        assert_eq!(store.delete(&ctx, "/ox/a", false).await.unwrap(), 0, "删除不存在的键不是错误");
        assert!(store.get(&ctx, "/ox/a", false).await.unwrap().kvs.is_empty());
    }

    #[tokio::test]
    async fn test_prefix_get_excludes_siblings() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        store.put(&ctx, "/ox/svc/providers/a", b"1".to_vec(), None).await.unwrap();
        store.put(&ctx, "/ox/svc/providers/b", b"2".to_vec(), None).await.unwrap();
        store.put(&ctx, "/ox/svc2/providers/c", b"3".to_vec(), None).await.unwrap();

        let got = store.get(&ctx, "/ox/svc/", true).await.unwrap();
        assert_eq!(got.kvs.len(), 2);
        assert_eq!(got.revision, 3);
    }

    #[tokio::test]
    async fn test_lease_revoke_deletes_bound_keys() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let lease = store.grant_lease(&ctx, Duration::from_secs(10)).await.unwrap();
        store.put(&ctx, "/k", b"v".to_vec(), Some(lease)).await.unwrap();

        store.revoke_lease(&ctx, lease).await.unwrap();
        assert!(store.get(&ctx, "/k", false).await.unwrap().kvs.is_empty());
        assert!(matches!(
            store.put(&ctx, "/k", b"v".to_vec(), Some(lease)).await,
            Err(StoreError::LeaseNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_watch_replay_and_compaction() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        for i in 0..4 {
            store.put(&ctx, "/p/k", vec![i], None).await.unwrap();
        }

        let mut replay = store.watch("/p/", WatchOptions::prefix().from_revision(3)).await.unwrap();
        let first = replay.next().await.unwrap().unwrap();
        assert_eq!(first.events[0].kv.mod_revision, 3, "起始版本包含在回放中");

        store.compact(3);
        let mut compacted = store.watch("/p/", WatchOptions::prefix().from_revision(2)).await.unwrap();
        let resp = compacted.next().await.unwrap().unwrap();
        assert!(resp.canceled);
        assert_eq!(resp.compact_revision, 3);
        assert!(compacted.next().await.is_none());
    }
}
