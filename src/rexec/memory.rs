//! In-memory agent used by the protocol tests.
//!
//! Mirrors the agent's semantics closely enough for the flow: session locks on
//! acquire, delete-on-invalidate sessions and blocking listings that wake on any
//! write. Every write bumps a single store-wide index.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::api::{
    Agent, AgentSelf, ApiError, BlockingQuery, Consistency, Events, Kv, KvPair, QueryMeta,
    Result, SessionBehavior, SessionEntry, Sessions, UserEvent,
};

const DEFAULT_LIST_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Calls {
    pub create: usize,
    pub destroy: usize,
    pub delete_tree: usize,
    pub fire: usize,
    pub renew: usize,
    pub keys: usize,
    pub stale_reads: usize,
    pub consistent_reads: usize,
}

struct Entry {
    value: Vec<u8>,
    session: Option<String>,
    modify_index: u64,
}

struct State {
    kv: BTreeMap<String, Entry>,
    sessions: HashMap<String, SessionEntry>,
    events: Vec<UserEvent>,
    calls: Calls,
    fail_keys: Option<String>,
    fail_get: Option<String>,
    scripted: VecDeque<(u64, Vec<String>)>,
    list_indexes: Vec<u64>,
    reject_acquire: bool,
    hide_stale: bool,
    agent: AgentSelf,
    servers: Vec<String>,
}

pub(crate) struct MemoryBackend {
    state: Mutex<State>,
    index: watch::Sender<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (index, _) = watch::channel(1);
        Self {
            state: Mutex::new(State {
                kv: BTreeMap::new(),
                sessions: HashMap::new(),
                events: Vec::new(),
                calls: Calls::default(),
                fail_keys: None,
                fail_get: None,
                scripted: VecDeque::new(),
                list_indexes: Vec::new(),
                reject_acquire: false,
                hide_stale: false,
                agent: AgentSelf {
                    datacenter: "dc1".into(),
                    node_name: "laptop".into(),
                },
                servers: Vec::new(),
            }),
            index,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn next_index(&self) -> u64 {
        *self.index.borrow() + 1
    }

    /// Publish a write; wakes blocked listings.
    fn bump(&self) {
        self.index.send_modify(|i| *i += 1);
    }

    /// Plain write with no session, as a node without locks would do.
    pub fn put(&self, key: &str, value: &[u8]) {
        let modify_index = self.next_index();
        self.state().kv.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                session: None,
                modify_index,
            },
        );
        self.bump();
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.state().kv.get(key).map(|e| e.value.clone())
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.state()
            .kv
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Calls {
        self.state().calls
    }

    pub fn session(&self, id: &str) -> Option<SessionEntry> {
        self.state().sessions.get(id).cloned()
    }

    pub fn events(&self) -> Vec<UserEvent> {
        self.state().events.clone()
    }

    /// Make every listing fail with `msg`.
    pub fn fail_keys(&self, msg: &str) {
        self.state().fail_keys = Some(msg.to_string());
    }

    /// Make every read of a single key fail with `msg`.
    pub fn fail_get(&self, msg: &str) {
        self.state().fail_get = Some(msg.to_string());
    }

    /// Queue a canned listing reply. Queued replies are returned in order and
    /// without blocking, ahead of the store's own contents.
    pub fn script_listing(&self, last_index: u64, keys: &[String]) {
        self.state()
            .scripted
            .push_back((last_index, keys.to_vec()));
    }

    /// Cursor passed to each listing so far.
    pub fn list_indexes(&self) -> Vec<u64> {
        self.state().list_indexes.clone()
    }

    pub fn reject_acquire(&self, reject: bool) {
        self.state().reject_acquire = reject;
    }

    /// Stale reads miss every key, as if replication had not caught up.
    pub fn hide_stale(&self, hide: bool) {
        self.state().hide_stale = hide;
    }

    pub fn set_servers(&self, servers: &[&str]) {
        self.state().servers = servers.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_agent(&self, datacenter: &str, node: &str) {
        self.state().agent = AgentSelf {
            datacenter: datacenter.into(),
            node_name: node.into(),
        };
    }

    /// Wait until at least one event has been fired and return the first.
    pub async fn wait_for_event(&self) -> UserEvent {
        let mut rx = self.index.subscribe();
        loop {
            if let Some(ev) = self.state().events.first().cloned() {
                return ev;
            }
            if rx.changed().await.is_err() {
                panic!("backend dropped");
            }
        }
    }
}

#[async_trait]
impl Kv for MemoryBackend {
    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<KvPair>> {
        let mut st = self.state();
        match consistency {
            Consistency::Stale => st.calls.stale_reads += 1,
            Consistency::Consistent => st.calls.consistent_reads += 1,
            Consistency::Default => {}
        }
        if let Some(msg) = &st.fail_get {
            return Err(ApiError::Status {
                status: 500,
                message: msg.clone(),
            });
        }
        if consistency == Consistency::Stale && st.hide_stale {
            return Ok(None);
        }
        Ok(st.kv.get(key).map(|e| KvPair {
            key: key.to_string(),
            value: e.value.clone(),
            session: e.session.clone(),
            modify_index: e.modify_index,
        }))
    }

    async fn acquire(&self, key: &str, value: &[u8], session: &str) -> Result<bool> {
        {
            let st = self.state();
            if st.reject_acquire || !st.sessions.contains_key(session) {
                return Ok(false);
            }
            if let Some(existing) = st.kv.get(key)
                && existing.session.as_deref().is_some_and(|s| s != session)
            {
                return Ok(false);
            }
        }
        let modify_index = self.next_index();
        self.state().kv.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                session: Some(session.to_string()),
                modify_index,
            },
        );
        self.bump();
        Ok(true)
    }

    async fn keys(
        &self,
        prefix: &str,
        _separator: &str,
        query: BlockingQuery,
    ) -> Result<(Vec<String>, QueryMeta)> {
        let mut rx = self.index.subscribe();
        {
            let mut st = self.state();
            st.calls.keys += 1;
            st.list_indexes.push(query.index);
            if let Some(msg) = &st.fail_keys {
                return Err(ApiError::Status {
                    status: 500,
                    message: msg.clone(),
                });
            }
            if let Some((last_index, keys)) = st.scripted.pop_front() {
                return Ok((keys, QueryMeta { last_index }));
            }
        }

        if query.index > 0 {
            let wait = query.wait.unwrap_or(DEFAULT_LIST_WAIT);
            let target = query.index;
            let _ = tokio::time::timeout(wait, async {
                let _ = rx.wait_for(|i| *i > target).await;
            })
            .await;
        }

        let last_index = *self.index.borrow();
        Ok((self.keys_under(prefix), QueryMeta { last_index }))
    }

    async fn delete_tree(&self, prefix: &str) -> Result<()> {
        {
            let mut st = self.state();
            st.calls.delete_tree += 1;
            st.kv.retain(|k, _| !k.starts_with(prefix));
        }
        self.bump();
        Ok(())
    }
}

#[async_trait]
impl Sessions for MemoryBackend {
    async fn create(&self, entry: &SessionEntry) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut st = self.state();
        st.calls.create += 1;
        st.sessions.insert(id.clone(), entry.clone());
        Ok(id)
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        {
            let mut st = self.state();
            st.calls.destroy += 1;
            let Some(entry) = st.sessions.remove(id) else {
                return Ok(());
            };
            match entry.behavior {
                SessionBehavior::Delete => {
                    st.kv.retain(|_, e| e.session.as_deref() != Some(id));
                }
                SessionBehavior::Release => {
                    for e in st.kv.values_mut() {
                        if e.session.as_deref() == Some(id) {
                            e.session = None;
                        }
                    }
                }
            }
        }
        self.bump();
        Ok(())
    }

    async fn renew(&self, id: &str) -> Result<()> {
        let mut st = self.state();
        st.calls.renew += 1;
        if st.sessions.contains_key(id) {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: 404,
                message: format!("session {id} not found"),
            })
        }
    }
}

#[async_trait]
impl Events for MemoryBackend {
    async fn fire(&self, event: &UserEvent) -> Result<String> {
        {
            let mut st = self.state();
            st.calls.fire += 1;
            st.events.push(event.clone());
        }
        self.bump();
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

#[async_trait]
impl Agent for MemoryBackend {
    async fn self_info(&self) -> Result<AgentSelf> {
        Ok(self.state().agent.clone())
    }

    async fn server_nodes(&self) -> Result<Vec<String>> {
        Ok(self.state().servers.clone())
    }
}
