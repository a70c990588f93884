//! In-memory multi-version store.
//!
//! Every commit gets the next version number and each key keeps its full
//! version history, so a transaction can read a stable snapshot taken when it
//! began. Writes are buffered in the transaction and validated under the
//! state lock at commit (first committer wins):
//!
//! - [`IsolationLevel::Snapshot`]: fails if another transaction committed a
//!   write to any key in the write set after our snapshot.
//! - [`IsolationLevel::Serializable`]: additionally fails if any key we read
//!   changed after our snapshot.
//!
//! Open transactions pin their snapshot. Whenever a key is written, the
//! versions of that key no pinned snapshot can read any more are dropped.
//!
//! A [`FaultConfig`] can make commits fail on purpose, either with a spurious
//! conflict or with an indeterminate outcome where a coin flip decides
//! whether the writes actually landed.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::trace;

use super::{CommitOutcome, Engine, StoreError, Transaction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum IsolationLevel {
    /// Write-write conflicts only.
    #[default]
    Snapshot,
    /// Read-write and write-write conflicts.
    Serializable,
}

/// Probabilities of injected commit failures.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultConfig {
    pub conflict_rate: f64,
    pub indeterminate_rate: f64,
    /// Fixed seed for reproducible runs; entropy otherwise.
    pub seed: Option<u64>,
}

impl FaultConfig {
    pub fn is_enabled(&self) -> bool {
        self.conflict_rate > 0.0 || self.indeterminate_rate > 0.0
    }
}

/// Shared handle to the store. Clones see the same data.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

struct Shared {
    isolation: IsolationLevel,
    state: Mutex<State>,
    faults: Option<Mutex<FaultInjector>>,
}

#[derive(Default)]
struct State {
    version: u64,
    keys: HashMap<String, Vec<Version>>,
    /// Open snapshots and how many transactions hold each.
    pinned: BTreeMap<u64, usize>,
}

struct Version {
    at: u64,
    value: Value,
}

impl State {
    fn read_at(&self, key: &str, snapshot: u64) -> Option<Value> {
        self.keys
            .get(key)?
            .iter()
            .rev()
            .find(|version| version.at <= snapshot)
            .map(|version| version.value.clone())
    }

    fn changed_since(&self, key: &str, snapshot: u64) -> bool {
        self.keys
            .get(key)
            .and_then(|history| history.last())
            .is_some_and(|latest| latest.at > snapshot)
    }

    fn pin(&mut self) -> u64 {
        *self.pinned.entry(self.version).or_default() += 1;
        self.version
    }

    fn unpin(&mut self, snapshot: u64) {
        if let Entry::Occupied(mut holders) = self.pinned.entry(snapshot) {
            *holders.get_mut() -= 1;
            if *holders.get() == 0 {
                holders.remove();
            }
        }
    }

    fn apply(&mut self, writes: BTreeMap<String, Value>) -> u64 {
        self.version += 1;
        let at = self.version;
        let horizon = self.pinned.keys().next().copied().unwrap_or(at);
        for (key, value) in writes {
            let history = self.keys.entry(key).or_default();
            history.push(Version { at, value });
            prune(history, horizon);
        }
        at
    }
}

/// Keeps the newest version visible at `horizon` and everything after it.
fn prune(history: &mut Vec<Version>, horizon: u64) {
    if let Some(visible) = history.iter().rposition(|version| version.at <= horizon) {
        history.drain(..visible);
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(IsolationLevel::default(), FaultConfig::default())
    }
}

impl MemoryEngine {
    pub fn new(isolation: IsolationLevel, faults: FaultConfig) -> Self {
        let faults = faults
            .is_enabled()
            .then(|| Mutex::new(FaultInjector::new(faults)));
        Self {
            shared: Arc::new(Shared {
                isolation,
                state: Mutex::new(State::default()),
                faults,
            }),
        }
    }

    /// Number of commits that have applied writes so far.
    pub fn version(&self) -> u64 {
        self.shared.state().version
    }
}

impl Shared {
    // Writers only mutate state after validation succeeds, so a poisoned
    // lock still guards consistent data.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll_fault(&self) -> Fault {
        match &self.faults {
            Some(injector) => injector
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .roll(),
            None => Fault::None,
        }
    }
}

impl Engine for MemoryEngine {
    type Txn = MemoryTxn;

    fn begin(&self) -> Result<MemoryTxn, StoreError> {
        let snapshot = self.shared.state().pin();
        Ok(MemoryTxn {
            shared: Arc::clone(&self.shared),
            snapshot,
            released: false,
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
        })
    }
}

/// Transaction against a [`MemoryEngine`] snapshot.
pub struct MemoryTxn {
    shared: Arc<Shared>,
    snapshot: u64,
    /// Set once the snapshot has been unpinned.
    released: bool,
    reads: BTreeSet<String>,
    writes: BTreeMap<String, Value>,
}

impl MemoryTxn {
    fn validate(&self, state: &State) -> bool {
        let written = self.writes.keys();
        let conflicted = match self.shared.isolation {
            IsolationLevel::Snapshot => written
                .into_iter()
                .any(|key| state.changed_since(key, self.snapshot)),
            IsolationLevel::Serializable => written
                .chain(self.reads.iter())
                .any(|key| state.changed_since(key, self.snapshot)),
        };
        !conflicted
    }
}

impl Transaction for MemoryTxn {
    fn get(&mut self, key: &str) -> Result<Option<Value>, StoreError> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        self.reads.insert(key.to_string());
        Ok(self.shared.state().read_at(key, self.snapshot))
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.writes.insert(key.to_string(), value);
        Ok(())
    }

    fn commit(mut self) -> CommitOutcome {
        let fault = self.shared.roll_fault();
        if fault == Fault::Conflict {
            trace!(snapshot = self.snapshot, "injected commit conflict");
            return CommitOutcome::Conflict;
        }

        let shared = Arc::clone(&self.shared);
        let mut state = shared.state();
        state.unpin(self.snapshot);
        self.released = true;
        if !self.validate(&state) {
            return CommitOutcome::Conflict;
        }
        let writes = std::mem::take(&mut self.writes);

        match fault {
            Fault::Indeterminate { applied: false } => {
                trace!(snapshot = self.snapshot, "injected indeterminate commit, dropped");
                CommitOutcome::Indeterminate
            }
            Fault::Indeterminate { applied: true } => {
                if !writes.is_empty() {
                    let at = state.apply(writes);
                    trace!(version = at, "injected indeterminate commit, applied");
                }
                CommitOutcome::Indeterminate
            }
            Fault::None | Fault::Conflict => {
                if !writes.is_empty() {
                    state.apply(writes);
                }
                CommitOutcome::Committed
            }
        }
    }

    fn abort(self) {}
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        if !self.released {
            self.shared.state().unpin(self.snapshot);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Conflict,
    Indeterminate { applied: bool },
}

struct FaultInjector {
    config: FaultConfig,
    rng: StdRng,
}

impl FaultInjector {
    fn new(config: FaultConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    fn roll(&mut self) -> Fault {
        let roll: f64 = self.rng.gen();
        if roll < self.config.conflict_rate {
            Fault::Conflict
        } else if roll < self.config.conflict_rate + self.config.indeterminate_rate {
            Fault::Indeterminate {
                applied: self.rng.gen_bool(0.5),
            }
        } else {
            Fault::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn committed_value(engine: &MemoryEngine, key: &str) -> Option<Value> {
        let mut txn = engine.begin().unwrap();
        let value = txn.get(key).unwrap();
        assert_eq!(txn.commit(), CommitOutcome::Committed);
        value
    }

    fn write(engine: &MemoryEngine, key: &str, value: Value) {
        let mut txn = engine.begin().unwrap();
        txn.put(key, value).unwrap();
        assert_eq!(txn.commit(), CommitOutcome::Committed);
    }

    #[test]
    fn reads_see_own_writes_before_commit() {
        let engine = MemoryEngine::default();
        let mut txn = engine.begin().unwrap();
        assert_eq!(txn.get("x").unwrap(), None);
        txn.put("x", json!(1)).unwrap();
        assert_eq!(txn.get("x").unwrap(), Some(json!(1)));
        assert_eq!(txn.commit(), CommitOutcome::Committed);
        assert_eq!(committed_value(&engine, "x"), Some(json!(1)));
    }

    #[test]
    fn aborted_writes_are_discarded() {
        let engine = MemoryEngine::default();
        let mut txn = engine.begin().unwrap();
        txn.put("x", json!("lost")).unwrap();
        txn.abort();
        assert_eq!(committed_value(&engine, "x"), None);
        assert_eq!(engine.version(), 0);
    }

    #[test]
    fn snapshot_hides_later_commits() {
        let engine = MemoryEngine::default();
        write(&engine, "x", json!(1));

        let mut reader = engine.begin().unwrap();
        write(&engine, "x", json!(2));

        assert_eq!(reader.get("x").unwrap(), Some(json!(1)));
        assert_eq!(reader.commit(), CommitOutcome::Committed);
        assert_eq!(committed_value(&engine, "x"), Some(json!(2)));
    }

    #[test]
    fn first_committer_wins_on_write_write_conflict() {
        let engine = MemoryEngine::default();
        let mut first = engine.begin().unwrap();
        let mut second = engine.begin().unwrap();
        first.put("x", json!("first")).unwrap();
        second.put("x", json!("second")).unwrap();

        assert_eq!(first.commit(), CommitOutcome::Committed);
        assert_eq!(second.commit(), CommitOutcome::Conflict);
        assert_eq!(committed_value(&engine, "x"), Some(json!("first")));
    }

    #[test]
    fn snapshot_isolation_permits_write_skew() {
        let engine = MemoryEngine::new(IsolationLevel::Snapshot, FaultConfig::default());
        write(&engine, "a", json!(1));
        write(&engine, "b", json!(1));

        let mut left = engine.begin().unwrap();
        let mut right = engine.begin().unwrap();
        left.get("b").unwrap();
        left.put("a", json!(0)).unwrap();
        right.get("a").unwrap();
        right.put("b", json!(0)).unwrap();

        assert_eq!(left.commit(), CommitOutcome::Committed);
        assert_eq!(right.commit(), CommitOutcome::Committed);
    }

    #[test]
    fn serializable_rejects_stale_reads() {
        let engine = MemoryEngine::new(IsolationLevel::Serializable, FaultConfig::default());
        write(&engine, "a", json!(1));
        write(&engine, "b", json!(1));

        let mut left = engine.begin().unwrap();
        let mut right = engine.begin().unwrap();
        left.get("b").unwrap();
        left.put("a", json!(0)).unwrap();
        right.get("a").unwrap();
        right.put("b", json!(0)).unwrap();

        assert_eq!(left.commit(), CommitOutcome::Committed);
        assert_eq!(right.commit(), CommitOutcome::Conflict);
    }

    fn history_len(engine: &MemoryEngine, key: &str) -> usize {
        engine.shared.state().keys.get(key).map_or(0, Vec::len)
    }

    #[test]
    fn unreadable_versions_are_pruned() {
        let engine = MemoryEngine::default();
        for value in 0..10 {
            write(&engine, "x", json!(value));
        }
        assert_eq!(history_len(&engine, "x"), 1);
        assert_eq!(committed_value(&engine, "x"), Some(json!(9)));
        assert!(engine.shared.state().pinned.is_empty());
    }

    #[test]
    fn open_snapshot_keeps_its_version() {
        let engine = MemoryEngine::default();
        write(&engine, "x", json!(1));
        let mut reader = engine.begin().unwrap();
        for value in 2..6 {
            write(&engine, "x", json!(value));
        }
        assert_eq!(reader.get("x").unwrap(), Some(json!(1)));
        assert_eq!(history_len(&engine, "x"), 5);

        drop(reader);
        write(&engine, "x", json!(6));
        assert_eq!(history_len(&engine, "x"), 1);
    }

    #[test]
    fn injected_conflicts_apply_nothing() {
        let faults = FaultConfig {
            conflict_rate: 1.0,
            indeterminate_rate: 0.0,
            seed: Some(7),
        };
        let engine = MemoryEngine::new(IsolationLevel::Snapshot, faults);
        let mut txn = engine.begin().unwrap();
        txn.put("x", json!(1)).unwrap();
        assert_eq!(txn.commit(), CommitOutcome::Conflict);
        assert_eq!(engine.version(), 0);
    }

    #[test]
    fn injected_indeterminate_commits_may_or_may_not_apply() {
        let faults = FaultConfig {
            conflict_rate: 0.0,
            indeterminate_rate: 1.0,
            seed: Some(42),
        };
        let engine = MemoryEngine::new(IsolationLevel::Snapshot, faults);
        for round in 0..32 {
            let mut txn = engine.begin().unwrap();
            txn.put(&format!("k{round}"), json!(round)).unwrap();
            assert_eq!(txn.commit(), CommitOutcome::Indeterminate);
        }
        let applied = engine.version();
        assert!(applied > 0 && applied < 32, "applied {applied} of 32");
    }
}
