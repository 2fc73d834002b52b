//! Chain handle
//!
//! Ties the validation core to its collaborators: a `Store` for blocks and
//! state snapshots, a `Pool` of pending transactions, and observers notified
//! after each accepted block or transaction. The handle is constructed
//! explicitly and may be shared between threads; nothing here is global.
//!
//! Storage and observer failures are reported through `anyhow`. Consensus
//! rejections come back as a `ConsensusError` inside the `anyhow::Error` and
//! can be recovered with `downcast_ref`.

use crate::block::{build_block, validate_and_apply_block};
use crate::config::ConsensusParams;
use crate::constants::MAX_HEIGHT_LOOKAHEAD;
use crate::error::ConsensusError;
use crate::state::Snapshot;
use crate::transaction::{check_issuance_fresh, check_tx_inputs, check_tx_outputs_fresh, validate_tx};
use crate::types::{Block, BlockHeader, Hash, Tx};
use anyhow::{anyhow, bail, Result};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Durable block and snapshot storage.
pub trait Store {
    /// Height of the last saved block, 0 when empty.
    fn height(&self) -> Result<u64>;

    fn get_block(&self, height: u64) -> Result<Option<Block>>;

    /// Latest saved state and the height it reflects.
    fn latest_snapshot(&self) -> Result<Option<(Snapshot, u64)>>;

    fn save_block(&mut self, block: &Block) -> Result<()>;

    fn save_snapshot(&mut self, snapshot: &Snapshot, height: u64) -> Result<()>;
}

/// Pending transactions. Contents are untrusted and revalidated before
/// they go into a block.
pub trait Pool {
    fn insert(&mut self, tx: Tx) -> Result<()>;

    fn dump(&self) -> Result<Vec<Tx>>;

    /// Drops transactions that were confirmed or can no longer apply.
    fn clean(&mut self, confirmed: &[Tx], conflicting: &[Tx]) -> Result<()>;
}

/// Notified after the chain commits. Errors are logged and otherwise
/// ignored.
pub trait ChainObserver: Send + Sync {
    fn on_tx(&self, _tx: &Tx) -> Result<()> {
        Ok(())
    }

    fn on_block(&self, _block: &Block, _conflicting: &[Tx]) -> Result<()> {
        Ok(())
    }
}

/// In-memory `Store`.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    blocks: Vec<Block>,
    snapshot: Option<(Snapshot, u64)>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn height(&self) -> Result<u64> {
        Ok(self.blocks.len() as u64)
    }

    fn get_block(&self, height: u64) -> Result<Option<Block>> {
        if height == 0 {
            return Ok(None);
        }
        Ok(self.blocks.get(height as usize - 1).cloned())
    }

    fn latest_snapshot(&self) -> Result<Option<(Snapshot, u64)>> {
        Ok(self.snapshot.clone())
    }

    fn save_block(&mut self, block: &Block) -> Result<()> {
        let expected = self.blocks.len() as u64 + 1;
        if block.height() != expected {
            bail!("cannot save block at height {}, expected {}", block.height(), expected);
        }
        self.blocks.push(block.clone());
        Ok(())
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot, height: u64) -> Result<()> {
        self.snapshot = Some((snapshot.clone(), height));
        Ok(())
    }
}

/// In-memory `Pool` keeping insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemPool {
    txs: Vec<Tx>,
    known: HashSet<Hash>,
}

impl MemPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }
}

impl Pool for MemPool {
    fn insert(&mut self, tx: Tx) -> Result<()> {
        if self.known.insert(tx.hash()) {
            self.txs.push(tx);
        }
        Ok(())
    }

    fn dump(&self) -> Result<Vec<Tx>> {
        Ok(self.txs.clone())
    }

    fn clean(&mut self, confirmed: &[Tx], conflicting: &[Tx]) -> Result<()> {
        let gone: HashSet<Hash> = confirmed
            .iter()
            .chain(conflicting)
            .map(|tx| tx.hash())
            .collect();
        self.txs.retain(|tx| !gone.contains(&tx.hash()));
        self.known.retain(|hash| !gone.contains(hash));
        Ok(())
    }
}

struct ChainState<S, P> {
    store: S,
    pool: P,
    state: Snapshot,
    tip: BlockHeader,
    halted: Option<ConsensusError>,
}

/// A validated chain with its pool and observers.
pub struct Chain<S, P> {
    params: ConsensusParams,
    inner: Mutex<ChainState<S, P>>,
    height_changed: Condvar,
    observers: Vec<Box<dyn ChainObserver>>,
}

impl<S: Store, P: Pool> Chain<S, P> {
    /// Opens the chain held by `store`, or starts a new one at `genesis` if
    /// the store is empty. Issuances are bound to the genesis hash unless
    /// `params` already names an initial block.
    pub fn new(mut store: S, pool: P, mut params: ConsensusParams, genesis: Block) -> Result<Self> {
        if params.initial_block_hash.is_none() {
            params.initial_block_hash = Some(genesis.hash());
        }

        let height = store.height()?;
        let (state, tip) = if height == 0 {
            let mut state = Snapshot::new();
            validate_and_apply_block(&genesis, None, &mut state, &params)?;
            store.save_block(&genesis)?;
            store.save_snapshot(&state, genesis.height())?;
            (state, genesis.header)
        } else {
            let stored = store
                .get_block(1)?
                .ok_or_else(|| anyhow!("store is missing its genesis block"))?;
            if stored.hash() != genesis.hash() {
                bail!("store holds a chain with genesis {}, expected {}", stored.hash(), genesis.hash());
            }
            replay(&store, &params, height)?
        };

        info!("chain opened at height {} ({})", tip.height, tip.hash());
        Ok(Self {
            params,
            inner: Mutex::new(ChainState {
                store,
                pool,
                state,
                tip,
                halted: None,
            }),
            height_changed: Condvar::new(),
            observers: Vec::new(),
        })
    }

    pub fn with_observer(mut self, observer: Box<dyn ChainObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState<S, P>>> {
        self.inner.lock().map_err(|_| anyhow!("chain lock poisoned"))
    }

    pub fn height(&self) -> Result<u64> {
        Ok(self.lock()?.tip.height)
    }

    pub fn tip(&self) -> Result<BlockHeader> {
        Ok(self.lock()?.tip.clone())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.lock()?.state.clone())
    }

    /// Pooled transactions in insertion order.
    pub fn pending(&self) -> Result<Vec<Tx>> {
        self.lock()?.pool.dump()
    }

    /// The fatal error that stopped the chain, if any.
    pub fn halted(&self) -> Result<Option<ConsensusError>> {
        Ok(self.lock()?.halted.clone())
    }

    /// Validates `block` on top of the tip and commits it. Fatal errors
    /// halt the chain; every later `add_block` is refused.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let conflicting = {
            let mut guard = self.lock()?;
            let inner = &mut *guard;
            if let Some(err) = &inner.halted {
                bail!("chain halted at height {}: {}", inner.tip.height, err);
            }

            let prev = inner.tip.clone();
            let mut state = inner.state.clone();
            if let Err(err) = validate_and_apply_block(block, Some(&prev), &mut state, &self.params) {
                if err.is_fatal() {
                    warn!("halting chain at height {}: {}", prev.height, err);
                    inner.halted = Some(err.clone());
                    // waiters give up once the chain halts
                    self.height_changed.notify_all();
                }
                return Err(err.into());
            }

            // memory moves to the new tip only once the store has it
            inner.store.save_block(block)?;
            inner.store.save_snapshot(&state, block.height())?;
            inner.state = state;
            inner.tip = block.header.clone();

            let confirmed: HashSet<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
            let conflicting: Vec<Tx> = inner
                .pool
                .dump()?
                .into_iter()
                .filter(|tx| !confirmed.contains(&tx.hash()))
                .filter(|tx| {
                    check_tx_inputs(tx, &inner.state)
                        .and_then(|()| check_tx_outputs_fresh(tx, &inner.state))
                        .and_then(|()| check_issuance_fresh(tx, &inner.state))
                        .is_err()
                })
                .collect();
            inner.pool.clean(&block.transactions, &conflicting)?;
            conflicting
        };

        self.height_changed.notify_all();
        for observer in &self.observers {
            if let Err(err) = observer.on_block(block, &conflicting) {
                error!("block observer failed at height {}: {:#}", block.height(), err);
            }
        }
        Ok(())
    }

    /// Validates `tx` against the tip state at the tip's time and pools it.
    pub fn add_tx(&self, tx: Tx) -> Result<()> {
        let timestamp = self.lock()?.tip.timestamp;
        self.add_tx_at(tx, timestamp)
    }

    pub fn add_tx_at(&self, tx: Tx, timestamp: u64) -> Result<()> {
        {
            let mut inner = self.lock()?;
            validate_tx(&tx, &inner.state, &self.params, timestamp)?;
            inner.pool.insert(tx.clone())?;
        }
        debug!("pooled tx {}", tx.hash());
        for observer in &self.observers {
            if let Err(err) = observer.on_tx(&tx) {
                error!("tx observer failed for {}: {:#}", tx.hash(), err);
            }
        }
        Ok(())
    }

    /// Builds the next block from the pool, has `sign` produce its
    /// signature script from the header's signature hash, and adds it.
    /// Pooled transactions that can never apply are dropped along the way.
    pub fn generate_block<F>(&self, timestamp: u64, sign: F) -> Result<Block>
    where
        F: FnOnce(&Hash) -> Result<Vec<u8>>,
    {
        let mut block = {
            let mut inner = self.lock()?;
            let candidates = inner.pool.dump()?;
            let built = build_block(&inner.tip, candidates, &inner.state, timestamp, &self.params);

            let stale: Vec<Tx> = built
                .rejected
                .into_iter()
                .filter(|(tx, err)| {
                    debug!("leaving out tx {}: {}", tx.hash(), err);
                    !matches!(err, ConsensusError::TxNotYetValid { .. })
                })
                .map(|(tx, _)| tx)
                .collect();
            inner.pool.clean(&[], &stale)?;
            built.block
        };

        block.header.signature_script = sign(&block.header.hash_for_sig())?;
        self.add_block(&block)?;
        Ok(block)
    }

    /// Blocks until the chain reaches `height`. Returns at once for heights
    /// already reached; heights too far ahead of the tip are refused.
    pub fn wait_for_height(&self, height: u64) -> Result<()> {
        let inner = self.lock()?;
        check_lookahead(inner.tip.height, height)?;
        let inner = self
            .height_changed
            .wait_while(inner, |inner| inner.tip.height < height && inner.halted.is_none())
            .map_err(|_| anyhow!("chain lock poisoned"))?;
        if inner.tip.height < height {
            bail!("chain halted at height {} before reaching {}", inner.tip.height, height);
        }
        Ok(())
    }

    /// Like `wait_for_height`, giving up after `timeout`. Returns whether
    /// the height was reached.
    pub fn wait_for_height_timeout(&self, height: u64, timeout: Duration) -> Result<bool> {
        let inner = self.lock()?;
        check_lookahead(inner.tip.height, height)?;
        let (inner, _) = self
            .height_changed
            .wait_timeout_while(inner, timeout, |inner| {
                inner.tip.height < height && inner.halted.is_none()
            })
            .map_err(|_| anyhow!("chain lock poisoned"))?;
        Ok(inner.tip.height >= height)
    }
}

fn check_lookahead(current: u64, height: u64) -> Result<()> {
    if height > current.saturating_add(MAX_HEIGHT_LOOKAHEAD) {
        bail!(
            "height {} is more than {} blocks beyond the tip at {}",
            height,
            MAX_HEIGHT_LOOKAHEAD,
            current
        );
    }
    Ok(())
}

/// Rebuilds the tip state from the latest snapshot and the blocks after it.
fn replay<S: Store>(store: &S, params: &ConsensusParams, height: u64) -> Result<(Snapshot, BlockHeader)> {
    let (mut state, from) = store.latest_snapshot()?.unwrap_or_default();
    if from > height {
        bail!("snapshot at height {} is ahead of the stored chain at {}", from, height);
    }

    let mut prev = if from == 0 {
        None
    } else {
        let block = store
            .get_block(from)?
            .ok_or_else(|| anyhow!("block {} missing from store", from))?;
        Some(block.header)
    };
    for h in from + 1..=height {
        let block = store
            .get_block(h)?
            .ok_or_else(|| anyhow!("block {} missing from store", h))?;
        validate_and_apply_block(&block, prev.as_ref(), &mut state, params)?;
        prev = Some(block.header);
    }
    let tip = prev.ok_or_else(|| anyhow!("store is missing its genesis block"))?;
    Ok((state, tip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::genesis_block;
    use crate::state::StateView;
    use crate::opcode::OP_TRUE;
    use crate::types::{InputCommitment, IssuanceCommitment, TxData, TxInput, TxOutput};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn genesis() -> Block {
        genesis_block(vec![OP_TRUE], 1_000)
    }

    fn open() -> Chain<MemStore, MemPool> {
        Chain::new(MemStore::new(), MemPool::new(), ConsensusParams::default(), genesis()).unwrap()
    }

    fn unsigned(_: &Hash) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn issue(amount: u64, max_time: u64) -> Tx {
        let issuance = IssuanceCommitment {
            min_time: 0,
            max_time,
            initial_block: genesis().hash(),
            amount,
            issuance_script: vec![OP_TRUE],
            asset_definition: Vec::new(),
        };
        let asset = issuance.asset_id();
        Tx::new(TxData {
            inputs: vec![TxInput::issuance(issuance)],
            outputs: vec![TxOutput::new(asset, amount, vec![OP_TRUE])],
            ..TxData::default()
        })
    }

    #[derive(Default)]
    struct Recorder {
        txs: Mutex<Vec<Hash>>,
        blocks: Mutex<Vec<u64>>,
    }

    impl ChainObserver for Arc<Recorder> {
        fn on_tx(&self, tx: &Tx) -> Result<()> {
            self.txs.lock().unwrap().push(tx.hash());
            Ok(())
        }

        fn on_block(&self, block: &Block, _conflicting: &[Tx]) -> Result<()> {
            self.blocks.lock().unwrap().push(block.height());
            Ok(())
        }
    }

    struct Failing;

    impl ChainObserver for Failing {
        fn on_block(&self, _block: &Block, _conflicting: &[Tx]) -> Result<()> {
            bail!("indexer unavailable")
        }
    }

    #[test]
    fn test_new_chain_starts_at_genesis() {
        let chain = open();
        assert_eq!(chain.height().unwrap(), 1);
        assert_eq!(chain.tip().unwrap(), genesis().header);
        assert_eq!(chain.params().initial_block_hash, Some(genesis().hash()));
        assert_eq!(chain.halted().unwrap(), None);
    }

    #[test]
    fn test_pool_to_block() {
        let recorder = Arc::new(Recorder::default());
        let chain = open()
            .with_observer(Box::new(recorder.clone()))
            .with_observer(Box::new(Failing));
        let tx = issue(50, u64::MAX);
        chain.add_tx(tx.clone()).unwrap();

        let block = chain.generate_block(2_000, unsigned).unwrap();
        assert_eq!(block.height(), 2);
        assert_eq!(block.transactions, vec![tx.clone()]);
        assert_eq!(chain.height().unwrap(), 2);
        assert_eq!(chain.snapshot().unwrap().utxo(&tx.outpoint(0)), Some(tx.outputs[0].commitment()));

        assert_eq!(*recorder.txs.lock().unwrap(), vec![tx.hash()]);
        assert_eq!(*recorder.blocks.lock().unwrap(), vec![2]);

        // confirmed transactions leave the pool
        let empty = chain.generate_block(3_000, unsigned).unwrap();
        assert!(empty.transactions.is_empty());
    }

    #[test]
    fn test_add_tx_rejects_invalid() {
        let chain = open();
        let mut data = issue(50, u64::MAX).into_data();
        data.outputs[0].asset_amount.amount = 51;
        let err = chain.add_tx(Tx::new(data)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConsensusError>(),
            Some(ConsensusError::TxMalformed(_))
        ));
    }

    #[test]
    fn test_expired_pool_entries_dropped() {
        let chain = open();
        let expiring = issue(5, 1_500);
        let mut early = issue(6, u64::MAX).into_data();
        if let InputCommitment::Issuance(issuance) = &mut early.inputs[0].commitment {
            issuance.min_time = 5_000;
        }
        let early = Tx::new(early);
        chain.add_tx_at(expiring, 1_200).unwrap();
        chain.add_tx_at(early.clone(), 6_000).unwrap();

        let block = chain.generate_block(2_000, unsigned).unwrap();
        assert!(block.transactions.is_empty());
        assert_eq!(chain.pending().unwrap(), vec![early.clone()]);

        let block = chain.generate_block(5_000, unsigned).unwrap();
        assert_eq!(block.transactions, vec![early]);
        assert!(chain.pending().unwrap().is_empty());
    }

    #[test]
    fn test_fatal_error_halts() {
        let chain = open();
        let tip = chain.tip().unwrap();
        let mut block = build_block(&tip, vec![], &Snapshot::new(), 2_000, chain.params()).block;
        block.header.commitment.state_root = Hash([3; 32]);

        let err = chain.add_block(&block).unwrap_err();
        assert!(err.downcast_ref::<ConsensusError>().is_some_and(ConsensusError::is_fatal));
        assert!(chain.halted().unwrap().is_some());

        let good = build_block(&tip, vec![], &Snapshot::new(), 2_000, chain.params()).block;
        assert!(chain.add_block(&good).is_err());
        assert_eq!(chain.height().unwrap(), 1);
    }

    #[test]
    fn test_ordinary_rejection_does_not_halt() {
        let chain = open();
        let tip = chain.tip().unwrap();
        let mut block = build_block(&tip, vec![], &Snapshot::new(), 2_000, chain.params()).block;
        block.header.height = 5;
        assert!(chain.add_block(&block).is_err());
        assert_eq!(chain.halted().unwrap(), None);
        chain.generate_block(2_000, unsigned).unwrap();
    }

    #[test]
    fn test_reopen_replays_store() {
        let chain = open();
        chain.add_tx(issue(7, u64::MAX)).unwrap();
        chain.generate_block(2_000, unsigned).unwrap();
        chain.generate_block(3_000, unsigned).unwrap();
        let state = chain.snapshot().unwrap();
        let inner = chain.inner.into_inner().unwrap();

        let mut store = inner.store;
        store.snapshot = None;
        let reopened = Chain::new(store, MemPool::new(), ConsensusParams::default(), genesis()).unwrap();
        assert_eq!(reopened.height().unwrap(), 3);
        assert_eq!(reopened.snapshot().unwrap(), state);

        let other = genesis_block(vec![OP_TRUE], 5);
        let store = reopened.inner.into_inner().unwrap().store;
        assert!(Chain::new(store, MemPool::new(), ConsensusParams::default(), other).is_err());
    }

    /// `MemStore` whose block writes can be switched off.
    struct FlakyStore {
        store: MemStore,
        down: Arc<AtomicBool>,
    }

    impl Store for FlakyStore {
        fn height(&self) -> Result<u64> {
            self.store.height()
        }

        fn get_block(&self, height: u64) -> Result<Option<Block>> {
            self.store.get_block(height)
        }

        fn latest_snapshot(&self) -> Result<Option<(Snapshot, u64)>> {
            self.store.latest_snapshot()
        }

        fn save_block(&mut self, block: &Block) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                bail!("disk full");
            }
            self.store.save_block(block)
        }

        fn save_snapshot(&mut self, snapshot: &Snapshot, height: u64) -> Result<()> {
            self.store.save_snapshot(snapshot, height)
        }
    }

    #[test]
    fn test_store_failure_keeps_tip_state() {
        let down = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            store: MemStore::new(),
            down: Arc::clone(&down),
        };
        let chain = Chain::new(store, MemPool::new(), ConsensusParams::default(), genesis()).unwrap();
        let tx = issue(9, u64::MAX);
        chain.add_tx(tx.clone()).unwrap();

        down.store(true, Ordering::SeqCst);
        let err = chain.generate_block(2_000, unsigned).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(chain.height().unwrap(), 1);
        assert_eq!(chain.snapshot().unwrap().utxo_count(), 0);
        assert_eq!(chain.halted().unwrap(), None);
        assert_eq!(chain.pending().unwrap(), vec![tx.clone()]);

        down.store(false, Ordering::SeqCst);
        let block = chain.generate_block(2_000, unsigned).unwrap();
        assert_eq!(block.transactions, vec![tx]);
        assert_eq!(chain.snapshot().unwrap().utxo_count(), 1);
    }

    #[test]
    fn test_halt_wakes_waiters() {
        let chain = Arc::new(open());
        let waiter = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || chain.wait_for_height(2))
        };
        let timed = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || chain.wait_for_height_timeout(2, Duration::from_secs(60)))
        };
        // let both threads reach the wait
        thread::sleep(Duration::from_millis(50));

        let tip = chain.tip().unwrap();
        let mut block = build_block(&tip, vec![], &Snapshot::new(), 2_000, chain.params()).block;
        block.header.commitment.state_root = Hash([3; 32]);
        assert!(chain.add_block(&block).is_err());

        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.to_string().contains("halted"));
        assert!(!timed.join().unwrap().unwrap());

        // a wait started after the halt returns at once
        assert!(chain.wait_for_height(2).is_err());
    }

    #[test]
    fn test_wait_for_height() {
        let chain = Arc::new(open());
        chain.wait_for_height(0).unwrap();
        chain.wait_for_height(1).unwrap();
        assert!(chain.wait_for_height(1 + MAX_HEIGHT_LOOKAHEAD + 1).is_err());
        assert!(!chain.wait_for_height_timeout(2, Duration::from_millis(10)).unwrap());

        let waiter = {
            let chain = Arc::clone(&chain);
            thread::spawn(move || chain.wait_for_height(3))
        };
        chain.generate_block(2_000, unsigned).unwrap();
        chain.generate_block(3_000, unsigned).unwrap();
        waiter.join().unwrap().unwrap();
        assert!(chain.wait_for_height_timeout(3, Duration::from_millis(10)).unwrap());
    }
}
