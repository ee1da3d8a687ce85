//! Assembles block templates from the mempool.
//!
//! Runs as a small channel-driven service so the selection cache has a
//! single owner; RPC, the work engine and the CPU miner all talk to it
//! through the cloneable controller.

use crate::block_template::{BlockTemplate, TemplateEntry};
use crate::config::MinerConfig;
use crate::error::MinerError;
use ember_core::difficulty::compact_to_target;
use ember_core::service::{Request, DEFAULT_CHANNEL_SIZE, SIGNAL_CHANNEL_SIZE};
use ember_hash::H256;
use ember_pool::TransactionPool;
use ember_traits::{ChainProvider, ThresholdState};
use ember_util::Mutex;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::{debug, error};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Version field with the top bits set per BIP9.
const VERSIONBITS_TOP: u32 = 0x2000_0000;

/// Weight and sigops held back for the coinbase.
const COINBASE_WEIGHT_RESERVE: u64 = 4_000;
const COINBASE_SIGOPS_RESERVE: u64 = 400;

/// A cached selection goes stale after this many milliseconds even if the
/// mempool is quiet.
const TEMPLATE_TIMEOUT: u64 = 3_000;

/// Deployment signalling data accompanying a template.
#[derive(Debug, Clone, Default)]
pub struct DeploymentInfo {
    /// Rules the template is relying on; entries are `!`-prefixed when a
    /// client cannot safely ignore them.
    pub rules: Vec<String>,
    /// Bits still open for signalling: name → bit.
    pub vb_available: Vec<(String, u8)>,
}

type TemplateArgs = Vec<String>;
type TemplateReturn = Result<(BlockTemplate, DeploymentInfo), MinerError>;

struct SelectionCache {
    entries: Vec<TemplateEntry>,
    fees: u64,
    tip: H256,
    pool_updated: u64,
    built_at: u64,
}

pub struct BlockAssembler<C: ChainProvider> {
    chain: Arc<C>,
    pool: Arc<TransactionPool<C>>,
    config: MinerConfig,
    cache: Mutex<Option<SelectionCache>>,
}

#[derive(Clone)]
pub struct BlockAssemblerController {
    sender: Sender<Request<TemplateArgs, TemplateReturn>>,
    stop: Sender<()>,
}

impl BlockAssemblerController {
    pub fn create_template(
        &self,
        client_rules: Vec<String>,
    ) -> Result<(BlockTemplate, DeploymentInfo), MinerError> {
        Request::call(&self.sender, client_rules).ok_or(MinerError::ServiceStopped)?
    }

    pub fn shutdown(&self) {
        let _ = self.stop.send(());
    }
}

impl<C: ChainProvider + 'static> BlockAssembler<C> {
    pub fn new(config: MinerConfig, chain: Arc<C>, pool: Arc<TransactionPool<C>>) -> Self {
        BlockAssembler {
            chain,
            pool,
            config,
            cache: Mutex::new(None),
        }
    }

    /// Spawn the service loop, returning its controller and join handle.
    pub fn start<S: ToString>(
        self,
        thread_name: Option<S>,
    ) -> (BlockAssemblerController, JoinHandle<()>) {
        let (stop_tx, stop_rx) = bounded::<()>(SIGNAL_CHANNEL_SIZE);
        let (sender, receiver): (
            Sender<Request<TemplateArgs, TemplateReturn>>,
            Receiver<Request<TemplateArgs, TemplateReturn>>,
        ) = bounded(DEFAULT_CHANNEL_SIZE);

        let mut thread_builder = thread::Builder::new();
        if let Some(name) = thread_name {
            thread_builder = thread_builder.name(name.to_string());
        }

        let thread = thread_builder
            .spawn(move || loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(receiver) -> msg => match msg {
                        Ok(Request { responder, arguments }) => {
                            let _ = responder.send(self.create_template(&arguments));
                        }
                        Err(_) => {
                            error!(target: "miner", "block assembler channel closed");
                            break;
                        }
                    }
                }
            })
            .expect("start block assembler");

        (
            BlockAssemblerController {
                sender,
                stop: stop_tx,
            },
            thread,
        )
    }

    /// Build (or reuse) a template for a client advertising `rules`.
    pub fn create_template(
        &self,
        client_rules: &[String],
    ) -> Result<(BlockTemplate, DeploymentInfo), MinerError> {
        let tip = self.chain.tip_hash();
        let height = self.chain.tip_height() + 1;
        let mtp = self.chain.median_time_past();
        let time = self.chain.now().max(mtp + 1) as u32;
        let bits = self.chain.next_bits();
        let target = compact_to_target(bits).ok_or_else(|| MinerError::Chain(
            ember_traits::ChainError::Internal("invalid target bits".to_string()),
        ))?;

        let (version, info) = self.compute_version(client_rules)?;
        let witness = self.config.witness && self.chain.features().has_witness();

        let (entries, fees) = self.select_entries(tip);

        let template = BlockTemplate {
            prev_block: tip,
            version,
            height,
            time,
            mtp,
            bits,
            target,
            coinbase_flags: self.config.coinbase_flags.clone().into_bytes(),
            payout: self.config.payout(),
            witness,
            fees,
            subsidy: self.chain.subsidy(height),
            pool_total: self.pool.total_tx(),
            items: entries,
        };
        debug!(target: "miner",
            "created template at height {height} with {} txs, {fees} fees",
            template.items.len()
        );
        Ok((template, info))
    }

    /// Greedy selection by package rate, parents always ahead of children,
    /// within the weight and sigop budgets.
    fn select_entries(&self, tip: H256) -> (Vec<TemplateEntry>, u64) {
        let now = faketime::unix_time_as_millis();
        let pool_updated = self.pool.last_updated();

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            let fresh = cached.tip == tip
                && cached.pool_updated == pool_updated
                && now.saturating_sub(cached.built_at) <= TEMPLATE_TIMEOUT;
            if fresh {
                return (cached.entries.clone(), cached.fees);
            }
        }

        let mut candidates = self.pool.get_entries();
        candidates.sort_by(|a, b| {
            b.desc_rate()
                .cmp(&a.desc_rate())
                .then_with(|| a.txid().cmp(&b.txid()))
        });

        let max_weight = self.config.max_weight - COINBASE_WEIGHT_RESERVE;
        let max_sigops = self.config.max_sigops - COINBASE_SIGOPS_RESERVE;

        let mut included: FxHashMap<H256, usize> = FxHashMap::default();
        let mut selected: Vec<TemplateEntry> = Vec::new();
        let mut fees = 0u64;
        let mut weight = 0u64;
        let mut sigops = 0u64;

        loop {
            let mut progressed = false;
            let mut deferred = Vec::new();

            for entry in candidates {
                let parents_ready = entry
                    .depends
                    .iter()
                    .all(|dep| included.contains_key(dep) || !self.pool.has_entry(dep));
                if !parents_ready {
                    deferred.push(entry);
                    continue;
                }
                let tx_weight = entry.tx().weight();
                if weight + tx_weight > max_weight || sigops + entry.sigops > max_sigops {
                    continue;
                }

                weight += tx_weight;
                sigops += entry.sigops;
                fees += entry.fee;
                let depends: Vec<usize> = entry
                    .depends
                    .iter()
                    .filter_map(|dep| included.get(dep).copied())
                    .collect();
                included.insert(entry.txid(), selected.len() + 1);
                selected.push(TemplateEntry {
                    tx: entry.tx().clone(),
                    fee: entry.fee,
                    sigops: entry.sigops,
                    weight: tx_weight,
                    depends,
                });
                progressed = true;
            }

            if !progressed || deferred.is_empty() {
                break;
            }
            candidates = deferred;
        }

        *cache = Some(SelectionCache {
            entries: selected.clone(),
            fees,
            tip,
            pool_updated,
            built_at: now,
        });
        (selected, fees)
    }

    /// Fold the BIP9 deployment states into a block version and the rule
    /// lists clients need.
    fn compute_version(
        &self,
        client_rules: &[String],
    ) -> Result<(i32, DeploymentInfo), MinerError> {
        let mut version = VERSIONBITS_TOP;
        let mut info = DeploymentInfo::default();

        for deployment in self.chain.deployments() {
            let supported = client_rules.iter().any(|rule| {
                rule == deployment.name || rule.strip_prefix('!') == Some(deployment.name)
            });
            let bit = 1u32 << deployment.bit;

            match self.chain.deployment_state(&deployment) {
                ThresholdState::Defined | ThresholdState::Failed => {}
                ThresholdState::Started => {
                    // Signal only when the client can handle the result.
                    if supported {
                        version |= bit;
                        info.vb_available
                            .push((deployment.name.to_string(), deployment.bit));
                    } else {
                        info.vb_available
                            .push((format!("!{}", deployment.name), deployment.bit));
                    }
                }
                ThresholdState::LockedIn => {
                    version |= bit;
                    info.vb_available
                        .push((deployment.name.to_string(), deployment.bit));
                }
                ThresholdState::Active => {
                    if !supported && !deployment.force {
                        return Err(MinerError::UnsupportedRule(deployment.name.to_string()));
                    }
                    let name = if deployment.force {
                        deployment.name.to_string()
                    } else {
                        format!("!{}", deployment.name)
                    };
                    info.rules.push(name);
                }
            }
        }

        Ok((version as i32, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::script::Script;
    use ember_core::transaction::OutPoint;
    use ember_pool::PoolConfig;
    use ember_test_chain::{spend, FlagFailVerifier, MockChain};
    use ember_traits::Deployment;

    fn setup() -> (Arc<MockChain>, Arc<TransactionPool<MockChain>>, BlockAssembler<MockChain>) {
        let chain = Arc::new(MockChain::new());
        let pool = Arc::new(TransactionPool::new(
            PoolConfig::default(),
            Arc::clone(&chain),
            Arc::new(FlagFailVerifier::accept_all()),
        ));
        let assembler =
            BlockAssembler::new(MinerConfig::default(), Arc::clone(&chain), Arc::clone(&pool));
        (chain, pool, assembler)
    }

    #[test]
    fn template_orders_parents_first() {
        let (chain, pool, assembler) = setup();
        let point = chain.fund(1_000_000, Script::p2pkh(&[1u8; 20]));
        let parent = spend(&[point], 950_000, 1);
        let child = spend(&[OutPoint::new(parent.txid(), 0)], 900_000, 1);
        pool.add_tx(parent.clone(), 1).unwrap();
        pool.add_tx(child.clone(), 1).unwrap();

        let (template, _) = assembler.create_template(&[]).unwrap();
        let txids: Vec<_> = template.items.iter().map(|item| item.tx.txid()).collect();
        let parent_pos = txids.iter().position(|id| *id == parent.txid()).unwrap();
        let child_pos = txids.iter().position(|id| *id == child.txid()).unwrap();
        assert!(parent_pos < child_pos);

        // depends carries the 1-based index of the in-template parent.
        assert_eq!(template.items[child_pos].depends, vec![parent_pos + 1]);
        assert_eq!(template.height, chain.tip_height() + 1);
        assert_eq!(template.fees, 50_000 + 50_000);
    }

    #[test]
    fn started_deployment_needs_client_support() {
        let (chain, _pool, assembler) = setup();
        chain.set_deployment(
            Deployment {
                name: "testdummy",
                bit: 28,
                force: false,
            },
            ThresholdState::Started,
        );

        let (template, info) = assembler.create_template(&[]).unwrap();
        assert_eq!(template.version as u32 & (1 << 28), 0);
        assert_eq!(info.vb_available[0].0, "!testdummy");

        let (template, info) = assembler
            .create_template(&["testdummy".to_string()])
            .unwrap();
        assert_ne!(template.version as u32 & (1 << 28), 0);
        assert_eq!(info.vb_available[0].0, "testdummy");
    }

    #[test]
    fn locked_in_always_signals() {
        let (chain, _pool, assembler) = setup();
        chain.set_deployment(
            Deployment {
                name: "csv",
                bit: 0,
                force: false,
            },
            ThresholdState::LockedIn,
        );
        let (template, _) = assembler.create_template(&[]).unwrap();
        assert_ne!(template.version as u32 & 1, 0);
    }

    #[test]
    fn active_unsupported_rule_is_fatal_unless_forced() {
        let (chain, _pool, assembler) = setup();
        chain.set_deployment(
            Deployment {
                name: "segwit",
                bit: 1,
                force: false,
            },
            ThresholdState::Active,
        );
        let err = assembler.create_template(&[]).unwrap_err();
        assert_eq!(err, MinerError::UnsupportedRule("segwit".to_string()));

        let ok = assembler.create_template(&["segwit".to_string()]).unwrap();
        assert_eq!(ok.1.rules, vec!["!segwit".to_string()]);
    }

    #[test]
    fn forced_deployment_never_fails() {
        let (chain, _pool, assembler) = setup();
        chain.set_deployment(
            Deployment {
                name: "csv",
                bit: 0,
                force: true,
            },
            ThresholdState::Active,
        );
        let (_, info) = assembler.create_template(&[]).unwrap();
        assert_eq!(info.rules, vec!["csv".to_string()]);
    }

    #[test]
    fn controller_round_trip() {
        let (_chain, _pool, assembler) = setup();
        let (controller, handle) = assembler.start(Some("TestAssembler"));
        let (template, _) = controller.create_template(Vec::new()).unwrap();
        assert!(template.items.is_empty());
        controller.shutdown();
        handle.join().unwrap();
    }
}
