//! The in-process CPU miner.

use crate::block_template::Nonces;
use crate::work_engine::WorkEngine;
use crate::worker::Worker;
use ember_traits::ChainProvider;
use ember_util::Mutex;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Nonces searched per slice before yielding for cancelation checks.
pub const NONCE_INTERVAL: u32 = 0x2A_AAAA;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Stopped,
    Running,
    Stopping,
}

pub struct CpuMiner<C: ChainProvider + 'static> {
    chain: Arc<C>,
    engine: Arc<WorkEngine<C>>,
    worker: Arc<Mutex<Box<dyn Worker>>>,
    state: Arc<Mutex<MinerState>>,
    stop_flag: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ChainProvider + 'static> CpuMiner<C> {
    pub fn new(chain: Arc<C>, engine: Arc<WorkEngine<C>>, worker: Box<dyn Worker>) -> Self {
        CpuMiner {
            chain,
            engine,
            worker: Arc::new(Mutex::new(worker)),
            state: Arc::new(Mutex::new(MinerState::Stopped)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MinerState {
        *self.state.lock()
    }

    /// Launch the mining loop. `false` when not currently stopped.
    pub fn start(&self) -> bool {
        {
            let mut state = self.state.lock();
            if *state != MinerState::Stopped {
                return false;
            }
            *state = MinerState::Running;
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let chain = Arc::clone(&self.chain);
        let engine = Arc::clone(&self.engine);
        let worker = Arc::clone(&self.worker);
        let state = Arc::clone(&self.state);
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = thread::Builder::new()
            .name("CpuMiner".to_string())
            .spawn(move || {
                let mut worker = worker.lock();
                Self::run_loop(&chain, &engine, worker.as_mut(), &stop_flag);
                *state.lock() = MinerState::Stopped;
            })
            .expect("start cpu miner");
        *self.handle.lock() = Some(handle);
        true
    }

    /// Stop the loop and wait for it to exit.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != MinerState::Running {
                return;
            }
            *state = MinerState::Stopping;
        }
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        *self.state.lock() = MinerState::Stopped;
    }

    fn run_loop(
        chain: &Arc<C>,
        engine: &Arc<WorkEngine<C>>,
        worker: &mut dyn Worker,
        stop_flag: &AtomicBool,
    ) {
        'outer: while !stop_flag.load(Ordering::SeqCst) {
            let template = match engine.create_attempt() {
                Ok(template) => template,
                Err(err) => {
                    warn!(target: "miner", "cannot create work: {err}");
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };

            let mut nonces = Nonces {
                nonce1: 0,
                nonce2: rand::random(),
            };

            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break 'outer;
                }
                // A tip change destroys the job silently.
                if chain.tip_hash() != template.prev_block {
                    debug!(target: "miner", "job destroyed, tip moved");
                    continue 'outer;
                }

                let root = template.merkle_root(nonces);
                let time = template.time.max(chain.now().max(template.mtp + 1) as u32);
                let mut header = template.header(root, time, 0).encode();

                let mut from = 0u32;
                loop {
                    let to = from.saturating_add(NONCE_INTERVAL);
                    if let Some(nonce) =
                        worker.search(&mut header, &template.target, from, to, stop_flag)
                    {
                        let block = template.commit(nonces, time, nonce);
                        match engine.add_block(block) {
                            Ok(None) => {
                                info!(target: "miner", "mined block at height {}", template.height);
                            }
                            Ok(Some(reason)) => {
                                warn!(target: "miner", "mined block {reason}");
                            }
                            Err(err) => {
                                warn!(target: "miner", "block submission failed: {err}");
                            }
                        }
                        continue 'outer;
                    }
                    if stop_flag.load(Ordering::SeqCst) {
                        break 'outer;
                    }
                    if chain.tip_hash() != template.prev_block {
                        continue 'outer;
                    }
                    if to == u32::MAX {
                        break;
                    }
                    from = to;
                }

                // Nonce space exhausted: roll the extranonce.
                nonces.nonce2 = nonces.nonce2.wrapping_add(1);
                if nonces.nonce2 == 0 {
                    nonces.nonce1 = nonces.nonce1.wrapping_add(1);
                }
            }
        }
    }
}

impl<C: ChainProvider + 'static> Drop for CpuMiner<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
