use super::Worker;
use ember_core::difficulty::hash_meets_target;
use ember_hash::sha256d;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

const PROGRESS_BAR_TEMPLATE: &str = "{prefix:.bold.dim} {spinner:.green} [{elapsed_precise}] {msg}";
const CANCEL_POLL_MASK: u32 = 0xfff;
const STATE_UPDATE_DURATION_MILLIS: u128 = 500;

/// Straightforward double-SHA256 nonce search with a progress spinner.
pub struct Sha256Simple {
    progress_bar: ProgressBar,
    hashes: u64,
    blocks_found: u64,
    started: Instant,
}

impl Sha256Simple {
    pub fn new(name: &str) -> Self {
        let progress_bar = ProgressBar::new(100);
        progress_bar.set_style(ProgressStyle::default_bar().template(PROGRESS_BAR_TEMPLATE));
        progress_bar.set_prefix(name.to_string());
        Sha256Simple {
            progress_bar,
            hashes: 0,
            blocks_found: 0,
            started: Instant::now(),
        }
    }
}

impl Worker for Sha256Simple {
    fn search(
        &mut self,
        header: &mut [u8; 80],
        target: &[u8; 32],
        from: u32,
        to: u32,
        cancel: &AtomicBool,
    ) -> Option<u32> {
        let mut state_update_counter = 0u64;
        for nonce in from..to {
            if nonce & CANCEL_POLL_MASK == 0 && cancel.load(Ordering::Relaxed) {
                return None;
            }

            header[76..80].copy_from_slice(&nonce.to_le_bytes());
            let hash = sha256d(header);
            self.hashes += 1;
            state_update_counter += 1;

            if hash_meets_target(&hash, target) {
                self.blocks_found += 1;
                self.progress_bar
                    .set_message(format!("nonce found: {:>10}", nonce));
                return Some(nonce);
            }

            if state_update_counter & 0xffff == 0 {
                let elapsed = self.started.elapsed();
                if elapsed.as_millis() > STATE_UPDATE_DURATION_MILLIS {
                    let rate = self.hashes as f64 / elapsed.as_secs_f64();
                    self.progress_bar.set_message(format!(
                        "hash rate: {:>10.3} H/s / blocks found: {:>4}",
                        rate, self.blocks_found,
                    ));
                    self.progress_bar.inc(1);
                }
            }
        }
        None
    }
}
