use std::sync::Arc;
use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};
use crate::transport::{FrameSink, Transport};

/// Fault probabilities of a [LossyLink], each in `[0.0, 1.0]`. They are applied independently
///  per frame and receiving peer.
#[derive(Debug, Clone, Default)]
pub struct LossConfig {
    pub drop_rate: f64,
    /// the probability that a single random bit of a delivered frame is flipped
    pub corrupt_rate: f64,
    pub duplicate_rate: f64,
}

impl LossConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, rate) in [("drop", self.drop_rate), ("corrupt", self.corrupt_rate), ("duplicate", self.duplicate_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{} rate must be between 0.0 and 1.0, was {}", name, rate);
            }
        }
        Ok(())
    }
}

/// An in-process link that delivers every transmitted frame to all attached peers, dropping,
///  corrupting and duplicating frames at random. Randomness comes from a seeded RNG so that
///  runs are reproducible.
pub struct LossyLink {
    config: LossConfig,
    peers: RwLock<Vec<Arc<dyn FrameSink>>>,
    rng: Mutex<StdRng>,
}

impl LossyLink {
    pub fn new(config: LossConfig, seed: u64) -> anyhow::Result<LossyLink> {
        config.validate()?;
        Ok(LossyLink {
            config,
            peers: Default::default(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// Peers are attached after construction since endpoints need the link to be spawned, and
    ///  the link needs the endpoints' handles.
    pub async fn attach(&self, peer: Arc<dyn FrameSink>) {
        self.peers.write().await.push(peer);
    }
}

#[async_trait]
impl Transport for LossyLink {
    async fn transmit(&self, frame: Bytes) {
        let peers = self.peers.read().await;
        let mut rng = self.rng.lock().await;

        for peer in peers.iter() {
            if rng.gen_bool(self.config.drop_rate) {
                debug!("lossy link: dropping frame");
                continue;
            }

            let num_copies = if rng.gen_bool(self.config.duplicate_rate) {
                debug!("lossy link: duplicating frame");
                2
            }
            else {
                1
            };

            for _ in 0..num_copies {
                if !frame.is_empty() && rng.gen_bool(self.config.corrupt_rate) {
                    let bit = rng.gen_range(0..frame.len() * 8);
                    debug!("lossy link: flipping bit {} of frame", bit);

                    let mut damaged = frame.to_vec();
                    damaged[bit / 8] ^= 1 << (bit % 8);
                    peer.deliver_frame(Bytes::from(damaged));
                }
                else {
                    trace!("lossy link: delivering frame");
                    peer.deliver_frame(frame.clone());
                }
            }
        }
    }
}
