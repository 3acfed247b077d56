//! Fault injection for exercising failure paths of provider callers.
//!
//! [`ChaosProvider`] wraps any [`ContextProvider`] and, with a configured
//! probability, appends a fault to the reader it is asked to run. The fault
//! fires *after* the wrapped reader has done its work inside the same
//! context, so a transactional backend has to roll that work back.

use std::future::Future;

use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;
use tracing::debug;
use zettai_types::{ContextProvider, ContextReader, Outcome};

/// Probability value for chaos injection rates.
///
/// A value in the range [0.0, 1.0] where 0.0 means never inject a fault and
/// 1.0 means always inject one.
///
/// ```ignore
/// let always = Probability::try_new(1.0)?;
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

impl Probability {
    fn clamped(value: f32) -> Self {
        // NaN clamps to NaN and fails validation; treat it as "never".
        Self::try_new(value.clamp(0.0, 1.0)).unwrap_or_else(|_| Self::never())
    }

    fn never() -> Self {
        Self::try_new(0.0).unwrap_or_else(|_| unreachable!("0.0 lies in [0.0, 1.0]"))
    }
}

#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
}

impl ChaosConfig {
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.deterministic_seed = Some(seed);
        self
    }

    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::clamped(probability);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::never(),
        }
    }
}

/// Fault raised by [`ChaosProvider`] after the wrapped reader succeeded.
#[derive(Debug, Clone, Copy, Error)]
#[error("chaos fault injected after reader completed")]
pub struct InjectedFault;

pub trait ChaosProviderExt: Sized {
    fn with_chaos(self, config: ChaosConfig) -> ChaosProvider<Self>;
}

impl<P> ChaosProviderExt for P {
    fn with_chaos(self, config: ChaosConfig) -> ChaosProvider<Self> {
        ChaosProvider::new(self, config)
    }
}

pub struct ChaosProvider<P> {
    provider: P,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl<P> ChaosProvider<P> {
    pub fn new(provider: P, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            provider,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn inner(&self) -> &P {
        &self.provider
    }

    fn should_inject(&self) -> bool {
        let probability: f32 = self.config.failure_probability.into();

        if probability <= 0.0 {
            return false;
        }

        if probability >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(probability))
    }
}

impl<Ctx, P> ContextProvider<Ctx> for ChaosProvider<P>
where
    Ctx: Send + 'static,
    P: ContextProvider<Ctx> + Sync,
{
    fn try_run<T>(&self, reader: ContextReader<Ctx, T>) -> impl Future<Output = Outcome<T>> + Send
    where
        T: Send + 'static,
    {
        let reader = if self.should_inject() {
            debug!("[chaos.try_run] injecting fault");
            reader.and_then(|_| ContextReader::fail(InjectedFault))
        } else {
            reader
        };

        self.provider.try_run(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContractTestEvent;
    use zettai_memory::{EventStreamerInMemory, InMemoryEventsProvider};
    use zettai_types::{EntityId, EventStreamer};

    fn memory() -> (
        InMemoryEventsProvider<ContractTestEvent>,
        EventStreamerInMemory<ContractTestEvent>,
    ) {
        (InMemoryEventsProvider::new(), EventStreamerInMemory::new())
    }

    #[test]
    fn probability_rejects_out_of_range_values() {
        assert!(Probability::try_new(1.5).is_err());
        assert!(Probability::try_new(-0.1).is_err());
        assert!(Probability::try_new(0.5).is_ok());
    }

    #[test]
    fn failure_probability_is_clamped() {
        let config = ChaosConfig::deterministic().with_failure_probability(7.0);
        let value: f32 = config.failure_probability.into();

        assert!((value - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn always_failing_chaos_turns_success_into_failure() {
        let (provider, streamer) = memory();
        let chaos = provider
            .clone()
            .with_chaos(ChaosConfig::deterministic().with_failure_probability(1.0));
        let id = EntityId::generate();

        let result = chaos
            .try_run(streamer.store(vec![ContractTestEvent::opened(id, "chaos")]))
            .await;

        let error = result.expect_err("chaos should inject a fault");
        assert!(error.to_string().contains("chaos fault injected"));
        // The in-memory backend has no rollback: the append is still visible.
        assert_eq!(provider.log().len(), 1);
    }

    #[tokio::test]
    async fn disabled_chaos_passes_readers_through() {
        let (provider, streamer) = memory();
        let chaos = provider.with_chaos(ChaosConfig::deterministic());
        let id = EntityId::generate();

        let stored = chaos
            .try_run(streamer.store(vec![ContractTestEvent::noted(id, "calm")]))
            .await
            .expect("no fault should be injected");

        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn same_seed_injects_the_same_pattern() {
        async fn pattern(seed: u64) -> Vec<bool> {
            let (provider, streamer) = memory();
            let chaos = provider.with_chaos(
                ChaosConfig::deterministic()
                    .with_seed(seed)
                    .with_failure_probability(0.5),
            );
            let mut outcomes = Vec::new();
            for _ in 0..20 {
                let result = chaos
                    .try_run(streamer.fetch_after(zettai_types::EventSeq::before_first()))
                    .await;
                outcomes.push(result.is_err());
            }
            outcomes
        }

        assert_eq!(pattern(42).await, pattern(42).await);
    }
}
