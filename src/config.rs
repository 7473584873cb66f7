use crate::instrument::{Instrument, NullInstrument};
use crate::runtime::Runtime;
use crate::scheduling::SchedulerKind;
use crate::utils::{env, sys};
use anyhow::{anyhow, Result};
use std::sync::Arc;

/// Builds a [`Runtime`].
///
/// Unset knobs fall back to the environment (`DEPFLOW_SCHEDULER`,
/// `DEPFLOW_REQUEUE_TASKLOOP`) and then to defaults: one worker per
/// available CPU, the fifo scheduler, no thread pinning.
pub struct Builder {
    num_cpus: Option<usize>,
    scheduler: Option<SchedulerKind>,
    requeue_taskloop: Option<bool>,
    pin_threads: bool,
    instrument: Option<Arc<dyn Instrument>>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            num_cpus: None,
            scheduler: None,
            requeue_taskloop: None,
            pin_threads: false,
            instrument: None,
        }
    }

    pub fn num_cpus(mut self, count: usize) -> Self {
        assert!(count > 0, "num_cpus cannot be 0");
        self.num_cpus = Some(count);
        self
    }

    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.scheduler = Some(kind);
        self
    }

    pub fn requeue_taskloop(mut self, requeue: bool) -> Self {
        self.requeue_taskloop = Some(requeue);
        self
    }

    /// Bind each worker thread to its CPU.
    pub fn pin_threads(mut self, pin: bool) -> Self {
        self.pin_threads = pin;
        self
    }

    pub fn instrument(mut self, instrument: Arc<dyn Instrument>) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn try_build(self) -> Result<Runtime> {
        let instrument = self
            .instrument
            .clone()
            .unwrap_or_else(|| Arc::new(NullInstrument));
        let cfg = RuntimeConfig::try_from(self)?;
        Runtime::start(cfg, instrument)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("num_cpus", &self.num_cpus)
            .field("scheduler", &self.scheduler)
            .field("requeue_taskloop", &self.requeue_taskloop)
            .field("pin_threads", &self.pin_threads)
            .finish()
    }
}

/// The builder, resolved against the environment and validated.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) num_cpus: usize,
    pub(crate) scheduler: SchedulerKind,
    pub(crate) requeue_taskloop: bool,
    pub(crate) pin_threads: bool,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<()> {
        if self.num_cpus == 0 {
            return Err(anyhow!("num_cpus must be greater than 0"));
        }
        Ok(())
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let scheduler = match builder.scheduler {
            Some(kind) => kind,
            None => match std::env::var("DEPFLOW_SCHEDULER") {
                Ok(raw) => raw.parse()?,
                Err(_) => SchedulerKind::Fifo,
            },
        };

        let cfg = RuntimeConfig {
            num_cpus: builder.num_cpus.unwrap_or_else(sys::available_cpus),
            scheduler,
            requeue_taskloop: builder
                .requeue_taskloop
                .unwrap_or_else(|| env::bool_var_or("DEPFLOW_REQUEUE_TASKLOOP", false)),
            pin_threads: builder.pin_threads,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RuntimeConfig: Send, Sync, Clone);

    #[test]
    fn builder_overrides_take_precedence() {
        let cfg = RuntimeConfig::try_from(
            Builder::new()
                .num_cpus(3)
                .scheduler(SchedulerKind::Naive)
                .requeue_taskloop(true),
        )
        .unwrap();
        assert_eq!(cfg.num_cpus, 3);
        assert_eq!(cfg.scheduler, SchedulerKind::Naive);
        assert!(cfg.requeue_taskloop);
    }
}
