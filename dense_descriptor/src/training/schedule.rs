//! Cyclic learning rate schedule.
//!
//! The learning rate oscillates between `base_lr` and `max_lr` with a
//! triangular waveform: a linear ramp up over `step_size` iterations followed
//! by a linear ramp down over the next `step_size` iterations.

use burn::config::Config;

/// Amplitude policy of the cyclic schedule.
#[derive(Config, Debug, PartialEq)]
pub enum CyclicMode {
    /// Constant amplitude.
    Triangular,
    /// Amplitude halves after every cycle.
    Triangular2,
    /// Amplitude scaled by `gamma^iteration`.
    ExpRange,
}

/// Configuration of the cyclic learning rate schedule.
#[derive(Config, Debug)]
pub struct CyclicLrConfig {
    /// Lower learning rate bound.
    pub base_lr: f64,

    /// Upper learning rate bound.
    pub max_lr: f64,

    /// Iterations in half a cycle.
    #[config(default = 2000)]
    pub step_size: usize,

    /// Amplitude policy.
    #[config(default = "CyclicMode::Triangular")]
    pub mode: CyclicMode,

    /// Decay base used by [`CyclicMode::ExpRange`].
    #[config(default = 1.0)]
    pub gamma: f64,
}

impl CyclicLrConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_lr > 0.0 && self.base_lr <= self.max_lr) {
            return Err(format!(
                "learning rate range must satisfy 0 < base <= max, got [{}, {}]",
                self.base_lr, self.max_lr
            ));
        }
        if self.step_size == 0 {
            return Err("step_size must be positive".to_string());
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err("gamma must be in (0, 1]".to_string());
        }
        Ok(())
    }

    /// Initialize the scheduler.
    pub fn init(&self) -> CyclicLr {
        CyclicLr {
            config: self.clone(),
            last_iteration: 0,
        }
    }
}

/// Per-iteration cyclic learning rate.
///
/// The only state is the last iteration index, which the trainer sets from
/// the global step before every optimizer step.
#[derive(Debug, Clone)]
pub struct CyclicLr {
    config: CyclicLrConfig,
    last_iteration: usize,
}

impl CyclicLr {
    /// Move the schedule to `iteration` and return the learning rate to apply.
    pub fn batch_step(&mut self, iteration: usize) -> f64 {
        self.last_iteration = iteration;
        self.current_lr()
    }

    /// Learning rate at the last iteration passed to [`Self::batch_step`].
    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.last_iteration)
    }

    /// Learning rate at an arbitrary iteration.
    pub fn lr_at(&self, iteration: usize) -> f64 {
        let step_size = self.config.step_size as f64;
        let iteration_f = iteration as f64;

        let cycle = (1.0 + iteration_f / (2.0 * step_size)).floor();
        let x = (iteration_f / step_size - 2.0 * cycle + 1.0).abs();
        let height = (self.config.max_lr - self.config.base_lr) * (1.0 - x).max(0.0);

        let scale = match self.config.mode {
            CyclicMode::Triangular => 1.0,
            CyclicMode::Triangular2 => 1.0 / 2f64.powf(cycle - 1.0),
            CyclicMode::ExpRange => self.config.gamma.powf(iteration_f),
        };

        self.config.base_lr + height * scale
    }

    /// The schedule configuration.
    pub fn config(&self) -> &CyclicLrConfig {
        &self.config
    }
}
