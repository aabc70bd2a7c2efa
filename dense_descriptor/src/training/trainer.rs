//! Descriptor trainer implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;

use crate::config::TrainingConfig;
use crate::data::{EpochDataset, FramePairBatch, FramePairBatcher, PairSource};
use crate::error::Result;
use crate::loss::RelativeResponseLoss;
use crate::matching::{FeatureResponseGenerator, MatchingAccuracy, MatchingAccuracyMetric};
use crate::nn::{
    name_index, restore_parameters, snapshot_parameters, DescriptorModel, DescriptorNet,
    RestoreReport,
};

use super::checkpoint::{load_checkpoint, save_checkpoint, Checkpoint, CheckpointMetadata};
use super::display::DisplayPanel;
use super::metrics::{AccuracyMeans, EpochSummary, RunningMean, StepOutcome, TrainingState};
use super::optimizer::SgdMomentum;
use super::schedule::CyclicLr;
use super::seed::EpochSeed;
use super::sink::{JsonLinesSink, LogSink, MetricsSink, Phase};

/// Lifecycle of a trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerPhase {
    /// Constructed, no epoch started.
    Initializing,
    /// Running the given training epoch.
    TrainingEpoch(usize),
    /// Validating after the given epoch.
    ValidatingEpoch(usize),
    /// `fit` ran through the last epoch.
    Completed,
}

/// Outcome of [`DescriptorTrainer::fit`].
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    /// Summary of every training epoch.
    pub epochs: Vec<EpochSummary>,
    /// Validation accuracy per validated epoch.
    pub validations: Vec<(usize, MatchingAccuracy)>,
    /// Checkpoints written.
    pub checkpoints: Vec<PathBuf>,
}

/// Trains a dense descriptor network on paired frames.
///
/// Both frames of a pair go through the shared network; symmetric soft
/// response maps feed the relative response loss during training and the
/// matching accuracy metric during validation. Non-finite losses skip the
/// batch without touching the parameters.
pub struct DescriptorTrainer<B: AutodiffBackend, M> {
    config: TrainingConfig,
    model: M,
    optimizer: SgdMomentum<B>,
    scheduler: CyclicLr,
    response: FeatureResponseGenerator,
    loss: RelativeResponseLoss,
    metric: MatchingAccuracyMetric,
    seeds: EpochSeed,
    state: TrainingState,
    phase: TrainerPhase,
    train_loss: RunningMean,
    validation_means: AccuracyMeans,
    validation_progress: usize,
    sinks: Vec<Box<dyn MetricsSink>>,
    run_dir: PathBuf,
    device: B::Device,
}

impl<B: AutodiffBackend> DescriptorTrainer<B, DescriptorNet<B>> {
    /// Create a trainer for a freshly initialized [`DescriptorNet`].
    pub fn from_config(config: TrainingConfig, device: B::Device) -> Result<Self> {
        let model = config.network.init::<B>(&device);
        Self::new(config, model, device)
    }
}

impl<B, M> DescriptorTrainer<B, M>
where
    B: AutodiffBackend,
    M: DescriptorModel<B> + AutodiffModule<B>,
    M::InnerModule: DescriptorModel<B::InnerBackend>,
{
    /// Create a trainer.
    ///
    /// Validates the configuration, prepares the run directory and, when
    /// resuming was requested, restores the checkpoint before returning.
    pub fn new(config: TrainingConfig, model: M, device: B::Device) -> Result<Self> {
        config.validate()?;
        let resume = config.paths.resume_path()?.map(Path::to_path_buf);
        let run_dir = config.paths.prepare()?;
        let json_sink = JsonLinesSink::new(&run_dir)?;

        let mut trainer = Self {
            optimizer: SgdMomentum::new(config.optimizer.clone()),
            scheduler: config.schedule.init(),
            response: FeatureResponseGenerator::from_config(&config.matching),
            loss: RelativeResponseLoss::new(),
            metric: MatchingAccuracyMetric::from_config(&config.accuracy),
            seeds: EpochSeed::new(config.seed),
            state: TrainingState::default(),
            phase: TrainerPhase::Initializing,
            train_loss: RunningMean::new(),
            validation_means: AccuracyMeans::default(),
            validation_progress: 0,
            sinks: vec![Box::new(LogSink), Box::new(json_sink)],
            run_dir,
            model,
            config,
            device,
        };

        if let Some(path) = resume {
            trainer.resume_from(&path)?;
        }

        Ok(trainer)
    }

    /// Add a metrics sink.
    pub fn with_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Restore model, optimizer and progress from a checkpoint directory.
    pub fn resume_from(&mut self, dir: &Path) -> Result<RestoreReport> {
        let checkpoint = load_checkpoint(dir)?;

        let (model, report) = restore_parameters::<B, M>(self.model.clone(), &checkpoint.model);
        report.log("model");
        self.model = model;

        let names = name_index::<B, M>(&self.model);
        let restored =
            self.optimizer
                .restore(&self.model, &names, &checkpoint.optimizer, &self.device);
        log::info!("Restored {} optimizer buffers", restored);

        self.state.epoch = checkpoint.metadata.epoch;
        self.state.global_step = checkpoint.metadata.global_step;
        self.state.validation_step = checkpoint.metadata.validation_step;

        Ok(report)
    }

    /// Run one training iteration.
    ///
    /// A non-finite loss skips the backward pass and the optimizer step; the
    /// batch still counts towards the epoch progress and the running loss.
    pub fn train_step(&mut self, batch: &FramePairBatch<B>) -> Result<StepOutcome> {
        let lr = self.scheduler.batch_step(self.state.global_step);
        let batch_index = self.state.epoch_progress;
        self.state.epoch_progress += 1;

        let features_1 = self.model.forward(batch.colors_1.clone());
        let features_2 = self.model.forward(batch.colors_2.clone());
        let responses = pair_responses(&self.response, features_1.clone(), features_2.clone(), batch);
        let loss = pair_loss(&self.loss, self.config.rr_weight, responses.clone(), batch);
        let loss_value: f32 = loss.clone().into_scalar().elem();

        if !loss_value.is_finite() {
            log::warn!(
                "Non-finite loss {} at step {} (batch {} of epoch {}), skipping update",
                loss_value,
                self.state.global_step,
                batch_index,
                self.state.epoch
            );
            // Dropping the loss releases its graph; no backward pass ran,
            // so there are no gradients to apply.
            drop(loss);
            self.train_loss.hold();
            self.state.skipped_steps += 1;
            return Ok(StepOutcome::Skipped { loss: loss_value });
        }

        let panel = (batch_index % self.config.display_interval == 0).then(|| {
            let [response_1, response_2] = responses;
            DisplayPanel::from_batch(
                batch,
                [features_1.detach(), features_2.detach()],
                [response_1.detach(), response_2.detach()],
                self.config.matching.cross_check_distance,
            )
        });

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let (model, stats) = self.optimizer.step(lr, self.model.clone(), grads);
        self.model = model;
        self.state.global_step += 1;

        self.train_loss.update(loss_value as f64);
        let scalars = [
            ("loss", loss_value as f64),
            ("running_loss", self.train_loss.mean()),
            ("lr", lr),
            ("grad_norm", stats.grad_norm as f64),
        ];
        let step = self.state.global_step;
        for sink in self.sinks.iter_mut() {
            sink.add_scalars(Phase::Train, &scalars, step)?;
            if let Some(panel) = &panel {
                sink.add_panel(Phase::Train, panel, step)?;
            }
        }

        Ok(StepOutcome::Applied {
            loss: loss_value,
            lr,
            grad_norm: stats.grad_norm,
        })
    }

    /// Evaluate one validation batch on an inference copy of the model.
    ///
    /// The returned accuracy averages both matching directions.
    pub fn validation_step(
        &mut self,
        model: &M::InnerModule,
        batch: &FramePairBatch<B::InnerBackend>,
    ) -> Result<MatchingAccuracy> {
        let batch_index = self.validation_progress;
        self.validation_progress += 1;

        let features_1 = model.forward(batch.colors_1.clone());
        let features_2 = model.forward(batch.colors_2.clone());
        let responses = pair_responses(&self.response, features_1.clone(), features_2.clone(), batch);
        let [response_1, response_2] = responses.clone();

        let accuracy_1 = self.metric.evaluate(
            response_1,
            batch.locations_2d_1.clone(),
            batch.boundaries.clone(),
        );
        let accuracy_2 = self.metric.evaluate(
            response_2,
            batch.locations_2d_2.clone(),
            batch.boundaries.clone(),
        );
        let accuracy = accuracy_1.average(&accuracy_2);

        let panel = (batch_index % self.config.display_interval == 0).then(|| {
            DisplayPanel::from_batch(
                batch,
                [features_1, features_2],
                responses,
                self.config.matching.cross_check_distance,
            )
        });

        self.state.validation_step += 1;
        self.validation_means.update(&accuracy);
        let means = self.validation_means.value();
        let scalars = [
            ("accuracy_tight", means.tight as f64),
            ("accuracy_nominal", means.nominal as f64),
            ("accuracy_loose", means.loose as f64),
        ];
        let step = self.state.validation_step;
        for sink in self.sinks.iter_mut() {
            sink.add_scalars(Phase::Validation, &scalars, step)?;
            if let Some(panel) = &panel {
                sink.add_panel(Phase::Validation, panel, step)?;
            }
        }

        Ok(accuracy)
    }

    /// Run one training epoch over `source`, truncated at `max_iterations_per_epoch` batches.
    pub fn train_epoch(&mut self, epoch: usize, source: Arc<dyn PairSource>) -> Result<EpochSummary> {
        self.phase = TrainerPhase::TrainingEpoch(epoch);
        self.state.epoch = epoch;
        self.state.epoch_progress = 0;
        self.train_loss.reset();

        let loader = self.loader::<B>(source, self.seeds.training(epoch));
        let skipped_before = self.state.skipped_steps;

        for batch in loader.iter().take(self.config.max_iterations_per_epoch) {
            let outcome = self.train_step(&batch)?;
            log::debug!(
                "Epoch {} batch {}: {:?}",
                epoch,
                self.state.epoch_progress,
                outcome
            );
        }

        let summary = EpochSummary {
            epoch,
            mean_loss: self.train_loss.mean(),
            batches: self.state.epoch_progress,
            skipped: self.state.skipped_steps - skipped_before,
            last_lr: self.scheduler.current_lr(),
        };
        summary.log();
        Ok(summary)
    }

    /// Validate over the whole of `source` with the fixed validation seed.
    pub fn validate(&mut self, epoch: usize, source: Arc<dyn PairSource>) -> Result<MatchingAccuracy> {
        self.phase = TrainerPhase::ValidatingEpoch(epoch);
        self.validation_means = AccuracyMeans::default();
        self.validation_progress = 0;

        let model = self.model.valid();
        let loader = self.loader::<B::InnerBackend>(source, self.seeds.validation());

        for batch in loader.iter() {
            self.validation_step(&model, &batch)?;
        }

        let accuracy = self.validation_means.value();
        log::info!(
            "Validation after epoch {}: accuracy {:.4} / {:.4} / {:.4} ({} batches)",
            epoch,
            accuracy.tight,
            accuracy.nominal,
            accuracy.loose,
            self.validation_means.tight.count()
        );
        Ok(accuracy)
    }

    /// Train from the current epoch through `num_epochs`, validating and
    /// checkpointing every `validation_interval` epochs.
    pub fn fit(
        &mut self,
        train_source: Arc<dyn PairSource>,
        valid_source: Arc<dyn PairSource>,
    ) -> Result<TrainingReport> {
        let mut report = TrainingReport::default();
        let first_epoch = self.state.epoch;
        log::info!(
            "Training epochs {}..={} in {}",
            first_epoch,
            self.config.num_epochs,
            self.run_dir.display()
        );

        for epoch in first_epoch..=self.config.num_epochs {
            report
                .epochs
                .push(self.train_epoch(epoch, train_source.clone())?);

            if epoch % self.config.validation_interval == 0 {
                let accuracy = self.validate(epoch, valid_source.clone())?;
                report.validations.push((epoch, accuracy));
                report.checkpoints.push(self.save_checkpoint(epoch, &accuracy)?);
            }
            self.state.epoch = epoch + 1;
        }

        for sink in self.sinks.iter_mut() {
            sink.flush()?;
        }
        self.phase = TrainerPhase::Completed;
        Ok(report)
    }

    /// Write a checkpoint for the end of `epoch` into the run directory.
    pub fn save_checkpoint(&self, epoch: usize, accuracy: &MatchingAccuracy) -> Result<PathBuf> {
        let names = name_index::<B, M>(&self.model);
        let checkpoint = Checkpoint {
            metadata: CheckpointMetadata::new(
                epoch,
                self.state.global_step,
                self.state.validation_step,
                *accuracy,
            ),
            model: snapshot_parameters::<B, M>(&self.model),
            optimizer: self.optimizer.snapshot(&self.model, &names),
        };
        save_checkpoint(&self.run_dir, &checkpoint, &self.config)
    }

    fn loader<K: Backend<Device = B::Device>>(
        &self,
        source: Arc<dyn PairSource>,
        seed: u64,
    ) -> Arc<dyn DataLoader<FramePairBatch<K>>> {
        let mut builder = DataLoaderBuilder::new(FramePairBatcher::<K>::new(self.device.clone()))
            .batch_size(self.config.batch_size)
            .shuffle(seed);
        if self.config.num_workers > 0 {
            builder = builder.num_workers(self.config.num_workers);
        }
        builder.build(EpochDataset::new(source, seed))
    }
}

impl<B: AutodiffBackend, M> DescriptorTrainer<B, M> {
    /// The model being trained.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Consume the trainer and return the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Training progress.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Running mean of the training loss over the current epoch.
    pub fn running_loss(&self) -> &RunningMean {
        &self.train_loss
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> TrainerPhase {
        self.phase
    }

    /// The training configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Directory of this run.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Learning rate of the last training step.
    pub fn current_lr(&self) -> f64 {
        self.scheduler.current_lr()
    }
}

/// Response maps `[located in frame 1, located in frame 2]`.
///
/// Queries of frame 1 are searched in frame 2 and the other way round.
pub fn pair_responses<B: Backend>(
    generator: &FeatureResponseGenerator,
    features_1: Tensor<B, 4>,
    features_2: Tensor<B, 4>,
    batch: &FramePairBatch<B>,
) -> [Tensor<B, 4>; 2] {
    let response_2 = generator.generate(
        features_1.clone(),
        features_2.clone(),
        batch.locations_1d_1.clone(),
        batch.boundaries.clone(),
    );
    let response_1 = generator.generate(
        features_2,
        features_1,
        batch.locations_1d_2.clone(),
        batch.boundaries.clone(),
    );
    [response_1, response_2]
}

/// `rr_weight * (0.5 * l1 + 0.5 * l2)` over both response directions.
///
/// The field located in frame 1 is scored against the frame 1 locations and
/// likewise for frame 2.
pub fn pair_loss<B: Backend>(
    loss: &RelativeResponseLoss,
    rr_weight: f32,
    responses: [Tensor<B, 4>; 2],
    batch: &FramePairBatch<B>,
) -> Tensor<B, 1> {
    let [response_1, response_2] = responses;
    let loss_1 = loss.forward(
        response_1,
        batch.locations_1d_1.clone(),
        batch.boundaries.clone(),
    );
    let loss_2 = loss.forward(
        response_2,
        batch.locations_1d_2.clone(),
        batch.boundaries.clone(),
    );
    (loss_1.mul_scalar(0.5) + loss_2.mul_scalar(0.5)).mul_scalar(rr_weight)
}
