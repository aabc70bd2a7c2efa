//! Example: Training dense descriptors on synthetic endoscope-like sequences.
//!
//! This example runs the full training workflow on procedurally generated
//! frame pairs with exact correspondences:
//! 1. Build a training configuration from the command line (or a JSON file)
//! 2. Create training and validation pair sources
//! 3. Train with the cyclic learning rate, validating every epoch
//! 4. Write checkpoints and metric logs into a timestamped run directory
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info cargo run -p dense_descriptor --example train_synthetic -- --num-epochs 3
//! ```
//!
//! Resume from a checkpoint with `--load-trained-model --trained-model-path <dir>`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use clap::Parser;

use dense_descriptor::{
    config::{
        AccuracyConfig, DescriptorNetConfig, MatchingConfig, PairDataConfig, RunPaths,
        TrainingConfig,
    },
    data::{PairSource, SyntheticPairSource},
    training::{CyclicLrConfig, DescriptorTrainer, OptimizerConfig},
};

type MyBackend = Autodiff<NdArray>;

/// Dense descriptor training on synthetic frame pairs
#[derive(Parser, Debug)]
#[command(name = "train_synthetic", about = "Dense descriptor training on synthetic frame pairs")]
struct Args {
    /// Load the training configuration from a JSON file; other flags are ignored
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image size as HEIGHT WIDTH
    #[arg(long, num_args = 2, default_values_t = [64, 80])]
    input_size: Vec<usize>,

    /// Correspondences per pair
    #[arg(long, default_value_t = 10)]
    sampling_size: usize,

    /// Frame gap range of a pair as MIN MAX
    #[arg(long, num_args = 2, default_values_t = [1, 50])]
    adjacent_range: Vec<usize>,

    /// Downsampling of the source images
    #[arg(long, default_value_t = 4.0)]
    image_downsampling: f32,

    /// Size divisor required by the network
    #[arg(long, default_value_t = 64)]
    network_downsampling: usize,

    /// Fraction of correspondences kept after pruning
    #[arg(long, default_value_t = 0.998)]
    inlier_percentage: f32,

    /// Standard deviation of the ground-truth heatmaps in pixels
    #[arg(long, default_value_t = 5.0)]
    heatmap_sigma: f32,

    /// Minimum shared visible points of a frame pair
    #[arg(long, default_value_t = 20)]
    visibility_overlap: usize,

    /// Patient ids used for training
    #[arg(long, num_args = 0.., value_delimiter = ',')]
    training_patient_ids: Vec<u32>,

    /// Descriptor length
    #[arg(long, default_value_t = 64)]
    feature_length: usize,

    /// Channels added by every dense layer
    #[arg(long, default_value_t = 10)]
    filter_growth_rate: usize,

    /// Channels of the first convolution
    #[arg(long, default_value_t = 16)]
    out_chans_first_conv: usize,

    /// Number of dense layers
    #[arg(long, default_value_t = 4)]
    num_dense_layers: usize,

    /// Sharpness of the soft response threshold
    #[arg(long, default_value_t = 20.0)]
    response_scale: f32,

    /// Cosine similarity at the soft response threshold
    #[arg(long, default_value_t = 0.9)]
    response_threshold: f32,

    /// Round-trip distance of cross-checked display matches in pixels
    #[arg(long, default_value_t = 5.0)]
    cross_check_distance: f32,

    /// Tight accuracy threshold in pixels
    #[arg(long, default_value_t = 5.0)]
    accuracy_tight: f32,

    /// Nominal accuracy threshold in pixels
    #[arg(long, default_value_t = 10.0)]
    accuracy_nominal: f32,

    /// Loose accuracy threshold in pixels
    #[arg(long, default_value_t = 20.0)]
    accuracy_loose: f32,

    /// Batch size
    #[arg(long, default_value_t = 4)]
    batch_size: usize,

    /// Data loader workers
    #[arg(long, default_value_t = 2)]
    num_workers: usize,

    /// Last epoch to run
    #[arg(long, default_value_t = 5)]
    num_epochs: usize,

    /// Iteration cap per epoch
    #[arg(long, default_value_t = 50)]
    max_iterations_per_epoch: usize,

    /// Lower learning rate bound
    #[arg(long, default_value_t = 1.0e-4)]
    min_lr: f64,

    /// Upper learning rate bound
    #[arg(long, default_value_t = 1.0e-3)]
    max_lr: f64,

    /// Iterations in half a learning rate cycle
    #[arg(long, default_value_t = 2000)]
    lr_step_size: usize,

    /// Momentum factor
    #[arg(long, default_value_t = 0.9)]
    momentum: f32,

    /// Weight decay
    #[arg(long, default_value_t = 0.0)]
    weight_decay: f32,

    /// Maximum global gradient norm
    #[arg(long, default_value_t = 10.0)]
    gradient_clip: f32,

    /// Batches between diagnostic panels
    #[arg(long, default_value_t = 10)]
    display_interval: usize,

    /// Epochs between validation passes
    #[arg(long, default_value_t = 1)]
    validation_interval: usize,

    /// Relative response loss weight
    #[arg(long, default_value_t = 1.0)]
    rr_weight: f32,

    /// Base random seed
    #[arg(long, default_value_t = 10086)]
    seed: u64,

    /// Training pairs per epoch
    #[arg(long, default_value_t = 200)]
    train_pairs: usize,

    /// Validation pairs
    #[arg(long, default_value_t = 40)]
    valid_pairs: usize,

    /// Root directory of the training data
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Root directory of precomputed intermediate data
    #[arg(long)]
    precompute_root: Option<PathBuf>,

    /// Reuse precomputed intermediate data
    #[arg(long)]
    load_intermediate_data: bool,

    /// Root directory of run logs
    #[arg(long, default_value = "logs")]
    log_root: PathBuf,

    /// Resume from `--trained-model-path`
    #[arg(long)]
    load_trained_model: bool,

    /// Checkpoint directory to resume from
    #[arg(long)]
    trained_model_path: Option<PathBuf>,
}

impl Args {
    fn training_config(&self) -> Result<TrainingConfig, String> {
        if let Some(path) = &self.config {
            return TrainingConfig::load(path)
                .map_err(|e| format!("could not load {}: {}", path.display(), e));
        }

        let config = TrainingConfig::new()
            .with_network(
                DescriptorNetConfig::new()
                    .with_feature_length(self.feature_length)
                    .with_filter_growth_rate(self.filter_growth_rate)
                    .with_out_chans_first_conv(self.out_chans_first_conv)
                    .with_num_dense_layers(self.num_dense_layers),
            )
            .with_matching(
                MatchingConfig::new()
                    .with_scale(self.response_scale)
                    .with_threshold(self.response_threshold)
                    .with_cross_check_distance(self.cross_check_distance),
            )
            .with_accuracy(
                AccuracyConfig::new()
                    .with_tight(self.accuracy_tight)
                    .with_nominal(self.accuracy_nominal)
                    .with_loose(self.accuracy_loose),
            )
            .with_schedule(CyclicLrConfig::new(self.min_lr, self.max_lr).with_step_size(self.lr_step_size))
            .with_optimizer(
                OptimizerConfig::new()
                    .with_momentum(self.momentum)
                    .with_weight_decay(self.weight_decay)
                    .with_gradient_clip(self.gradient_clip),
            )
            .with_data(
                PairDataConfig::new()
                    .with_input_size([self.input_size[0], self.input_size[1]])
                    .with_sampling_size(self.sampling_size)
                    .with_adjacent_range([self.adjacent_range[0], self.adjacent_range[1]])
                    .with_image_downsampling(self.image_downsampling)
                    .with_network_downsampling(self.network_downsampling)
                    .with_inlier_percentage(self.inlier_percentage)
                    .with_heatmap_sigma(self.heatmap_sigma)
                    .with_visibility_overlap(self.visibility_overlap)
                    .with_training_patient_ids(self.training_patient_ids.clone()),
            )
            .with_paths(
                RunPaths::new()
                    .with_log_root(self.log_root.clone())
                    .with_data_root(self.data_root.clone())
                    .with_precompute_root(self.precompute_root.clone())
                    .with_trained_model_path(self.trained_model_path.clone())
                    .with_load_trained_model(self.load_trained_model)
                    .with_load_intermediate_data(self.load_intermediate_data),
            )
            .with_batch_size(self.batch_size)
            .with_num_workers(self.num_workers)
            .with_num_epochs(self.num_epochs)
            .with_max_iterations_per_epoch(self.max_iterations_per_epoch)
            .with_display_interval(self.display_interval)
            .with_validation_interval(self.validation_interval)
            .with_rr_weight(self.rr_weight)
            .with_seed(self.seed);

        Ok(config)
    }
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::init();

    let args = Args::parse();
    let config = match args.training_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let device = burn::backend::ndarray::NdArrayDevice::Cpu;

    println!("═══════════════════════════════════════════════════════════════");
    println!("        Dense Descriptor Training on Synthetic Sequences");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Input size:      {:?}", config.data.input_size);
    println!("  Samples/pair:    {}", config.data.sampling_size);
    println!("  Feature length:  {}", config.network.feature_length);
    println!("  Epochs:          {}", config.num_epochs);
    println!(
        "  Learning rate:   {:.1e} .. {:.1e}",
        config.schedule.base_lr, config.schedule.max_lr
    );
    println!();

    let train: Arc<dyn PairSource> = Arc::new(SyntheticPairSource::new(
        &config.data,
        8,
        120,
        args.train_pairs,
    ));
    let valid: Arc<dyn PairSource> = Arc::new(SyntheticPairSource::new(
        &config.data,
        2,
        120,
        args.valid_pairs,
    ));

    let mut trainer = match DescriptorTrainer::<MyBackend, _>::from_config(config, device) {
        Ok(trainer) => trainer,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = match trainer.fit(train, valid) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Training failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│ Results                                                     │");
    println!("└─────────────────────────────────────────────────────────────┘");
    for summary in &report.epochs {
        println!(
            "  Epoch {:>3}: loss {:.5} ({} batches, {} skipped)",
            summary.epoch, summary.mean_loss, summary.batches, summary.skipped
        );
    }
    for (epoch, accuracy) in &report.validations {
        println!(
            "  Validation {:>3}: accuracy {:.4} / {:.4} / {:.4}",
            epoch, accuracy.tight, accuracy.nominal, accuracy.loose
        );
    }
    if let Some(last) = report.checkpoints.last() {
        println!("  Last checkpoint: {}", last.display());
    }
    println!("  Run directory:   {}", trainer.run_dir().display());

    ExitCode::SUCCESS
}
