use anyhow::Context;
use clap::Parser;
use lungscan::models::{CnnNet, init_network};
use lungscan_training::eval::{EpochStats, Progress};
use lungscan_training::export::save_artifact;
use lungscan_training::{Augmenter, ImageFolder, SEED, init_logging};
use rand::SeedableRng;
use rand::rngs::StdRng;
use shared::{CLASS_COUNT, ModelKind};
use std::path::PathBuf;
use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::Device;

/// Train the convolutional ensemble member
#[derive(Parser, Debug)]
#[command(name = "train-cnn")]
#[command(about = "Train the CNN classifier and keep the weights with the best validation accuracy")]
struct Args {
    #[arg(long, default_value = "data/train")]
    train_dir: PathBuf,

    #[arg(long, default_value = "data/valid")]
    valid_dir: PathBuf,

    #[arg(short, long, default_value = "cnn_model.ot")]
    output: PathBuf,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Train without random rotation, shift and flip
    #[arg(long)]
    no_augment: bool,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    tch::manual_seed(SEED as i64);
    let mut rng = StdRng::seed_from_u64(SEED);

    let train = ImageFolder::open(&args.train_dir).context("Failed to open training set")?;
    let valid = ImageFolder::open(&args.valid_dir).context("Failed to open validation set")?;
    let augmenter = (!args.no_augment).then(Augmenter::default);

    let device = Device::cuda_if_available();
    let (vs, net) = init_network::<CnnNet>(device, CLASS_COUNT as i64);
    let mut optimizer = nn::Adam::default().build(&vs, args.learning_rate)?;
    log::info!("Training CNN on {:?} for {} epochs", device, args.epochs);

    let mut best_accuracy = f64::NEG_INFINITY;
    for epoch in 1..=args.epochs {
        let mut progress = Progress::default();
        for indices in train.batches(args.batch_size, true, &mut rng) {
            let batch = train.load_batch(&indices, augmenter.as_ref(), &mut rng)?;
            let xs = batch.image_tensor(device);
            let ys = batch.label_tensor(device);

            let logits = net.forward_t(&xs, true);
            let loss = logits.cross_entropy_for_logits(&ys);
            optimizer.backward_step(&loss);
            progress.record(&logits, &ys, &loss);
        }

        let trained = progress.stats();
        let validated = validate(&net, &valid, args.batch_size, device, &mut rng)?;
        log::info!(
            "Epoch {}/{} - loss: {:.4}, accuracy: {:.4}, val_loss: {:.4}, val_accuracy: {:.4}",
            epoch,
            args.epochs,
            trained.loss,
            trained.accuracy,
            validated.loss,
            validated.accuracy
        );

        if validated.accuracy > best_accuracy {
            log::info!(
                "val_accuracy improved from {:.4} to {:.4}, saving model to {}",
                best_accuracy.max(0.0),
                validated.accuracy,
                args.output.display()
            );
            best_accuracy = validated.accuracy;
            save_artifact(&vs, &args.output, ModelKind::Cnn, epoch)?;
        }
    }

    log::info!("CNN training complete. Best val_accuracy: {:.4}", best_accuracy);
    Ok(())
}

fn validate(
    net: &CnnNet,
    valid: &ImageFolder,
    batch_size: usize,
    device: Device,
    rng: &mut StdRng,
) -> anyhow::Result<EpochStats> {
    let mut progress = Progress::default();
    for indices in valid.batches(batch_size, false, rng) {
        let batch = valid.load_batch(&indices, None, rng)?;
        let ys = batch.label_tensor(device);
        tch::no_grad(|| {
            let logits = net.forward_t(&batch.image_tensor(device), false);
            let loss = logits.cross_entropy_for_logits(&ys);
            progress.record(&logits, &ys, &loss);
        });
    }
    Ok(progress.stats())
}
