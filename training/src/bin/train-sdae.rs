use anyhow::{Context, bail};
use clap::Parser;
use lungscan::models::{SdaeNet, init_network};
use lungscan_training::eval::Progress;
use lungscan_training::export::save_artifact;
use lungscan_training::{ImageFolder, SEED, init_logging};
use rand::SeedableRng;
use rand::rngs::StdRng;
use shared::{CLASS_COUNT, ModelKind};
use std::path::PathBuf;
use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::{Device, Kind, Tensor};

/// Train the stacked denoising autoencoder ensemble member
#[derive(Parser, Debug)]
#[command(name = "train-sdae")]
#[command(about = "Train the SDAE classifier on flattened images")]
struct Args {
    #[arg(long, default_value = "data/train")]
    train_dir: PathBuf,

    #[arg(long, default_value = "data/valid")]
    valid_dir: PathBuf,

    #[arg(short, long, default_value = "sdae_classifier.ot")]
    output: PathBuf,

    #[arg(long, default_value_t = 50)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Standard deviation of Gaussian noise added to training inputs
    #[arg(long, default_value_t = 0.0)]
    input_noise: f64,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    tch::manual_seed(SEED as i64);
    let mut rng = StdRng::seed_from_u64(SEED);

    let train = ImageFolder::open(&args.train_dir).context("Failed to open training set")?;
    let valid = ImageFolder::open(&args.valid_dir).context("Failed to open validation set")?;

    let steps_per_epoch = train.full_batches(args.batch_size);
    let validation_steps = valid.full_batches(args.batch_size);
    if steps_per_epoch == 0 {
        bail!(
            "Training set has {} images, fewer than one batch of {}",
            train.len(),
            args.batch_size
        );
    }
    if validation_steps == 0 {
        bail!(
            "Validation set has {} images, fewer than one batch of {}",
            valid.len(),
            args.batch_size
        );
    }

    let device = Device::cuda_if_available();
    let (vs, net) = init_network::<SdaeNet>(device, CLASS_COUNT as i64);
    let mut optimizer = nn::Adam::default().build(&vs, args.learning_rate)?;
    log::info!(
        "Training SDAE on {:?} for {} epochs of {} steps",
        device,
        args.epochs,
        steps_per_epoch
    );

    for epoch in 1..=args.epochs {
        let mut progress = Progress::default();
        for indices in train
            .batches(args.batch_size, true, &mut rng)
            .into_iter()
            .take(steps_per_epoch)
        {
            let batch = train.load_batch(&indices, None, &mut rng)?;
            let mut xs = batch.flat_tensor(Kind::Float, device);
            if args.input_noise > 0.0 {
                xs = &xs + Tensor::randn_like(&xs) * args.input_noise;
            }
            let ys = batch.label_tensor(device);

            let logits = net.forward_t(&xs, true);
            let loss = logits.cross_entropy_for_logits(&ys);
            optimizer.backward_step(&loss);
            progress.record(&logits, &ys, &loss);
        }

        let mut validation = Progress::default();
        for indices in valid
            .batches(args.batch_size, false, &mut rng)
            .into_iter()
            .take(validation_steps)
        {
            let batch = valid.load_batch(&indices, None, &mut rng)?;
            let ys = batch.label_tensor(device);
            tch::no_grad(|| {
                let logits = net.forward_t(&batch.flat_tensor(Kind::Float, device), false);
                let loss = logits.cross_entropy_for_logits(&ys);
                validation.record(&logits, &ys, &loss);
            });
        }

        let (trained, validated) = (progress.stats(), validation.stats());
        log::info!(
            "Epoch {}/{} - loss: {:.4}, accuracy: {:.4}, val_loss: {:.4}, val_accuracy: {:.4}",
            epoch,
            args.epochs,
            trained.loss,
            trained.accuracy,
            validated.loss,
            validated.accuracy
        );
    }

    save_artifact(&vs, &args.output, ModelKind::Sdae, args.epochs)?;
    log::info!("SDAE classifier training complete");
    Ok(())
}
