use anyhow::{Context, bail};
use clap::Parser;
use lungscan::models::{DbnNet, init_network};
use lungscan_training::dbn::{MlpTrainer, RbmTrainer, accuracy};
use lungscan_training::export::save_artifact;
use lungscan_training::{ImageFolder, SEED, init_logging};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use shared::{CLASS_COUNT, ModelKind};
use std::path::PathBuf;
use tch::{Device, Kind, Tensor};

/// Train the deep belief network ensemble member
#[derive(Parser, Debug)]
#[command(name = "train-dbn")]
#[command(about = "Fit the RBM feature extractor and its perceptron on one sample of the training set")]
struct Args {
    #[arg(long, default_value = "data/train")]
    train_dir: PathBuf,

    #[arg(short, long, default_value = "dbn_pipeline_model.ot")]
    output: PathBuf,

    /// Images drawn from the training set
    #[arg(long, default_value_t = 500)]
    samples: usize,

    /// Share of the drawn images held out for evaluation
    #[arg(long, default_value_t = 0.2)]
    test_size: f64,

    #[arg(long, default_value_t = 10)]
    rbm_epochs: usize,

    #[arg(long, default_value_t = 100)]
    mlp_epochs: usize,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    tch::manual_seed(SEED as i64);
    let mut rng = StdRng::seed_from_u64(SEED);

    let train = ImageFolder::open(&args.train_dir).context("Failed to open training set")?;
    let indices = train
        .batches(args.samples, true, &mut rng)
        .into_iter()
        .next()
        .unwrap_or_default();
    let batch = train.load_batch(&indices, None, &mut rng)?;

    let device = Device::cuda_if_available();
    let xs = batch.flat_tensor(Kind::Double, device);
    let ys = batch.label_tensor(device);

    let rows = batch.len();
    let held_out = (rows as f64 * args.test_size).ceil() as usize;
    if held_out == 0 || held_out >= rows {
        bail!("Cannot hold out {} of {} images for evaluation", held_out, rows);
    }
    let mut order: Vec<i64> = (0..rows as i64).collect();
    order.shuffle(&mut StdRng::seed_from_u64(SEED));
    let test_index = Tensor::from_slice(&order[..held_out]).to_device(device);
    let train_index = Tensor::from_slice(&order[held_out..]).to_device(device);
    let (train_x, train_y) = (xs.index_select(0, &train_index), ys.index_select(0, &train_index));
    let (test_x, test_y) = (xs.index_select(0, &test_index), ys.index_select(0, &test_index));
    log::info!("Training DBN on {} images, evaluating on {}", rows - held_out, held_out);

    let (vs, mut net) = init_network::<DbnNet>(device, CLASS_COUNT as i64);
    let rbm = RbmTrainer {
        epochs: args.rbm_epochs,
        ..RbmTrainer::default()
    };
    rbm.fit(&mut net.rbm, &train_x);

    let (train_features, test_features) =
        tch::no_grad(|| (net.rbm.transform(&train_x), net.rbm.transform(&test_x)));
    let mlp = MlpTrainer {
        max_epochs: args.mlp_epochs,
        ..MlpTrainer::default()
    };
    let report = mlp.fit(&vs, &net, &train_features, &train_y, &mut rng)?;

    let held_out_accuracy = accuracy(&net, &test_features, &test_y);
    log::info!("DBN Accuracy: {:.2}%", held_out_accuracy * 100.0);

    save_artifact(&vs, &args.output, ModelKind::Dbn, report.epochs)?;
    Ok(())
}
