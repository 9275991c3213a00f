use crate::cli::TrainArgs;
use anyhow::Context;
use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use molprop_core::FeatureConfig;
use molprop_egnn::{
    device, Egnn, EgnnConfig, ModelManifest, MoleculeDataset, Normalization, Partition,
    Trainer, TrainingConfig,
};
use std::path::Path;
use tracing::info;

pub fn execute(args: TrainArgs) -> anyhow::Result<()> {
    let device = device(args.cpu)?;

    let train = MoleculeDataset::load(&args.train, args.property, &device)
        .with_context(|| format!("loading {}", args.train.display()))?;
    let valid = args
        .valid
        .as_ref()
        .map(|path| MoleculeDataset::load(path, args.property, &device))
        .transpose()?;
    let test = args
        .test
        .as_ref()
        .map(|path| MoleculeDataset::load(path, args.property, &device))
        .transpose()?;

    let features = FeatureConfig {
        num_species: train.num_species(),
        charge_power: args.charge_power,
        ..FeatureConfig::qm9()
    };
    let model_config = model_config(&args, &features)?;
    let training = TrainingConfig {
        epochs: args.epochs,
        batch_size: args.batch_size,
        lr: args.lr,
        weight_decay: args.weight_decay,
        log_interval: args.log_interval,
        test_interval: args.test_interval,
        seed: args.seed,
    };

    let normalization = match (args.mean, args.mad) {
        (Some(mean), Some(mad)) => Normalization { mean, mad },
        (mean, mad) => {
            let stats = Normalization::from_targets(train.targets())?;
            Normalization {
                mean: mean.unwrap_or(stats.mean),
                mad: mad.unwrap_or(stats.mad),
            }
        }
    };
    info!(
        "Training on {} molecules, property {}, mean {:.5}, mad {:.5}",
        train.len(),
        args.property,
        normalization.mean,
        normalization.mad
    );

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Egnn::new(&model_config, vb)?;
    let mut trainer = Trainer::new(model, varmap, &training, features, normalization)?;

    let manifest = ModelManifest {
        model: model_config,
        features,
        normalization,
        property: args.property.to_string(),
    };

    let mut best: Option<(usize, f64, Option<f64>)> = None;
    for epoch in 0..training.epochs {
        let batches = train.batches(training.batch_size, Some(training.seed + epoch as u64))?;
        trainer.run_epoch(epoch, &batches, Partition::Train)?;
        if epoch % training.test_interval != 0 {
            continue;
        }

        let test_loss = match &test {
            Some(data) => Some(trainer.run_epoch(
                epoch,
                &data.batches(training.batch_size, None)?,
                Partition::Test,
            )?),
            None => None,
        };
        if let Some(data) = &valid {
            let val_batches = data.batches(training.batch_size, None)?;
            let val_loss = trainer.run_epoch(epoch, &val_batches, Partition::Valid)?;
            if best.map_or(true, |(_, best_val, _)| val_loss < best_val) {
                best = Some((epoch, val_loss, test_loss));
                if let Some(path) = &args.save {
                    save(&trainer, &manifest, path)?;
                }
            }
            if let Some((best_epoch, best_val, best_test)) = best {
                info!(
                    "Best: val loss {best_val:.5}, test loss {}, epoch {best_epoch}",
                    best_test.map_or("n/a".to_string(), |t| format!("{t:.5}"))
                );
            }
        }
    }

    if valid.is_none() {
        if let Some(path) = &args.save {
            save(&trainer, &manifest, path)?;
        }
    }
    Ok(())
}

fn model_config(args: &TrainArgs, features: &FeatureConfig) -> anyhow::Result<EgnnConfig> {
    let mut config = match &args.config {
        Some(path) => EgnnConfig::from_json_file(path)
            .with_context(|| format!("reading model config {}", path.display()))?,
        None => EgnnConfig::qm9(),
    };
    config.in_node_nf = features.in_node_nf();
    if let Some(nf) = args.nf {
        config.hidden_nf = nf;
    }
    if let Some(n_layers) = args.n_layers {
        config.n_layers = n_layers;
    }
    if let Some(attention) = args.attention {
        config.attention = attention;
    }
    if let Some(node_attr) = args.node_attr {
        config.node_attr = node_attr;
    }
    if let Some(agg_mode) = args.agg_mode {
        config.agg_mode = agg_mode;
    }
    if let Some(coords_weight) = args.coords_weight {
        config.coords_weight = coords_weight;
    }
    config.validate()?;
    Ok(config)
}

fn save(trainer: &Trainer, manifest: &ModelManifest, path: &Path) -> anyhow::Result<()> {
    trainer.save(path)?;
    manifest.to_json_file(path.with_extension("json"))?;
    info!("Saved weights to {}", path.display());
    Ok(())
}
