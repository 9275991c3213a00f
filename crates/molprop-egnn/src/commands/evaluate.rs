use crate::cli::EvaluateArgs;
use anyhow::Context;
use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use molprop_egnn::{device, evaluate, Egnn, ModelManifest, MoleculeDataset, Qm9Property};

pub fn execute(args: EvaluateArgs) -> anyhow::Result<()> {
    let device = device(args.cpu)?;
    let manifest_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.weights.with_extension("json"));
    let manifest = ModelManifest::from_json_file(&manifest_path)
        .with_context(|| format!("reading manifest {}", manifest_path.display()))?;

    let property = match args.property {
        Some(property) => property,
        None => manifest
            .property
            .parse::<Qm9Property>()
            .with_context(|| format!("unknown property '{}' in manifest", manifest.property))?,
    };
    let data = MoleculeDataset::load(&args.data, property, &device)
        .with_context(|| format!("loading {}", args.data.display()))?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Egnn::new(&manifest.model, vb)?;
    varmap
        .load(&args.weights)
        .with_context(|| format!("loading weights {}", args.weights.display()))?;

    let batches = data.batches(args.batch_size, None)?;
    let mae = evaluate(&model, &batches, &manifest.features, manifest.normalization)?;
    println!("{property} MAE: {mae:.6}");
    Ok(())
}
