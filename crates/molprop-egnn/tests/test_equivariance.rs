use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use molprop_core::FeatureConfig;
use molprop_egnn::{AggMode, Egnn, EgnnConfig, Result};
use molprop_test_data::{batch, rotation_matrix, TestMolecule};

fn small_model(config: EgnnConfig) -> Result<Egnn> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    Egnn::new(&config, vb)
}

fn small_config() -> EgnnConfig {
    EgnnConfig {
        hidden_nf: 16,
        n_layers: 3,
        ..EgnnConfig::qm9()
    }
}

fn predict(model: &Egnn, molecules: &[TestMolecule], n_nodes: usize) -> Result<Vec<f32>> {
    let input = batch(molecules, n_nodes, &Device::Cpu)?.graph_input(&FeatureConfig::qm9())?;
    Ok(model.forward(&input)?.flatten_all()?.to_vec1::<f32>()?)
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!(
            (x - y).abs() <= tol * (1.0 + x.abs()),
            "{x} != {y} (tolerance {tol})"
        );
    }
}

#[test]
fn test_rigid_motion_invariance() -> Result<()> {
    let rotation = rotation_matrix([0.3, -1.0, 0.5], 1.1);
    let shift = [1.5, -2.0, 0.7];
    for config in [
        small_config(),
        EgnnConfig {
            attention: false,
            node_attr: true,
            ..small_config()
        },
    ] {
        let model = small_model(config)?;
        let molecules = TestMolecule::all();
        let moved: Vec<_> = molecules
            .iter()
            .map(|m| m.transformed(&rotation, shift))
            .collect();
        assert_close(
            &predict(&model, &molecules, 5)?,
            &predict(&model, &moved, 5)?,
            1e-4,
        );
    }
    Ok(())
}

#[test]
fn test_coordinates_are_equivariant() -> Result<()> {
    let model = small_model(EgnnConfig {
        coords_weight: 50.0,
        ..small_config()
    })?;
    let rotation = rotation_matrix([1.0, 1.0, 0.0], -0.6);
    let shift = [0.2, 3.0, -1.0];
    let molecules = vec![TestMolecule::formaldehyde(), TestMolecule::ammonia()];
    let moved: Vec<_> = molecules
        .iter()
        .map(|m| m.transformed(&rotation, shift))
        .collect();

    let out = |mols: &[TestMolecule]| -> Result<Vec<Vec<f32>>> {
        let input = batch(mols, 4, &Device::Cpu)?.graph_input(&FeatureConfig::qm9())?;
        Ok(model.forward_atoms(&input)?.positions.to_vec2::<f32>()?)
    };
    let original = out(&molecules)?;
    let transformed = out(&moved)?;

    for (p, q) in original.iter().zip(&transformed) {
        let expected = molprop_test_data::apply_rigid(&rotation, shift, [p[0], p[1], p[2]]);
        assert_close(&expected, q, 1e-4);
    }
    Ok(())
}

#[test]
fn test_permutation_invariance() -> Result<()> {
    let model = small_model(small_config())?;
    let methane = TestMolecule::methane();
    let formaldehyde = TestMolecule::formaldehyde();
    let original = predict(&model, &[methane.clone(), formaldehyde.clone()], 5)?;
    let permuted = predict(
        &model,
        &[
            methane.permuted(&[3, 0, 4, 1, 2]),
            formaldehyde.permuted(&[2, 3, 1, 0]),
        ],
        5,
    )?;
    assert_close(&original, &permuted, 1e-4);
    Ok(())
}

#[test]
fn test_molecule_order_in_batch() -> Result<()> {
    let model = small_model(small_config())?;
    let forward = predict(&model, &[TestMolecule::water(), TestMolecule::methane()], 5)?;
    let reverse = predict(&model, &[TestMolecule::methane(), TestMolecule::water()], 5)?;
    assert_close(&forward, &[reverse[1], reverse[0]], 1e-5);
    Ok(())
}

#[test]
fn test_padding_invariance() -> Result<()> {
    for agg_mode in [AggMode::Sum, AggMode::Avg, AggMode::Max] {
        let model = small_model(EgnnConfig {
            agg_mode,
            ..small_config()
        })?;
        let molecules = TestMolecule::all();
        assert_close(
            &predict(&model, &molecules, 5)?,
            &predict(&model, &molecules, 8)?,
            1e-5,
        );
    }
    Ok(())
}

#[test]
fn test_padding_slot_contents_are_ignored() -> Result<()> {
    let device = Device::Cpu;
    let model = small_model(small_config())?;
    let features = FeatureConfig::qm9();
    let clean = batch(&[TestMolecule::water()], 5, &device)?;

    // put a carbon at a random spot in each of the two padding slots
    let padding = clean.atom_mask.affine(-1.0, 1.0)?;
    let carbon = Tensor::new(&[0f32, 1., 0., 0., 0.], &device)?.reshape((1, 1, 5))?;
    let mut noisy = clean.clone();
    let jitter = Tensor::randn(0f32, 3., (1, 5, 3), &device)?.broadcast_mul(&padding)?;
    noisy.positions = (&clean.positions + jitter)?;
    noisy.one_hot = (&clean.one_hot + padding.broadcast_mul(&carbon)?)?;
    noisy.charges = (&clean.charges + padding.affine(6.0, 0.0)?)?;

    let a = model.forward(&clean.graph_input(&features)?)?;
    let b = model.forward(&noisy.graph_input(&features)?)?;
    assert_close(
        &a.flatten_all()?.to_vec1::<f32>()?,
        &b.flatten_all()?.to_vec1::<f32>()?,
        1e-6,
    );
    Ok(())
}
