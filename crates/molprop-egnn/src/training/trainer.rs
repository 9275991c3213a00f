use super::loss::masked_l1_loss;
use super::scheduler::CosineAnnealing;
use super::{Normalization, Partition};
use crate::configs::TrainingConfig;
use crate::error::{Error, Result};
use crate::model::egnn::Egnn;
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use molprop_core::{FeatureConfig, MoleculeBatch};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

/// Owns the model parameters and the optimizer for a training run.
pub struct Trainer {
    model: Egnn,
    vars: VarMap,
    optimizer: AdamW,
    scheduler: CosineAnnealing,
    features: FeatureConfig,
    normalization: Normalization,
    log_interval: usize,
    // batch index within the running epoch, for error reports
    iteration: usize,
}

impl Trainer {
    pub fn new(
        model: Egnn,
        vars: VarMap,
        config: &TrainingConfig,
        features: FeatureConfig,
        normalization: Normalization,
    ) -> Result<Self> {
        config.validate()?;
        let params = ParamsAdamW {
            lr: config.lr,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(vars.all_vars(), params)?;
        Ok(Self {
            model,
            vars,
            optimizer,
            scheduler: CosineAnnealing::new(config.lr, config.epochs),
            features,
            normalization,
            log_interval: config.log_interval,
            iteration: 0,
        })
    }

    pub fn model(&self) -> &Egnn {
        &self.model
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// One optimizer step on `batch`; returns the loss in normalized units.
    ///
    /// Molecules without atoms are left out of the loss. Only `sum` readout
    /// gets that far: `avg` and `max` reject such a batch with
    /// [`Error::EmptyMolecule`] before the loss is computed.
    ///
    /// A non-finite loss is reported before the parameters are touched.
    pub fn train_step(&mut self, batch: &MoleculeBatch) -> Result<f32> {
        let pred = predict(&self.model, &self.features, batch)?;
        let target = self.normalization.normalize(&batch.target)?;
        let loss = masked_l1_loss(&pred, &target, &batch.molecule_mask()?)?;
        let value = loss.to_scalar::<f32>()?;
        check_finite(value, Partition::Train, self.iteration)?;
        self.optimizer.backward_step(&loss)?;
        Ok(value)
    }

    /// Mean absolute error of `batch` in property units.
    pub fn eval_step(&self, batch: &MoleculeBatch) -> Result<f32> {
        eval_batch(&self.model, &self.features, self.normalization, batch)
    }

    /// Run every batch once and return the batch-size-weighted mean loss.
    ///
    /// Training epochs first set the learning rate for `epoch` from the
    /// cosine schedule.
    pub fn run_epoch(
        &mut self,
        epoch: usize,
        batches: &[MoleculeBatch],
        partition: Partition,
    ) -> Result<f64> {
        if partition == Partition::Train {
            let lr = self.scheduler.lr(epoch);
            self.optimizer.set_learning_rate(lr);
            debug!("Epoch {epoch}: learning rate {lr:.3e}");
        }

        let mut recent = VecDeque::with_capacity(10);
        let mut total = 0.0;
        let mut count = 0;
        for (i, batch) in batches.iter().enumerate() {
            self.iteration = i;
            let loss = match partition {
                Partition::Train => self.train_step(batch)?,
                _ => {
                    let loss = self.eval_step(batch)?;
                    check_finite(loss, partition, i)?;
                    loss
                }
            };
            total += loss as f64 * batch.batch_size() as f64;
            count += batch.batch_size();

            if recent.len() == 10 {
                recent.pop_front();
            }
            recent.push_back(loss as f64);
            if i % self.log_interval == 0 {
                let mean = recent.iter().sum::<f64>() / recent.len() as f64;
                info!(
                    "{partition} epoch {epoch} iteration {i}/{} loss {mean:.5}",
                    batches.len()
                );
            }
        }

        let mean = if count > 0 { total / count as f64 } else { 0.0 };
        info!("{partition} epoch {epoch} done, average loss {mean:.5}");
        Ok(mean)
    }

    /// Write the parameters as safetensors.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vars.save(path)?;
        Ok(())
    }
}

/// Batch-size-weighted MAE of `model` over `batches`, in property units.
///
/// Needs no optimizer state, so saved weights can be scored without a
/// [`Trainer`].
pub fn evaluate(
    model: &Egnn,
    batches: &[MoleculeBatch],
    features: &FeatureConfig,
    normalization: Normalization,
) -> Result<f64> {
    let mut total = 0.0;
    let mut count = 0;
    for (i, batch) in batches.iter().enumerate() {
        let mae = eval_batch(model, features, normalization, batch)?;
        check_finite(mae, Partition::Test, i)?;
        total += mae as f64 * batch.batch_size() as f64;
        count += batch.batch_size();
    }
    Ok(if count > 0 { total / count as f64 } else { 0.0 })
}

fn eval_batch(
    model: &Egnn,
    features: &FeatureConfig,
    normalization: Normalization,
    batch: &MoleculeBatch,
) -> Result<f32> {
    let pred = normalization.denormalize(&predict(model, features, batch)?.detach())?;
    let mae = masked_l1_loss(&pred, &batch.target, &batch.molecule_mask()?)?;
    Ok(mae.to_scalar::<f32>()?)
}

fn predict(model: &Egnn, features: &FeatureConfig, batch: &MoleculeBatch) -> Result<Tensor> {
    let input = batch.graph_input(features)?;
    Ok(model.forward(&input)?.squeeze(1)?)
}

fn check_finite(value: f32, partition: Partition, iteration: usize) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::NonFiniteLoss {
            value,
            partition: partition.to_string(),
            iteration,
        })
    }
}
