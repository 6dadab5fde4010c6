use std::marker::PhantomData;
use std::path::Path;

use crate::{
    attack::FastGradientConfig,
    context::{DeviceTarget, ExecutionContext},
    data::{Labels, SyntheticBatch},
    error::Error,
    loss::{SoftmaxCrossEntropyConfig, WithLoss},
    model::{Classifier, LeNet, LeNetConfig},
};

use log::{debug, info};

use burn::{
    module::AutodiffModule,
    nn::loss::Reduction,
    optim::{momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

/// Heavy-ball momentum SGD: `v = momentum * v + grad`, `p = p - lr * v`.
#[derive(Config, Debug)]
pub struct MomentumOptimizerConfig {
    #[config(default = 0.01)]
    pub learning_rate: f64,

    #[config(default = 0.9)]
    pub momentum: f64,

    #[config(default = false)]
    pub nesterov: bool,
}

impl MomentumOptimizerConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::InvalidConfig(format!(
                "momentum must lie in [0, 1), got {}",
                self.momentum
            )));
        }
        Ok(())
    }

    /// Optimizer over every trainable parameter of `M`.
    pub fn init<B, M>(&self) -> crate::Result<impl Optimizer<M, B>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        self.validate()?;
        let momentum = MomentumConfig::new()
            .with_momentum(self.momentum)
            .with_dampening(0.0)
            .with_nesterov(self.nesterov);

        Ok(SgdConfig::new()
            .with_momentum(Some(momentum))
            .init::<B, M>())
    }

    /// Wraps `network` with this optimizer, stepping at `learning_rate`.
    pub fn train_one_step<B, M>(
        &self,
        network: WithLoss<M>,
    ) -> crate::Result<TrainOneStep<B, M, impl Optimizer<M, B>>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + Classifier<B>,
    {
        let optimizer = self.init::<B, M>()?;
        Ok(TrainOneStep {
            network,
            optimizer,
            learning_rate: self.learning_rate,
            steps: 0,
            _backend: PhantomData,
        })
    }
}

/// Forward, backward and parameter update on one batch per call.
pub struct TrainOneStep<B, M, O> {
    network: WithLoss<M>,
    optimizer: O,
    learning_rate: f64,
    steps: usize,
    _backend: PhantomData<B>,
}

impl<B, M, O> TrainOneStep<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Classifier<B>,
    O: Optimizer<M, B>,
{
    /// Runs one optimization step and returns the loss measured before the update.
    pub fn step(&mut self, images: Tensor<B, 4>, labels: &Labels<B>) -> crate::Result<f32> {
        let loss = self.network.forward(images, labels)?;
        let value = loss.clone().into_scalar().elem::<f32>();

        let grads = GradientsParams::from_grads(loss.backward(), self.network.model());
        let model = self.network.model().clone();
        let model = self.optimizer.step(self.learning_rate, model, grads);
        self.network.set_model(model);

        self.steps += 1;
        debug!("Pas {} terminé: loss={value:.4}", self.steps);
        Ok(value)
    }

    pub fn model(&self) -> &M {
        self.network.model()
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn into_model(self) -> M {
        self.network.into_model()
    }
}

#[derive(Config, Debug)]
pub struct SmokeTestConfig {
    #[config(default = 10)]
    pub num_classes: usize,

    #[config(default = 32)]
    pub batch_size: usize,

    /// Class-index labels when true, one-hot rows otherwise.
    #[config(default = false)]
    pub sparse: bool,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = "DeviceTarget::Cpu")]
    pub device_target: DeviceTarget,

    /// Summed per-sample losses, so one step moves as far as the batch is large.
    #[config(default = "Reduction::Sum")]
    pub reduction: Reduction,

    #[config(default = "LeNetConfig::new()")]
    pub model: LeNetConfig,

    pub attack: FastGradientConfig,

    pub optimizer: MomentumOptimizerConfig,
}

impl SmokeTestConfig {
    /// FGSM with eps 0.3 and momentum SGD (lr 0.01, momentum 0.9).
    pub fn fixture() -> Self {
        Self::new(FastGradientConfig::fgsm(0.3), MomentumOptimizerConfig::new())
    }

    /// Replaces the device target when `value` names one.
    pub fn with_device_override(self, value: Option<&str>) -> crate::Result<Self> {
        match value {
            Some(name) => Ok(self.with_device_target(name.trim().parse()?)),
            None => Ok(self),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        Self::load(path).map_err(|err| Error::ConfigLoad {
            path: path.display().to_string(),
            reason: format!("{err:?}"),
        })
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
        }
        if self.num_classes == 0 {
            return Err(Error::InvalidConfig("num_classes must be at least 1".into()));
        }
        if self.model.num_classes != self.num_classes {
            return Err(Error::InvalidConfig(format!(
                "model has {} classes but labels use {}",
                self.model.num_classes, self.num_classes
            )));
        }
        self.optimizer.validate()
    }
}

/// Shapes and values observed during a smoke run.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeReport {
    pub logits_shape: [usize; 2],
    pub adversarial_shape: [usize; 4],
    pub max_perturbation: f32,
    pub loss: f32,
    pub logits_shape_after_step: [usize; 2],
}

pub fn run<B: AutodiffBackend>(
    ctx: &ExecutionContext<B>,
    config: &SmokeTestConfig,
) -> crate::Result<SmokeReport> {
    info!("=== Démarrage du test de fumée ===");
    config.validate()?;
    info!(
        "Configuration: batch_size={}, classes={}, sparse={}, cible={}, seed={}",
        config.batch_size,
        config.num_classes,
        config.sparse,
        ctx.target(),
        ctx.seed()
    );

    info!("Génération du batch synthétique");
    let batch =
        SyntheticBatch::generate(ctx, config.batch_size, config.num_classes, config.sparse)?;

    info!("Initialisation du modèle");
    let model = config.model.init(ctx)?;
    let logits = model.checked_forward(batch.images.clone())?;
    let logits_shape = logits.dims();
    debug!("Logits: {logits_shape:?}");

    let loss = SoftmaxCrossEntropyConfig::new()
        .with_sparse(config.sparse)
        .with_reduction(config.reduction.clone())
        .init();

    info!("Génération des exemples adverses (eps={})", config.attack.eps);
    let attack = config
        .attack
        .init(WithLoss::new(model.clone(), loss.clone()))?;
    let adversarial = attack.generate(batch.images.clone(), &batch.labels)?;
    let adversarial_shape = adversarial.dims();
    if adversarial_shape != batch.images.dims() {
        return Err(Error::shape(
            "adversarial batch",
            &batch.images.dims(),
            &adversarial_shape,
        ));
    }
    let max_perturbation = (adversarial - batch.images.clone())
        .abs()
        .max()
        .into_scalar()
        .elem::<f32>();
    debug!(
        "Perturbation maximale: {max_perturbation:.4} (budget {:.4})",
        attack.max_perturbation()
    );

    info!(
        "Configuration de l'optimiseur Momentum (lr={}, momentum={})",
        config.optimizer.learning_rate, config.optimizer.momentum
    );
    let mut trainer = config
        .optimizer
        .train_one_step::<B, LeNet<B>>(WithLoss::new(model, loss))?;

    info!("Exécution d'un pas d'entraînement");
    let step_loss = trainer.step(batch.images.clone(), &batch.labels)?;
    let logits_shape_after_step = trainer.model().checked_forward(batch.images)?.dims();
    if logits_shape_after_step != logits_shape {
        return Err(Error::shape(
            "logits after training step",
            &logits_shape,
            &logits_shape_after_step,
        ));
    }

    info!("=== Fin du test de fumée (loss={step_loss:.4}) ===");
    Ok(SmokeReport {
        logits_shape,
        adversarial_shape,
        max_perturbation,
        loss: step_loss,
        logits_shape_after_step,
    })
}
