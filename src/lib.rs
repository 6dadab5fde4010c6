pub mod attack;
pub mod context;
pub mod data;
pub mod error;
pub mod init;
pub mod loss;
pub mod model;
pub mod training;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use burn::prelude::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    use crate::{
        attack::FastGradientConfig,
        context::{DeviceTarget, ExecutionContext},
        data::SyntheticBatch,
        loss::{SoftmaxCrossEntropyConfig, WithLoss},
        model::{Classifier, LeNet},
        training::MomentumOptimizerConfig,
    };

    #[test]
    fn test_model_creation() {
        type Backend = NdArray;
        let ctx = ExecutionContext::<Backend>::ndarray(DeviceTarget::Cpu, 42).unwrap();
        let _model = LeNet::<Backend>::new(&ctx).unwrap();
    }

    #[test]
    fn test_model_forward() {
        type Backend = NdArray;
        let ctx = ExecutionContext::<Backend>::ndarray(DeviceTarget::Cpu, 42).unwrap();
        let model = LeNet::<Backend>::new(&ctx).unwrap();

        let images = Tensor::<Backend, 4>::zeros([2, 1, 32, 32], ctx.device());
        let output = model.forward(images);

        assert_eq!(output.dims(), [2, 10]);
    }

    #[test]
    fn test_attack_then_train() {
        type Backend = Autodiff<NdArray>;
        let ctx = ExecutionContext::<Backend>::ndarray(DeviceTarget::Cpu, 42).unwrap();
        let batch = SyntheticBatch::generate(&ctx, 32, 10, false).unwrap();
        let model = LeNet::<Backend>::new(&ctx).unwrap();
        let loss = SoftmaxCrossEntropyConfig::new().init();

        let attack = FastGradientConfig::fgsm(0.3)
            .init(WithLoss::new(model.clone(), loss.clone()))
            .unwrap();
        let adversarial = attack
            .generate(batch.images.clone(), &batch.labels)
            .unwrap();
        assert_eq!(adversarial.dims(), [32, 1, 32, 32]);

        let mut trainer = MomentumOptimizerConfig::new()
            .train_one_step::<Backend, LeNet<Backend>>(WithLoss::new(model, loss))
            .unwrap();
        trainer.step(batch.images.clone(), &batch.labels).unwrap();

        let logits = trainer.model().checked_forward(adversarial).unwrap();
        assert_eq!(logits.dims(), [32, 10]);
    }
}
