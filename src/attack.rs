//! Fast gradient adversarial examples.
//!
//! The perturbation follows the gradient of the wrapped loss with respect to
//! the inputs, normalized with the chosen norm and scaled by
//! `eps * (clip_max - clip_min)`. With `alpha` set, a random signed step of
//! absolute size `alpha` is taken first and the gradient step shrinks to
//! `(eps - alpha) * (clip_max - clip_min)`.

use burn::{
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::Labels,
    error::Error,
    loss::WithLoss,
    model::Classifier,
};

const NORM_EPSILON: f64 = 1e-12;

/// Norm used to turn the raw gradient into a perturbation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormLevel {
    L1,
    L2,
    Inf,
}

#[derive(Config, Debug)]
pub struct FastGradientConfig {
    /// Perturbation budget, relative to the clip range.
    #[config(default = 0.3)]
    pub eps: f64,

    /// Size of the optional random start, in input units.
    pub alpha: Option<f64>,

    #[config(default = "NormLevel::Inf")]
    pub norm_level: NormLevel,

    #[config(default = 0.0)]
    pub clip_min: f64,

    #[config(default = 1.0)]
    pub clip_max: f64,

    /// Move towards the given labels instead of away from them.
    #[config(default = false)]
    pub is_targeted: bool,
}

impl FastGradientConfig {
    /// Sign-of-gradient attack with the given budget.
    pub fn fgsm(eps: f64) -> Self {
        Self::new().with_eps(eps).with_norm_level(NormLevel::Inf)
    }

    pub fn init<M>(&self, network: WithLoss<M>) -> crate::Result<FastGradientMethod<M>> {
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "eps must be positive, got {}",
                self.eps
            )));
        }
        if let Some(alpha) = self.alpha {
            if !(0.0..self.eps).contains(&alpha) {
                return Err(Error::InvalidConfig(format!(
                    "alpha must lie in [0, eps), got {alpha} with eps {}",
                    self.eps
                )));
            }
        }
        if self.clip_min >= self.clip_max {
            return Err(Error::InvalidConfig(format!(
                "clip_min ({}) must be below clip_max ({})",
                self.clip_min, self.clip_max
            )));
        }

        Ok(FastGradientMethod {
            network,
            eps: self.eps,
            alpha: self.alpha,
            norm_level: self.norm_level,
            clip_min: self.clip_min,
            clip_max: self.clip_max,
            is_targeted: self.is_targeted,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FastGradientMethod<M> {
    network: WithLoss<M>,
    eps: f64,
    alpha: Option<f64>,
    norm_level: NormLevel,
    clip_min: f64,
    clip_max: f64,
    is_targeted: bool,
}

impl<M> FastGradientMethod<M> {
    pub fn network(&self) -> &WithLoss<M> {
        &self.network
    }

    pub fn into_network(self) -> WithLoss<M> {
        self.network
    }

    /// Largest per-element change `generate` can introduce under the Inf norm.
    pub fn max_perturbation(&self) -> f64 {
        let clip_diff = self.clip_max - self.clip_min;
        match self.alpha {
            Some(alpha) => alpha + (self.eps - alpha) * clip_diff,
            None => self.eps * clip_diff,
        }
    }

    /// Adversarial counterpart of `inputs`, same shape, clipped to the bounds.
    pub fn generate<B>(&self, inputs: Tensor<B, 4>, labels: &Labels<B>) -> crate::Result<Tensor<B, 4>>
    where
        B: AutodiffBackend,
        M: Classifier<B>,
    {
        let clip_diff = self.clip_max - self.clip_min;
        let inputs = inputs.detach();

        let (start, step) = match self.alpha {
            Some(alpha) => {
                let noise = Tensor::<B, 4>::random(
                    inputs.shape(),
                    Distribution::Normal(0.0, 1.0),
                    &inputs.device(),
                );
                (inputs + noise.sign().mul_scalar(alpha), self.eps - alpha)
            }
            None => (inputs, self.eps),
        };

        let direction = self.gradient_direction(start.clone(), labels)?;
        let perturbation = direction.mul_scalar(step * clip_diff);
        let perturbation = if self.is_targeted {
            perturbation.neg()
        } else {
            perturbation
        };

        let adversarial = (start.inner() + perturbation).clamp(self.clip_min, self.clip_max);
        debug!(
            "FGM: eps={}, norm={:?}, ciblée={}, shape={:?}",
            self.eps,
            self.norm_level,
            self.is_targeted,
            adversarial.dims()
        );

        Ok(Tensor::from_inner(adversarial))
    }

    fn gradient_direction<B>(
        &self,
        inputs: Tensor<B, 4>,
        labels: &Labels<B>,
    ) -> crate::Result<Tensor<B::InnerBackend, 4>>
    where
        B: AutodiffBackend,
        M: Classifier<B>,
    {
        let inputs = inputs.require_grad();
        let loss = self.network.forward(inputs.clone(), labels)?;
        let grads = loss.backward();
        let gradient = inputs.grad(&grads).ok_or(Error::MissingGradient)?;

        Ok(normalize(gradient, self.norm_level))
    }
}

fn normalize<B: Backend>(gradient: Tensor<B, 4>, norm_level: NormLevel) -> Tensor<B, 4> {
    let dims = gradient.dims();
    let flat: Tensor<B, 2> = gradient.reshape([dims[0], dims[1] * dims[2] * dims[3]]);

    let norm = match norm_level {
        NormLevel::Inf => return flat.sign().reshape(dims),
        NormLevel::L1 => flat.clone().abs().sum_dim(1),
        NormLevel::L2 => flat.clone().powf_scalar(2.0).sum_dim(1).sqrt(),
    };

    (flat / norm.add_scalar(NORM_EPSILON)).reshape(dims)
}
