use burn::{
    module::Param,
    tensor::{backend::Backend, Tensor, TensorData},
};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};

/// Normal distribution with samples farther than `bound` standard deviations
/// from the mean redrawn.
#[derive(Debug, Clone, Copy)]
pub struct TruncatedNormal {
    normal: Normal<f64>,
    mean: f64,
    std: f64,
    bound: f64,
}

impl TruncatedNormal {
    pub fn new(std: f64) -> Result<Self> {
        if !(std.is_finite() && std > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "truncated normal std must be positive, got {std}"
            )));
        }
        let normal = Normal::new(0.0, std)
            .map_err(|err| Error::InvalidConfig(format!("truncated normal: {err}")))?;
        Ok(Self {
            normal,
            mean: 0.0,
            std,
            bound: 2.0,
        })
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    /// Largest absolute deviation from the mean a sample can take.
    pub fn limit(&self) -> f64 {
        self.bound * self.std
    }

    pub fn sample_vec<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> Vec<f32> {
        let limit = self.limit();
        (0..len)
            .map(|_| loop {
                let value: f64 = self.normal.sample(rng);
                if (value - self.mean).abs() <= limit {
                    break value as f32;
                }
            })
            .collect()
    }

    pub fn tensor<B: Backend, const D: usize, R: Rng + ?Sized>(
        &self,
        shape: [usize; D],
        device: &B::Device,
        rng: &mut R,
    ) -> Tensor<B, D> {
        let values = self.sample_vec(shape.iter().product(), rng);
        Tensor::from_data(TensorData::new(values, shape), device)
    }

    /// Fresh trainable parameter with the same shape as `like`.
    pub fn param<B: Backend, const D: usize, R: Rng + ?Sized>(
        &self,
        like: &Param<Tensor<B, D>>,
        rng: &mut R,
    ) -> Param<Tensor<B, D>> {
        let current = like.val();
        let tensor = self.tensor::<B, D, R>(current.dims(), &current.device(), rng);
        Param::from_tensor(tensor)
    }
}
