use burn::{
    nn::loss::{CrossEntropyLossConfig, Reduction},
    prelude::*,
    tensor::{activation::log_softmax, ElementConversion},
};

use crate::{
    data::Labels,
    error::Error,
    model::Classifier,
};

#[derive(Config, Debug)]
pub struct SoftmaxCrossEntropyConfig {
    /// Whether targets are class indices rather than one-hot rows.
    #[config(default = false)]
    pub sparse: bool,

    #[config(default = "Reduction::Mean")]
    pub reduction: Reduction,
}

impl SoftmaxCrossEntropyConfig {
    pub fn init(&self) -> SoftmaxCrossEntropy {
        SoftmaxCrossEntropy {
            sparse: self.sparse,
            reduction: self.reduction.clone(),
        }
    }
}

/// Cross-entropy between `softmax(logits)` and the targets.
#[derive(Debug, Clone)]
pub struct SoftmaxCrossEntropy {
    sparse: bool,
    reduction: Reduction,
}

impl SoftmaxCrossEntropy {
    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Sparse targets go through burn's `CrossEntropyLoss`; one-hot rows are
    /// reduced from `log_softmax` directly.
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        labels: &Labels<B>,
    ) -> crate::Result<Tensor<B, 1>> {
        if labels.is_sparse() != self.sparse {
            return Err(Error::LabelEncoding {
                expected: if self.sparse { "sparse" } else { "one-hot" },
                found: labels.encoding(),
            });
        }

        let [batch_size, num_classes] = logits.dims();
        if labels.batch_size() != batch_size {
            return Err(Error::shape("labels", &[batch_size], &[labels.batch_size()]));
        }

        match labels {
            Labels::Sparse(classes) => {
                check_range(classes, num_classes)?;
                let mean = CrossEntropyLossConfig::new()
                    .init(&logits.device())
                    .forward(logits, classes.clone());
                Ok(match self.reduction {
                    Reduction::Sum => mean.mul_scalar(batch_size as f64),
                    _ => mean,
                })
            }
            Labels::OneHot(targets) => {
                let dims = targets.dims();
                if dims != [batch_size, num_classes] {
                    return Err(Error::shape("one-hot labels", &[batch_size, num_classes], &dims));
                }
                let per_sample = (log_softmax(logits, 1) * targets.clone())
                    .sum_dim(1)
                    .reshape([batch_size])
                    .neg();
                Ok(match self.reduction {
                    Reduction::Sum => per_sample.sum(),
                    _ => per_sample.mean(),
                })
            }
        }
    }
}

fn check_range<B: Backend>(classes: &Tensor<B, 1, Int>, num_classes: usize) -> crate::Result<()> {
    let min = classes.clone().min().into_scalar().elem::<i64>();
    let max = classes.clone().max().into_scalar().elem::<i64>();
    let label = if min < 0 { min } else { max };
    if label < 0 || label >= num_classes as i64 {
        return Err(Error::LabelOutOfRange { label, num_classes });
    }
    Ok(())
}

/// A classifier bundled with the loss it is trained or attacked against.
#[derive(Debug, Clone)]
pub struct WithLoss<M> {
    model: M,
    loss: SoftmaxCrossEntropy,
}

impl<M> WithLoss<M> {
    pub fn new(model: M, loss: SoftmaxCrossEntropy) -> Self {
        Self { model, loss }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn loss(&self) -> &SoftmaxCrossEntropy {
        &self.loss
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub(crate) fn set_model(&mut self, model: M) {
        self.model = model;
    }

    pub fn forward<B: Backend>(
        &self,
        images: Tensor<B, 4>,
        labels: &Labels<B>,
    ) -> crate::Result<Tensor<B, 1>>
    where
        M: Classifier<B>,
    {
        let logits = self.model.checked_forward(images)?;
        self.loss.forward(logits, labels)
    }
}
