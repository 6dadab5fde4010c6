use burn::prelude::*;
use log::debug;
use rand::Rng;

use crate::{
    context::ExecutionContext,
    error::Error,
    model::{INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH},
};

const DATA_STREAM: u64 = 2;

/// Target labels, either as class indices or as one-hot rows.
#[derive(Debug, Clone)]
pub enum Labels<B: Backend> {
    Sparse(Tensor<B, 1, Int>),
    OneHot(Tensor<B, 2>),
}

impl<B: Backend> Labels<B> {
    pub fn from_classes(
        classes: &[usize],
        num_classes: usize,
        sparse: bool,
        device: &B::Device,
    ) -> crate::Result<Self> {
        if sparse {
            check_classes(classes, num_classes)?;
            let indices: Vec<i64> = classes.iter().map(|&c| c as i64).collect();
            let data = TensorData::new(indices, [classes.len()]);
            Ok(Labels::Sparse(Tensor::from_data(data, device)))
        } else {
            let rows = one_hot(classes, num_classes)?;
            let data = TensorData::new(rows, [classes.len(), num_classes]);
            Ok(Labels::OneHot(Tensor::from_data(data, device)))
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Labels::Sparse(_))
    }

    pub fn encoding(&self) -> &'static str {
        if self.is_sparse() {
            "sparse"
        } else {
            "one-hot"
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            Labels::Sparse(tensor) => tensor.dims()[0],
            Labels::OneHot(tensor) => tensor.dims()[0],
        }
    }

    /// Class indices on the device, whatever the encoding.
    pub fn classes(&self) -> Tensor<B, 1, Int> {
        match self {
            Labels::Sparse(tensor) => tensor.clone(),
            Labels::OneHot(tensor) => {
                let [batch_size, _] = tensor.dims();
                tensor.clone().argmax(1).reshape([batch_size])
            }
        }
    }
}

fn check_classes(classes: &[usize], num_classes: usize) -> crate::Result<()> {
    match classes.iter().find(|&&class| class >= num_classes) {
        Some(&class) => Err(Error::LabelOutOfRange {
            label: class as i64,
            num_classes,
        }),
        None => Ok(()),
    }
}

/// Rows of the identity matrix picked by `classes`, flattened row-major.
pub fn one_hot(classes: &[usize], num_classes: usize) -> crate::Result<Vec<f32>> {
    check_classes(classes, num_classes)?;
    let mut rows = vec![0.0; classes.len() * num_classes];
    for (row, &class) in classes.iter().enumerate() {
        rows[row * num_classes + class] = 1.0;
    }
    Ok(rows)
}

/// Column index of the largest value of each `width`-wide row.
pub fn argmax_rows(values: &[f32], width: usize) -> Vec<usize> {
    values
        .chunks(width)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
                    if v > best.1 {
                        (i, v)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

/// Uniform random images with uniformly drawn labels.
#[derive(Debug, Clone)]
pub struct SyntheticBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Labels<B>,
    pub classes: Vec<usize>,
}

impl<B: Backend> SyntheticBatch<B> {
    pub fn generate(
        ctx: &ExecutionContext<B>,
        batch_size: usize,
        num_classes: usize,
        sparse: bool,
    ) -> crate::Result<Self> {
        if batch_size == 0 || num_classes == 0 {
            return Err(Error::InvalidConfig(format!(
                "synthetic batch needs at least one sample and one class, got {batch_size} and {num_classes}"
            )));
        }

        let mut rng = ctx.rng(DATA_STREAM);
        let shape = [batch_size, INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH];

        let pixels: Vec<f32> = (0..shape.iter().product::<usize>())
            .map(|_| rng.random::<f32>())
            .collect();
        let classes: Vec<usize> = (0..batch_size)
            .map(|_| rng.random_range(0..num_classes))
            .collect();

        debug!(
            "Batch synthétique: images={shape:?}, labels={} ({} classes)",
            batch_size, num_classes
        );

        Ok(Self {
            images: Tensor::from_data(TensorData::new(pixels, shape), ctx.device()),
            labels: Labels::from_classes(&classes, num_classes, sparse, ctx.device())?,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceTarget;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn context() -> ExecutionContext<TestBackend> {
        ExecutionContext::ndarray(DeviceTarget::Cpu, 11).unwrap()
    }

    #[test]
    fn one_hot_round_trips_every_class() {
        let classes: Vec<usize> = (0..10).collect();
        let rows = one_hot(&classes, 10).unwrap();

        assert_eq!(rows.len(), 100);
        assert_eq!(rows.iter().sum::<f32>(), 10.0);
        assert_eq!(argmax_rows(&rows, 10), classes);
    }

    #[test]
    fn one_hot_tensor_argmax_recovers_classes() {
        let ctx = context();
        let classes = vec![3, 0, 9, 9, 5, 1];
        let labels = Labels::<TestBackend>::from_classes(&classes, 10, false, ctx.device()).unwrap();

        let recovered: Vec<usize> = labels
            .classes()
            .into_data()
            .iter::<i64>()
            .map(|c| c as usize)
            .collect();
        assert_eq!(recovered, classes);
    }

    #[test]
    fn generates_dense_batch() {
        let ctx = context();
        let batch = SyntheticBatch::generate(&ctx, 32, 10, false).unwrap();

        assert_eq!(batch.images.dims(), [32, 1, 32, 32]);
        assert_eq!(batch.len(), 32);
        assert!(batch.classes.iter().all(|&c| c < 10));
        match &batch.labels {
            Labels::OneHot(labels) => assert_eq!(labels.dims(), [32, 10]),
            Labels::Sparse(_) => panic!("expected one-hot labels"),
        }

        let min = batch.images.clone().min().into_scalar();
        let max = batch.images.max().into_scalar();
        assert!(min >= 0.0 && max < 1.0);
    }

    #[test]
    fn generates_sparse_batch() {
        let ctx = context();
        let batch = SyntheticBatch::generate(&ctx, 5, 10, true).unwrap();

        assert!(batch.labels.is_sparse());
        assert_eq!(batch.labels.batch_size(), 5);
        let stored: Vec<usize> = batch
            .labels
            .classes()
            .into_data()
            .iter::<i64>()
            .map(|c| c as usize)
            .collect();
        assert_eq!(stored, batch.classes);
    }

    #[test]
    fn out_of_range_class_is_rejected_in_both_encodings() {
        let ctx = context();
        for sparse in [false, true] {
            let result = Labels::<TestBackend>::from_classes(&[3, 10], 10, sparse, ctx.device());
            assert!(matches!(
                result,
                Err(Error::LabelOutOfRange {
                    label: 10,
                    num_classes: 10
                })
            ));
        }
        assert!(one_hot(&[0, 4], 4).is_err());
    }

    #[test]
    fn generate_rejects_empty_class_set() {
        let ctx = context();
        assert!(matches!(
            SyntheticBatch::generate(&ctx, 4, 0, false),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            SyntheticBatch::generate(&ctx, 0, 10, true),
            Err(Error::InvalidConfig(_))
        ));
    }
}
