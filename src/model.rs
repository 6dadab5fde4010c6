use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};
use log::debug;
use rand::Rng;

use crate::{
    context::ExecutionContext,
    error::Error,
    init::TruncatedNormal,
};

pub const INPUT_CHANNELS: usize = 1;
pub const INPUT_HEIGHT: usize = 32;
pub const INPUT_WIDTH: usize = 32;
pub const NUM_CLASSES: usize = 10;

const KERNEL_SIZE: usize = 5;
const POOL_SIZE: usize = 2;
const CONV1_CHANNELS: usize = 6;
const CONV2_CHANNELS: usize = 16;
const FC1_INPUT: usize = CONV2_CHANNELS * 5 * 5;
const FC1_OUTPUT: usize = 120;
const FC2_OUTPUT: usize = 84;

const WEIGHT_STREAM: u64 = 1;

/// Anything that maps an image batch `[N, C, H, W]` to logits `[N, classes]`.
pub trait Classifier<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Expected `[channels, height, width]` of a single sample.
    fn input_shape(&self) -> [usize; 3];

    fn num_classes(&self) -> usize;

    /// Same as `forward`, but rejects batches the network cannot consume.
    fn checked_forward(&self, images: Tensor<B, 4>) -> crate::Result<Tensor<B, 2>> {
        let dims = images.dims();
        let [channels, height, width] = self.input_shape();
        if dims[0] == 0 || dims[1..] != [channels, height, width] {
            return Err(Error::shape(
                "input batch",
                &[dims[0].max(1), channels, height, width],
                &dims,
            ));
        }
        Ok(self.forward(images))
    }
}

#[derive(Config, Debug)]
pub struct LeNetConfig {
    /// Standard deviation of the truncated normal used for every weight and bias.
    #[config(default = 0.02)]
    pub init_std: f64,

    #[config(default = 10)]
    pub num_classes: usize,
}

impl LeNetConfig {
    pub fn init<B: Backend>(&self, ctx: &ExecutionContext<B>) -> crate::Result<LeNet<B>> {
        if self.num_classes == 0 {
            return Err(Error::InvalidConfig("num_classes must be at least 1".into()));
        }

        let flatten = LeNet::<B>::flatten_size(INPUT_HEIGHT, INPUT_WIDTH);
        if flatten != FC1_INPUT {
            return Err(Error::shape("flattened features", &[FC1_INPUT], &[flatten]));
        }

        let init = TruncatedNormal::new(self.init_std)?;
        let mut rng = ctx.rng(WEIGHT_STREAM);
        let device = ctx.device();

        let conv1 = conv(INPUT_CHANNELS, CONV1_CHANNELS, &init, device, &mut rng);
        let conv2 = conv(CONV1_CHANNELS, CONV2_CHANNELS, &init, device, &mut rng);
        let pool = MaxPool2dConfig::new([POOL_SIZE, POOL_SIZE])
            .with_strides([POOL_SIZE, POOL_SIZE])
            .init();
        let fc1 = dense(FC1_INPUT, FC1_OUTPUT, &init, device, &mut rng);
        let fc2 = dense(FC1_OUTPUT, FC2_OUTPUT, &init, device, &mut rng);
        let fc3 = dense(FC2_OUTPUT, self.num_classes, &init, device, &mut rng);

        debug!(
            "LeNet initialisé: flatten={flatten}, classes={}, init_std={}",
            self.num_classes, self.init_std
        );

        Ok(LeNet {
            conv1,
            conv2,
            pool,
            fc1,
            fc2,
            fc3,
            activation: Relu::new(),
            num_classes: self.num_classes,
        })
    }
}

fn conv<B: Backend, R: Rng>(
    channels_in: usize,
    channels_out: usize,
    init: &TruncatedNormal,
    device: &B::Device,
    rng: &mut R,
) -> Conv2d<B> {
    let mut conv = Conv2dConfig::new([channels_in, channels_out], [KERNEL_SIZE, KERNEL_SIZE])
        .with_stride([1, 1])
        .with_padding(PaddingConfig2d::Valid)
        .with_bias(false)
        .init(device);
    conv.weight = init.param(&conv.weight, rng);
    conv
}

fn dense<B: Backend, R: Rng>(
    d_input: usize,
    d_output: usize,
    init: &TruncatedNormal,
    device: &B::Device,
    rng: &mut R,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output).init(device);
    linear.weight = init.param(&linear.weight, rng);
    linear.bias = linear.bias.as_ref().map(|bias| init.param(bias, rng));
    linear
}

// Valid 5x5 convolution followed by a 2x2 stride-2 pool.
const fn conv_pool(size: usize) -> usize {
    size.saturating_sub(KERNEL_SIZE - 1) / POOL_SIZE
}

/// LeNet-5 variant for single-channel 32x32 images.
#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    activation: Relu,
    num_classes: usize,
}

impl<B: Backend> LeNet<B> {
    pub fn new(ctx: &ExecutionContext<B>) -> crate::Result<Self> {
        LeNetConfig::new().init(ctx)
    }

    /// Width of the flattened feature map for an `height` x `width` input.
    pub const fn flatten_size(height: usize, width: usize) -> usize {
        CONV2_CHANNELS * conv_pool(conv_pool(height)) * conv_pool(conv_pool(width))
    }

    /// Convolutional trunk up to and including the flatten stage.
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        x.flatten(1, 3)
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(images);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.fc2.forward(x);
        let x = self.activation.forward(x);

        self.fc3.forward(x)
    }
}

impl<B: Backend> Classifier<B> for LeNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        LeNet::forward(self, images)
    }

    fn input_shape(&self) -> [usize; 3] {
        [INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH]
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceTarget;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn context() -> ExecutionContext<TestBackend> {
        ExecutionContext::ndarray(DeviceTarget::Cpu, 42).unwrap()
    }

    fn images(batch_size: usize, ctx: &ExecutionContext<TestBackend>) -> Tensor<TestBackend, 4> {
        Tensor::random(
            [batch_size, INPUT_CHANNELS, INPUT_HEIGHT, INPUT_WIDTH],
            Distribution::Uniform(0.0, 1.0),
            ctx.device(),
        )
    }

    #[test]
    fn flatten_arithmetic_matches_first_dense_layer() {
        assert_eq!(LeNet::<TestBackend>::flatten_size(32, 32), 400);
        assert_eq!(LeNet::<TestBackend>::flatten_size(28, 28), 256);
    }

    #[test]
    fn features_are_400_wide() {
        let ctx = context();
        let model = LeNet::<TestBackend>::new(&ctx).unwrap();
        let features = model.features(images(4, &ctx));
        assert_eq!(features.dims(), [4, 400]);
    }

    #[test]
    fn logits_have_one_column_per_class() {
        let ctx = context();
        let model = LeNet::<TestBackend>::new(&ctx).unwrap();
        assert_eq!(model.forward(images(32, &ctx)).dims(), [32, NUM_CLASSES]);
    }

    #[test]
    fn single_sample_batch() {
        let ctx = context();
        let model = LeNet::<TestBackend>::new(&ctx).unwrap();
        let logits = model.checked_forward(images(1, &ctx)).unwrap();
        assert_eq!(logits.dims(), [1, NUM_CLASSES]);
    }

    #[test]
    fn rejects_wrong_spatial_size() {
        let ctx = context();
        let model = LeNet::<TestBackend>::new(&ctx).unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([2, 1, 28, 28], ctx.device());
        assert!(matches!(
            model.checked_forward(input),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn weights_follow_truncated_normal() {
        let ctx = context();
        let model = LeNet::<TestBackend>::new(&ctx).unwrap();

        assert!(model.conv1.bias.is_none());
        assert!(model.conv2.bias.is_none());
        assert_eq!(model.conv1.weight.val().dims(), [6, 1, 5, 5]);
        assert_eq!(model.conv2.weight.val().dims(), [16, 6, 5, 5]);

        let max = model.fc1.weight.val().abs().max().into_scalar();
        assert!(max <= 0.04 + 1e-6);
        let bias = model.fc3.bias.as_ref().unwrap().val();
        assert_eq!(bias.dims(), [NUM_CLASSES]);
        assert!(bias.abs().max().into_scalar() <= 0.04 + 1e-6);
    }

    #[test]
    fn same_seed_same_weights() {
        let a = LeNet::<TestBackend>::new(&context()).unwrap();
        let b = LeNet::<TestBackend>::new(&context()).unwrap();
        let diff = (a.fc2.weight.val() - b.fc2.weight.val())
            .abs()
            .max()
            .into_scalar();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn custom_class_count() {
        let ctx = context();
        let model = LeNetConfig::new()
            .with_num_classes(3)
            .init::<TestBackend>(&ctx)
            .unwrap();
        assert_eq!(model.forward(images(2, &ctx)).dims(), [2, 3]);
        assert!(LeNetConfig::new().with_num_classes(0).init(&ctx).is_err());
    }
}
