// ============================================================
// Layer 5 — Expert Network (Burn)
// ============================================================
// Compact convolutional scorer shared by the router and the four
// modality experts. Each architecture family gets its own widths
// and classifier head; the layout is always
//
//   stem ─► block₀ ─► … ─► blockₙ₋₁ ─► [head_conv] ─► GAP ─► head
//
// Every conv unit is conv → frozen batch-norm → ReLU, stride 2
// (head_conv is 1x1, stride 1). The head mirrors the trained
// heads: Linear → BatchNorm → act → Dropout → Linear, or a single
// Linear for the router.
//
// Two things differ from burn's stock modules on purpose:
//   - FrozenBatchNorm always normalises with running statistics.
//     burn's BatchNorm switches to batch statistics on an autodiff
//     backend, which would corrupt both MC sampling and Grad-CAM
//     at batch size 1.
//   - McDropout takes the evaluation mode as an argument instead
//     of keying off the backend, so dropout is on exactly during
//     stochastic estimation.
//
// The network can be split at any feature stage ("layer handle"):
// features(x, h) runs up to and including stage h, classify_from
// runs the rest. Grad-CAM uses the split as its capture point.
//
// Reference: Burn Book §3 (Building Blocks)
//            Gal & Ghahramani (2016) Dropout as a Bayesian Approximation

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::{activation::relu, Distribution},
};
use serde::{Deserialize, Serialize};

use crate::domain::modality::{Architecture, LayerSelector, Modality};
use crate::ml::mode::EvalMode;

const BATCH_NORM_EPSILON: f64 = 1e-5;

// ─── Configuration ────────────────────────────────────────────────────────────
// Serialised next to every weight file so a load can check the
// stored architecture against the declared one before touching
// any tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertNetConfig {
    pub architecture:       Architecture,
    pub num_classes:        usize,
    pub in_channels:        usize,
    pub stem_channels:      usize,
    pub block_channels:     Vec<usize>,
    pub head_conv_channels: Option<usize>,
    pub hidden:             Option<usize>,
    pub dropout:            f64,
    pub hardswish:          bool,
}

impl ExpertNetConfig {
    /// Standard widths for an architecture family.
    pub fn for_architecture(architecture: Architecture, num_classes: usize) -> Self {
        let (stem, blocks, head_conv, hidden, dropout, hardswish) = match architecture {
            Architecture::EfficientNetB2 => (16, vec![24, 48, 88, 120], Some(176), Some(64), 0.4, true),
            Architecture::EfficientNetB0 => (16, vec![24, 40, 80, 112], Some(160), Some(64), 0.3, false),
            Architecture::DenseNet121    => (32, vec![64, 128, 256, 256], None, Some(64), 0.3, false),
            Architecture::ResNet50       => (32, vec![64, 128, 256, 512], None, Some(64), 0.45, false),
            Architecture::ResNet34       => (32, vec![64, 128, 256, 256], None, None, 0.0, false),
        };
        Self {
            architecture,
            num_classes,
            in_channels:        3,
            stem_channels:      stem,
            block_channels:     blocks,
            head_conv_channels: head_conv,
            hidden,
            dropout,
            hardswish,
        }
    }

    pub fn for_modality(modality: Modality) -> Self {
        Self::for_architecture(modality.architecture(), modality.num_classes())
    }

    pub fn router() -> Self {
        Self::for_architecture(Architecture::ResNet34, Modality::ALL.len())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ExpertNet<B> {
        let stem = ConvUnit::new(self.in_channels, self.stem_channels, 3, 2, device);

        let mut channels = self.stem_channels;
        let blocks: Vec<ConvUnit<B>> = self
            .block_channels
            .iter()
            .map(|&out| {
                let block = ConvUnit::new(channels, out, 3, 2, device);
                channels = out;
                block
            })
            .collect();

        let head_conv = self.head_conv_channels.map(|out| {
            let unit = ConvUnit::new(channels, out, 1, 1, device);
            channels = out;
            unit
        });

        let head = ClassifierHead::new(channels, self, device);
        ExpertNet { stem, blocks, head_conv, head }
    }
}

// ─── FrozenBatchNorm ──────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct FrozenBatchNorm<B: Backend> {
    pub gamma:        Param<Tensor<B, 1>>,
    pub beta:         Param<Tensor<B, 1>>,
    pub running_mean: Param<Tensor<B, 1>>,
    pub running_var:  Param<Tensor<B, 1>>,
    pub epsilon:      f64,
}

impl<B: Backend> FrozenBatchNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gamma:        Param::from_tensor(Tensor::ones([channels], device)),
            beta:         Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: Param::from_tensor(Tensor::zeros([channels], device)),
            running_var:  Param::from_tensor(Tensor::ones([channels], device)),
            epsilon:      BATCH_NORM_EPSILON,
        }
    }

    /// Normalise along dim 1 of a [batch, channels, ...] tensor.
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let gamma = self.gamma.val();
        let channels = gamma.dims()[0];
        let mut shape = [1usize; D];
        shape[1] = channels;

        let scale = gamma / self.running_var.val().add_scalar(self.epsilon).sqrt();
        let shift = self.beta.val() - self.running_mean.val() * scale.clone();
        x * scale.reshape(shape) + shift.reshape(shape)
    }

    fn push_shapes(&self, shapes: &mut Vec<Vec<usize>>) {
        for p in [&self.gamma, &self.beta, &self.running_mean, &self.running_var] {
            shapes.push(p.val().dims().to_vec());
        }
    }
}

// ─── McDropout ────────────────────────────────────────────────────────────────
#[derive(Module, Clone, Debug)]
pub struct McDropout {
    pub prob: f64,
}

impl McDropout {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>, mode: EvalMode) -> Tensor<B, D> {
        if !mode.dropout_active() || self.prob <= 0.0 {
            return x;
        }
        let keep = 1.0 - self.prob;
        let mask = x.random_like(Distribution::Bernoulli(keep));
        (x * mask).div_scalar(keep)
    }
}

// ─── ConvUnit ─────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ConvUnit<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: FrozenBatchNorm<B>,
}

impl<B: Backend> ConvUnit<B> {
    fn new(in_channels: usize, out_channels: usize, kernel: usize, stride: usize, device: &B::Device) -> Self {
        let padding = kernel / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);
        Self { conv, norm: FrozenBatchNorm::new(out_channels, device) }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.conv.forward(x)))
    }

    fn push_shapes(&self, shapes: &mut Vec<Vec<usize>>) {
        shapes.push(self.conv.weight.val().dims().to_vec());
        self.norm.push_shapes(shapes);
    }
}

// ─── ClassifierHead ───────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub hidden:    Option<Linear<B>>,
    pub norm:      Option<FrozenBatchNorm<B>>,
    pub dropout:   McDropout,
    pub output:    Linear<B>,
    pub hardswish: bool,
}

impl<B: Backend> ClassifierHead<B> {
    fn new(features: usize, cfg: &ExpertNetConfig, device: &B::Device) -> Self {
        let (hidden, norm, width) = match cfg.hidden {
            Some(h) => (
                Some(LinearConfig::new(features, h).init(device)),
                Some(FrozenBatchNorm::new(h, device)),
                h,
            ),
            None => (None, None, features),
        };
        Self {
            hidden,
            norm,
            dropout:   McDropout { prob: cfg.dropout },
            output:    LinearConfig::new(width, cfg.num_classes).init(device),
            hardswish: cfg.hardswish,
        }
    }

    /// pooled: [batch, features] → logits: [batch, classes]
    pub fn forward(&self, pooled: Tensor<B, 2>, mode: EvalMode) -> Tensor<B, 2> {
        let x = match (&self.hidden, &self.norm) {
            (Some(linear), Some(norm)) => {
                let h = norm.forward(linear.forward(pooled));
                if self.hardswish { hard_swish(h) } else { relu(h) }
            }
            _ => pooled,
        };
        self.output.forward(self.dropout.forward(x, mode))
    }

    fn push_shapes(&self, shapes: &mut Vec<Vec<usize>>) {
        for linear in self.hidden.iter().chain(std::iter::once(&self.output)) {
            shapes.push(linear.weight.val().dims().to_vec());
            if let Some(bias) = &linear.bias {
                shapes.push(bias.val().dims().to_vec());
            }
        }
        if let Some(norm) = &self.norm {
            norm.push_shapes(shapes);
        }
    }
}

// x · relu6(x + 3) / 6
fn hard_swish<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone() * x.add_scalar(3.0).clamp(0.0, 6.0).div_scalar(6.0)
}

// ─── LayerHandle ──────────────────────────────────────────────────────────────
/// A resolved feature stage: 0 is the stem, 1..=n the blocks,
/// n+1 the head convolution when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerHandle(usize);

impl LayerHandle {
    pub fn stage(&self) -> usize {
        self.0
    }
}

// ─── ExpertNet ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ExpertNet<B: Backend> {
    pub stem:      ConvUnit<B>,
    pub blocks:    Vec<ConvUnit<B>>,
    pub head_conv: Option<ConvUnit<B>>,
    pub head:      ClassifierHead<B>,
}

impl<B: Backend> ExpertNet<B> {
    fn stages(&self) -> impl Iterator<Item = &ConvUnit<B>> {
        std::iter::once(&self.stem)
            .chain(self.blocks.iter())
            .chain(self.head_conv.iter())
    }

    /// Number of feature stages.
    pub fn depth(&self) -> usize {
        1 + self.blocks.len() + usize::from(self.head_conv.is_some())
    }

    pub fn last_layer(&self) -> LayerHandle {
        LayerHandle(self.depth() - 1)
    }

    pub fn resolve(&self, selector: LayerSelector) -> Option<LayerHandle> {
        match selector {
            LayerSelector::HeadConv => self.head_conv.as_ref().map(|_| self.last_layer()),
            LayerSelector::LastBlock if !self.blocks.is_empty() => Some(LayerHandle(self.blocks.len())),
            LayerSelector::LastBlock => None,
            LayerSelector::Block(i) if i < self.blocks.len() => Some(LayerHandle(i + 1)),
            LayerSelector::Block(_) => None,
        }
    }

    /// images: [batch, 3, H, W] → activation of stage `upto`
    pub fn features(&self, images: Tensor<B, 4>, upto: LayerHandle) -> Tensor<B, 4> {
        self.stages()
            .take(upto.0 + 1)
            .fold(images, |x, stage| stage.forward(x))
    }

    /// Continue from the activation of stage `from` to class logits.
    pub fn classify_from(&self, activation: Tensor<B, 4>, from: LayerHandle, mode: EvalMode) -> Tensor<B, 2> {
        let x = self
            .stages()
            .skip(from.0 + 1)
            .fold(activation, |x, stage| stage.forward(x));

        // Global average pooling: [b, c, h, w] → [b, c]
        let [batch, channels, _, _] = x.dims();
        let pooled = x.mean_dim(3).mean_dim(2).reshape([batch, channels]);
        self.head.forward(pooled, mode)
    }

    /// images: [batch, 3, H, W] → logits: [batch, classes]
    pub fn forward(&self, images: Tensor<B, 4>, mode: EvalMode) -> Tensor<B, 2> {
        let last = self.last_layer();
        self.classify_from(self.features(images, last), last, mode)
    }

    /// Dimensions of every parameter in a fixed order. Two nets
    /// with equal signatures are structurally interchangeable.
    pub fn param_shapes(&self) -> Vec<Vec<usize>> {
        let mut shapes = Vec::new();
        for stage in self.stages() {
            stage.push_shapes(&mut shapes);
        }
        self.head.push_shapes(&mut shapes);
        shapes
    }
}

#[cfg(test)]
impl ExpertNetConfig {
    /// A few channels wide, fast enough for unit tests.
    pub(crate) fn tiny(architecture: Architecture, num_classes: usize, dropout: f64) -> Self {
        let head_conv = matches!(
            architecture,
            Architecture::EfficientNetB0 | Architecture::EfficientNetB2
        )
        .then_some(8);
        Self {
            architecture,
            num_classes,
            in_channels:        3,
            stem_channels:      4,
            block_channels:     vec![6, 8],
            head_conv_channels: head_conv,
            hidden:             Some(8),
            dropout,
            hardswish:          architecture == Architecture::EfficientNetB2,
        }
    }
}
