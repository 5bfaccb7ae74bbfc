//! Pretrained image classifiers.
//!
//! Models take `(N, 3, H, W)` batches with values in `[0, 1]` and apply the
//! ImageNet mean/std normalization themselves, so attacks can work directly
//! in pixel space.

use crate::error::{AppError, AppResult};
use crate::services::datasets::LabelTable;
use crate::services::registry::{parse_index, Descriptor};
use candle_core::{DType, Device, Module, ModuleT, Tensor, D};
use candle_nn::{Func, Linear, VarBuilder};
use candle_transformers::models::efficientnet::{EfficientNet, MBConvConfig};
use candle_transformers::models::{resnet, vgg};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
pub const IMAGENET_CLASSES: usize = 1000;

/// Side length the shorter image edge is resized to before cropping 224.
const RESIZE_SHORTER: u32 = 256;
const DEFAULT_INPUT: u32 = 224;

#[cfg_attr(test, mockall::automock)]
pub trait ImageClassifier: Send + Sync {
    /// Raw class scores for a `(N, 3, H, W)` batch in `[0, 1]`.
    fn logits(&self, images: &Tensor) -> candle_core::Result<Tensor>;

    fn input_size(&self) -> u32 {
        DEFAULT_INPUT
    }

    fn device(&self) -> &Device;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub index: usize,
    pub label: String,
    pub percentage: f32,
}

/// `cpu` or `cuda`; CUDA falls back to CPU when unavailable.
pub fn select_device(name: &str) -> candle_core::Result<Device> {
    match name.to_ascii_lowercase().as_str() {
        "cuda" | "gpu" => Device::cuda_if_available(0),
        _ => Ok(Device::Cpu),
    }
}

/// Resize the shorter edge to 256 (scaled for non-224 inputs), then take the
/// centered `size x size` crop.
pub fn prep_image(image: &DynamicImage, size: u32) -> RgbImage {
    let resize_to = (RESIZE_SHORTER * size / DEFAULT_INPUT).max(size);
    let (w, h) = image.dimensions();
    let (nw, nh) = if w <= h {
        let nh = (h as f64 * resize_to as f64 / w.max(1) as f64).round() as u32;
        (resize_to, nh.max(resize_to))
    } else {
        let nw = (w as f64 * resize_to as f64 / h.max(1) as f64).round() as u32;
        (nw.max(resize_to), resize_to)
    };

    let resized = image.resize_exact(nw, nh, FilterType::Triangle).to_rgb8();
    let left = (nw - size) / 2;
    let top = (nh - size) / 2;
    image::imageops::crop_imm(&resized, left, top, size, size).to_image()
}

/// `(1, 3, H, W)` f32 tensor in `[0, 1]`, no normalization.
pub fn image_to_tensor(image: &RgbImage, device: &Device) -> candle_core::Result<Tensor> {
    let (w, h) = image.dimensions();
    let data = image.as_raw().clone();
    Tensor::from_vec(data, (h as usize, w as usize, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?
        .unsqueeze(0)
}

pub fn prep_tensor(model: &dyn ImageClassifier, image: &DynamicImage) -> candle_core::Result<Tensor> {
    let cropped = prep_image(image, model.input_size());
    image_to_tensor(&cropped, model.device())
}

/// Top `n` classes of the first image in `tensor`, by descending probability.
pub fn predict_tensor(
    model: &dyn ImageClassifier,
    labels: &LabelTable,
    tensor: &Tensor,
    n: usize,
) -> candle_core::Result<Vec<Prediction>> {
    let logits = model.logits(tensor)?;
    let probs = candle_nn::ops::softmax(&logits, D::Minus1)?
        .get(0)?
        .to_dtype(DType::F32)?
        .to_vec1::<f32>()?;

    let mut ranked: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    Ok(ranked
        .into_iter()
        .take(n)
        .map(|(index, p)| Prediction {
            index,
            label: labels.label(index).unwrap_or("unknown").to_string(),
            percentage: p * 100.0,
        })
        .collect())
}

pub fn predict(
    model: &dyn ImageClassifier,
    labels: &LabelTable,
    image: &DynamicImage,
    n: usize,
) -> candle_core::Result<Vec<Prediction>> {
    let tensor = prep_tensor(model, image)?;
    predict_tensor(model, labels, &tensor, n)
}

/// Top-1 class of each image in the batch.
pub fn predicted_classes(model: &dyn ImageClassifier, images: &Tensor) -> candle_core::Result<Tensor> {
    model.logits(images)?.argmax(D::Minus1)
}

enum Backbone {
    Func(Func<'static>),
    /// Processes one image at a time.
    Vgg(vgg::Vgg<'static>),
    EfficientNet(EfficientNet),
}

/// A candle model-zoo network with ImageNet normalization in front.
pub struct CandleClassifier {
    backbone: Backbone,
    mean: Tensor,
    std: Tensor,
    device: Device,
}

impl CandleClassifier {
    fn new(backbone: Backbone, device: &Device) -> candle_core::Result<Self> {
        Ok(Self {
            backbone,
            mean: Tensor::new(&IMAGENET_MEAN, device)?.reshape((1, 3, 1, 1))?,
            std: Tensor::new(&IMAGENET_STD, device)?.reshape((1, 3, 1, 1))?,
            device: device.clone(),
        })
    }
}

impl ImageClassifier for CandleClassifier {
    fn logits(&self, images: &Tensor) -> candle_core::Result<Tensor> {
        let xs = images.broadcast_sub(&self.mean)?.broadcast_div(&self.std)?;
        match &self.backbone {
            Backbone::Func(f) => f.forward(&xs),
            Backbone::EfficientNet(net) => net.forward(&xs),
            Backbone::Vgg(net) => {
                let mut rows = Vec::with_capacity(xs.dim(0)?);
                for i in 0..xs.dim(0)? {
                    rows.push(net.forward_t(&xs.get(i)?, false)?);
                }
                Tensor::cat(&rows, 0)
            }
        }
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Dense classifier over per-channel mean intensities. Needs no weight files;
/// used for smoke runs and tests.
pub struct LinearClassifier {
    layer: Linear,
    size: u32,
    device: Device,
}

impl LinearClassifier {
    /// `weight` is `(classes, 3)`, `bias` is `(classes)`.
    pub fn new(weight: Tensor, bias: Tensor, size: u32) -> candle_core::Result<Self> {
        if weight.dims().len() != 2 || weight.dim(1)? != 3 {
            candle_core::bail!("expected a (classes, 3) weight, got {:?}", weight.shape());
        }
        let device = weight.device().clone();
        Ok(Self {
            layer: Linear::new(weight, Some(bias)),
            size,
            device,
        })
    }

    /// Three classes, one per dominant color channel: red, green, blue.
    pub fn rgb(device: &Device) -> candle_core::Result<Self> {
        let weight = Tensor::eye(3, DType::F32, device)?.affine(10.0, 0.0)?;
        let bias = Tensor::zeros(3, DType::F32, device)?;
        Self::new(weight, bias, 32)
    }
}

impl ImageClassifier for LinearClassifier {
    fn logits(&self, images: &Tensor) -> candle_core::Result<Tensor> {
        let pooled = images.mean(D::Minus1)?.mean(D::Minus1)?;
        self.layer.forward(&pooled)
    }

    fn input_size(&self) -> u32 {
        self.size
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    ResNet18,
    ResNet34,
    ResNet50,
    Vgg13,
    Vgg16,
    EfficientNetB0,
}

impl Architecture {
    pub const ALL: [Architecture; 6] = [
        Architecture::ResNet18,
        Architecture::ResNet34,
        Architecture::ResNet50,
        Architecture::Vgg13,
        Architecture::Vgg16,
        Architecture::EfficientNetB0,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Architecture::ResNet18 => "ResNet18",
            Architecture::ResNet34 => "ResNet34",
            Architecture::ResNet50 => "ResNet50",
            Architecture::Vgg13 => "VGG13",
            Architecture::Vgg16 => "VGG16",
            Architecture::EfficientNetB0 => "EfficientNet-B0",
        }
    }

    pub fn paper(self) -> &'static str {
        match self {
            Architecture::ResNet18 | Architecture::ResNet34 | Architecture::ResNet50 => {
                "https://arxiv.org/abs/1512.03385"
            }
            Architecture::Vgg13 | Architecture::Vgg16 => "https://arxiv.org/abs/1409.1556",
            Architecture::EfficientNetB0 => "https://arxiv.org/abs/1905.11946",
        }
    }

    pub fn weights_file(self) -> &'static str {
        match self {
            Architecture::ResNet18 => "resnet18.safetensors",
            Architecture::ResNet34 => "resnet34.safetensors",
            Architecture::ResNet50 => "resnet50.safetensors",
            Architecture::Vgg13 => "vgg13.safetensors",
            Architecture::Vgg16 => "vgg16.safetensors",
            Architecture::EfficientNetB0 => "efficientnet_b0.safetensors",
        }
    }

    pub fn descriptor(self) -> Descriptor {
        Descriptor::new(self.name(), self.paper())
    }

    pub fn load(self, weights_dir: &Path, device: &Device) -> AppResult<CandleClassifier> {
        let path = weights_dir.join(self.weights_file());
        if !path.is_file() {
            return Err(AppError::ModelUnavailable(format!(
                "weights for {} are not installed",
                self.name()
            )));
        }

        info!(model = self.name(), path = %path.display(), "Loading classifier weights");
        let bytes = std::fs::read(&path)?;
        let vb: VarBuilder<'static> = VarBuilder::from_buffered_safetensors(bytes, DType::F32, device)?;

        let backbone = match self {
            Architecture::ResNet18 => Backbone::Func(resnet::resnet18(IMAGENET_CLASSES, vb)?),
            Architecture::ResNet34 => Backbone::Func(resnet::resnet34(IMAGENET_CLASSES, vb)?),
            Architecture::ResNet50 => Backbone::Func(resnet::resnet50(IMAGENET_CLASSES, vb)?),
            Architecture::Vgg13 => Backbone::Vgg(vgg::Vgg::new(vb, vgg::Models::Vgg13)?),
            Architecture::Vgg16 => Backbone::Vgg(vgg::Vgg::new(vb, vgg::Models::Vgg16)?),
            Architecture::EfficientNetB0 => {
                Backbone::EfficientNet(EfficientNet::new(vb, MBConvConfig::b0(), IMAGENET_CLASSES)?)
            }
        };

        Ok(CandleClassifier::new(backbone, device)?)
    }
}

type Loader = Box<dyn Fn() -> AppResult<Arc<dyn ImageClassifier>> + Send + Sync>;

/// A registry slot: the descriptor plus a model that is built on first use.
pub struct ClassifierEntry {
    pub descriptor: Descriptor,
    loader: Loader,
    model: Mutex<Option<Arc<dyn ImageClassifier>>>,
}

impl ClassifierEntry {
    pub fn lazy(descriptor: Descriptor, loader: Loader) -> Self {
        Self {
            descriptor,
            loader,
            model: Mutex::new(None),
        }
    }

    pub fn ready(descriptor: Descriptor, model: Arc<dyn ImageClassifier>) -> Self {
        let name = descriptor.name.clone();
        Self {
            descriptor,
            loader: Box::new(move || {
                Err(AppError::ModelUnavailable(format!("{name} has no loader")))
            }),
            model: Mutex::new(Some(model)),
        }
    }

    /// Loads the model at most once; a failed load is retried next call.
    pub fn model(&self) -> AppResult<Arc<dyn ImageClassifier>> {
        let mut slot = self.model.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        let model = (self.loader)()?;
        debug!(model = %self.descriptor.name, "Classifier ready");
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }
}

pub struct ClassifierRegistry {
    entries: Vec<ClassifierEntry>,
    labels: LabelTable,
}

impl ClassifierRegistry {
    pub fn new(entries: Vec<ClassifierEntry>, labels: LabelTable) -> Self {
        Self { entries, labels }
    }

    /// The built-in model-zoo list, weights read from `weights_dir`.
    pub fn pretrained(weights_dir: PathBuf, device: Device, labels: LabelTable) -> Self {
        let entries = Architecture::ALL
            .into_iter()
            .map(|arch| {
                let dir = weights_dir.clone();
                let device = device.clone();
                ClassifierEntry::lazy(
                    arch.descriptor(),
                    Box::new(move || {
                        let model: Arc<dyn ImageClassifier> = Arc::new(arch.load(&dir, &device)?);
                        Ok(model)
                    }),
                )
            })
            .collect();

        Self::new(entries, labels)
    }

    /// Registry over already-built models.
    pub fn from_models(models: Vec<(Descriptor, Arc<dyn ImageClassifier>)>, labels: LabelTable) -> Self {
        let entries = models
            .into_iter()
            .map(|(descriptor, model)| ClassifierEntry::ready(descriptor, model))
            .collect();
        Self::new(entries, labels)
    }

    pub fn all(&self) -> Vec<Descriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, raw_id: &str) -> AppResult<&ClassifierEntry> {
        let index = parse_index(raw_id, self.entries.len(), "classifier")?;
        Ok(&self.entries[index])
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }
}
