use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb32FImage};
use ndarray::{Array3, Axis};

use crate::config::TransformSpec;
use crate::domain::model::{ImageMeta, ImageSource, ModelInput, NormConfig, PipelineData};
use crate::domain::ports::Transform;
use crate::utils::error::{DetError, Result};

pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        for transform in &self.transforms {
            data = transform.apply(data)?;
            tracing::trace!("{} -> img_shape {:?}", transform.name(), data.meta.img_shape);
        }
        Ok(data)
    }
}

/// `[LoadImage] + pipeline[1..]`：設定中的載入步驟一律被取代
pub fn build_test_pipeline(specs: &[TransformSpec]) -> Result<Compose> {
    let mut transforms: Vec<Box<dyn Transform>> = vec![Box::new(LoadImage)];
    for spec in specs.iter().skip(1) {
        transforms.push(build_transform(spec)?);
    }
    Ok(Compose::new(transforms))
}

pub fn build_transform(spec: &TransformSpec) -> Result<Box<dyn Transform>> {
    Ok(match spec {
        TransformSpec::LoadImageFromFile => Box::new(LoadImage),
        TransformSpec::MultiScaleFlipAug {
            img_scale,
            flip,
            transforms,
        } => {
            let inner = transforms
                .iter()
                .map(build_transform)
                .collect::<Result<Vec<_>>>()?;
            Box::new(MultiScaleFlipAug {
                img_scale: *img_scale,
                flip: *flip,
                transforms: Compose::new(inner),
            })
        }
        TransformSpec::Resize {
            img_scale,
            keep_ratio,
        } => Box::new(Resize {
            img_scale: *img_scale,
            keep_ratio: *keep_ratio,
        }),
        TransformSpec::RandomFlip { flip_ratio } => Box::new(RandomFlip {
            flip_ratio: flip_ratio.unwrap_or(0.0),
        }),
        TransformSpec::Normalize { mean, std, to_rgb } => {
            if std.iter().any(|s| *s == 0.0) {
                return Err(DetError::InvalidConfigValueError {
                    field: "Normalize.std".to_string(),
                    value: format!("{:?}", std),
                    reason: "Standard deviation must be non-zero".to_string(),
                });
            }
            Box::new(Normalize {
                cfg: NormConfig {
                    mean: *mean,
                    std: *std,
                    to_rgb: *to_rgb,
                },
            })
        }
        TransformSpec::Pad { size_divisor } => {
            if *size_divisor == 0 {
                return Err(DetError::InvalidConfigValueError {
                    field: "Pad.size_divisor".to_string(),
                    value: "0".to_string(),
                    reason: "Value must be at least 1".to_string(),
                });
            }
            Box::new(Pad {
                size_divisor: *size_divisor,
            })
        }
        TransformSpec::ImageToTensor { keys } => Box::new(ImageToTensor { keys: keys.clone() }),
        TransformSpec::DefaultFormatBundle => Box::new(ImageToTensor {
            keys: vec!["img".to_string()],
        }),
        TransformSpec::Collect { keys } => Box::new(Collect { keys: keys.clone() }),
    })
}

/// 組成 `[1, c, h, w]` 批次
pub fn collate(data: PipelineData) -> Result<ModelInput> {
    let img = data.img.ok_or_else(|| DetError::processing("nothing to collate"))?;
    let chw = if data.chw {
        img
    } else {
        img.permuted_axes([2, 0, 1]).as_standard_layout().into_owned()
    };
    Ok(ModelInput {
        img: chw.insert_axis(Axis(0)),
        img_metas: data.meta,
    })
}

pub(crate) fn image_to_array(img: &DynamicImage) -> Array3<f32> {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32
    })
}

fn array_to_image(img: &Array3<f32>) -> Result<Rgb32FImage> {
    let (h, w, c) = img.dim();
    if c != 3 {
        return Err(DetError::processing(format!("expected 3 channels, got {}", c)));
    }
    let raw: Vec<f32> = img.iter().copied().collect();
    Rgb32FImage::from_raw(w as u32, h as u32, raw)
        .ok_or_else(|| DetError::processing("image buffer does not match its dimensions"))
}

fn image_from_buffer(buf: Rgb32FImage) -> Result<Array3<f32>> {
    let (w, h) = buf.dimensions();
    Ok(Array3::from_shape_vec((h as usize, w as usize, 3), buf.into_raw())?)
}

fn hwc_only(data: &PipelineData, step: &str) -> Result<()> {
    if data.chw {
        return Err(DetError::processing(format!(
            "{} must run before ImageToTensor",
            step
        )));
    }
    Ok(())
}

pub struct LoadImage;

impl Transform for LoadImage {
    fn name(&self) -> &'static str {
        "LoadImage"
    }

    fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        let source = data
            .source
            .take()
            .ok_or_else(|| DetError::processing("LoadImage needs an image source"))?;

        let (img, filename) = match source {
            ImageSource::Path(path) => {
                let img = image::open(&path)?;
                (img, Some(path.to_string_lossy().to_string()))
            }
            ImageSource::Array(img) => (img, None),
        };

        let array = image_to_array(&img);
        let (h, w, c) = array.dim();

        data.meta = ImageMeta {
            filename: filename.clone(),
            ori_filename: filename,
            ori_shape: [h, w, c],
            img_shape: [h, w, c],
            pad_shape: [h, w, c],
            ..ImageMeta::default()
        };
        data.img = Some(array);
        data.chw = false;
        data.img_fields = vec!["img".to_string()];
        Ok(data)
    }
}

/// 以單一尺度執行內層轉換
pub struct MultiScaleFlipAug {
    img_scale: [u32; 2],
    flip: bool,
    transforms: Compose,
}

impl Transform for MultiScaleFlipAug {
    fn name(&self) -> &'static str {
        "MultiScaleFlipAug"
    }

    fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        if self.flip {
            tracing::warn!("Flip test-time augmentation is ignored; running the unflipped image");
        }
        data.scale = Some(self.img_scale);
        self.transforms.apply(data)
    }
}

pub struct Resize {
    img_scale: Option<[u32; 2]>,
    keep_ratio: bool,
}

impl Resize {
    /// 計算 `(w, h)` 影像的目標尺寸 `(w, h)`
    pub fn target_size(scale: [u32; 2], keep_ratio: bool, w: u32, h: u32) -> (u32, u32) {
        if !keep_ratio {
            return (scale[0], scale[1]);
        }
        let long_edge = scale[0].max(scale[1]) as f32;
        let short_edge = scale[0].min(scale[1]) as f32;
        let factor = (long_edge / w.max(h) as f32).min(short_edge / w.min(h) as f32);
        (
            ((w as f32 * factor) + 0.5) as u32,
            ((h as f32 * factor) + 0.5) as u32,
        )
    }
}

impl Transform for Resize {
    fn name(&self) -> &'static str {
        "Resize"
    }

    fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        hwc_only(&data, "Resize")?;
        let scale = self
            .img_scale
            .or(data.scale)
            .ok_or_else(|| DetError::MissingConfigError {
                field: "Resize.img_scale".to_string(),
            })?;

        let (h, w, _) = data.img()?.dim();
        let (new_w, new_h) = Resize::target_size(scale, self.keep_ratio, w as u32, h as u32);
        if new_w == 0 || new_h == 0 {
            return Err(DetError::processing(format!(
                "resize of {}x{} to {:?} collapses the image",
                w, h, scale
            )));
        }

        let buf = array_to_image(data.img()?)?;
        let resized = imageops::resize(&buf, new_w, new_h, FilterType::Triangle);
        let resized = image_from_buffer(resized)?;

        let w_scale = new_w as f32 / w as f32;
        let h_scale = new_h as f32 / h as f32;
        data.meta.scale_factor = [w_scale, h_scale, w_scale, h_scale];
        data.meta.img_shape = [new_h as usize, new_w as usize, 3];
        data.meta.pad_shape = data.meta.img_shape;
        data.scale = Some(scale);
        data.img = Some(resized);
        Ok(data)
    }
}

/// 測試時不隨機：只有 `flip_ratio >= 1` 才翻轉
pub struct RandomFlip {
    flip_ratio: f32,
}

impl Transform for RandomFlip {
    fn name(&self) -> &'static str {
        "RandomFlip"
    }

    fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        hwc_only(&data, "RandomFlip")?;
        if self.flip_ratio >= 1.0 {
            if let Some(img) = data.img.take() {
                let mut flipped = img;
                flipped.invert_axis(Axis(1));
                data.img = Some(flipped.as_standard_layout().into_owned());
            }
            data.meta.flip = true;
        }
        Ok(data)
    }
}

pub struct Normalize {
    cfg: NormConfig,
}

impl Transform for Normalize {
    fn name(&self) -> &'static str {
        "Normalize"
    }

    fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        hwc_only(&data, "Normalize")?;
        let mut img = data
            .img
            .take()
            .ok_or_else(|| DetError::processing("Normalize needs an image"))?;

        // 解碼後是 RGB；to_rgb = false 代表模型吃 BGR
        if !self.cfg.to_rgb {
            img.invert_axis(Axis(2));
            img = img.as_standard_layout().into_owned();
        }

        for (c, mut channel) in img.axis_iter_mut(Axis(2)).enumerate() {
            let (mean, std) = (self.cfg.mean[c], self.cfg.std[c]);
            channel.mapv_inplace(|v| (v - mean) / std);
        }

        data.img = Some(img);
        data.meta.img_norm_cfg = Some(self.cfg.clone());
        Ok(data)
    }
}

pub struct Pad {
    size_divisor: u32,
}

impl Transform for Pad {
    fn name(&self) -> &'static str {
        "Pad"
    }

    fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        hwc_only(&data, "Pad")?;
        let img = data
            .img
            .take()
            .ok_or_else(|| DetError::processing("Pad needs an image"))?;
        let (h, w, c) = img.dim();
        let divisor = self.size_divisor as usize;
        let pad_h = h.div_ceil(divisor) * divisor;
        let pad_w = w.div_ceil(divisor) * divisor;

        let mut padded = Array3::<f32>::zeros((pad_h, pad_w, c));
        padded.slice_mut(ndarray::s![..h, ..w, ..]).assign(&img);

        data.img = Some(padded);
        data.meta.pad_shape = [pad_h, pad_w, c];
        Ok(data)
    }
}

/// 把指定欄位從 HWC 轉成 CHW
pub struct ImageToTensor {
    keys: Vec<String>,
}

impl Transform for ImageToTensor {
    fn name(&self) -> &'static str {
        "ImageToTensor"
    }

    fn apply(&self, mut data: PipelineData) -> Result<PipelineData> {
        if !self.keys.iter().any(|k| k == "img") || data.chw {
            return Ok(data);
        }
        let img = data
            .img
            .take()
            .ok_or_else(|| DetError::processing("ImageToTensor needs an image"))?;
        data.img = Some(img.permuted_axes([2, 0, 1]).as_standard_layout().into_owned());
        data.chw = true;
        Ok(data)
    }
}

pub struct Collect {
    keys: Vec<String>,
}

impl Transform for Collect {
    fn name(&self) -> &'static str {
        "Collect"
    }

    fn apply(&self, data: PipelineData) -> Result<PipelineData> {
        if !self.keys.iter().any(|k| k == "img") {
            return Err(DetError::InvalidConfigValueError {
                field: "Collect.keys".to_string(),
                value: self.keys.join(","),
                reason: "The detector input 'img' must be collected".to_string(),
            });
        }
        Ok(data)
    }
}
