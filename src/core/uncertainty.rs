use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::{DetError, Result};

pub const FOCAL_ALPHA: f32 = 0.25;
pub const FOCAL_GAMMA: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyType {
    L2Norm,
    KlDivergence,
    CrossEntropy,
    JsDivergence,
    FocalLoss,
}

impl UncertaintyType {
    pub const ALL: [UncertaintyType; 5] = [
        UncertaintyType::L2Norm,
        UncertaintyType::KlDivergence,
        UncertaintyType::CrossEntropy,
        UncertaintyType::JsDivergence,
        UncertaintyType::FocalLoss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UncertaintyType::L2Norm => "l2_norm",
            UncertaintyType::KlDivergence => "kl_divergence",
            UncertaintyType::CrossEntropy => "cross_entropy",
            UncertaintyType::JsDivergence => "js_divergence",
            UncertaintyType::FocalLoss => "focal_loss",
        }
    }

    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|t| t.as_str().to_string()).collect()
    }

    /// `p` (第一個分類頭) 與 `q` (第二個分類頭) 的逐元素差異
    pub fn elementwise(&self, p: f32, q: f32) -> f32 {
        match self {
            UncertaintyType::L2Norm => (p - q).powi(2),
            UncertaintyType::KlDivergence => kl(p, q),
            UncertaintyType::CrossEntropy => binary_cross_entropy(p, q),
            UncertaintyType::JsDivergence => {
                let m = (p + q) / 2.0;
                0.5 * kl(p, m) + 0.5 * kl(q, m)
            }
            UncertaintyType::FocalLoss => {
                let p_t = p * q + (1.0 - p) * (1.0 - q);
                let alpha_factor = p * FOCAL_ALPHA + (1.0 - p) * (1.0 - FOCAL_ALPHA);
                let modulating_factor = (1.0 - p_t).powf(FOCAL_GAMMA);
                alpha_factor * modulating_factor * binary_cross_entropy(p, q)
            }
        }
    }
}

impl FromStr for UncertaintyType {
    type Err = DetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DetError::UnknownUncertaintyType {
                name: s.to_string(),
                valid: Self::names(),
            })
    }
}

impl fmt::Display for UncertaintyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn kl(p: f32, q: f32) -> f32 {
    p * (p / q).ln()
}

fn binary_cross_entropy(p: f32, q: f32) -> f32 {
    -(p * q.ln() + (1.0 - p) * (1.0 - q).ln())
}

pub fn sigmoid(logits: &Array2<f32>) -> Array2<f32> {
    logits.mapv(|x| 1.0 / (1.0 + (-x).exp()))
}

/// 把各層 `[N_i, C]` 串接成 `[sum N_i, C]`
pub fn concat_levels(levels: &[Array2<f32>]) -> Result<Array2<f32>> {
    if levels.is_empty() {
        return Err(DetError::processing("head output has no feature levels"));
    }
    let views: Vec<ArrayView2<f32>> = levels.iter().map(|level| level.view()).collect();
    Ok(concatenate(Axis(0), &views)?)
}

/// 每個樣本的不確定度 `[N]`：在類別軸上取平均
pub fn per_sample(
    kind: UncertaintyType,
    p: ArrayView2<f32>,
    q: ArrayView2<f32>,
) -> Result<Array1<f32>> {
    if p.shape() != q.shape() {
        return Err(DetError::processing(format!(
            "head shapes differ: {:?} vs {:?}",
            p.shape(),
            q.shape()
        )));
    }

    let loss = Zip::from(&p)
        .and(&q)
        .map_collect(|&p, &q| kind.elementwise(p, q));

    loss.mean_axis(Axis(1))
        .ok_or_else(|| DetError::processing("head output has no class columns"))
}

/// 取最大的 `k` 個值平均；`k == 0` 或 `k >= N` 時取全部
pub fn top_k_mean(uncertainty: ArrayView1<f32>, k: usize) -> Result<f32> {
    if uncertainty.is_empty() {
        return Err(DetError::processing("no samples to aggregate"));
    }

    let mut order: Vec<usize> = (0..uncertainty.len()).collect();
    order.sort_by(|&a, &b| uncertainty[a].total_cmp(&uncertainty[b]));

    let take = if k == 0 { order.len() } else { k.min(order.len()) };
    let top = &order[order.len() - take..];
    let sum: f32 = top.iter().map(|&i| uncertainty[i]).sum();
    Ok(sum / top.len() as f32)
}

/// 從兩個分類頭的原始 logits 算出整張影像的不確定度
pub fn image_uncertainty(
    kind: UncertaintyType,
    head_f_1: &[Array2<f32>],
    head_f_2: &[Array2<f32>],
    k: usize,
) -> Result<f32> {
    let p = sigmoid(&concat_levels(head_f_1)?);
    let q = sigmoid(&concat_levels(head_f_2)?);
    let scores = per_sample(kind, p.view(), q.view())?;

    tracing::debug!(
        "{} over {} samples, averaging top {}",
        kind,
        scores.len(),
        if k == 0 { scores.len() } else { k.min(scores.len()) }
    );
    top_k_mean(scores.view(), k)
}
