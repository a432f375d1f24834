//! Boosted cascade evaluation and multi-scale sliding-window detection.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array2;

use crate::face::{self, FaceDetector, FaceRegion};
use crate::model::{CascadeError, CascadeModel, Feature, FeatureKind, FeatureRect, Split, WeakTree};

/// Similarity tolerance used when merging neighbouring hits.
pub const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step between successive scales, > 1.
    pub scale_factor: f64,
    /// Raw hits a cluster needs (strictly more than) to be reported.
    pub min_neighbors: u32,
    /// Smallest window edge considered, in source pixels.
    pub min_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 64,
        }
    }
}

/// Summed-area tables with a zero first row and column.
pub struct IntegralImage {
    sum: Array2<i64>,
    sq_sum: Option<Array2<f64>>,
}

impl IntegralImage {
    pub fn new(gray: &GrayImage, squared: bool) -> Self {
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let mut sum = Array2::<i64>::zeros((height + 1, width + 1));
        let mut sq_sum = squared.then(|| Array2::<f64>::zeros((height + 1, width + 1)));

        for y in 0..height {
            let mut row = 0i64;
            let mut row_sq = 0f64;
            for x in 0..width {
                let v = gray.get_pixel(x as u32, y as u32).0[0];
                row += v as i64;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row;
                if let Some(sq) = sq_sum.as_mut() {
                    row_sq += (v as f64) * (v as f64);
                    sq[[y + 1, x + 1]] = sq[[y, x + 1]] + row_sq;
                }
            }
        }
        Self { sum, sq_sum }
    }

    pub fn rect_sum(&self, x: u32, y: u32, width: u32, height: u32) -> i64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        self.sum[[y1, x1]] - self.sum[[y0, x1]] - self.sum[[y1, x0]] + self.sum[[y0, x0]]
    }

    pub fn rect_sq_sum(&self, x: u32, y: u32, width: u32, height: u32) -> f64 {
        let Some(sq) = &self.sq_sum else {
            return 0.0;
        };
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        sq[[y1, x1]] - sq[[y0, x1]] - sq[[y1, x0]] + sq[[y0, x0]]
    }
}

/// 8-bit local binary pattern of the 3x3 block grid anchored at `rect`,
/// clockwise from the top-left block.
pub fn lbp_code(ii: &IntegralImage, ox: u32, oy: u32, rect: &FeatureRect) -> u8 {
    let block = |col: u32, row: u32| {
        ii.rect_sum(
            ox + rect.x + col * rect.width,
            oy + rect.y + row * rect.height,
            rect.width,
            rect.height,
        )
    };
    let center = block(1, 1);
    const NEIGHBOURS: [(u32, u32, u8); 8] = [
        (0, 0, 128),
        (1, 0, 64),
        (2, 0, 32),
        (2, 1, 16),
        (2, 2, 8),
        (1, 2, 4),
        (0, 2, 2),
        (0, 1, 1),
    ];
    NEIGHBOURS
        .iter()
        .fold(0u8, |code, &(col, row, bit)| {
            if block(col, row) >= center {
                code | bit
            } else {
                code
            }
        })
}

/// Cascade classifier usable as a [`FaceDetector`].
pub struct CascadeClassifier {
    model: CascadeModel,
    params: DetectParams,
}

impl CascadeClassifier {
    pub fn new(model: CascadeModel, params: DetectParams) -> Self {
        Self { model, params }
    }

    pub fn from_file(path: &Path, params: DetectParams) -> Result<Self, CascadeError> {
        Ok(Self::new(CascadeModel::from_file(path)?, params))
    }

    /// Every window accepted by all stages, before neighbour grouping.
    pub fn detect_raw(&self, gray: &GrayImage) -> Vec<FaceRegion> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = (self.model.window_width, self.model.window_height);
        let squared = self.model.kind == FeatureKind::Haar;
        let step_factor = self.params.scale_factor.max(1.0 + f64::EPSILON);

        let mut hits = Vec::new();
        let scales = std::iter::successors(Some(1.0f64), |f| Some(f * step_factor));
        for factor in scales {
            let window_w = (win_w as f64 * factor).round() as u32;
            let window_h = (win_h as f64 * factor).round() as u32;
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if window_w > img_w || window_h > img_h || scaled_w < win_w || scaled_h < win_h {
                break;
            }
            if window_w < self.params.min_size || window_h < self.params.min_size {
                continue;
            }

            let scaled = if scaled_w == img_w && scaled_h == img_h {
                gray.clone()
            } else {
                imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
            };
            let ii = IntegralImage::new(&scaled, squared);
            let step = if factor > 2.0 { 1 } else { 2 };

            let before = hits.len();
            for y in (0..=scaled_h - win_h).step_by(step) {
                for x in (0..=scaled_w - win_w).step_by(step) {
                    if self.accepts(&ii, x, y) {
                        hits.push(FaceRegion::new(
                            (x as f64 * factor).round() as u32,
                            (y as f64 * factor).round() as u32,
                            window_w,
                            window_h,
                        ));
                    }
                }
            }
            log::trace!(
                "scale {:.3}: {} windows accepted",
                factor,
                hits.len() - before
            );
        }
        hits
    }

    /// Run the full cascade on the window whose top-left corner is `(x, y)`.
    pub fn accepts(&self, ii: &IntegralImage, x: u32, y: u32) -> bool {
        let norm = match self.model.kind {
            FeatureKind::Haar => self.variance_norm(ii, x, y),
            FeatureKind::Lbp => 1.0,
        };
        self.model.stages.iter().all(|stage| {
            let sum: f64 = stage
                .trees
                .iter()
                .map(|tree| self.tree_response(tree, ii, x, y, norm) as f64)
                .sum();
            sum >= stage.threshold as f64
        })
    }

    fn variance_norm(&self, ii: &IntegralImage, x: u32, y: u32) -> f64 {
        let (w, h) = (self.model.window_width - 2, self.model.window_height - 2);
        let area = (w * h) as f64;
        let sum = ii.rect_sum(x + 1, y + 1, w, h) as f64;
        let sq = ii.rect_sq_sum(x + 1, y + 1, w, h);
        let nf = area * sq - sum * sum;
        if nf > 0.0 {
            nf.sqrt()
        } else {
            1.0
        }
    }

    fn tree_response(&self, tree: &WeakTree, ii: &IntegralImage, x: u32, y: u32, norm: f64) -> f32 {
        let mut idx = 0usize;
        loop {
            let node = &tree.nodes[idx];
            let go_left = match (&node.split, &self.model.features[node.feature]) {
                (Split::Subset(subset), Feature::Lbp(rect)) => {
                    let code = lbp_code(ii, x, y, rect) as usize;
                    subset[code >> 5] & (1 << (code & 31)) != 0
                }
                (Split::Threshold(threshold), Feature::Haar(rects)) => {
                    let raw: f64 = rects
                        .iter()
                        .map(|(r, weight)| {
                            *weight as f64 * ii.rect_sum(x + r.x, y + r.y, r.width, r.height) as f64
                        })
                        .sum();
                    raw / norm < *threshold as f64
                }
                // kind and split always agree for a loaded model
                _ => false,
            };
            let next = if go_left { node.left } else { node.right };
            if next <= 0 {
                return tree.leaves[next.unsigned_abs() as usize];
            }
            idx = next as usize;
        }
    }
}

impl FaceDetector for CascadeClassifier {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion> {
        let raw = self.detect_raw(gray);
        face::group_regions(&raw, self.params.min_neighbors, GROUP_EPS)
            .into_iter()
            .map(|region| region.clamp_to(gray.width(), gray.height()))
            .filter(|region| !region.is_empty())
            .collect()
    }
}
