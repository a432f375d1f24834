use image::GrayImage;

/// Detected face rectangle in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Shrink the region so that it lies inside a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pluggable face detection backend.
///
/// Receives the preprocessed (grayscale, equalized) frame and returns the
/// face rectangles found in it.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion>;
}

/// Merge raw multi-scale hits into final detections.
///
/// Hits are clustered by similarity (corners within `eps` of the smaller
/// side), each cluster is averaged, and clusters backed by `min_neighbors`
/// hits or fewer are dropped, as are clusters nested inside a stronger one.
/// With `min_neighbors == 0` the raw hits are returned untouched.
pub fn group_regions(regions: &[FaceRegion], min_neighbors: u32, eps: f64) -> Vec<FaceRegion> {
    if min_neighbors == 0 || regions.is_empty() {
        return regions.to_vec();
    }

    let labels = partition(regions, eps);
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0f64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (region, &label) in regions.iter().zip(&labels) {
        let sum = &mut sums[label];
        sum[0] += region.x as f64;
        sum[1] += region.y as f64;
        sum[2] += region.width as f64;
        sum[3] += region.height as f64;
        counts[label] += 1;
    }

    let averaged: Vec<FaceRegion> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &n)| {
            let n = n as f64;
            FaceRegion::new(
                (sum[0] / n).round() as u32,
                (sum[1] / n).round() as u32,
                (sum[2] / n).round() as u32,
                (sum[3] / n).round() as u32,
            )
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1) = (r1.x as i64, r1.y as i64);
            let (x2, y2) = (r2.x as i64, r2.y as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + r1.width as i64 <= x2 + r2.width as i64 + dx
                && y1 + r1.height as i64 <= y2 + r2.height as i64 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            kept.push(*r1);
        }
    }
    kept
}

fn similar(a: &FaceRegion, b: &FaceRegion, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Label connected components of the similarity relation, labels dense from 0.
fn partition(regions: &[FaceRegion], eps: f64) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..regions.len()).collect();

    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..regions.len() {
        for j in (i + 1)..regions.len() {
            if similar(&regions[i], &regions[j], eps) {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut dense = vec![usize::MAX; regions.len()];
    let mut next = 0;
    (0..regions.len())
        .map(|i| {
            let r = root(&mut parent, i);
            if dense[r] == usize::MAX {
                dense[r] = next;
                next += 1;
            }
            dense[r]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jittered(x: u32, y: u32, size: u32, count: u32) -> Vec<FaceRegion> {
        (0..count)
            .map(|i| FaceRegion::new(x + i % 3, y + i % 2, size, size))
            .collect()
    }

    #[test]
    fn test_similar() {
        let a = FaceRegion::new(10, 10, 40, 40);
        let b = FaceRegion::new(13, 12, 40, 42);
        assert!(similar(&a, &b, 0.2));

        let c = FaceRegion::new(100, 100, 40, 40);
        assert!(!similar(&a, &c, 0.2));
    }

    #[test]
    fn test_group_keeps_dense_cluster() {
        let mut hits = jittered(20, 20, 64, 6);
        hits.extend(jittered(200, 200, 64, 5));

        // 6 > 5 neighbours survives, 5 does not
        let grouped = group_regions(&hits, 5, 0.2);
        assert_eq!(grouped.len(), 1);
        let face = grouped[0];
        assert!(face.x >= 20 && face.x <= 22);
        assert_eq!(face.width, 64);
    }

    #[test]
    fn test_group_zero_neighbours_is_passthrough() {
        let hits = jittered(20, 20, 64, 4);
        assert_eq!(group_regions(&hits, 0, 0.2), hits);
    }

    #[test]
    fn test_group_drops_nested_weaker_cluster() {
        let mut hits = jittered(100, 100, 120, 10);
        // small cluster well inside the big one
        hits.extend(jittered(140, 140, 30, 4));

        let grouped = group_regions(&hits, 2, 0.2);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].width, 120);
    }

    #[test]
    fn test_clamp_to_bounds() {
        let region = FaceRegion::new(90, 95, 20, 20).clamp_to(100, 100);
        assert_eq!(region, FaceRegion::new(90, 95, 10, 5));
        assert!(FaceRegion::new(120, 0, 5, 5).clamp_to(100, 100).is_empty());
    }
}
