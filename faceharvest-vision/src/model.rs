//! Loading of boosted cascade definitions stored in the OpenCV XML format.
//!
//! Only the "new" layout (`<opencv_storage><cascade>`) is understood. Stage
//! type must be `BOOST`; feature type may be `LBP` or `HAAR` (upright
//! rectangles only).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use roxmltree::{Document, Node};
use thiserror::Error;

/// Subtracted from every stage threshold at load time, as the trainer does.
const THRESHOLD_EPS: f32 = 1e-5;

/// Number of 32-bit words in an LBP category subset (256 categories).
const LBP_SUBSET_WORDS: usize = 8;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("cascade file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read cascade {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("invalid cascade: {0}")]
    Invalid(String),

    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

/// Feature family a cascade was trained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Lbp,
    Haar,
}

/// Rectangle in detection-window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    /// 3x3 grid of `rect`-sized blocks anchored at `rect.x, rect.y`.
    Lbp(FeatureRect),
    /// Weighted rectangle sums.
    Haar(Vec<(FeatureRect, f32)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Split {
    /// Ordered split on a Haar response: left when `value < threshold`.
    Threshold(f32),
    /// Categorical split on an LBP code: left when the code's bit is set.
    Subset([u32; LBP_SUBSET_WORDS]),
}

/// Internal tree node. Child links `<= 0` address leaf `-link`.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub left: i32,
    pub right: i32,
    pub feature: usize,
    pub split: Split,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeakTree {
    pub nodes: Vec<TreeNode>,
    pub leaves: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub threshold: f32,
    pub trees: Vec<WeakTree>,
}

/// A fully validated cascade: every feature fits in the window and every
/// tree link points at an existing node, leaf or feature.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeModel {
    pub kind: FeatureKind,
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
    pub features: Vec<Feature>,
}

impl CascadeModel {
    pub fn from_file(path: &Path) -> Result<Self, CascadeError> {
        if !path.is_file() {
            return Err(CascadeError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_xml(&raw)?;
        log::debug!(
            "loaded {:?} cascade from {}: {} stages, {} features, window {}x{}",
            model.kind,
            path.display(),
            model.stages.len(),
            model.features.len(),
            model.window_width,
            model.window_height
        );
        Ok(model)
    }

    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().name() != "opencv_storage" {
            return Err(CascadeError::Invalid(format!(
                "unexpected root element <{}>",
                root.tag_name().name()
            )));
        }
        let cascade = elements(root).next().ok_or_else(|| {
            CascadeError::Invalid("empty <opencv_storage> document".to_string())
        })?;
        if cascade.tag_name().name() != "cascade" {
            return Err(CascadeError::Unsupported(format!(
                "legacy cascade layout <{}>",
                cascade.tag_name().name()
            )));
        }

        let stage_type = text(child(cascade, "stageType")?);
        if stage_type != "BOOST" {
            return Err(CascadeError::Unsupported(format!("stage type {stage_type}")));
        }
        let kind = match text(child(cascade, "featureType")?) {
            "LBP" => FeatureKind::Lbp,
            "HAAR" => FeatureKind::Haar,
            other => return Err(CascadeError::Unsupported(format!("feature type {other}"))),
        };
        let window_width: u32 = scalar(child(cascade, "width")?)?;
        let window_height: u32 = scalar(child(cascade, "height")?)?;
        if kind == FeatureKind::Haar && (window_width < 3 || window_height < 3) {
            return Err(CascadeError::Invalid(format!(
                "window {window_width}x{window_height} too small"
            )));
        }
        if kind == FeatureKind::Lbp {
            let max_cat: u32 = match optional_child(cascade, "featureParams")
                .and_then(|params| optional_child(params, "maxCatCount"))
            {
                Some(node) => scalar(node)?,
                None => 256,
            };
            if max_cat != 256 {
                return Err(CascadeError::Unsupported(format!(
                    "LBP cascade with {max_cat} categories"
                )));
            }
        }

        let features = elements(child(cascade, "features")?)
            .map(|node| parse_feature(node, kind))
            .collect::<Result<Vec<_>, _>>()?;
        let stages = elements(child(cascade, "stages")?)
            .map(|node| parse_stage(node, kind))
            .collect::<Result<Vec<_>, _>>()?;
        if stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".to_string()));
        }

        let model = Self {
            kind,
            window_width,
            window_height,
            stages,
            features,
        };
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<(), CascadeError> {
        for (idx, feature) in self.features.iter().enumerate() {
            let fits = match feature {
                Feature::Lbp(r) => {
                    span_fits(r.x, r.width.checked_mul(3), self.window_width)
                        && span_fits(r.y, r.height.checked_mul(3), self.window_height)
                }
                Feature::Haar(rects) => rects.iter().all(|(r, _)| {
                    span_fits(r.x, Some(r.width), self.window_width)
                        && span_fits(r.y, Some(r.height), self.window_height)
                }),
            };
            if !fits {
                return Err(CascadeError::Invalid(format!(
                    "feature {idx} exceeds the {}x{} window",
                    self.window_width, self.window_height
                )));
            }
        }

        for (si, stage) in self.stages.iter().enumerate() {
            for tree in &stage.trees {
                if tree.nodes.is_empty() {
                    return Err(CascadeError::Invalid(format!("stage {si} has an empty tree")));
                }
                for (ni, node) in tree.nodes.iter().enumerate() {
                    if node.feature >= self.features.len() {
                        return Err(CascadeError::Invalid(format!(
                            "stage {si} references missing feature {}",
                            node.feature
                        )));
                    }
                    for link in [node.left, node.right] {
                        // child nodes always follow their parent, so trees stay acyclic
                        let ok = if link > 0 {
                            let target = link as usize;
                            target > ni && target < tree.nodes.len()
                        } else {
                            (link.unsigned_abs() as usize) < tree.leaves.len()
                        };
                        if !ok {
                            return Err(CascadeError::Invalid(format!(
                                "stage {si} has a dangling tree link {link}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// `offset + extent <= limit` without overflowing.
fn span_fits(offset: u32, extent: Option<u32>, limit: u32) -> bool {
    extent
        .and_then(|extent| offset.checked_add(extent))
        .is_some_and(|end| end <= limit)
}

fn parse_stage(node: Node, kind: FeatureKind) -> Result<Stage, CascadeError> {
    let threshold: f32 = scalar(child(node, "stageThreshold")?)?;
    let trees = elements(child(node, "weakClassifiers")?)
        .map(|weak| parse_tree(weak, kind))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stage {
        threshold: threshold - THRESHOLD_EPS,
        trees,
    })
}

fn parse_tree(node: Node, kind: FeatureKind) -> Result<WeakTree, CascadeError> {
    let leaves: Vec<f32> = numbers(child(node, "leafValues")?)?;
    let raw = text(child(node, "internalNodes")?);
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let width = match kind {
        FeatureKind::Haar => 4,
        FeatureKind::Lbp => 3 + LBP_SUBSET_WORDS,
    };
    if fields.is_empty() || fields.len() % width != 0 {
        return Err(CascadeError::Invalid(format!(
            "internalNodes holds {} values, expected a multiple of {width}",
            fields.len()
        )));
    }

    let nodes = fields
        .chunks(width)
        .map(|chunk| {
            let left: i32 = parse(chunk[0])?;
            let right: i32 = parse(chunk[1])?;
            let feature: usize = parse(chunk[2])?;
            let split = match kind {
                FeatureKind::Haar => Split::Threshold(parse(chunk[3])?),
                FeatureKind::Lbp => {
                    let mut subset = [0u32; LBP_SUBSET_WORDS];
                    for (word, field) in subset.iter_mut().zip(&chunk[3..]) {
                        // stored as signed 32-bit; keep the bit pattern
                        *word = parse::<i64>(field)? as u32;
                    }
                    Split::Subset(subset)
                }
            };
            Ok(TreeNode {
                left,
                right,
                feature,
                split,
            })
        })
        .collect::<Result<Vec<_>, CascadeError>>()?;

    Ok(WeakTree { nodes, leaves })
}

fn parse_feature(node: Node, kind: FeatureKind) -> Result<Feature, CascadeError> {
    match kind {
        FeatureKind::Lbp => {
            let values: Vec<u32> = numbers(child(node, "rect")?)?;
            match values.as_slice() {
                &[x, y, width, height] => Ok(Feature::Lbp(FeatureRect {
                    x,
                    y,
                    width,
                    height,
                })),
                _ => Err(CascadeError::Invalid(format!(
                    "LBP rect needs 4 values, got {}",
                    values.len()
                ))),
            }
        }
        FeatureKind::Haar => {
            if let Some(tilted) = optional_child(node, "tilted") {
                if text(tilted) != "0" {
                    return Err(CascadeError::Unsupported("tilted Haar features".to_string()));
                }
            }
            let rects = elements(child(node, "rects")?)
                .map(|rect| {
                    let fields: Vec<&str> = text(rect).split_whitespace().collect();
                    if fields.len() != 5 {
                        return Err(CascadeError::Invalid(format!(
                            "Haar rect needs 5 values, got {}",
                            fields.len()
                        )));
                    }
                    // weight is written as "-1." by the trainer
                    let weight: f32 = parse(fields[4])?;
                    Ok((
                        FeatureRect {
                            x: parse(fields[0])?,
                            y: parse(fields[1])?,
                            width: parse(fields[2])?,
                            height: parse(fields[3])?,
                        },
                        weight,
                    ))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if rects.is_empty() {
                return Err(CascadeError::Invalid("Haar feature without rects".to_string()));
            }
            Ok(Feature::Haar(rects))
        }
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn optional_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == name)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, CascadeError> {
    optional_child(node, name).ok_or_else(|| {
        CascadeError::Invalid(format!(
            "<{}> is missing <{name}>",
            node.tag_name().name()
        ))
    })
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or("")
}

fn parse<T: FromStr>(field: &str) -> Result<T, CascadeError> {
    field
        .parse()
        .map_err(|_| CascadeError::Invalid(format!("cannot parse number {field:?}")))
}

fn scalar<T: FromStr>(node: Node) -> Result<T, CascadeError> {
    parse(text(node))
}

fn numbers<T: FromStr>(node: Node) -> Result<Vec<T>, CascadeError> {
    text(node).split_whitespace().map(parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LBP_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>LBP</featureType>
  <height>24</height>
  <width>24</width>
  <featureParams><maxCatCount>256</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>-0.5</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 -67130709 -21569 -1426120013 -1275125205 -21585 -16385 587145899 -24005</internalNodes>
          <leafValues>
            -0.65 0.88</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rect>
        0 0 3 5</rect></_></features></cascade>
</opencv_storage>
"#;

    const HAAR_XML: &str = r#"<opencv_storage>
<cascade>
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>20</height>
  <width>20</width>
  <stages>
    <_>
      <stageThreshold>0.8</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 4.5e-03</internalNodes>
          <leafValues>0.5 -0.25</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>2 4 16 4 -1.</_>
        <_>2 6 16 2 2.</_></rects>
      <tilted>0</tilted></_></features></cascade>
</opencv_storage>
"#;

    #[test]
    fn parses_lbp_cascade() {
        let model = CascadeModel::from_xml(LBP_XML).unwrap();
        assert_eq!(model.kind, FeatureKind::Lbp);
        assert_eq!((model.window_width, model.window_height), (24, 24));
        assert_eq!(model.stages.len(), 1);
        assert!((model.stages[0].threshold - (-0.5 - THRESHOLD_EPS)).abs() < 1e-9);

        let tree = &model.stages[0].trees[0];
        assert_eq!(tree.leaves, vec![-0.65, 0.88]);
        assert_eq!((tree.nodes[0].left, tree.nodes[0].right), (0, -1));
        match &tree.nodes[0].split {
            Split::Subset(words) => {
                assert_eq!(words[0], -67130709i32 as u32);
                assert_eq!(words[7], -24005i32 as u32);
            }
            other => panic!("unexpected split {other:?}"),
        }
        assert_eq!(
            model.features[0],
            Feature::Lbp(FeatureRect {
                x: 0,
                y: 0,
                width: 3,
                height: 5
            })
        );
    }

    #[test]
    fn parses_haar_cascade() {
        let model = CascadeModel::from_xml(HAAR_XML).unwrap();
        assert_eq!(model.kind, FeatureKind::Haar);
        assert_eq!(model.stages[0].trees[0].nodes[0].split, Split::Threshold(4.5e-3));
        match &model.features[0] {
            Feature::Haar(rects) => {
                assert_eq!(rects.len(), 2);
                assert_eq!(rects[1].1, 2.0);
            }
            other => panic!("unexpected feature {other:?}"),
        }
    }

    #[test]
    fn rejects_tilted_haar_features() {
        let xml = HAAR_XML.replace("<tilted>0</tilted>", "<tilted>1</tilted>");
        assert!(matches!(
            CascadeModel::from_xml(&xml),
            Err(CascadeError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_legacy_layout() {
        let xml = r#"<opencv_storage><haarcascade_frontalface type_id="opencv-haar-classifier"><size>24 24</size></haarcascade_frontalface></opencv_storage>"#;
        assert!(matches!(
            CascadeModel::from_xml(xml),
            Err(CascadeError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_feature_outside_window() {
        let xml = LBP_XML.replace("0 0 3 5</rect>", "20 0 3 5</rect>");
        assert!(matches!(
            CascadeModel::from_xml(&xml),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_dangling_feature_index() {
        let xml = LBP_XML.replace("0 -1 0 -67130709", "0 -1 3 -67130709");
        assert!(matches!(
            CascadeModel::from_xml(&xml),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_overflowing_feature_rect() {
        let lbp = LBP_XML.replace("0 0 3 5</rect>", "0 0 2000000000 1</rect>");
        assert!(matches!(
            CascadeModel::from_xml(&lbp),
            Err(CascadeError::Invalid(_))
        ));

        let haar = HAAR_XML.replace("<_>2 6 16 2 2.</_>", "<_>4294967295 6 16 2 2.</_>");
        assert!(matches!(
            CascadeModel::from_xml(&haar),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_cyclic_tree_links() {
        // node 1 sends its left branch back to itself
        let nodes = "1 -1 0 4.5e-03\n 1 -2 0 1.0e-03";
        let xml = HAAR_XML
            .replace("0 -1 0 4.5e-03", nodes)
            .replace("0.5 -0.25</leafValues>", "0.5 -0.25 0.1</leafValues>");
        assert!(matches!(
            CascadeModel::from_xml(&xml),
            Err(CascadeError::Invalid(_))
        ));

        let forward = xml.replace("1 -2 0 1.0e-03", "-1 -2 0 1.0e-03");
        let model = CascadeModel::from_xml(&forward).unwrap();
        assert_eq!(model.stages[0].trees[0].nodes.len(), 2);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = CascadeModel::from_file(Path::new("does/not/exist.xml")).unwrap_err();
        assert!(matches!(err, CascadeError::NotFound(_)));
    }
}
