//! Dataset descriptors, image listing, and label metadata.
//!
//! A dataset is described by a YAML file:
//!
//! ```yaml
//! path: ../datasets/coco8  # dataset root, relative to this file
//! train: images/train      # directory, .txt list, or a list of either
//! val: images/val
//! names:
//!   0: person
//!   1: bicycle
//! ```
//!
//! Labels live next to the images under a sibling `labels/` directory, one
//! `.txt` file per image with one object per line.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{ExplorerError, Result};

/// Image file extensions picked up when listing a directory.
pub const IMG_FORMATS: &[&str] = &[
    "bmp", "dng", "jpeg", "jpg", "mpo", "png", "tif", "tiff", "webp", "pfm",
];

/// A parsed dataset descriptor.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    /// Dataset root that split paths are resolved against.
    pub root: PathBuf,
    /// Class id to class name.
    pub names: BTreeMap<i64, String>,
    raw: Mapping,
}

impl DatasetInfo {
    /// Load a descriptor from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ExplorerError::Dataset(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or(Path::new("."));
        Self::from_yaml(&text, base)
    }

    /// Parse a descriptor, resolving a relative `path` against `base_dir`.
    pub fn from_yaml(text: &str, base_dir: &Path) -> Result<Self> {
        let raw: Mapping = serde_yaml::from_str(text)?;

        let root = match raw.get("path").and_then(Value::as_str) {
            Some(p) if Path::new(p).is_absolute() => PathBuf::from(p),
            Some(p) => base_dir.join(p),
            None => base_dir.to_path_buf(),
        };

        let names = parse_names(raw.get("names"))?;

        Ok(Self { root, names, raw })
    }

    /// Every top-level key of the descriptor.
    pub fn keys(&self) -> Vec<String> {
        self.raw
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()
    }

    /// Resolved source paths for a split.
    pub fn split_sources(&self, split: &str) -> Result<Vec<PathBuf>> {
        let Some(value) = self.raw.get(split) else {
            return Err(ExplorerError::Config(format!(
                "Split {} is not found in the dataset. Available keys in the dataset are {:?}",
                split,
                self.keys()
            )));
        };

        let entries: Vec<&str> = match value {
            Value::String(s) => vec![s.as_str()],
            Value::Sequence(seq) => seq.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if entries.is_empty() {
            return Err(ExplorerError::Dataset(format!(
                "Split {} does not name any image paths",
                split
            )));
        }

        Ok(entries
            .into_iter()
            .map(|e| {
                let p = Path::new(e);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    self.root.join(p)
                }
            })
            .collect())
    }

    /// All image files of a split, sorted within each source.
    pub fn image_files(&self, split: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for source in self.split_sources(split)? {
            if source.is_dir() {
                let mut found = Vec::new();
                collect_images(&source, &mut found)?;
                found.sort();
                files.extend(found);
            } else if source.extension().and_then(|e| e.to_str()) == Some("txt") {
                files.extend(read_image_list(&source)?);
            } else if source.is_file() && is_image(&source) {
                files.push(source);
            } else {
                return Err(ExplorerError::Dataset(format!(
                    "{} does not exist",
                    source.display()
                )));
            }
        }

        if files.is_empty() {
            return Err(ExplorerError::Dataset(format!(
                "No images found in split {}",
                split
            )));
        }
        Ok(files)
    }

    /// Class name for an id, falling back to the id itself.
    pub fn class_name(&self, id: i64) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

fn parse_names(value: Option<&Value>) -> Result<BTreeMap<i64, String>> {
    let mut names = BTreeMap::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Sequence(seq)) => {
            for (i, v) in seq.iter().enumerate() {
                names.insert(i as i64, scalar_text(v));
            }
        }
        Some(Value::Mapping(map)) => {
            for (k, v) in map {
                let id = match k {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                }
                .ok_or_else(|| {
                    ExplorerError::Dataset(format!("Invalid class id in names: {:?}", k))
                })?;
                names.insert(id, scalar_text(v));
            }
        }
        Some(other) => {
            return Err(ExplorerError::Dataset(format!(
                "names must be a list or a mapping, got {:?}",
                other
            )));
        }
    }
    Ok(names)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => format!("{:?}", other),
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMG_FORMATS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Recursively collect image files below `dir`.
fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if is_image(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Read a `.txt` image list; relative entries resolve against the list's directory.
fn read_image_list(list: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(list).map_err(|e| {
        ExplorerError::Dataset(format!("Failed to read {}: {}", list.display(), e))
    })?;
    let parent = list.parent().unwrap_or(Path::new("."));

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            let p = Path::new(l.strip_prefix("./").unwrap_or(l));
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                parent.join(p)
            }
        })
        .filter(|p| is_image(p))
        .collect())
}

/// Label file for an image: the last `images` directory becomes `labels`
/// and the extension becomes `.txt`.
pub fn label_path(image: &Path) -> PathBuf {
    let components: Vec<Component<'_>> = image.components().collect();
    let last_dir = components.len().saturating_sub(1);
    let images_at = components[..last_dir]
        .iter()
        .rposition(|c| c.as_os_str() == "images");

    let mut out = PathBuf::new();
    for (i, c) in components.iter().enumerate() {
        if Some(i) == images_at {
            out.push("labels");
        } else {
            out.push(c.as_os_str());
        }
    }
    out.with_extension("txt")
}

/// Why a label file row could not be parsed. Line numbers start at 1.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LabelError {
    #[error("line {line}: invalid number: {source}")]
    InvalidNumber {
        line: usize,
        source: std::num::ParseFloatError,
    },
    #[error("line {line}: expected at least 5 values, got {found}")]
    TooFewValues { line: usize, found: usize },
}

/// Objects annotated on one image, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageLabels {
    pub cls: Vec<i64>,
    /// Normalized `x1, y1, x2, y2` boxes.
    pub bboxes: Vec<[f32; 4]>,
    /// Normalized polygon points per object; empty for box-only rows.
    pub segments: Vec<Vec<[f32; 2]>>,
}

impl ImageLabels {
    /// Read the label file for `image`. A missing label file means no objects.
    pub fn read_for(image: &Path) -> Result<Self> {
        let path = label_path(image);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)?;
        Self::parse(&text).map_err(|e| {
            ExplorerError::Dataset(format!("{}: {}", path.display(), e))
        })
    }

    /// Parse label rows: `cls cx cy w h` or `cls x1 y1 x2 y2 ...` polygons.
    pub fn parse(text: &str) -> std::result::Result<Self, LabelError> {
        let mut labels = Self::default();

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let values: Vec<f32> = line
                .split_whitespace()
                .map(|v| v.parse::<f32>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|source| LabelError::InvalidNumber {
                    line: line_no + 1,
                    source,
                })?;
            if values.len() < 5 {
                return Err(LabelError::TooFewValues {
                    line: line_no + 1,
                    found: values.len(),
                });
            }

            let coords = &values[1..];
            let (bbox, segment) = if coords.len() > 4 && coords.len() % 2 == 0 {
                let points: Vec<[f32; 2]> = coords.chunks(2).map(|p| [p[0], p[1]]).collect();
                (polygon_extent(&points), points)
            } else {
                let (cx, cy, w, h) = (coords[0], coords[1], coords[2], coords[3]);
                (
                    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                    Vec::new(),
                )
            };

            labels.cls.push(values[0] as i64);
            labels.bboxes.push(bbox);
            labels.segments.push(segment);
        }

        Ok(labels)
    }
}

fn polygon_extent(points: &[[f32; 2]]) -> [f32; 4] {
    let mut extent = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
    for [x, y] in points {
        extent[0] = extent[0].min(*x);
        extent[1] = extent[1].min(*y);
        extent[2] = extent[2].max(*x);
        extent[3] = extent[3].max(*y);
    }
    extent
}

/// Label metadata stored with each embedding row.
///
/// Objects are ordered by class id; `labels` holds the class names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelMetadata {
    pub cls: Vec<i64>,
    pub labels: Vec<String>,
    pub bboxes: Vec<[f32; 4]>,
    pub segments: Vec<Vec<[f32; 2]>>,
}

/// Order objects by class id and resolve class names.
pub fn sanitize_labels(labels: ImageLabels, info: &DatasetInfo) -> LabelMetadata {
    let mut objects: Vec<(i64, [f32; 4], Vec<[f32; 2]>)> = labels
        .cls
        .into_iter()
        .zip(labels.bboxes)
        .zip(labels.segments)
        .map(|((c, b), s)| (c, b, s))
        .collect();
    objects.sort_by_key(|(c, _, _)| *c);

    let mut meta = LabelMetadata::default();
    for (c, b, s) in objects {
        meta.labels.push(info.class_name(c));
        meta.cls.push(c);
        meta.bboxes.push(b);
        meta.segments.push(s);
    }
    meta
}
