//! Integration tests for sightline-docs
//!
//! Builds tables from a realistic defaults file written to disk.

use std::fs;

use serde_yaml::Value;
use sightline_docs::{ConfigNode, DocsError, TableBuilder, tables_to_markdown};

const DEFAULT_YAML: &str = "\
# Default training settings and hyperparameters for medium-augmentation training

task: detect  # (str) YOLO task, i.e. detect, segment, classify, pose
mode: train  # (str) YOLO mode, i.e. train, val, predict, export, track, benchmark

# Train settings -------------------------------------------------------------------------------------------------------
model:  # (str, optional) path to model file, i.e. yolov8n.pt, yolov8n.yaml
data:  # (str, optional) path to data file, i.e. coco128.yaml
epochs: 100  # (int) number of epochs to train for
batch: 16  # (int) number of images per batch (-1 for AutoBatch)
imgsz: 640  # (int | list) input images size as int for train and val modes, or list[w,h] for predict and export modes
device:  # (int | str | list, optional) device to run on, i.e. cuda device=0 or device=0,1,2,3 or device=cpu
# Segmentation
overlap_mask: True  # (bool) masks should overlap during training (segment train only)
mask_ratio: 4  # (int) mask downsample ratio (segment train only)
# Classification
dropout: 0.0  # (float) use dropout regularization (classify train only)

# Val/Test settings ----------------------------------------------------------------------------------------------------
val: True  # (bool) validate/test during training
split: val  # (str) dataset split to use for validation, i.e. 'val', 'test' or 'train'

# Hyperparameters ------------------------------------------------------------------------------------------------------
lr0: 0.01  # (float) initial learning rate (i.e. SGD=1E-2, Adam=1E-3)
cfg:  # (str, optional) for overriding defaults.yaml, see https://docs.ultralytics.com/usage/cfg

# Tracker settings ------------------------------------------------------------------------------------------------------
tracker: botsort.yaml  # (str) tracker type, choices=[botsort.yaml, bytetrack.yaml]
";

#[test]
fn build_tables_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.yaml");
    fs::write(&path, DEFAULT_YAML).unwrap();

    let tables = TableBuilder::new().build_file(&path).expect("Should build");
    let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Train settings", "Val/Test settings", "Hyperparameters"]);

    let train = &tables[0];
    assert_eq!(train.get("epochs").unwrap().value, Value::Number(100.into()));
    assert_eq!(train.get("imgsz").unwrap().type_name, "int or list");
    assert_eq!(
        train.get("device").unwrap().desc,
        "device to run on, i.e. cuda device=0 or device=0,1,2,3 or device=cpu"
    );

    // `# Segmentation` is a depth-1 heading, so it closes Train settings.
    assert!(train.get("overlap_mask").is_none());
    assert_eq!(train.len(), 6);

    let val = &tables[1];
    assert_eq!(val.get("val").unwrap().value, Value::Bool(true));

    let hyp = &tables[2];
    assert_eq!(
        hyp.get("cfg").unwrap().desc,
        "for overriding defaults.yaml, see"
    );
}

#[test]
fn sub_sections_nest_under_parent() {
    let text = DEFAULT_YAML.replace("# Segmentation", "## Segmentation");
    let tables = TableBuilder::new().build(&text).unwrap();
    let train = tables.iter().find(|t| t.name == "Train settings").unwrap();

    assert!(train.get("overlap_mask").is_some());
    assert!(
        train
            .nodes
            .iter()
            .any(|n| matches!(n, ConfigNode::Group(g) if g.title == "Segmentation"))
    );
    // `# Classification` is still depth 1 and ends the section.
    assert!(train.get("dropout").is_none());
}

#[test]
fn tables_serialize_to_json_and_markdown() {
    let tables = TableBuilder::new().build(DEFAULT_YAML).unwrap();

    let json = serde_json::to_value(&tables).unwrap();
    assert_eq!(json[0]["name"], "Train settings");
    assert_eq!(json[0]["nodes"][2]["kind"], "entry");
    assert_eq!(json[0]["nodes"][2]["type"], "int");

    let md = tables_to_markdown(&tables);
    assert!(md.contains("## Hyperparameters"));
    assert!(md.contains("| `lr0` | `0.01` | `float` |"));
}

#[test]
fn missing_file_is_io_error() {
    let err = TableBuilder::new()
        .build_file(std::path::Path::new("/nonexistent/default.yaml"))
        .unwrap_err();
    assert!(matches!(err, DocsError::Io(_)));
}
