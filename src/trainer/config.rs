//! Typed trainer configuration document (solver, optimizer, DLRM layers)

use crate::error::{PipelineError, Result};
use crate::report::{slot_sizes, EmbeddingSize};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Optimizer hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OptimizerSettings {
    Sgd {
        learning_rate: f64,
        warmup_steps: u64,
        decay_start: u64,
        decay_steps: u64,
        end_lr: f64,
    },
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    },
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings::Sgd {
            learning_rate: 24.0,
            warmup_steps: 8000,
            decay_start: 48000,
            decay_steps: 24000,
            end_lr: 0.0,
        }
    }
}

/// User-facing trainer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSettings {
    /// Trainer executable
    pub binary: PathBuf,
    /// Where the generated configuration document is written
    pub config_path: PathBuf,
    pub gpus: Vec<u32>,
    pub batch_size: usize,
    pub batch_size_eval: usize,
    pub max_iter: u64,
    pub display: u64,
    pub eval_interval: u64,
    pub max_eval_batches: u64,
    pub snapshot: u64,
    /// Target AUC reported as `AUC:<threshold>`
    pub auc_threshold: f64,
    pub embedding_vec_size: usize,
    pub max_feature_num_per_sample: usize,
    pub bottom_mlp: Vec<usize>,
    pub top_mlp: Vec<usize>,
    pub optimizer: OptimizerSettings,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("huge_ctr"),
            config_path: PathBuf::from("dlrm_fp32_64k.json"),
            gpus: vec![0],
            batch_size: 65536,
            batch_size_eval: 65536,
            max_iter: 75868,
            display: 1000,
            eval_interval: 3793,
            max_eval_batches: 1361,
            snapshot: 10_000_000,
            auc_threshold: 0.8025,
            embedding_vec_size: 128,
            max_feature_num_per_sample: 26,
            bottom_mlp: vec![512, 256, 128],
            top_mlp: vec![1024, 1024, 512, 256, 1],
            optimizer: OptimizerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solver {
    pub lr_policy: String,
    pub display: u64,
    pub max_iter: u64,
    pub gpu: Vec<u32>,
    pub batchsize: usize,
    pub batchsize_eval: usize,
    pub snapshot: u64,
    pub eval_interval: u64,
    pub max_eval_batches: u64,
    pub eval_metrics: Vec<String>,
    pub input_key_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdHparam {
    pub learning_rate: f64,
    pub warmup_steps: u64,
    pub decay_start: u64,
    pub decay_steps: u64,
    pub end_lr: f64,
    pub atomic_update: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamHparam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Optimizer {
    #[serde(rename = "SGD")]
    Sgd { update_type: String, sgd_hparam: SgdHparam },
    Adam { update_type: String, adam_hparam: AdamHparam },
}

impl From<&OptimizerSettings> for Optimizer {
    fn from(settings: &OptimizerSettings) -> Self {
        match *settings {
            OptimizerSettings::Sgd { learning_rate, warmup_steps, decay_start, decay_steps, end_lr } => {
                Optimizer::Sgd {
                    update_type: "Local".into(),
                    sgd_hparam: SgdHparam {
                        learning_rate,
                        warmup_steps,
                        decay_start,
                        decay_steps,
                        end_lr,
                        atomic_update: true,
                    },
                }
            }
            OptimizerSettings::Adam { learning_rate, beta1, beta2, epsilon } => Optimizer::Adam {
                update_type: "Global".into(),
                adam_hparam: AdamHparam { learning_rate, beta1, beta2, epsilon },
            },
        }
    }
}

/// A layer input: one tensor name or several
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bottom {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    pub top: String,
    pub label_dim: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseSpec {
    pub top: String,
    pub dense_dim: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseSpec {
    pub top: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub max_feature_num_per_sample: usize,
    pub max_nnz: usize,
    pub slot_num: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingHparam {
    pub slot_size_array: Vec<u64>,
    pub embedding_vec_size: usize,
    pub combiner: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcParam {
    pub num_output: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Layer {
    Data {
        name: String,
        format: String,
        slot_size_array: Vec<u64>,
        source: PathBuf,
        eval_source: PathBuf,
        check: String,
        label: LabelSpec,
        dense: DenseSpec,
        sparse: Vec<SparseSpec>,
    },
    LocalizedSlotSparseEmbeddingHash {
        name: String,
        bottom: Bottom,
        top: String,
        sparse_embedding_hparam: EmbeddingHparam,
    },
    InnerProduct {
        name: String,
        bottom: Bottom,
        top: String,
        fc_param: FcParam,
    },
    #[serde(rename = "ReLU")]
    Relu { name: String, bottom: Bottom, top: String },
    Interaction { name: String, bottom: Bottom, top: String },
    BinaryCrossEntropyLoss { name: String, bottom: Bottom, top: String },
}

impl Layer {
    pub fn name(&self) -> &str {
        match self {
            Layer::Data { name, .. }
            | Layer::LocalizedSlotSparseEmbeddingHash { name, .. }
            | Layer::InnerProduct { name, .. }
            | Layer::Relu { name, .. }
            | Layer::Interaction { name, .. }
            | Layer::BinaryCrossEntropyLoss { name, .. } => name,
        }
    }
}

/// Complete trainer configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub solver: Solver,
    pub optimizer: Optimizer,
    pub layers: Vec<Layer>,
}

/// Appends `InnerProduct` + `ReLU` pairs, leaving the last layer of the
/// top MLP without an activation. Returns the name of the final tensor.
fn push_mlp(layers: &mut Vec<Layer>, mut input: Bottom, widths: &[usize], first_index: usize, final_relu: bool) -> String {
    let mut last = String::new();
    for (i, width) in widths.iter().enumerate() {
        let n = first_index + i;
        let fc = format!("fc{n}");
        layers.push(Layer::InnerProduct {
            name: fc.clone(),
            bottom: input,
            top: fc.clone(),
            fc_param: FcParam { num_output: *width },
        });
        last = fc;
        if final_relu || i + 1 < widths.len() {
            let relu = format!("relu{n}");
            layers.push(Layer::Relu {
                name: relu.clone(),
                bottom: Bottom::One(last.clone()),
                top: relu.clone(),
            });
            last = relu;
        }
        input = Bottom::One(last.clone());
    }
    last
}

impl TrainerConfig {
    /// DLRM over the train/valid manifests with slot sizes from `report`.
    ///
    /// The bottom MLP output width must equal the embedding vector size for
    /// the dot interaction.
    pub fn dlrm(
        settings: &TrainerSettings,
        report: &[EmbeddingSize],
        num_dense: usize,
        train_manifest: &Path,
        valid_manifest: &Path,
    ) -> Result<Self> {
        if report.is_empty() {
            return Err(PipelineError::ConfigError("embedding report is empty".into()));
        }
        if settings.bottom_mlp.last() != Some(&settings.embedding_vec_size) {
            return Err(PipelineError::ConfigError(format!(
                "bottom MLP must end at the embedding size {}",
                settings.embedding_vec_size
            )));
        }
        if settings.top_mlp.last() != Some(&1) {
            return Err(PipelineError::ConfigError("top MLP must end in a single output".into()));
        }

        let slots = slot_sizes(report);
        let solver = Solver {
            lr_policy: "fixed".into(),
            display: settings.display,
            max_iter: settings.max_iter,
            gpu: settings.gpus.clone(),
            batchsize: settings.batch_size,
            batchsize_eval: settings.batch_size_eval,
            snapshot: settings.snapshot,
            eval_interval: settings.eval_interval,
            max_eval_batches: settings.max_eval_batches,
            eval_metrics: vec![format!("AUC:{}", settings.auc_threshold)],
            input_key_type: "I64".into(),
        };

        let mut layers = vec![
            Layer::Data {
                name: "data".into(),
                format: "Parquet".into(),
                slot_size_array: slots.clone(),
                source: train_manifest.to_path_buf(),
                eval_source: valid_manifest.to_path_buf(),
                check: "None".into(),
                label: LabelSpec { top: "label".into(), label_dim: 1 },
                dense: DenseSpec { top: "dense".into(), dense_dim: num_dense },
                sparse: vec![SparseSpec {
                    top: "data1".into(),
                    kind: "LocalizedSlot".into(),
                    max_feature_num_per_sample: settings.max_feature_num_per_sample,
                    max_nnz: 1,
                    slot_num: slots.len(),
                }],
            },
            Layer::LocalizedSlotSparseEmbeddingHash {
                name: "sparse_embedding1".into(),
                bottom: Bottom::One("data1".into()),
                top: "sparse_embedding1".into(),
                sparse_embedding_hparam: EmbeddingHparam {
                    slot_size_array: slots,
                    embedding_vec_size: settings.embedding_vec_size,
                    combiner: 0,
                },
            },
        ];

        let bottom_out = push_mlp(&mut layers, Bottom::One("dense".into()), &settings.bottom_mlp, 1, true);
        layers.push(Layer::Interaction {
            name: "interaction1".into(),
            bottom: Bottom::Many(vec![bottom_out, "sparse_embedding1".into()]),
            top: "interaction1".into(),
        });
        let top_out = push_mlp(
            &mut layers,
            Bottom::One("interaction1".into()),
            &settings.top_mlp,
            settings.bottom_mlp.len() + 1,
            false,
        );
        layers.push(Layer::BinaryCrossEntropyLoss {
            name: "loss".into(),
            bottom: Bottom::Many(vec![top_out, "label".into()]),
            top: "loss".into(),
        });

        Ok(Self {
            solver,
            optimizer: Optimizer::from(&settings.optimizer),
            layers,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> Vec<EmbeddingSize> {
        (1..=26)
            .map(|i| EmbeddingSize { column: format!("C{i}"), cardinality: i * 10, width: 16 })
            .collect()
    }

    fn dlrm() -> TrainerConfig {
        TrainerConfig::dlrm(
            &TrainerSettings::default(),
            &report(),
            13,
            Path::new("/data/train/_file_list.txt"),
            Path::new("/data/valid/_file_list.txt"),
        )
        .unwrap()
    }

    #[test]
    fn test_dlrm_layer_order() {
        let doc = dlrm();
        let names: Vec<&str> = doc.layers.iter().map(|l| l.name()).collect();
        assert_eq!(
            names,
            vec![
                "data", "sparse_embedding1", "fc1", "relu1", "fc2", "relu2", "fc3", "relu3",
                "interaction1", "fc4", "relu4", "fc5", "relu5", "fc6", "relu6", "fc7", "relu7",
                "fc8", "loss",
            ]
        );
    }

    #[test]
    fn test_slot_sizes_from_report() {
        let config = dlrm();
        let Layer::Data { slot_size_array, sparse, .. } = &config.layers[0] else {
            panic!("first layer must be data");
        };
        assert_eq!(slot_size_array.len(), 26);
        assert_eq!(slot_size_array[3], 40);
        assert_eq!(sparse[0].slot_num, 26);
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(dlrm()).unwrap();
        assert_eq!(value["optimizer"]["type"], "SGD");
        assert_eq!(value["layers"][0]["type"], "Data");
        assert_eq!(value["layers"][3]["type"], "ReLU");
        assert_eq!(value["layers"][8]["bottom"][0], "relu3");
        assert_eq!(value["layers"][18]["bottom"][1], "label");
        assert_eq!(value["solver"]["eval_metrics"][0], "AUC:0.8025");
        assert_eq!(value["layers"][0]["sparse"][0]["type"], "LocalizedSlot");
    }

    #[test]
    fn test_rejects_mismatched_bottom_mlp() {
        let settings = TrainerSettings { bottom_mlp: vec![512, 64], ..Default::default() };
        let err = TrainerConfig::dlrm(&settings, &report(), 13, Path::new("a"), Path::new("b"));
        assert!(matches!(err, Err(PipelineError::ConfigError(_))));
    }

    #[test]
    fn test_write_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dlrm.json");
        let config = dlrm();
        config.write(&path).unwrap();
        let parsed: TrainerConfig = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
