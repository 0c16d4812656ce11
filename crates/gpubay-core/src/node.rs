//! Seller node capability types and claim offers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::{JobConstraints, MAX_GPU_COUNT};

/// GPU compute classes a seller can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuClass {
    Cuda,
    Mps,
    Rocm,
    Cpu,
    Unknown,
}

impl GpuClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuClass::Cuda => "cuda",
            GpuClass::Mps => "mps",
            GpuClass::Rocm => "rocm",
            GpuClass::Cpu => "cpu",
            GpuClass::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for GpuClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GpuClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cuda" => Ok(GpuClass::Cuda),
            "mps" => Ok(GpuClass::Mps),
            "rocm" => Ok(GpuClass::Rocm),
            "cpu" => Ok(GpuClass::Cpu),
            "unknown" => Ok(GpuClass::Unknown),
            other => Err(Error::Validation(format!("unknown gpu class: {other}"))),
        }
    }
}

/// Hardware description a seller registers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    pub gpu_class: GpuClass,
    pub device_name: String,
    pub vram_gb: Option<f64>,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: i32,
    pub compute_capability: Option<String>,
}

fn default_gpu_count() -> i32 {
    1
}

/// A node registration as received from a seller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNode {
    pub seller_address: String,
    pub gpu_info: GpuInfo,
    pub price_per_hour: f64,
}

impl NewNode {
    pub fn validate(&self) -> Result<()> {
        if self.seller_address.trim().is_empty() {
            return Err(Error::Validation("seller_address must not be empty".into()));
        }
        if self.gpu_info.device_name.trim().is_empty() {
            return Err(Error::Validation("device_name must not be empty".into()));
        }
        if !self.price_per_hour.is_finite() || self.price_per_hour <= 0.0 {
            return Err(Error::Validation(format!(
                "price_per_hour must be positive, got {}",
                self.price_per_hour
            )));
        }
        if let Some(vram) = self.gpu_info.vram_gb {
            if !vram.is_finite() || vram <= 0.0 {
                return Err(Error::Validation(format!(
                    "vram_gb must be positive, got {vram}"
                )));
            }
        }
        if self.gpu_info.gpu_count < 1 || self.gpu_info.gpu_count > MAX_GPU_COUNT {
            return Err(Error::Validation(format!(
                "gpu_count must be between 1 and {MAX_GPU_COUNT}, got {}",
                self.gpu_info.gpu_count
            )));
        }
        Ok(())
    }
}

/// Generate an opaque node identifier (`node_` + 12 hex chars).
pub fn generate_node_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("node_{}", &hex[..12])
}

/// The capability tuple a seller presents on each claim attempt.
/// Ephemeral: used only as claim-time input, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityOffer {
    pub node_id: String,
    pub seller_address: String,
    pub gpu_class: GpuClass,
    pub price_per_hour: f64,
    pub vram_gb: f64,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: i32,
}

impl CapabilityOffer {
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::Validation("node_id must not be empty".into()));
        }
        if self.seller_address.trim().is_empty() {
            return Err(Error::Validation("seller_address must not be empty".into()));
        }
        if !self.price_per_hour.is_finite() || self.price_per_hour <= 0.0 {
            return Err(Error::Validation(format!(
                "price_per_hour must be positive, got {}",
                self.price_per_hour
            )));
        }
        if !self.vram_gb.is_finite() || self.vram_gb < 0.0 {
            return Err(Error::Validation(format!(
                "vram_gb must be non-negative, got {}",
                self.vram_gb
            )));
        }
        if self.gpu_count < 1 {
            return Err(Error::Validation(format!(
                "gpu_count must be at least 1, got {}",
                self.gpu_count
            )));
        }
        Ok(())
    }

    /// Whether this offer satisfies a job's constraints. Mirrors the claim
    /// engine's SQL filter; also used for client-side cost estimation.
    pub fn matches(&self, job: &JobConstraints) -> bool {
        let class_ok = job
            .required_gpu_class
            .map_or(true, |class| class == self.gpu_class);
        let price_ok = job.max_price_per_hour >= self.price_per_hour;
        let vram_ok = job.min_vram_gb.map_or(true, |vram| vram <= self.vram_gb);
        let count_ok = job.required_gpu_count <= self.gpu_count;
        class_ok && price_ok && vram_ok && count_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(gpu_class: GpuClass, price: f64, vram: f64, count: i32) -> CapabilityOffer {
        CapabilityOffer {
            node_id: "node_abc123def456".into(),
            seller_address: "0xseller".into(),
            gpu_class,
            price_per_hour: price,
            vram_gb: vram,
            gpu_count: count,
        }
    }

    #[test]
    fn node_id_format() {
        let id = generate_node_id();
        assert!(id.starts_with("node_"));
        assert_eq!(id.len(), "node_".len() + 12);
        assert_ne!(generate_node_id(), generate_node_id());
    }

    #[test]
    fn gpu_class_round_trip() {
        for class in [
            GpuClass::Cuda,
            GpuClass::Mps,
            GpuClass::Rocm,
            GpuClass::Cpu,
            GpuClass::Unknown,
        ] {
            let parsed: GpuClass = class.as_str().parse().unwrap();
            assert_eq!(class, parsed);
        }
        assert!("CUDA".parse::<GpuClass>().is_err());
    }

    #[test]
    fn unconstrained_job_matches_any_class() {
        let job = JobConstraints {
            required_gpu_class: None,
            max_price_per_hour: 10.0,
            min_vram_gb: None,
            required_gpu_count: 1,
        };
        for class in [GpuClass::Cuda, GpuClass::Mps, GpuClass::Cpu] {
            assert!(offer(class, 1.0, 8.0, 1).matches(&job));
        }
    }

    /// Exercise the filter over generated offer/constraint combinations:
    /// an offer must match exactly when every individual predicate holds.
    #[test]
    fn matching_agrees_with_per_field_predicates() {
        let classes = [
            None,
            Some(GpuClass::Cuda),
            Some(GpuClass::Mps),
            Some(GpuClass::Rocm),
        ];
        let offer_classes = [GpuClass::Cuda, GpuClass::Mps, GpuClass::Cpu];
        let prices = [0.25, 1.0, 2.5];
        let vrams = [4.0, 8.0, 16.0, 24.0];
        let counts = [1, 2, 4];

        for required_class in classes {
            for min_vram in [None, Some(8.0), Some(16.0)] {
                for max_price in prices {
                    for required_count in counts {
                        let job = JobConstraints {
                            required_gpu_class: required_class,
                            max_price_per_hour: max_price,
                            min_vram_gb: min_vram,
                            required_gpu_count: required_count,
                        };
                        for offer_class in offer_classes {
                            for ask in prices {
                                for vram in vrams {
                                    for count in counts {
                                        let candidate = offer(offer_class, ask, vram, count);
                                        let expected = required_class
                                            .map_or(true, |c| c == offer_class)
                                            && max_price >= ask
                                            && min_vram.map_or(true, |v| v <= vram)
                                            && required_count <= count;
                                        assert_eq!(
                                            candidate.matches(&job),
                                            expected,
                                            "job {job:?} vs offer {candidate:?}"
                                        );
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn cuda_16gb_job_never_matches_weaker_offers() {
        let job = JobConstraints {
            required_gpu_class: Some(GpuClass::Cuda),
            max_price_per_hour: 5.0,
            min_vram_gb: Some(16.0),
            required_gpu_count: 1,
        };
        assert!(!offer(GpuClass::Mps, 1.0, 32.0, 1).matches(&job));
        assert!(!offer(GpuClass::Cuda, 1.0, 8.0, 1).matches(&job));
        assert!(offer(GpuClass::Cuda, 1.0, 24.0, 1).matches(&job));
    }

    #[test]
    fn price_ceiling_is_inclusive() {
        let job = JobConstraints {
            required_gpu_class: None,
            max_price_per_hour: 1.5,
            min_vram_gb: None,
            required_gpu_count: 1,
        };
        assert!(offer(GpuClass::Cuda, 1.5, 8.0, 1).matches(&job));
        assert!(!offer(GpuClass::Cuda, 1.51, 8.0, 1).matches(&job));
    }

    #[test]
    fn offer_validation() {
        assert!(offer(GpuClass::Cuda, 1.0, 24.0, 1).validate().is_ok());
        assert!(offer(GpuClass::Cuda, 0.0, 24.0, 1).validate().is_err());
        assert!(offer(GpuClass::Cuda, 1.0, -1.0, 1).validate().is_err());
        assert!(offer(GpuClass::Cuda, 1.0, 24.0, 0).validate().is_err());
        let mut missing_node = offer(GpuClass::Cuda, 1.0, 24.0, 1);
        missing_node.node_id = "".into();
        assert!(missing_node.validate().is_err());
    }

    #[test]
    fn registration_validation() {
        let node = NewNode {
            seller_address: "0xseller".into(),
            gpu_info: GpuInfo {
                gpu_class: GpuClass::Cuda,
                device_name: "RTX 4090".into(),
                vram_gb: Some(24.0),
                gpu_count: 1,
                compute_capability: Some("8.9".into()),
            },
            price_per_hour: 1.5,
        };
        assert!(node.validate().is_ok());

        let mut free = node.clone();
        free.price_per_hour = 0.0;
        assert!(free.validate().is_err());

        let mut crowded = node.clone();
        crowded.gpu_info.gpu_count = MAX_GPU_COUNT + 1;
        assert!(crowded.validate().is_err());
    }
}
