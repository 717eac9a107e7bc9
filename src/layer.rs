//! Layer specifications.
//!
//! The source tool keyed layer kind off a bare string (`lay['type']`).
//! Modeled here as a tagged variant carrying kind-specific parameters, so
//! an unknown kind is rejected once at load time instead of propagating a
//! string comparison through the rest of the pipeline.

use crate::error::SimError;

/// Transform order and sparsity keep-fraction for a transform-domain layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformParams {
    pub mu: u64,
    pub rho: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LayerKind {
    Conv,
    RFConv(TransformParams),
    RFDeConv(TransformParams),
    DfConv,
}

impl LayerKind {
    pub fn from_str(kind: &str, cfg: &crate::config::SimConfig) -> Result<Self, SimError> {
        match kind {
            "Conv" | "DeConv" => Ok(LayerKind::Conv),
            "RFConv" => Ok(LayerKind::RFConv(TransformParams {
                mu: cfg.mu_c,
                rho: cfg.rho_c,
            })),
            "RFDeConv" => Ok(LayerKind::RFDeConv(TransformParams {
                mu: cfg.mu_d,
                rho: cfg.rho_d,
            })),
            "DfConv" => Ok(LayerKind::DfConv),
            other => Err(SimError::Config(format!("unknown layer kind: {other}"))),
        }
    }

    pub fn is_transform_domain(&self) -> bool {
        matches!(self, LayerKind::RFConv(_) | LayerKind::RFDeConv(_))
    }
}

/// Immutable layer metadata, fixed after model load.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
    pub c_in: usize,
    pub c_out: usize,
    pub kernel: usize,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, kind: LayerKind, c_in: usize, c_out: usize, kernel: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            c_in,
            c_out,
            kernel,
        }
    }
}

/// The default RepVCN-style layer pipeline used by both the mock mask
/// generator and `simulate` when no external layer file is supplied.
/// Grounded in `original_source/Sim/vcnpu.py::build_repvcn_layers`.
pub fn build_default_layers(channels: usize, cfg: &crate::config::SimConfig) -> Vec<LayerSpec> {
    let rf_c = TransformParams {
        mu: cfg.mu_c,
        rho: cfg.rho_c,
    };
    let rf_d = TransformParams {
        mu: cfg.mu_d,
        rho: cfg.rho_d,
    };
    vec![
        LayerSpec::new("FE_Conv1", LayerKind::Conv, 3, channels, 3),
        LayerSpec::new("FE_Conv2", LayerKind::Conv, channels, channels, 3),
        LayerSpec::new("RFConv0", LayerKind::RFConv(rf_c), channels, channels, 3),
        LayerSpec::new("RFConv1", LayerKind::RFConv(rf_c), channels, channels, 3),
        LayerSpec::new("RFDeConv0", LayerKind::RFDeConv(rf_d), channels, channels, 4),
        LayerSpec::new("DfConv_comp", LayerKind::DfConv, channels, channels, 3),
        LayerSpec::new("RFConv2", LayerKind::RFConv(rf_c), channels, channels, 3),
        LayerSpec::new("RFConv3", LayerKind::RFConv(rf_c), channels, channels, 3),
        LayerSpec::new("RFDeConv1", LayerKind::RFDeConv(rf_d), channels, channels, 4),
        LayerSpec::new("Recon_Conv", LayerKind::Conv, channels, 3, 3),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_rejected() {
        let cfg = crate::config::SimConfig::default();
        assert!(LayerKind::from_str("Bogus", &cfg).is_err());
    }

    #[test]
    fn rf_kinds_carry_the_configured_transform_params() {
        let cfg = crate::config::SimConfig::default();
        let k = LayerKind::from_str("RFConv", &cfg).unwrap();
        assert_eq!(k, LayerKind::RFConv(TransformParams { mu: 4, rho: 0.375 }));
        let k = LayerKind::from_str("RFDeConv", &cfg).unwrap();
        assert_eq!(k, LayerKind::RFDeConv(TransformParams { mu: 6, rho: 0.50 }));
    }

    #[test]
    fn default_layers_preserve_order_and_count() {
        let cfg = crate::config::SimConfig::default();
        let layers = build_default_layers(36, &cfg);
        assert_eq!(layers.len(), 10);
        assert_eq!(layers[0].name, "FE_Conv1");
        assert_eq!(layers.last().unwrap().name, "Recon_Conv");
    }
}
