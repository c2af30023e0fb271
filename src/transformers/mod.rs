//! Conv fusion rules
//!
//! - [`FuseConvBN`]: fold BatchNormalization into the preceding Conv
//! - [`FuseConvMul`]: fold a per-channel or scalar Mul into the Conv weight
//! - [`FuseConvAdd`]: fold a per-channel or scalar Add into the Conv bias
//!
//! # Example
//!
//! ```ignore
//! use onnx_fuse::transformers::conv_fusion_transformer;
//!
//! let (optimized, stats) = conv_fusion_transformer().apply_to_model(&model)?;
//! println!("fused {} pairs", stats.rules_applied);
//! ```

/// Shared matching and initializer helpers
pub mod common;
/// Fuse Conv + Add
pub mod fuse_conv_add;
/// Fuse Conv + BN
pub mod fuse_conv_bn;
/// Fuse Conv + Mul
pub mod fuse_conv_mul;

pub use fuse_conv_add::FuseConvAdd;
pub use fuse_conv_bn::FuseConvBN;
pub use fuse_conv_mul::FuseConvMul;

use crate::traits::RewriteRule;
use crate::transform::{RuleBasedGraphTransformer, TransformConfig};

/// All Conv fusion rules, BatchNormalization first
pub fn conv_fusion_rules() -> Vec<Box<dyn RewriteRule>> {
    vec![
        Box::new(FuseConvBN::new()),
        Box::new(FuseConvMul::new()),
        Box::new(FuseConvAdd::new()),
    ]
}

/// Transformer running every Conv fusion rule with the default config
pub fn conv_fusion_transformer() -> RuleBasedGraphTransformer {
    conv_fusion_transformer_with_config(TransformConfig::default())
}

/// Transformer running every Conv fusion rule
pub fn conv_fusion_transformer_with_config(config: TransformConfig) -> RuleBasedGraphTransformer {
    let mut transformer = RuleBasedGraphTransformer::new("ConvFusion").with_config(config);
    for rule in conv_fusion_rules() {
        transformer.register(rule);
    }
    transformer
}
