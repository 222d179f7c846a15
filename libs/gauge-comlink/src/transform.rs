//! Per-rule value transforms
//!
//! A transform maps the decoded source scalar to the value written to the
//! destination: identity, linear scale/offset, or the expression/lookup
//! stubs, followed by an optional range clamp.

use serde::{Deserialize, Serialize};

/// Transform operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransformOp {
    /// Pass the input through unchanged
    #[default]
    None,
    /// `output = input * scale + offset`
    Scale,
    /// Expression hook; currently behaves as `Scale`
    Expression,
    /// Table lookup hook; currently behaves as identity
    Lookup,
}

/// Transform applied between decode and destination write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub operation: TransformOp,
    /// Scale factor for linear transformation
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Offset for linear transformation
    #[serde(default)]
    pub offset: f64,
    /// Lower clamp bound
    #[serde(default)]
    pub min_value: f64,
    /// Upper clamp bound
    #[serde(default)]
    pub max_value: f64,
    /// Whether the clamp bounds are applied
    #[serde(default)]
    pub clamp_enabled: bool,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            operation: TransformOp::None,
            scale: 1.0,
            offset: 0.0,
            min_value: 0.0,
            max_value: 0.0,
            clamp_enabled: false,
        }
    }
}

impl Transform {
    /// Apply the transform to an input scalar
    pub fn apply(&self, input: f64) -> f64 {
        let output = match self.operation {
            TransformOp::None => input,
            TransformOp::Scale => input * self.scale + self.offset,
            // Expression engine hook; behaves as linear scaling for now
            TransformOp::Expression => input * self.scale + self.offset,
            // Lookup table hook; identity for now
            TransformOp::Lookup => input,
        };

        if self.clamp_enabled {
            output.clamp(self.min_value, self.max_value)
        } else {
            output
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_identity() {
        let t = Transform::default();
        assert_eq!(t.apply(13.7), 13.7);
        assert_eq!(t.apply(-2.0), -2.0);
    }

    #[test]
    fn test_unit_scale_is_identity() {
        let t = Transform {
            operation: TransformOp::Scale,
            scale: 1.0,
            offset: 0.0,
            ..Default::default()
        };
        assert_eq!(t.apply(42.5), 42.5);
    }

    #[test]
    fn test_scale_and_offset() {
        let t = Transform {
            operation: TransformOp::Scale,
            scale: 10.0,
            offset: -3.0,
            ..Default::default()
        };
        assert_eq!(t.apply(1.5), 12.0);
    }

    #[test]
    fn test_clamp_bounds() {
        let t = Transform {
            operation: TransformOp::Scale,
            scale: 100.0,
            offset: 0.0,
            min_value: 0.0,
            max_value: 50.0,
            clamp_enabled: true,
        };
        assert_eq!(t.apply(1.0), 50.0);
        assert_eq!(t.apply(-1.0), 0.0);
        assert_eq!(t.apply(0.25), 25.0);
    }

    #[test]
    fn test_expression_stub_behaves_as_scale() {
        let t = Transform {
            operation: TransformOp::Expression,
            scale: 2.0,
            offset: 1.0,
            ..Default::default()
        };
        assert_eq!(t.apply(3.0), 7.0);
    }

    #[test]
    fn test_lookup_stub_is_identity() {
        let t = Transform {
            operation: TransformOp::Lookup,
            scale: 99.0,
            ..Default::default()
        };
        assert_eq!(t.apply(4.0), 4.0);
    }

    #[test]
    fn test_serde_defaults() {
        let t: Transform = serde_json::from_str("{}").unwrap();
        assert_eq!(t.operation, TransformOp::None);
        assert_eq!(t.scale, 1.0);
        assert_eq!(t.offset, 0.0);
        assert!(!t.clamp_enabled);
    }
}
