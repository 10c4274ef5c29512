//! Confidence normalization.
//!
//! LLM outputs report confidence as `"85%"`, `"85"`, `0.85` or `85`. Every
//! stored confidence is a unit-interval `f32`.

use serde_json::Value;

use super::MappingError;

/// Parse a JSON confidence value into [0, 1].
///
/// Strings are read on the percentage scale. Numbers in [0, 1] are taken
/// as-is and numbers in (1, 100] as percentages. Anything else fails and the
/// caller picks the default.
pub fn parse_confidence(value: &Value) -> Result<f32, MappingError> {
    match value {
        Value::String(s) => parse_confidence_str(s),
        Value::Number(n) => {
            let raw = n
                .as_f64()
                .ok_or_else(|| MappingError::InvalidConfidence(n.to_string()))?;
            normalize_number(raw).ok_or_else(|| MappingError::InvalidConfidence(n.to_string()))
        }
        other => Err(MappingError::InvalidConfidence(other.to_string())),
    }
}

/// Parse a percentage string (`"85%"`, `" 85 "`) into [0, 1].
pub fn parse_confidence_str(raw: &str) -> Result<f32, MappingError> {
    let cleaned = raw.trim().trim_end_matches('%').trim();
    let pct: f64 = cleaned
        .parse()
        .map_err(|_| MappingError::InvalidConfidence(raw.to_string()))?;
    if !pct.is_finite() || pct < 0.0 {
        return Err(MappingError::InvalidConfidence(raw.to_string()));
    }
    Ok(clamp_unit(pct / 100.0))
}

/// Parse, substituting `default` on failure.
pub fn parse_confidence_or(value: Option<&Value>, default: f32) -> f32 {
    match value.map(parse_confidence) {
        Some(Ok(c)) => c,
        Some(Err(e)) => {
            tracing::warn!(error = %e, default, "Unparseable confidence, using default");
            default
        }
        None => default,
    }
}

fn normalize_number(raw: f64) -> Option<f32> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    if raw <= 1.0 {
        Some(raw as f32)
    } else {
        Some(clamp_unit(raw / 100.0))
    }
}

fn clamp_unit(v: f64) -> f32 {
    v.clamp(0.0, 1.0) as f32
}
