use thiserror::Error;

/// Errors raised while validating configuration at construction time.
///
/// Steady-state operations never return these; a pipeline that was constructed
/// successfully runs every frame to completion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A thread dispatcher needs at least one worker.
    #[error("thread count must be at least 1")]
    ZeroThreadCount,
    /// A capacity that sizes an allocation was zero.
    #[error("{name} must be positive")]
    ZeroCapacity {
        /// Name of the offending setting.
        name: &'static str,
    },
    /// A growth multiplier was below 1 or not finite.
    #[error("{name} must be a finite multiplier of at least 1, got {value}")]
    InvalidMultiplier {
        /// Name of the offending setting.
        name: &'static str,
        /// Value that was supplied.
        value: f32,
    },
    /// A scale factor was negative or not finite.
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidScale {
        /// Name of the offending setting.
        name: &'static str,
        /// Value that was supplied.
        value: f32,
    },
}

/// Checks that a capacity setting is nonzero.
pub(crate) fn require_capacity(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ZeroCapacity { name });
    }
    Ok(())
}

/// Checks that a growth multiplier is finite and at least 1.
pub(crate) fn require_multiplier(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 1.0 {
        return Err(ConfigError::InvalidMultiplier { name, value });
    }
    Ok(())
}

/// Checks that a scale factor is finite and non-negative.
pub(crate) fn require_scale(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidScale { name, value });
    }
    Ok(())
}
