pub type VignetteResult<T> = Result<T, VignetteError>;

#[derive(thiserror::Error, Debug)]
pub enum VignetteError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("repair exhausted: {0}")]
    RepairExhausted(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("load error: {0}")]
    Load(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VignetteError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn repair_exhausted(msg: impl Into<String>) -> Self {
        Self::RepairExhausted(msg.into())
    }

    pub fn circuit_open(msg: impl Into<String>) -> Self {
        Self::CircuitOpen(msg.into())
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            VignetteError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            VignetteError::repair_exhausted("x")
                .to_string()
                .contains("repair exhausted:")
        );
        assert!(
            VignetteError::circuit_open("x")
                .to_string()
                .contains("circuit open:")
        );
        assert!(
            VignetteError::compile("x")
                .to_string()
                .contains("compile error:")
        );
        assert!(
            VignetteError::evaluation("x")
                .to_string()
                .contains("evaluation error:")
        );
        assert!(VignetteError::load("x").to_string().contains("load error:"));
        assert!(
            VignetteError::sandbox("x")
                .to_string()
                .contains("sandbox error:")
        );
        assert!(
            VignetteError::serde("x")
                .to_string()
                .contains("serialization error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = VignetteError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
