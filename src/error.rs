use crate::sift::analysis::AnalysisError;
use crate::sift::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiftError {
    #[error("another cycle holds the lock: {0}")]
    Locked(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("state file unreadable: {0}")]
    StateCorrupt(String),
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("analyzer unavailable: {0}")]
    Analyzer(#[from] AnalysisError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiftErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E003StateCorrupt,
    E004StoreUnavailable,
    E005AnalyzerUnavailable,
}

impl SiftErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003StateCorrupt => "E003_STATE_CORRUPT",
            Self::E004StoreUnavailable => "E004_STORE_UNAVAILABLE",
            Self::E005AnalyzerUnavailable => "E005_ANALYZER_UNAVAILABLE",
        }
    }
}

impl SiftError {
    pub fn code(&self) -> SiftErrorCode {
        match self {
            Self::Locked(_) => SiftErrorCode::E001Locked,
            Self::InvalidConfig(_) => SiftErrorCode::E002ConfigInvalid,
            Self::StateCorrupt(_) => SiftErrorCode::E003StateCorrupt,
            Self::Store(_) => SiftErrorCode::E004StoreUnavailable,
            Self::Analyzer(_) => SiftErrorCode::E005AnalyzerUnavailable,
        }
    }
}

/// Render an error for a command report, prefixed with its stable code
/// when it carries one.
pub fn describe(err: &anyhow::Error) -> String {
    match err.chain().find_map(|cause| cause.downcast_ref::<SiftError>()) {
        Some(sift) => format!("{}: {err:#}", sift.code().as_str()),
        None => format!("{err:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_prefixes_known_codes() {
        let err: anyhow::Error = SiftError::Locked("/tmp/cycle.lock".into()).into();
        assert_eq!(
            describe(&err),
            "E001_LOCKED: another cycle holds the lock: /tmp/cycle.lock"
        );

        let wrapped = anyhow::Error::from(SiftError::InvalidConfig("bad".into()))
            .context("watch failed");
        assert!(describe(&wrapped).starts_with("E002_CONFIG_INVALID: watch failed"));

        let plain = anyhow::anyhow!("disk full");
        assert_eq!(describe(&plain), "disk full");
    }
}
