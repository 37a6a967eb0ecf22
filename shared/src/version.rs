//! API version gate
//!
//! Only the leading (major) component is compared. A declared major greater
//! than the supported one is rejected; minor and patch never are. A missing
//! declared version is rejected as well.

use thiserror::Error;

use crate::task::Command;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("No api version declared (supported: {supported})")]
    Missing { supported: String },

    #[error("Unsupported api version {declared} (supported: {supported})")]
    Unsupported { declared: String, supported: String },

    #[error("Malformed api version '{0}'")]
    Malformed(String),
}

/// Objects that declare the API version they were written against
pub trait Versioned {
    fn api_version(&self) -> Option<&str>;
}

impl Versioned for Command {
    fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }
}

/// Check a declared version string against the supported one
pub fn check_version(declared: Option<&str>, supported: &str) -> Result<(), VersionError> {
    let declared = match declared {
        Some(v) if !v.trim().is_empty() => v,
        _ => {
            return Err(VersionError::Missing {
                supported: supported.to_string(),
            })
        }
    };

    let declared_major = major(declared)?;
    let supported_major = major(supported)?;

    if declared_major > supported_major {
        return Err(VersionError::Unsupported {
            declared: declared.to_string(),
            supported: supported.to_string(),
        });
    }
    Ok(())
}

/// Check any [`Versioned`] object
pub fn check<T: Versioned + ?Sized>(object: &T, supported: &str) -> Result<(), VersionError> {
    check_version(object.api_version(), supported)
}

fn major(version: &str) -> Result<u64, VersionError> {
    version
        .trim()
        .split('.')
        .next()
        .and_then(|m| m.parse::<u64>().ok())
        .ok_or_else(|| VersionError::Malformed(version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_major_rejected() {
        let result = check_version(Some("2.0"), "1.3");
        assert!(matches!(result, Err(VersionError::Unsupported { .. })));
    }

    #[test]
    fn test_higher_minor_accepted() {
        assert!(check_version(Some("1.9"), "1.3").is_ok());
        assert!(check_version(Some("1"), "1.3").is_ok());
        assert!(check_version(Some("0.4.2"), "1.3").is_ok());
    }

    #[test]
    fn test_missing_version_rejected() {
        assert!(matches!(
            check_version(None, "1.3"),
            Err(VersionError::Missing { .. })
        ));
        assert!(check_version(Some(""), "1.3").is_err());
    }

    #[test]
    fn test_malformed_major_rejected() {
        assert!(matches!(
            check_version(Some("v2"), "1.3"),
            Err(VersionError::Malformed(_))
        ));
    }
}
