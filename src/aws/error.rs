//! AWS error classification.
//!
//! Typed categories for AWS SDK failures, extracted from the error code
//! rather than by string-matching the Display output where possible.

use thiserror::Error;

/// AWS error categories the teardown and cleanup paths care about.
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource no longer exists (safe to treat as released)
    #[error("resource not found: {message}")]
    NotFound { message: String },

    /// Any other AWS SDK error, with code and message when available
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidSpotInstanceRequestID.NotFound",
    "InvalidGroup.NotFound",
];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify an `anyhow::Error` by extracting the AWS error code.
///
/// Walks the error chain using `ProvideErrorMetadata` for the operations this
/// crate performs, falling back to scanning the Debug representation.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    use aws_sdk_ec2::error::ProvideErrorMetadata;

    for cause in error.chain() {
        if let Some(e) = cause.downcast_ref::<aws_sdk_ec2::error::SdkError<
            aws_sdk_ec2::operation::terminate_instances::TerminateInstancesError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_ec2::error::SdkError<
            aws_sdk_ec2::operation::cancel_spot_instance_requests::CancelSpotInstanceRequestsError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
        if let Some(e) = cause.downcast_ref::<aws_sdk_ec2::error::SdkError<
            aws_sdk_ec2::operation::describe_instances::DescribeInstancesError,
        >>() {
            let meta = ProvideErrorMetadata::meta(e);
            return classify_aws_error(meta.code(), meta.message());
        }
    }

    // Fallback: extract a known code from the debug representation
    let debug_str = format!("{error:?}");
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(&code), Some(&debug_str));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Extract a known AWS error code from a debug string representation.
fn extract_error_code(debug_str: &str) -> Option<String> {
    for code in NOT_FOUND_CODES {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from a `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_codes_classify() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("gone"));
            assert!(err.is_not_found(), "expected NotFound for {code}");
        }
    }

    #[test]
    fn unknown_codes_fall_through_to_sdk() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { .. }));

        let err = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn extracts_codes_from_debug_strings() {
        let debug = r#"SdkError { code: Some("InvalidInstanceID.NotFound"), message: "gone" }"#;
        assert_eq!(
            extract_error_code(debug).as_deref(),
            Some("InvalidInstanceID.NotFound")
        );

        let debug = r#"SdkError { code: Some("SomethingElse"), message: "x" }"#;
        assert_eq!(extract_error_code(debug).as_deref(), Some("SomethingElse"));

        assert!(extract_error_code("connection refused").is_none());
    }

    #[test]
    fn classifies_anyhow_chain_via_debug_fallback() {
        let err = anyhow::anyhow!("request failed: InvalidSpotInstanceRequestID.NotFound");
        assert!(classify_anyhow_error(&err).is_not_found());
    }
}
