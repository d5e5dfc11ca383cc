//! Evidence handling for the two approval protocols.

use uuid::Uuid;

use crate::models::timesheet::{Signature, SignatureApprovalRequest};

use super::machine::TransitionError;

/// Mint the opaque single-use token bound to a freshly created timesheet.
/// The token is the only thing the rendered QR code carries.
pub fn issue_scan_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Validate a signature payload and produce the stored evidence.
///
/// Signer name must be non-empty after trimming and the canvas capture must
/// contain strokes; the signer role is already a closed enum by the time it
/// reaches us. The whole payload is rejected before any mutation happens.
pub fn validate_signature(request: &SignatureApprovalRequest) -> Result<Signature, TransitionError> {
    let signer_name = request.signer_name.trim();
    if signer_name.is_empty() {
        return Err(TransitionError::SignerNameRequired);
    }
    if request.image_data.trim().is_empty() {
        return Err(TransitionError::SignatureEmpty);
    }
    Ok(Signature {
        image_data: request.image_data.clone(),
        signer_name: signer_name.to_string(),
        signer_role: request.signer_role,
        download_url: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::timesheet::SignerRole;

    fn request(name: &str, image: &str) -> SignatureApprovalRequest {
        SignatureApprovalRequest {
            signer_name: name.to_string(),
            signer_role: SignerRole::SeniorCarer,
            image_data: image.to_string(),
        }
    }

    #[test]
    fn trims_signer_name() {
        let signature = validate_signature(&request("  Grace Hopper  ", "iVBORw0KGgo=")).unwrap();
        assert_eq!(signature.signer_name, "Grace Hopper");
        assert!(signature.download_url.is_none());
    }

    #[test]
    fn rejects_blank_name_and_empty_capture() {
        assert_eq!(
            validate_signature(&request("   ", "iVBORw0KGgo=")),
            Err(TransitionError::SignerNameRequired)
        );
        assert_eq!(
            validate_signature(&request("Grace", "")),
            Err(TransitionError::SignatureEmpty)
        );
    }

    #[test]
    fn scan_tokens_are_unique_and_opaque() {
        let a = issue_scan_token();
        let b = issue_scan_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }
}
