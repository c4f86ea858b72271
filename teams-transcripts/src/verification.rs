use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TAG_MESSAGE: &[u8] = b"graph-client-state";

/// Fresh secret for a registration. Graph caps clientState at 128 chars.
pub fn generate_client_state() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Check the clientState Graph echoed back against the registration's secret.
///
/// Comparison is constant-time: both values key an HMAC over a fixed message
/// and the tags are compared with `verify_slice`.
pub fn client_state_matches(expected: &str, presented: &str) -> bool {
    let expected_tag = match HmacSha256::new_from_slice(expected.as_bytes()) {
        Ok(mut mac) => {
            mac.update(TAG_MESSAGE);
            mac.finalize().into_bytes()
        }
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(presented.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(TAG_MESSAGE);
    mac.verify_slice(&expected_tag).is_ok()
}
