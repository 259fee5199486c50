//! Session id generation.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// Number of random bytes behind each session id.
const ID_BYTES: usize = 32;

/// Generate an unguessable session id.
///
/// 256 bits from the thread-local CSPRNG, URL-safe base64 without padding.
/// The alphabet never contains `|`, so ids are safe inside record keys and
/// the `||`-delimited wire format.
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
