//! Password digests for the authentication methods offered by the server.
use std::num::NonZeroU32;

#[cfg(feature = "_aws-lc-rs")]
use aws_lc_rs::{digest, hmac, pbkdf2};
#[cfg(all(feature = "_ring", not(feature = "_aws-lc-rs")))]
use ring::{digest, hmac, pbkdf2};

use crate::error::{GaussWireError, GaussWireResult};
use crate::messages::startup::{Authentication, Password, Sha256Challenge};

/// Iteration count of the request 11 digest, the server sends none.
pub const MD5_SHA256_ITERATION: i32 = 2048;

const KEY_LENGTH: usize = 32;
// the misspelling is what the server computes
const SERVER_KEY: &[u8] = b"Sever Key";
const CLIENT_KEY: &[u8] = b"Client Key";

/// `md5` followed by `md5hex(md5hex(password + user) + salt)`.
pub fn hash_md5_password(username: &str, password: &str, salt: &[u8]) -> String {
    let credential = format!("{:x}", md5::compute(format!("{password}{username}")));
    let mut bytes = Vec::with_capacity(credential.len() + salt.len());
    bytes.extend_from_slice(credential.as_bytes());
    bytes.extend_from_slice(salt);

    format!("md5{:x}", md5::compute(bytes))
}

struct DerivedKeys {
    client_key: Vec<u8>,
    server_key: Vec<u8>,
    stored_key: Vec<u8>,
}

fn derive_keys(password: &str, random64code: &str, iteration: i32) -> GaussWireResult<DerivedKeys> {
    let salt = hex::decode(random64code).map_err(|_| GaussWireError::InvalidAuthenticationHex)?;
    let iteration = u32::try_from(iteration)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or(GaussWireError::MalformedMessage("authentication iteration"))?;

    let mut k = [0u8; KEY_LENGTH];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA1,
        iteration,
        &salt,
        password.as_bytes(),
        &mut k,
    );

    let client_key = hmac(&k, CLIENT_KEY);
    let server_key = hmac(&k, SERVER_KEY);
    let stored_key = h(&client_key);
    Ok(DerivedKeys {
        client_key,
        server_key,
        stored_key,
    })
}

/// Answer to the RFC5802 style challenge of request 10.
///
/// The proof is `HMAC(StoredKey, token) XOR ClientKey`, hex encoded.
pub fn rfc5802_response(
    password: &str,
    random64code: &str,
    token: &str,
    iteration: i32,
) -> GaussWireResult<String> {
    let keys = derive_keys(password, random64code, iteration)?;
    let token = hex::decode(token).map_err(|_| GaussWireError::InvalidAuthenticationHex)?;

    let signature = hmac(&keys.stored_key, &token);
    Ok(hex::encode(xor(&signature, &keys.client_key)))
}

/// Answer to request 11, an md5 digest over the sha256 derived keys.
///
/// The server keeps the first 16 characters of the md5 hex digest and hex
/// encodes them once more.
pub fn md5_sha256_response(
    password: &str,
    random64code: &str,
    salt: &[u8],
) -> GaussWireResult<String> {
    let keys = derive_keys(password, random64code, MD5_SHA256_ITERATION)?;

    let mut bytes = Vec::with_capacity(random64code.len() + 4 * KEY_LENGTH + salt.len());
    bytes.extend_from_slice(random64code.as_bytes());
    bytes.extend_from_slice(padded_hex(&keys.server_key).as_bytes());
    bytes.extend_from_slice(padded_hex(&keys.stored_key).as_bytes());
    bytes.extend_from_slice(salt);

    let digest = format!("{:x}", md5::compute(bytes));
    Ok(format!("md5{}", hex::encode(&digest.as_bytes()[..16])))
}

/// Hex encoding used by the server for request 11 keys: a byte below 0x10
/// is written as its digit followed by `0`.
fn padded_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| {
            if *b < 0x10 {
                format!("{b:x}0")
            } else {
                format!("{b:x}")
            }
        })
        .collect()
}

fn hmac(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mac = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&mac, msg).as_ref().to_vec()
}

fn h(msg: &[u8]) -> Vec<u8> {
    digest::digest(&digest::SHA256, msg).as_ref().to_vec()
}

fn xor(lhs: &[u8], rhs: &[u8]) -> Vec<u8> {
    lhs.iter().zip(rhs.iter()).map(|(l, r)| l ^ r).collect()
}

/// Compute the password message answering an authentication request.
///
/// Returns `None` when the server accepted the session without a password.
/// A missing password is reported before anything is sent.
pub fn authentication_response(
    request: &Authentication,
    user: &str,
    password: Option<&str>,
) -> GaussWireResult<Option<Password>> {
    let require = |method| password.ok_or(GaussWireError::PasswordRequired(method));

    let response = match request {
        Authentication::Ok => return Ok(None),
        Authentication::CleartextPassword => require("cleartext")?.to_owned(),
        Authentication::MD5Password(salt) => hash_md5_password(user, require("md5")?, salt),
        Authentication::Gss | Authentication::GssContinue(_) => {
            return Err(GaussWireError::GssApiNotSupported);
        }
        Authentication::Sha256(Sha256Challenge::Rfc5802 {
            random64code,
            token,
            iteration,
        }) => rfc5802_response(require("sha256")?, random64code, token, *iteration)?,
        Authentication::Sha256(Sha256Challenge::Md5(salt)) => {
            hash_md5_password(user, require("md5")?, salt)
        }
        Authentication::Sha256(Sha256Challenge::Unsupported(method)) => {
            return Err(GaussWireError::UnsupportedPasswordStoredMethod(*method));
        }
        Authentication::Md5Sha256 { random64code, salt } => {
            md5_sha256_response(require("md5_sha256")?, random64code, salt)?
        }
        other => return Err(GaussWireError::InvalidAuthenticationMessageCode(other.code())),
    };

    Ok(Some(Password::new(response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANDOM64CODE: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_md5() {
        assert_eq!(
            "md521fe459d77d3e3ea9c9fcd5c11030d30",
            hash_md5_password("zmjiang", "themanwhochangedchina", &[20, 247, 107, 249])
        );
        assert_eq!(
            "md5be6a681d105b8085d9090d0e79ad7535",
            hash_md5_password("omm", "Gauss@123", &[1, 2, 3, 4])
        );
    }

    #[test]
    fn test_rfc5802() {
        assert_eq!(
            "52dfc878f52e73bca5a3b1c5a8fe4c4adc31b8d909a26320fd3bd044476adc1f",
            rfc5802_response("Gauss@123", RANDOM64CODE, "a1b2c3d4", 4096).unwrap()
        );
        assert_eq!(
            "df996fdae2a65be0ddd61a3defc9aa35083904ed0cf35115951dfe6ddd7f87c4",
            rfc5802_response("Gauss@123", RANDOM64CODE, "a1b2c3d4", 10000).unwrap()
        );
    }

    #[test]
    fn test_md5_sha256() {
        assert_eq!(
            "md539636538316139343437623530373464",
            md5_sha256_response("Gauss@123", RANDOM64CODE, &[1, 2, 3, 4]).unwrap()
        );
    }

    #[test]
    fn test_padded_hex() {
        assert_eq!("50ab00ff", padded_hex(&[0x05, 0xab, 0x00, 0xff]));
    }

    #[test]
    fn test_invalid_hex() {
        assert!(matches!(
            rfc5802_response("pw", RANDOM64CODE, "zzzzzzzz", 4096),
            Err(GaussWireError::InvalidAuthenticationHex)
        ));
        assert!(rfc5802_response("pw", RANDOM64CODE, "a1b2c3d4", 0).is_err());
    }

    #[test]
    fn test_authentication_response() {
        assert!(
            authentication_response(&Authentication::Ok, "omm", None)
                .unwrap()
                .is_none()
        );

        let resp = authentication_response(&Authentication::CleartextPassword, "omm", Some("pw"))
            .unwrap()
            .unwrap();
        assert_eq!("pw", resp.password);

        assert!(matches!(
            authentication_response(&Authentication::MD5Password([1, 2, 3, 4]), "omm", None),
            Err(GaussWireError::PasswordRequired(_))
        ));
        assert!(matches!(
            authentication_response(&Authentication::Gss, "omm", Some("pw")),
            Err(GaussWireError::GssApiNotSupported)
        ));
        assert!(matches!(
            authentication_response(
                &Authentication::Sha256(Sha256Challenge::Unsupported(9)),
                "omm",
                Some("pw")
            ),
            Err(GaussWireError::UnsupportedPasswordStoredMethod(9))
        ));

        let resp = authentication_response(
            &Authentication::Sha256(Sha256Challenge::Md5([1, 2, 3, 4])),
            "omm",
            Some("Gauss@123"),
        )
        .unwrap()
        .unwrap();
        assert_eq!("md5be6a681d105b8085d9090d0e79ad7535", resp.password);
    }
}
