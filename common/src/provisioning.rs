use thiserror::Error;

use crate::config::WifiCredentials;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("missing form field `{0}`")]
    MissingField(&'static str),
}

/// Parse the provisioning form body (`application/x-www-form-urlencoded`).
///
/// Tolerates duplicate and unknown fields (first occurrence wins). A
/// missing or empty `ssid` or `password` is a named error so the server can
/// reject the submission without persisting partial credentials.
pub fn parse_credentials_form(body: &str) -> Result<WifiCredentials, FormError> {
    let mut ssid: Option<String> = None;
    let mut password: Option<String> = None;

    for pair in body.split('&') {
        let (name, value) = match pair.split_once('=') {
            Some(split) => split,
            None => (pair, ""),
        };

        match name {
            "ssid" if ssid.is_none() => ssid = Some(decode_component(value)),
            "password" if password.is_none() => password = Some(decode_component(value)),
            _ => {}
        }
    }

    let ssid = ssid
        .filter(|value| !value.is_empty())
        .ok_or(FormError::MissingField("ssid"))?;
    let password = password
        .filter(|value| !value.is_empty())
        .ok_or(FormError::MissingField("password"))?;

    Ok(WifiCredentials { ssid, password })
}

/// Decode one form component: `+` is a space, `%XX` a byte. Invalid escapes
/// pass through untouched instead of failing the whole submission.
fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|value| value as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_submission() {
        let credentials = parse_credentials_form("ssid=Lab1&password=secret123").unwrap();
        assert_eq!(credentials.ssid, "Lab1");
        assert_eq!(credentials.password, "secret123");
    }

    #[test]
    fn decodes_escapes_and_spaces() {
        let credentials =
            parse_credentials_form("ssid=Physics+Lab+2&password=p%40ss%26word%3D1").unwrap();
        assert_eq!(credentials.ssid, "Physics Lab 2");
        assert_eq!(credentials.password, "p@ss&word=1");
    }

    #[test]
    fn missing_password_is_a_named_error() {
        assert_eq!(
            parse_credentials_form("ssid=Lab1"),
            Err(FormError::MissingField("password"))
        );
    }

    #[test]
    fn empty_field_counts_as_missing() {
        assert_eq!(
            parse_credentials_form("ssid=Lab1&password="),
            Err(FormError::MissingField("password"))
        );
        assert_eq!(
            parse_credentials_form("ssid=&password=secret123"),
            Err(FormError::MissingField("ssid"))
        );
    }

    #[test]
    fn duplicate_fields_keep_the_first_value() {
        let credentials =
            parse_credentials_form("ssid=Lab1&ssid=Lab2&password=secret123").unwrap();
        assert_eq!(credentials.ssid, "Lab1");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let credentials =
            parse_credentials_form("submit=Save&ssid=Lab1&password=secret123&x=y").unwrap();
        assert_eq!(credentials.ssid, "Lab1");
        assert_eq!(credentials.password, "secret123");
    }

    #[test]
    fn truncated_escape_passes_through() {
        let credentials = parse_credentials_form("ssid=Lab%2&password=ok%zzhere").unwrap();
        assert_eq!(credentials.ssid, "Lab%2");
        assert_eq!(credentials.password, "ok%zzhere");
    }
}
