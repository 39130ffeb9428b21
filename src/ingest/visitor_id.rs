use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::IpAddr;

type HmacSha256 = Hmac<Sha256>;

/// Zero the host part of a client address before it is hashed.
///
/// IPv4 loses its last octet, IPv6 its last 80 bits. Input that is not an IP
/// address is returned unchanged.
pub fn anonymize_ip(ip: &str) -> String {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.0")
        }
        Ok(IpAddr::V6(v6)) => {
            let mut segments = v6.segments();
            for segment in &mut segments[3..] {
                *segment = 0;
            }
            std::net::Ipv6Addr::from(segments).to_string()
        }
        Err(_) => ip.to_string(),
    }
}

/// Derives a visitor ID as HMAC-SHA256(anonymized IP || UA, daily_salt).
///
/// Used when the tracking snippet did not supply its own visitor id. The
/// result is stable for one client within a day and rotates with the salt.
/// The raw address is never stored.
pub fn generate_visitor_id(ip: &str, user_agent: &str, daily_salt: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(daily_salt.as_bytes()).expect("HMAC accepts any key length");
    mac.update(anonymize_ip(ip).as_bytes());
    mac.update(b"|");
    mac.update(user_agent.as_bytes());
    let result = mac.finalize();
    hex::encode(result.into_bytes())
}

/// Generates the daily salt for a given date from the configured secret.
pub fn daily_salt(secret: &str, date: chrono::NaiveDate) -> String {
    let input = format!("{secret}:{date}");
    let mut mac =
        HmacSha256::new_from_slice(b"sitepulse-salt").expect("HMAC accepts any key length");
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
