use std::net::IpAddr;
use std::ops::RangeInclusive;

/// Validates if a given u16 value is a valid port number.
/// By type, the port is already within the 0-65535 range.
/// This function checks that the port is not 0, which is reserved.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Validates if a given string is a usable instrument host: either an IP
/// address or a non-empty hostname without whitespace.
pub fn is_valid_host(host: &str) -> Result<(), &'static str> {
    if host.is_empty() {
        return Err("Host cannot be empty");
    }
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if host.chars().any(char::is_whitespace) {
        return Err("Host cannot contain whitespace");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}
