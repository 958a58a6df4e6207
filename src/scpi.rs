//! Helpers for parsing textual replies from SCPI-style instruments.

use regex::Regex;

use crate::Error;

lazy_static! {
    static ref DECIMAL: Regex = Regex::new(r"\d+\.\d+").expect("invalid decimal pattern");
}

/// Extract the first decimal number from a reply.
///
/// Instruments embed measurements amid units and termination characters, e.g.
/// `"15.40K\r\n"`. A reply without a `<digits>.<digits>` substring is a
/// protocol error, never a zero reading.
pub fn extract_decimal(reply: &str) -> crate::Result<f64> {
    let found = DECIMAL
        .find(reply)
        .ok_or_else(|| Error::MalformedReply(reply.to_string()))?;
    found
        .as_str()
        .parse::<f64>()
        .map_err(|_| Error::MalformedReply(reply.to_string()))
}
