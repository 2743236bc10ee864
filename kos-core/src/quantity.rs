//! Shared CPU/memory quantity parsing, per the design note in spec section 9:
//! one parser/formatter for both grammars, routed through by admission,
//! quota accounting, and HPA.

use crate::error::Error;

/// CPU is tracked internally in millicores (`1000m == 1 core`) so all
/// arithmetic stays integral.
pub fn parse_cpu(raw: &str) -> Result<i64, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Invalid("empty cpu quantity".into()));
    }
    if let Some(stripped) = raw.strip_suffix('m') {
        let millis: i64 = stripped
            .parse()
            .map_err(|_| Error::Invalid(format!("invalid millicore cpu quantity: {raw}")))?;
        return Ok(millis);
    }
    let cores: f64 = raw
        .parse()
        .map_err(|_| Error::Invalid(format!("invalid cpu quantity: {raw}")))?;
    if !cores.is_finite() {
        return Err(Error::Invalid(format!("invalid cpu quantity: {raw}")));
    }
    Ok((cores * 1000.0).round() as i64)
}

pub fn format_cpu(millis: i64) -> String {
    if millis % 1000 == 0 {
        format!("{}", millis / 1000)
    } else {
        format!("{millis}m")
    }
}

const IEC_UNITS: &[(&str, i64)] = &[
    ("Ki", 1024),
    ("Mi", 1024 * 1024),
    ("Gi", 1024 * 1024 * 1024),
    ("Ti", 1024 * 1024 * 1024 * 1024),
    ("Pi", 1024 * 1024 * 1024 * 1024 * 1024),
];

/// Memory is tracked internally in bytes.
pub fn parse_memory(raw: &str) -> Result<i64, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Invalid("empty memory quantity".into()));
    }
    for (suffix, multiplier) in IEC_UNITS {
        if let Some(stripped) = raw.strip_suffix(suffix) {
            let value: i64 = stripped
                .trim()
                .parse()
                .map_err(|_| Error::Invalid(format!("invalid memory quantity: {raw}")))?;
            return Ok(value * multiplier);
        }
    }
    raw.parse()
        .map_err(|_| Error::Invalid(format!("invalid memory quantity: {raw}")))
}

/// Formats bytes back using the largest IEC unit that divides evenly, per
/// the quota controller's emission rule.
pub fn format_memory(bytes: i64) -> String {
    for (suffix, multiplier) in IEC_UNITS.iter().rev() {
        if bytes != 0 && bytes % multiplier == 0 {
            return format!("{}{}", bytes / multiplier, suffix);
        }
    }
    bytes.to_string()
}

/// Rejects non-positive or unparsable quantities, as `PodResources` and
/// `PVCSize` admission rules require.
pub fn require_positive_cpu(raw: &str) -> Result<i64, Error> {
    let millis = parse_cpu(raw)?;
    if millis <= 0 {
        return Err(Error::Invalid(format!("cpu quantity must be positive: {raw}")));
    }
    Ok(millis)
}

pub fn require_positive_memory(raw: &str) -> Result<i64, Error> {
    let bytes = parse_memory(raw)?;
    if bytes <= 0 {
        return Err(Error::Invalid(format!("memory quantity must be positive: {raw}")));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_millicores() {
        assert_eq!(parse_cpu("100m").unwrap(), 100);
        assert_eq!(parse_cpu("1500m").unwrap(), 1500);
    }

    #[test]
    fn cpu_decimal_cores() {
        assert_eq!(parse_cpu("1").unwrap(), 1000);
        assert_eq!(parse_cpu("0.5").unwrap(), 500);
        assert_eq!(parse_cpu("2.5").unwrap(), 2500);
    }

    #[test]
    fn cpu_rejects_garbage() {
        assert!(parse_cpu("abc").is_err());
        assert!(parse_cpu("").is_err());
    }

    #[test]
    fn memory_iec_units() {
        assert_eq!(parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(parse_memory("2Mi").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_memory("1Gi").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn memory_plain_bytes() {
        assert_eq!(parse_memory("4096").unwrap(), 4096);
    }

    #[test]
    fn memory_formats_largest_evenly_dividing_unit() {
        assert_eq!(format_memory(2 * 1024 * 1024), "2Mi");
        assert_eq!(format_memory(1536), "1536");
        assert_eq!(format_memory(1024), "1Ki");
    }

    #[test]
    fn positive_checks_reject_zero_and_negative() {
        assert!(require_positive_cpu("0").is_err());
        assert!(require_positive_cpu("-100m").is_err());
        assert!(require_positive_memory("0Mi").is_err());
    }
}
