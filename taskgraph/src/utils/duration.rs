//! Duration text such as `"250ms"`, `"1.5s"` or `"1h30m"`.

use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

/// Parses a duration made of one or more `<number><unit>` terms.
///
/// Numbers may carry a fractional part. Units are `ns`, `us` (or `µs`),
/// `ms`, `s`, `m` and `h`. The bare string `"0"` is accepted; negative
/// durations are not.
///
/// # Errors
///
/// Returns a description of the problem if the text is not a valid duration.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let body = s.strip_prefix('+').unwrap_or(s);
    if body.is_empty() {
        return Err("empty duration string".to_string());
    }
    if body.starts_with('-') {
        return Err(format!("negative duration '{s}'"));
    }
    if body == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = body;

    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_num) = match after_int.strip_prefix('.') {
            Some(after_dot) => {
                let frac_len = after_dot
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_dot.len());
                after_dot.split_at(frac_len)
            }
            None => ("", after_int),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("invalid duration '{s}'"));
        }

        let unit_len = after_num
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_num.len());
        let (unit, next) = after_num.split_at(unit_len);
        if unit.is_empty() {
            return Err(format!("missing unit in duration '{s}'"));
        }
        let scale =
            unit_nanos(unit).ok_or_else(|| format!("unknown unit '{unit}' in duration '{s}'"))?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| format!("invalid duration '{s}'"))?
        };
        total = whole
            .checked_mul(scale)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("duration '{s}' overflows"))?;

        // Digits past nanosecond resolution cannot contribute.
        let frac_digits = &frac_part[..frac_part.len().min(18)];
        if !frac_digits.is_empty() {
            let frac: u128 = frac_digits
                .parse()
                .map_err(|_| format!("invalid duration '{s}'"))?;
            let divisor = 10u128.pow(u32::try_from(frac_digits.len()).unwrap_or(18));
            total = total
                .checked_add(frac * scale / divisor)
                .ok_or_else(|| format!("duration '{s}' overflows"))?;
        }

        rest = next;
    }

    let nanos = u64::try_from(total).map_err(|_| format!("duration '{s}' overflows"))?;
    Ok(Duration::from_nanos(nanos))
}
