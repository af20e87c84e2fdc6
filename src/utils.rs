use std::time::Duration;

/// Strips everything but digits, `*` and `#`; a `+` becomes the
/// international dialing prefix.
pub fn canonize_number(number: &str, international_prefix: &str) -> String {
    let mut out = String::with_capacity(number.len());
    for c in number.chars() {
        match c {
            '0'..='9' | '*' | '#' => out.push(c),
            '+' => out.push_str(international_prefix),
            _ => {}
        }
    }
    out
}

/// Masks a phone number for log output, keeping the first two and (for
/// numbers longer than four characters) the last character.
pub fn scramble_number(number: &str) -> String {
    let chars: Vec<char> = number.chars().collect();
    let len = chars.len();
    if len <= 2 {
        return number.to_string();
    }
    let end = if len > 4 { len - 1 } else { len };
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| if (2..end).contains(&i) { 'X' } else { *c })
        .collect()
}

/// `HH:MM:SS` rendering of a call duration.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonize_number() {
        assert_eq!(canonize_number("+49 (30) 123-456", "00"), "004930123456");
        assert_eq!(canonize_number("**610", "00"), "**610");
        assert_eq!(canonize_number("#31#0891234", "00"), "#31#0891234");
        assert_eq!(canonize_number("abc", "00"), "");
    }

    #[test]
    fn test_scramble_number() {
        assert_eq!(scramble_number("0891234"), "08XXXX4");
        assert_eq!(scramble_number("0891"), "08XX");
        assert_eq!(scramble_number("08"), "08");
        assert_eq!(scramble_number(""), "");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }
}
