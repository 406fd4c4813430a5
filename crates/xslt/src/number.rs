//! `xsl:number` formatting.
//!
//! A format string is split into alphanumeric tokens and the punctuation around
//! them. Each number is rendered with its token; numbers beyond the last token reuse
//! it, joined by the last separator seen (or `.` when the format has only one token).

use crate::value::format_number;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// `1`, `01`, `001`...: decimal, zero-padded to the token's width.
    Decimal(usize),
    LowerAlpha,
    UpperAlpha,
    LowerRoman,
    UpperRoman,
}

impl Token {
    fn parse(token: &str) -> Self {
        match token {
            "a" => Token::LowerAlpha,
            "A" => Token::UpperAlpha,
            "i" => Token::LowerRoman,
            "I" => Token::UpperRoman,
            digits if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
                if digits.trim_start_matches('0') == "1" {
                    Token::Decimal(digits.len())
                } else {
                    Token::Decimal(1)
                }
            }
            _ => Token::Decimal(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Format {
    prefix: String,
    /// Each token with the separator that precedes it (empty for the first).
    tokens: Vec<(String, Token)>,
    suffix: String,
}

impl Format {
    fn parse(format: &str) -> Self {
        let mut prefix = String::new();
        let mut tokens = Vec::new();
        let mut pending = String::new();
        let mut chars = format.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if !c.is_alphanumeric() {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                if tokens.is_empty() {
                    prefix = std::mem::take(&mut pending);
                }
                tokens.push((std::mem::take(&mut pending), Token::parse(&token)));
            } else {
                pending.push(c);
                chars.next();
            }
        }
        if tokens.is_empty() {
            tokens.push((String::new(), Token::Decimal(1)));
        }
        Self {
            prefix,
            tokens,
            suffix: pending,
        }
    }
}

/// Formats `numbers` (the counted positions, outermost first) with `format`.
pub fn format_numbers(numbers: &[usize], format: &str, grouping: Option<(char, usize)>) -> String {
    let format = Format::parse(format);
    let mut out = format.prefix.clone();
    let last = format.tokens.len() - 1;
    for (index, &number) in numbers.iter().enumerate() {
        let (separator, token) = match format.tokens.get(index) {
            Some((separator, token)) => (separator.as_str(), token),
            None => {
                let (separator, token) = &format.tokens[last];
                let separator = if last == 0 { "." } else { separator.as_str() };
                (separator, token)
            }
        };
        if index > 0 {
            out.push_str(separator);
        }
        out.push_str(&format_one(number, token, grouping));
    }
    out.push_str(&format.suffix);
    out
}

/// Formats the `value` form of `xsl:number`: the number is rounded to an integer
/// first; values with no positive integer form are written as plain numbers.
pub fn format_value(value: f64, format: &str, grouping: Option<(char, usize)>) -> String {
    if value.is_nan() || value.is_infinite() || value < 0.5 {
        return format_number(value);
    }
    let rounded = value.round();
    if rounded > usize::MAX as f64 {
        return format_number(rounded);
    }
    format_numbers(&[rounded as usize], format, grouping)
}

fn format_one(number: usize, token: &Token, grouping: Option<(char, usize)>) -> String {
    match token {
        Token::Decimal(width) => group(&format!("{:0width$}", number, width = *width), grouping),
        Token::LowerAlpha => alphabetic(number, b'a'),
        Token::UpperAlpha => alphabetic(number, b'A'),
        Token::LowerRoman => roman(number).map_or_else(|| number.to_string(), |r| r.to_lowercase()),
        Token::UpperRoman => roman(number).unwrap_or_else(|| number.to_string()),
    }
}

fn group(digits: &str, grouping: Option<(char, usize)>) -> String {
    let Some((separator, size)) = grouping.filter(|(_, size)| *size > 0) else {
        return digits.to_string();
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / size);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % size == 0 {
            out.push(separator);
        }
        out.push(digit);
    }
    out
}

/// Bijective base-26: a..z, aa..zz, aaa...
fn alphabetic(mut number: usize, base: u8) -> String {
    if number == 0 {
        return "0".to_string();
    }
    let mut letters = Vec::new();
    while number > 0 {
        number -= 1;
        letters.push((base + (number % 26) as u8) as char);
        number /= 26;
    }
    letters.iter().rev().collect()
}

fn roman(mut number: usize) -> Option<String> {
    if number == 0 || number > 3999 {
        return None;
    }
    const NUMERALS: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while number >= value {
            out.push_str(numeral);
            number -= value;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_and_padded_decimal() {
        assert_eq!(format_numbers(&[7], "1", None), "7");
        assert_eq!(format_numbers(&[7], "001", None), "007");
        assert_eq!(format_numbers(&[1234567], "1", Some((',', 3))), "1,234,567");
    }

    #[test]
    fn test_multi_level_reuses_last_token() {
        assert_eq!(format_numbers(&[1, 2, 3], "1.a", None), "1.b.c");
        assert_eq!(format_numbers(&[2, 4], "1", None), "2.4");
        assert_eq!(format_numbers(&[3, 1], "(I) ", None), "(III.I) ");
        assert_eq!(format_numbers(&[1, 2], "[1-1]", None), "[1-2]");
    }

    #[test]
    fn test_alphabetic_and_roman() {
        assert_eq!(format_numbers(&[1], "a", None), "a");
        assert_eq!(format_numbers(&[27], "A", None), "AA");
        assert_eq!(format_numbers(&[1999], "I", None), "MCMXCIX");
        assert_eq!(format_numbers(&[4], "i", None), "iv");
        assert_eq!(format_numbers(&[4000], "i", None), "4000");
    }

    #[test]
    fn test_unknown_token_falls_back_to_decimal() {
        assert_eq!(format_numbers(&[5], "x", None), "5");
        assert_eq!(format_numbers(&[5], "", None), "5");
        assert_eq!(format_numbers(&[], "(1)", None), "()");
    }

    #[test]
    fn test_value_form_rounds() {
        assert_eq!(format_value(2.5, "1", None), "3");
        assert_eq!(format_value(f64::NAN, "1", None), "NaN");
        assert_eq!(format_value(-2.0, "1", None), "-2");
        assert_eq!(format_value(0.0, "1", None), "0");
    }
}
