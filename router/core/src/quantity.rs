use std::{cmp::Ordering, fmt, ops::Add, str::FromStr};

/// An arbitrary-precision resource quantity, `unscaled * 10^scale`.
///
/// Implements the Kubernetes quantity grammar (`100m`, `250u`, `1536Ki`,
/// `1.5e3`, ...). CPU and memory samples are compared exactly as decimals and
/// are never routed through floating point: metric readings are typically
/// nano-scaled integers whose differences would vanish in an `f64`.
#[derive(Copy, Clone, Debug)]
pub struct Quantity {
    unscaled: i128,
    scale: i32,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("empty quantity")]
    Empty,

    #[error("quantity has no digits")]
    NoDigits,

    #[error("invalid suffix: {}", EXPECTED_SUFFIXES)]
    InvalidSuffix,

    #[error("quantity overflows the internal representation")]
    Overflow,
}

const EXPECTED_SUFFIXES: &str =
    "expected one of 'n', 'u', 'm', 'k', 'M', 'G', 'T', 'P', 'E', 'Ki', 'Mi', 'Gi', 'Ti', 'Pi' or 'Ei'";

impl Quantity {
    pub const fn zero() -> Self {
        Self {
            unscaled: 0,
            scale: 0,
        }
    }

    /// A quantity of `unscaled * 10^scale`, e.g. `scaled(500, -3)` for half a
    /// core.
    pub const fn scaled(unscaled: i128, scale: i32) -> Self {
        Self { unscaled, scale }
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

// === Ordering ===
//
// Comparison aligns the two values at a common decimal scale. The
// finer-scaled magnitude is reduced by division rather than raising the
// coarser one, so the comparison cannot overflow `u128`.

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        let (ls, rs) = (self.unscaled.signum(), other.unscaled.signum());
        if ls != rs {
            return ls.cmp(&rs);
        }
        if ls == 0 {
            return Ordering::Equal;
        }
        let magnitude = cmp_magnitude(
            self.unscaled.unsigned_abs(),
            self.scale,
            other.unscaled.unsigned_abs(),
            other.scale,
        );
        if ls > 0 {
            magnitude
        } else {
            magnitude.reverse()
        }
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Quantity {}

/// Compares `a * 10^sa` with `b * 10^sb` for nonzero magnitudes.
fn cmp_magnitude(a: u128, sa: i32, b: u128, sb: i32) -> Ordering {
    match sa.cmp(&sb) {
        Ordering::Equal => a.cmp(&b),
        Ordering::Greater => {
            // a * 10^(sa-sb) vs b, via reducing b.
            let Some(pow) = 10u128.checked_pow((sa - sb) as u32) else {
                // a >= 1 shifted past 10^38 exceeds any u128 value.
                return Ordering::Greater;
            };
            let (q, r) = (b / pow, b % pow);
            match a.cmp(&q) {
                Ordering::Equal if r != 0 => Ordering::Less,
                ord => ord,
            }
        }
        Ordering::Less => cmp_magnitude(b, sb, a, sa).reverse(),
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        if self.unscaled == 0 {
            return rhs;
        }
        if rhs.unscaled == 0 {
            return self;
        }
        let scale = self.scale.min(rhs.scale);
        let unscaled = rescale(self, scale).saturating_add(rescale(rhs, scale));
        Quantity { unscaled, scale }
    }
}

fn rescale(q: Quantity, scale: i32) -> i128 {
    debug_assert!(scale <= q.scale);
    match 10i128
        .checked_pow((q.scale - scale) as u32)
        .and_then(|pow| q.unscaled.checked_mul(pow))
    {
        Some(unscaled) => unscaled,
        None if q.unscaled < 0 => i128::MIN,
        None => i128::MAX,
    }
}

impl FromStr for Quantity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        let (negative, s) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let bytes = s.as_bytes();
        let mut unscaled: i128 = 0;
        let mut scale: i32 = 0;
        let mut digits = 0usize;
        let mut i = 0usize;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            unscaled = unscaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(bytes[i] - b'0')))
                .ok_or(ParseError::Overflow)?;
            digits += 1;
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                unscaled = unscaled
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(i128::from(bytes[i] - b'0')))
                    .ok_or(ParseError::Overflow)?;
                scale -= 1;
                digits += 1;
                i += 1;
            }
        }
        if digits == 0 {
            return Err(ParseError::NoDigits);
        }

        let suffix = &s[i..];
        if !suffix.is_empty() {
            scale = apply_suffix(suffix, &mut unscaled, scale)?;
        }
        if negative {
            unscaled = -unscaled;
        }
        Ok(Quantity { unscaled, scale })
    }
}

fn apply_suffix(suffix: &str, unscaled: &mut i128, scale: i32) -> Result<i32, ParseError> {
    // Scientific notation. A bare 'E' (and 'Ei') is a suffix, not an
    // exponent, so only treat 'e'/'E' as an exponent marker when a signed
    // integer follows.
    if let Some(exp) = suffix.strip_prefix(['e', 'E']).and_then(parse_exponent) {
        return scale.checked_add(exp).ok_or(ParseError::Overflow);
    }

    let shift = match suffix {
        "n" => -9,
        "u" => -6,
        "m" => -3,
        "k" => 3,
        "M" => 6,
        "G" => 9,
        "T" => 12,
        "P" => 15,
        "E" => 18,
        "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" => {
            let pow = match suffix.as_bytes()[0] {
                b'K' => 10,
                b'M' => 20,
                b'G' => 30,
                b'T' => 40,
                b'P' => 50,
                _ => 60,
            };
            *unscaled = unscaled
                .checked_mul(1i128 << pow)
                .ok_or(ParseError::Overflow)?;
            return Ok(scale);
        }
        _ => return Err(ParseError::InvalidSuffix),
    };
    Ok(scale + shift)
}

fn parse_exponent(exp: &str) -> Option<i32> {
    let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    exp.parse().ok()
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unscaled == 0 {
            return f.write_str("0");
        }
        if self.unscaled < 0 {
            f.write_str("-")?;
        }
        let digits = self.unscaled.unsigned_abs().to_string();
        if self.scale >= 0 {
            write!(f, "{}{}", digits, "0".repeat(self.scale as usize))
        } else {
            let frac = (-self.scale) as usize;
            let (int, frac) = if digits.len() > frac {
                let (int, frac) = digits.split_at(digits.len() - frac);
                (int.to_string(), frac.to_string())
            } else {
                ("0".to_string(), format!("{:0>width$}", digits, width = frac))
            };
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                f.write_str(&int)
            } else {
                write!(f, "{int}.{frac}")
            }
        }
    }
}
