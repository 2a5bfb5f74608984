// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * Copyright (c) 2025 Code Construct
 */

/// Takes a `usize` from a build-time environment variable.
///
/// If unset, the default is used. Can be used in a const context.
macro_rules! get_build_var {
    ($name:literal, $default:expr) => {{
        match option_env!($name) {
            Some(v) => {
                let Ok(v) = usize::from_str_radix(v, 10) else {
                    // concat! because const format_args isn't stable
                    panic!(concat!(
                        "Bad value for environment variable ",
                        $name
                    ));
                };
                v
            }
            None => $default,
        }
    }};
}

/// Returns `true` if a bulk transfer chunk of `n` bytes terminates
/// the wire transfer.
///
/// A transfer ends with a packet shorter than the maximum packet size,
/// which includes a zero-length packet.
pub(crate) fn is_short(n: usize, mps: usize) -> bool {
    n == 0 || n % mps != 0
}

/// Rounds `n` up to a multiple of `mps`.
pub(crate) fn round_up(n: usize, mps: usize) -> usize {
    n.div_ceil(mps) * mps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_packets() {
        assert!(is_short(0, 64));
        assert!(is_short(1, 64));
        assert!(is_short(63, 64));
        assert!(!is_short(64, 64));
        assert!(is_short(100, 64));
        assert!(!is_short(512, 64));
        assert!(is_short(500, 512));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_up(0, 64), 0);
        assert_eq!(round_up(1, 64), 64);
        assert_eq!(round_up(64, 64), 64);
        assert_eq!(round_up(65, 512), 512);
    }
}
