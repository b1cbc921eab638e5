//! Name mangling between Avalanche identifiers and linker-safe ASCII.
//!
//! Avalanche identifiers may be arbitrary byte strings, so names crossing
//! into the underlying system are mangled:
//!
//! - `-` becomes `_`, `.` becomes `__`, `:` becomes `___`, except when the
//!   previous output byte is already an underscore;
//! - `[a-zA-Z0-9]` pass through;
//! - any other byte becomes `$HH` with upper-case hex digits;
//! - the whole result is prefixed with `a$`.
//!
//! For example `avast.ava-lang.org:prelude.+` mangles to
//! `a$avast__ava_lang__org___prelude__$2B`. Demangling recognises the `a$`
//! prefix and inverts the transformation; anything else is passed through
//! as an unmangled name.

use std::fmt;

/// How a name has been, or is to be, mangled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MangleScheme {
    /// The name is used verbatim.
    #[default]
    None,
    /// The native Avalanche scheme described in the module docs.
    Ava,
}

/// A name paired with the scheme that (un)mangles it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Demangled {
    pub scheme: MangleScheme,
    pub name: String,
}

impl Demangled {
    #[must_use]
    pub fn ava(name: impl Into<String>) -> Self {
        Self {
            scheme: MangleScheme::Ava,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn unmangled(name: impl Into<String>) -> Self {
        Self {
            scheme: MangleScheme::None,
            name: name.into(),
        }
    }

    /// Produces the mangled form of this name.
    #[must_use]
    pub fn mangle(&self) -> String {
        const HEXITS: &[u8; 16] = b"0123456789ABCDEF";

        match self.scheme {
            MangleScheme::None => self.name.clone(),
            MangleScheme::Ava => {
                let mut out = String::with_capacity(2 + self.name.len() * 3);
                out.push_str("a$");
                for &b in self.name.as_bytes() {
                    let prev_underscore = out.as_bytes().last() == Some(&b'_');
                    match b {
                        b'-' if !prev_underscore => out.push('_'),
                        b'.' if !prev_underscore => out.push_str("__"),
                        b':' if !prev_underscore => out.push_str("___"),
                        b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => out.push(b as char),
                        _ => {
                            out.push('$');
                            out.push(HEXITS[usize::from(b >> 4)] as char);
                            out.push(HEXITS[usize::from(b & 0xF)] as char);
                        }
                    }
                }
                out
            }
        }
    }
}

impl fmt::Display for Demangled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            MangleScheme::None => write!(f, "none {}", self.name),
            MangleScheme::Ava => write!(f, "ava {}", self.name),
        }
    }
}

/// Identifies the scheme used on `mangled` and recovers the raw name.
///
/// Always succeeds: a string that cannot be interpreted under any known
/// scheme is returned unchanged with [`MangleScheme::None`]. Lower-case hex
/// digits after `$` are expressly rejected so that mangled forms stay
/// normalised.
#[must_use]
pub fn demangle(mangled: &str) -> Demangled {
    let bytes = mangled.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'a' || bytes[1] != b'$' {
        return Demangled::unmangled(mangled);
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 2;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                if i + 1 >= bytes.len() || bytes[i + 1] != b'_' {
                    out.push(b'-');
                    i += 1;
                } else if i + 2 >= bytes.len() || bytes[i + 2] != b'_' {
                    out.push(b'.');
                    i += 2;
                } else {
                    out.push(b':');
                    i += 3;
                }
            }
            b'$' => {
                let (Some(&hi), Some(&lo)) = (bytes.get(i + 1), bytes.get(i + 2)) else {
                    return Demangled::unmangled(mangled);
                };
                let (Some(hi), Some(lo)) = (upper_hexit(hi), upper_hexit(lo)) else {
                    return Demangled::unmangled(mangled);
                };
                out.push((hi << 4) | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    match String::from_utf8(out) {
        Ok(name) => Demangled::ava(name),
        Err(_) => Demangled::unmangled(mangled),
    }
}

fn upper_hexit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_mangles_to(expected: &str, scheme: MangleScheme, orig: &str) {
        let name = Demangled {
            scheme,
            name: orig.to_owned(),
        };
        let mangled = name.mangle();
        assert_eq!(expected, mangled);

        // Must also round-trip.
        let back = demangle(&mangled);
        assert_eq!(scheme, back.scheme);
        assert_eq!(orig, back.name);
    }

    fn assert_demangles_to(scheme: MangleScheme, expected: &str, orig: &str) {
        let out = demangle(orig);
        assert_eq!(scheme, out.scheme);
        assert_eq!(expected, out.name);

        assert_eq!(orig, out.mangle());
    }

    #[test]
    fn simple_noop_mangling() {
        assert_mangles_to("foobar", MangleScheme::None, "foobar");
    }

    #[test]
    fn simple_noop_demangling() {
        assert_demangles_to(MangleScheme::None, "foobar", "foobar");
    }

    #[test]
    fn doc_example_mangling() {
        assert_mangles_to(
            "a$avast__ava_lang__org___prelude__$2B",
            MangleScheme::Ava,
            "avast.ava-lang.org:prelude.+",
        );
    }

    #[test]
    fn consecutive_specials() {
        assert_mangles_to("a$_$2D_x__$2E__x___$3A___", MangleScheme::Ava, "---x...x:::");
        assert_mangles_to("a$_$3A", MangleScheme::Ava, "-:");
    }

    #[test]
    fn ava_like_zero_length() {
        assert_demangles_to(MangleScheme::None, "a$", "a$");
    }

    #[test]
    fn ava_like_isolated_dollar() {
        assert_demangles_to(MangleScheme::None, "a$$", "a$$");
    }

    #[test]
    fn ava_like_truncated_dollar() {
        assert_demangles_to(MangleScheme::None, "a$$0", "a$$0");
    }

    #[test]
    fn ava_like_invalid_dollar() {
        assert_demangles_to(MangleScheme::None, "a$$0X", "a$$0X");
        assert_demangles_to(MangleScheme::None, "a$$X0", "a$$X0");
    }

    #[test]
    fn ava_like_lowercase_dollar() {
        assert_demangles_to(MangleScheme::None, "a$$0a", "a$$0a");
        assert_demangles_to(MangleScheme::None, "a$$a0", "a$$a0");
    }
}
