use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// File type and permission bits, laid out like `st_mode`.
///
/// A zero mode is the "unknown" mode: listings that cannot recover the
/// original mode report it rather than guessing.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(u32);

impl FileMode {
    /// Mask selecting the file type bits.
    pub const TYPE_MASK: u32 = 0o170000;
    /// Mask selecting permission, setuid, setgid and sticky bits.
    pub const PERM_MASK: u32 = 0o7777;

    pub const REGULAR: u32 = 0o100000;
    pub const DIRECTORY: u32 = 0o040000;
    pub const SYMLINK: u32 = 0o120000;

    /// The unknown mode.
    pub const UNKNOWN: Self = Self(0);

    /// Wrap raw mode bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Wrap raw mode bits, rejecting anything outside the type/permission masks.
    pub fn try_from_bits(bits: u32) -> Result<Self, TypeError> {
        if bits & !(Self::TYPE_MASK | Self::PERM_MASK) != 0 {
            return Err(TypeError::ModeOutOfRange(bits));
        }
        Ok(Self(bits))
    }

    /// A regular file with the given permissions.
    pub const fn regular(perm: u32) -> Self {
        Self(Self::REGULAR | (perm & Self::PERM_MASK))
    }

    /// A directory with the given permissions.
    pub const fn directory(perm: u32) -> Self {
        Self(Self::DIRECTORY | (perm & Self::PERM_MASK))
    }

    /// A symbolic link. Link permissions are conventionally `0777`.
    pub const fn symlink() -> Self {
        Self(Self::SYMLINK | 0o777)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The type bits alone.
    pub const fn file_type(self) -> u32 {
        self.0 & Self::TYPE_MASK
    }

    /// The permission bits alone.
    pub const fn permissions(self) -> u32 {
        self.0 & Self::PERM_MASK
    }

    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }

    pub const fn is_dir(self) -> bool {
        self.file_type() == Self::DIRECTORY
    }

    pub const fn is_symlink(self) -> bool {
        self.file_type() == Self::SYMLINK
    }

    pub const fn is_regular(self) -> bool {
        self.file_type() == Self::REGULAR
    }

    /// Parse an octal string such as `0100644`, `0o100644` or `100644`.
    pub fn parse_octal(s: &str) -> Result<Self, TypeError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0o")
            .or_else(|| trimmed.strip_prefix("0O"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(TypeError::InvalidMode(s.to_string()));
        }
        let bits =
            u32::from_str_radix(digits, 8).map_err(|_| TypeError::InvalidMode(s.to_string()))?;
        Self::try_from_bits(bits)
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:#o})", self.0)
    }
}

/// Renders an `ls -l` style type character and permission string.
impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            return write!(f, "?---------");
        }
        let kind = match self.file_type() {
            Self::DIRECTORY => 'd',
            Self::SYMLINK => 'l',
            Self::REGULAR => '-',
            _ => '?',
        };
        let perm = self.permissions();
        let mut out = String::with_capacity(10);
        out.push(kind);
        for shift in [6u32, 3, 0] {
            let triple = (perm >> shift) & 0o7;
            out.push(if triple & 0o4 != 0 { 'r' } else { '-' });
            out.push(if triple & 0o2 != 0 { 'w' } else { '-' });
            out.push(if triple & 0o1 != 0 { 'x' } else { '-' });
        }
        f.write_str(&out)
    }
}

impl From<u32> for FileMode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}
