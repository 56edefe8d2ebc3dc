//! Node path validation and safe name derivation.
//!
//! Lock names are arbitrary user strings, but coordination-service node names
//! are not: the separator, control characters, and a few reserved segments
//! are disallowed. [`ZkPath::safe_child`] maps any name onto a valid child
//! segment, escaping disallowed characters and appending a fixed-length hash
//! of the original name so distinct names never collide.

use std::fmt;

use sha2::{Digest, Sha512};

use zk_lock_core::error::{LockError, LockResult};

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Root-level segment reserved by the coordination service.
const RESERVED_ROOT_SEGMENT: &str = "zookeeper";

/// Stand-in base for the empty name, hashed like any other original name.
const EMPTY_NAME_SENTINEL: &str = "__EMPTY__";

/// Maximum escaped-base length before the hash suffix.
const MAX_BASE_NAME_CHARS: usize = 64;

/// Hash length in Base32 characters (160 bits / 5 bits per char).
const HASH_LENGTH_IN_CHARS: usize = 32;

const BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// A validated, normalized node path.
///
/// Equality and hashing are by string value. The root path is `"/"`; every
/// other path starts with the separator and does not end with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ZkPath(String);

impl ZkPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self(SEPARATOR.to_string())
    }

    /// Validates and normalizes a path string.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidPath`] if the path does not start with the
    /// separator, ends with it (and is not the root), contains an empty
    /// segment, a disallowed character, a `.` or `..` segment, or the
    /// reserved root-level `zookeeper` segment.
    pub fn parse(path: &str) -> LockResult<Self> {
        if path.is_empty() {
            return Err(LockError::InvalidPath("path is empty".to_string()));
        }
        if !path.starts_with(SEPARATOR) {
            return Err(LockError::InvalidPath(format!(
                "path must start with '{SEPARATOR}': {path:?}"
            )));
        }
        if path == "/" {
            return Ok(Self::root());
        }
        if path.ends_with(SEPARATOR) {
            return Err(LockError::InvalidPath(format!(
                "path must not end with '{SEPARATOR}': {path:?}"
            )));
        }

        for (index, segment) in path.split(SEPARATOR).skip(1).enumerate() {
            validate_segment(segment)
                .map_err(|reason| LockError::InvalidPath(format!("{reason}: {path:?}")))?;
            if index == 0 && segment == RESERVED_ROOT_SEGMENT {
                return Err(LockError::InvalidPath(format!(
                    "'{RESERVED_ROOT_SEGMENT}' is reserved at the root level: {path:?}"
                )));
            }
        }

        Ok(Self(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Final segment of the path; empty for the root.
    pub fn name(&self) -> &str {
        match self.0.rfind(SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => "",
        }
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<ZkPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Appends a child segment, validating it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidName`] if `name` is not a valid single
    /// segment under this path.
    pub fn child(&self, name: &str) -> LockResult<ZkPath> {
        validate_segment(name).map_err(|reason| LockError::InvalidName(format!(
            "{reason}: {name:?}"
        )))?;
        if name.contains(SEPARATOR) {
            return Err(LockError::InvalidName(format!(
                "name must not contain '{SEPARATOR}': {name:?}"
            )));
        }
        if self.is_root() && name == RESERVED_ROOT_SEGMENT {
            return Err(LockError::InvalidName(format!(
                "'{RESERVED_ROOT_SEGMENT}' is reserved at the root level"
            )));
        }
        Ok(self.join_segment(name))
    }

    /// Derives a valid child path from an arbitrary name.
    ///
    /// Names that already form a valid segment are used verbatim. Anything
    /// else has its disallowed characters replaced with `_` and a Base32
    /// hash of the *original* name appended, so two distinct names never map
    /// to the same child. Deterministic: the same name always produces the
    /// same path.
    pub fn safe_child(&self, raw_name: &str) -> ZkPath {
        if let Ok(path) = self.child(raw_name) {
            return path;
        }

        let base: String = if raw_name.is_empty() {
            EMPTY_NAME_SENTINEL.to_string()
        } else {
            raw_name
                .chars()
                .take(MAX_BASE_NAME_CHARS)
                .map(|c| if c == SEPARATOR || is_disallowed_char(c) { '_' } else { c })
                .collect()
        };
        let name_hash = compute_hash(raw_name.as_bytes());

        self.join_segment(&format!("{base}{name_hash}"))
    }

    fn join_segment(&self, name: &str) -> ZkPath {
        if self.is_root() {
            ZkPath(format!("/{name}"))
        } else {
            ZkPath(format!("{}/{name}", self.0))
        }
    }
}

impl fmt::Display for ZkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("path contains an empty segment");
    }
    if segment == "." || segment == ".." {
        return Err("relative segments are not allowed");
    }
    if segment.chars().any(is_disallowed_char) {
        return Err("segment contains a disallowed character");
    }
    Ok(())
}

/// Characters the coordination service rejects in node names: NUL, the
/// C0/C1 control ranges, and the surrogate/private-use/specials areas.
fn is_disallowed_char(c: char) -> bool {
    let u = c as u32;
    u == 0
        || (0x0001..=0x001f).contains(&u)
        || (0x007f..=0x009f).contains(&u)
        || (0xd800..=0xf8ff).contains(&u)
        || (0xfff0..=0xffff).contains(&u)
}

/// Computes a Base32 hash of the input bytes.
///
/// SHA-512 truncated to 160 bits (32 Base32 characters): good collision
/// resistance while keeping node names reasonably short.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    let hash_bytes = hasher.finalize();

    let mut chars = Vec::with_capacity(HASH_LENGTH_IN_CHARS);
    let mut byte_index = 0;
    let mut bit_buffer = 0u32;
    let mut bits_remaining = 0;

    for _ in 0..HASH_LENGTH_IN_CHARS {
        if bits_remaining < 5 && byte_index < 20 {
            bit_buffer |= (hash_bytes[byte_index] as u32) << bits_remaining;
            bits_remaining += 8;
            byte_index += 1;
        }

        let char_index = (bit_buffer & 31) as usize;
        chars.push(BASE32_ALPHABET[char_index] as char);
        bit_buffer >>= 5;
        bits_remaining -= 5;
    }

    chars.into_iter().collect()
}
