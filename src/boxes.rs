use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{Seek, SeekFrom};
use std::str::FromStr;

#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Wildcard used by [`BoxPath`] matching. Never a valid box type.
    pub const ANY: FourCC = FourCC([0; 4]);

    pub const fn new(code: &[u8; 4]) -> Self {
        FourCC(*code)
    }

    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }

    pub fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl From<u32> for FourCC {
    fn from(v: u32) -> Self {
        FourCC(v.to_be_bytes())
    }
}

impl FromStr for FourCC {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| crate::Error::Schema(format!("'{s}' is not a four-character code")))?;
        Ok(FourCC(b))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl Serialize for FourCC {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoxHeader {
    pub offset: u64,      // file offset of header start
    pub size: u64,        // total size including header
    pub header_size: u64, // 8 or 16
    pub box_type: FourCC,
    pub extends_to_end: bool, // size field was 0
}

impl BoxHeader {
    /// A header for a box that has not been written yet. Size is provisional.
    pub fn new(box_type: FourCC) -> Self {
        Self {
            offset: 0,
            size: crate::header::SMALL_HEADER_SIZE,
            header_size: crate::header::SMALL_HEADER_SIZE,
            box_type,
            extends_to_end: false,
        }
    }

    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_size
    }

    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size)
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn seek_to_start<S: Seek>(&self, s: &mut S) -> std::io::Result<u64> {
        s.seek(SeekFrom::Start(self.offset))
    }

    pub fn seek_to_payload<S: Seek>(&self, s: &mut S) -> std::io::Result<u64> {
        s.seek(SeekFrom::Start(self.payload_offset()))
    }

    pub fn seek_to_end<S: Seek>(&self, s: &mut S) -> std::io::Result<u64> {
        s.seek(SeekFrom::Start(self.end()))
    }
}

/// Box types from the root down to (and including) a box.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct BoxPath(Vec<FourCC>);

impl BoxPath {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, t: FourCC) -> Self {
        let mut v = self.0.clone();
        v.push(t);
        Self(v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<FourCC> {
        self.0.last().copied()
    }

    pub fn as_slice(&self) -> &[FourCC] {
        &self.0
    }

    /// Exact match, with [`FourCC::ANY`] in `pattern` matching any type.
    pub fn matches(&self, pattern: &BoxPath) -> bool {
        self.len() == pattern.len() && self.is_prefix_of(pattern)
    }

    /// True when `pattern` continues below this path.
    pub fn is_prefix_of(&self, pattern: &BoxPath) -> bool {
        self.len() <= pattern.len()
            && self
                .0
                .iter()
                .zip(&pattern.0)
                .all(|(a, p)| *p == FourCC::ANY || a == p)
    }
}

impl From<Vec<FourCC>> for BoxPath {
    fn from(v: Vec<FourCC>) -> Self {
        Self(v)
    }
}

impl FromStr for BoxPath {
    type Err = crate::Error;

    /// `moov/trak/*/mdhd`; `*` is the wildcard.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('/')
            .filter(|p| !p.is_empty())
            .map(|p| if p == "*" { Ok(FourCC::ANY) } else { p.parse() })
            .collect::<Result<Vec<_>, _>>()
            .map(BoxPath)
    }
}

impl fmt::Display for BoxPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            if *t == FourCC::ANY {
                f.write_str("*")?;
            } else {
                write!(f, "{t}")?;
            }
        }
        Ok(())
    }
}
