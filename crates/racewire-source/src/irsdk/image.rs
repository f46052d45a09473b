//! Decoder for the iRacing shared-memory image.
//!
//! Layout (all integers little-endian `i32`):
//!
//! ```text
//! 0    ver
//! 4    status               bit 0 set while the sim is connected
//! 8    tickRate
//! 12   sessionInfoUpdate
//! 16   sessionInfoLen
//! 20   sessionInfoOffset
//! 24   numVars
//! 28   varHeaderOffset
//! 32   numBuf
//! 36   bufLen
//! 40   pad[2]
//! 48   varBuf[4]            { tickCount, bufOffset, pad[2] }
//! 112  end of header
//! ```
//!
//! Each variable header is 144 bytes: `type`, `offset`, `count`,
//! `countAsTime` (one byte plus three of padding), then NUL-padded `name[32]`,
//! `desc[64]` and `unit[32]`.

use serde_json::Value;

use crate::errors::{Result, SourceError};
use crate::provider::FieldValue;

pub const HEADER_LEN: usize = 112;
pub const VAR_HEADER_LEN: usize = 144;
pub const MAX_BUFS: usize = 4;
pub const STATUS_CONNECTED: i32 = 1;

const VAR_BUF_OFFSET: usize = 48;
const VAR_BUF_LEN: usize = 16;
const NAME_LEN: usize = 32;
const DESC_LEN: usize = 64;
const UNIT_LEN: usize = 32;
/// Reads of a variable before giving up on a buffer the sim keeps rewriting.
const READ_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarType {
    Char,
    Bool,
    Int,
    Bitfield,
    Float,
    Double,
}

impl VarType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Char,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::Bitfield,
            4 => Self::Float,
            5 => Self::Double,
            _ => return None,
        })
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Char => 0,
            Self::Bool => 1,
            Self::Int => 2,
            Self::Bitfield => 3,
            Self::Float => 4,
            Self::Double => 5,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::Char | Self::Bool => 1,
            Self::Int | Self::Bitfield | Self::Float => 4,
            Self::Double => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VarBuf {
    pub tick_count: i32,
    pub buf_offset: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub ver: i32,
    pub status: i32,
    pub tick_rate: i32,
    pub session_info_update: i32,
    pub session_info_len: i32,
    pub session_info_offset: i32,
    pub num_vars: i32,
    pub var_header_offset: i32,
    pub num_buf: i32,
    pub buf_len: i32,
    pub var_bufs: [VarBuf; MAX_BUFS],
}

impl Header {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(SourceError::Malformed(format!(
                "image is {} bytes, header needs {HEADER_LEN}",
                data.len()
            )));
        }
        let mut var_bufs = [VarBuf::default(); MAX_BUFS];
        for (i, buf) in var_bufs.iter_mut().enumerate() {
            let at = VAR_BUF_OFFSET + i * VAR_BUF_LEN;
            buf.tick_count = read_i32(data, at)?;
            buf.buf_offset = read_i32(data, at + 4)?;
        }
        Ok(Self {
            ver: read_i32(data, 0)?,
            status: read_i32(data, 4)?,
            tick_rate: read_i32(data, 8)?,
            session_info_update: read_i32(data, 12)?,
            session_info_len: read_i32(data, 16)?,
            session_info_offset: read_i32(data, 20)?,
            num_vars: read_i32(data, 24)?,
            var_header_offset: read_i32(data, 28)?,
            num_buf: read_i32(data, 32)?,
            buf_len: read_i32(data, 36)?,
            var_bufs,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.status & STATUS_CONNECTED != 0
    }

    /// The buffer with the highest tick count.
    pub fn latest_buf(&self) -> Result<VarBuf> {
        Ok(self.var_bufs[self.latest_slot()?])
    }

    /// Index of [`Self::latest_buf`] in `var_bufs`.
    pub fn latest_slot(&self) -> Result<usize> {
        let n = usize::try_from(self.num_buf).unwrap_or(0).min(MAX_BUFS);
        self.var_bufs[..n]
            .iter()
            .enumerate()
            .max_by_key(|(_, b)| b.tick_count)
            .map(|(slot, _)| slot)
            .ok_or_else(|| SourceError::Malformed("no variable buffers".into()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarHeader {
    pub var_type: VarType,
    pub offset: usize,
    pub count: usize,
    pub count_as_time: bool,
    pub name: String,
    pub desc: String,
    pub unit: String,
}

impl VarHeader {
    fn parse(data: &[u8], at: usize) -> Result<Self> {
        let raw_type = read_i32(data, at)?;
        let var_type = VarType::from_raw(raw_type)
            .ok_or_else(|| SourceError::Malformed(format!("unknown variable type {raw_type}")))?;
        let name_at = at + 16;
        Ok(Self {
            var_type,
            offset: to_usize(read_i32(data, at + 4)?, "variable offset")?,
            count: to_usize(read_i32(data, at + 8)?, "variable count")?,
            count_as_time: slice(data, at + 12, 1)?[0] != 0,
            name: read_cstr(slice(data, name_at, NAME_LEN)?),
            desc: read_cstr(slice(data, name_at + NAME_LEN, DESC_LEN)?),
            unit: read_cstr(slice(data, name_at + NAME_LEN + DESC_LEN, UNIT_LEN)?),
        })
    }
}

/// A borrowed, parsed view of one image.
pub struct ImageView<'a> {
    data: &'a [u8],
    header: Header,
}

impl<'a> ImageView<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = Header::parse(data)?;
        Ok(Self { data, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_connected(&self) -> bool {
        self.header.is_connected()
    }

    pub fn var_headers(&self) -> Result<Vec<VarHeader>> {
        let base = to_usize(self.header.var_header_offset, "var header offset")?;
        let n = to_usize(self.header.num_vars, "var count")?;
        (0..n)
            .map(|i| VarHeader::parse(self.data, base + i * VAR_HEADER_LEN))
            .collect()
    }

    pub fn find_var(&self, name: &str) -> Result<VarHeader> {
        let base = to_usize(self.header.var_header_offset, "var header offset")?;
        let n = to_usize(self.header.num_vars, "var count")?;
        for i in 0..n {
            let at = base + i * VAR_HEADER_LEN;
            let raw_name = slice(self.data, at + 16, NAME_LEN)?;
            if read_cstr(raw_name) == name {
                return VarHeader::parse(self.data, at);
            }
        }
        Err(SourceError::MissingField(name.to_string()))
    }

    /// Read a variable from the latest buffer.
    ///
    /// The sim rotates buffers while we read. A value only counts when the
    /// buffer's tick is unchanged after decoding; otherwise the header is
    /// re-read and the newest buffer tried again.
    pub fn read_var(&self, name: &str) -> Result<FieldValue> {
        let var = self.find_var(name)?;
        let mut header = self.header.clone();
        for _ in 0..READ_ATTEMPTS {
            let slot = header.latest_slot()?;
            let buf = header.var_bufs[slot];
            let value = self.decode_var(&var, buf)?;
            if self.tick_at(slot)? == buf.tick_count {
                return Ok(value);
            }
            header = Header::parse(self.data)?;
        }
        Err(SourceError::Torn(name.to_string()))
    }

    fn tick_at(&self, slot: usize) -> Result<i32> {
        read_i32(self.data, VAR_BUF_OFFSET + slot * VAR_BUF_LEN)
    }

    fn decode_var(&self, var: &VarHeader, buf: VarBuf) -> Result<FieldValue> {
        let name = &var.name;
        let base = to_usize(buf.buf_offset, "buffer offset")? + var.offset;
        let size = var.var_type.size();
        let mut values = (0..var.count.max(1))
            .map(|i| decode(var.var_type, slice(self.data, base + i * size, size)?))
            .collect::<Result<Vec<_>>>()?;
        if var.count <= 1 {
            return values
                .pop()
                .ok_or_else(|| SourceError::Malformed(format!("empty variable {name}")));
        }
        Ok(FieldValue::Array(values))
    }

    /// The raw session string, decoded as Latin-1 up to the first NUL.
    pub fn session_yaml(&self) -> Result<String> {
        let offset = to_usize(self.header.session_info_offset, "session info offset")?;
        let len = to_usize(self.header.session_info_len, "session info length")?;
        let raw = slice(self.data, offset, len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(raw[..end].iter().map(|&b| char::from(b)).collect())
    }

    /// The whole session description as a JSON tree.
    pub fn session_info(&self) -> Result<Value> {
        let yaml = self.session_yaml()?;
        let tree: serde_yaml::Value = serde_yaml::from_str(&yaml)?;
        Ok(serde_json::to_value(tree)?)
    }

    pub fn session_section(&self, name: &str) -> Result<Value> {
        let mut info = self.session_info()?;
        match info.get_mut(name) {
            Some(section) => Ok(section.take()),
            None => Err(SourceError::MissingSection(name.to_string())),
        }
    }
}

fn decode(var_type: VarType, bytes: &[u8]) -> Result<FieldValue> {
    Ok(match var_type {
        VarType::Char => FieldValue::Char(bytes[0]),
        VarType::Bool => FieldValue::Bool(bytes[0] != 0),
        VarType::Int => FieldValue::Int(i32::from_le_bytes(array(bytes)?)),
        VarType::Bitfield => FieldValue::Bitfield(u32::from_le_bytes(array(bytes)?)),
        VarType::Float => FieldValue::Float(f32::from_le_bytes(array(bytes)?)),
        VarType::Double => FieldValue::Double(f64::from_le_bytes(array(bytes)?)),
    })
}

fn array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| SourceError::Malformed(format!("expected {N} bytes, got {}", bytes.len())))
}

fn slice(data: &[u8], at: usize, len: usize) -> Result<&[u8]> {
    at.checked_add(len)
        .and_then(|end| data.get(at..end))
        .ok_or_else(|| {
            SourceError::Malformed(format!(
                "range {at}..{} outside {}-byte image",
                at.saturating_add(len),
                data.len()
            ))
        })
}

fn read_i32(data: &[u8], at: usize) -> Result<i32> {
    Ok(i32::from_le_bytes(array(slice(data, at, 4)?)?))
}

fn to_usize(v: i32, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| SourceError::Malformed(format!("negative {what}: {v}")))
}

fn read_cstr(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    raw[..end].iter().map(|&b| char::from(b)).collect()
}
